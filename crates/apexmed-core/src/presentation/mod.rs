//! # Presentation
//!
//! Serializes show requests against the host UI lifecycle.
//!
//! ```text
//! Requested ─▶ AwaitingForeground ─▶ Dispatched ─▶ Completed
//!     │                │                  │
//!     └────────────────┴──────────────────┴──────▶ Failed(reason)
//! ```
//!
//! At most one presentation is in flight system-wide. A show takes the
//! cached bid, locates a container, waits for it to reach the foreground
//! (foreground timeout) and then resume (resume timeout), and dispatches the
//! render primitive exactly once on the UI thread. The in-flight slot is
//! released when the attempt ends, whatever the render outcome.

mod lifecycle;
mod ui;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::cache::{AdCache, CacheMiss, CachedBid};
use crate::clock::{Clock, SystemClock};
use crate::domain::{AdapterId, PlacementId};
use crate::error::PresentationError;
use crate::http_client::{HttpClient, HttpRequest};
use crate::metrics::MetricsAggregator;
use crate::remote_config::ConfigDistributor;
use crate::viewability::{NoopViewability, ViewabilityBridge};

pub use lifecycle::{
    Container, ContainerHandle, ContainerId, ContainerRegistry, LifecycleEvent, LifecycleSource,
    LifecycleState,
};
pub use ui::{RenderAction, RenderCompletion, RenderRequest, UiExecutor, UiTask, UiThread};

/// Presentation timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresentationSettings {
    #[serde(with = "crate::settings::duration_ms")]
    pub foreground_timeout: Duration,
    #[serde(with = "crate::settings::duration_ms")]
    pub resume_timeout: Duration,
    /// Upper bound on how long a dispatched render may hold the slot.
    #[serde(with = "crate::settings::duration_ms")]
    pub render_timeout: Duration,
}

impl Default for PresentationSettings {
    fn default() -> Self {
        Self {
            foreground_timeout: Duration::from_secs(4),
            resume_timeout: Duration::from_secs(2),
            render_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationPhase {
    Requested,
    AwaitingForeground,
    Dispatched,
}

/// The single in-flight show request.
#[derive(Debug, Clone)]
pub struct PendingPresentation {
    pub request_id: u64,
    pub placement: PlacementId,
    pub container: Option<ContainerHandle>,
    pub phase: PresentationPhase,
}

/// Result of a completed presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationReceipt {
    pub request_id: u64,
    pub placement: PlacementId,
    pub bid_id: String,
    pub adapter: AdapterId,
    pub elapsed: Duration,
}

type Slot = Mutex<Option<PendingPresentation>>;

/// Releases the in-flight slot when a show attempt ends or is cancelled.
struct SlotGuard<'a> {
    slot: &'a Slot,
    request_id: u64,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self
            .slot
            .lock()
            .expect("presentation slot lock is not poisoned");
        if slot
            .as_ref()
            .is_some_and(|pending| pending.request_id == self.request_id)
        {
            *slot = None;
        }
    }
}

pub struct PresentationCoordinator {
    settings: PresentationSettings,
    cache: AdCache,
    config: Arc<ConfigDistributor>,
    lifecycle: Arc<dyn LifecycleSource>,
    ui: Arc<dyn UiExecutor>,
    metrics: Arc<MetricsAggregator>,
    viewability: Arc<dyn ViewabilityBridge>,
    tracker: Option<Arc<dyn HttpClient>>,
    clock: Arc<dyn Clock>,
    slot: Slot,
    next_request_id: AtomicU64,
}

impl PresentationCoordinator {
    pub fn new(
        settings: PresentationSettings,
        cache: AdCache,
        config: Arc<ConfigDistributor>,
        lifecycle: Arc<dyn LifecycleSource>,
        ui: Arc<dyn UiExecutor>,
        metrics: Arc<MetricsAggregator>,
    ) -> Self {
        Self {
            settings,
            cache,
            config,
            lifecycle,
            ui,
            metrics,
            viewability: Arc::new(NoopViewability),
            tracker: None,
            clock: Arc::new(SystemClock),
            slot: Mutex::new(None),
            next_request_id: AtomicU64::new(1),
        }
    }

    pub fn with_viewability(mut self, viewability: Arc<dyn ViewabilityBridge>) -> Self {
        self.viewability = viewability;
        self
    }

    /// Client used to fire impression tracking URLs after a completed show.
    pub fn with_tracker(mut self, tracker: Arc<dyn HttpClient>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn pending(&self) -> Option<PendingPresentation> {
        self.slot
            .lock()
            .expect("presentation slot lock is not poisoned")
            .clone()
    }

    pub fn is_presenting(&self) -> bool {
        self.pending().is_some()
    }

    /// Show the cached bid for `placement` in `container` (or the host's
    /// current container). Rejected immediately while another show is in
    /// flight.
    pub async fn show(
        &self,
        container: Option<&ContainerId>,
        placement: &PlacementId,
        action: RenderAction,
    ) -> Result<PresentationReceipt, PresentationError> {
        let started = self.clock.now();
        let result = match self.claim(placement) {
            Ok(guard) => {
                let result = self.run(guard.request_id, container, placement, action).await;
                drop(guard);
                result
            }
            Err(error) => Err(error),
        };

        match &result {
            Ok(receipt) => {
                self.metrics.record_presentation(placement, "completed");
                info!(
                    request_id = receipt.request_id,
                    placement = %placement,
                    adapter = %receipt.adapter,
                    elapsed_ms = self.clock.now().saturating_duration_since(started).as_millis() as u64,
                    "presentation completed"
                );
            }
            Err(error) => {
                self.metrics.record_presentation(placement, error.reason());
                warn!(placement = %placement, reason = error.reason(), "presentation failed");
            }
        }
        result
    }

    fn claim(&self, placement: &PlacementId) -> Result<SlotGuard<'_>, PresentationError> {
        let mut slot = self
            .slot
            .lock()
            .expect("presentation slot lock is not poisoned");
        if let Some(pending) = slot.as_ref() {
            debug!(
                in_flight = pending.request_id,
                placement = %placement,
                "show rejected, presentation in flight"
            );
            return Err(PresentationError::AlreadyPresenting);
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        *slot = Some(PendingPresentation {
            request_id,
            placement: placement.clone(),
            container: None,
            phase: PresentationPhase::Requested,
        });
        Ok(SlotGuard {
            slot: &self.slot,
            request_id,
        })
    }

    fn advance(&self, request_id: u64, phase: PresentationPhase, container: Option<&ContainerHandle>) {
        let mut slot = self
            .slot
            .lock()
            .expect("presentation slot lock is not poisoned");
        if let Some(pending) = slot.as_mut().filter(|p| p.request_id == request_id) {
            pending.phase = phase;
            if let Some(container) = container {
                pending.container = Some(container.clone());
            }
        }
    }

    async fn run(
        &self,
        request_id: u64,
        hint: Option<&ContainerId>,
        placement: &PlacementId,
        action: RenderAction,
    ) -> Result<PresentationReceipt, PresentationError> {
        let started = self.clock.now();
        if let Some(reason) = self.config.guard_show(placement) {
            return Err(PresentationError::Blocked { reason });
        }

        let bid = self
            .cache
            .take_detailed(placement)
            .await
            .map_err(|miss| match miss {
                CacheMiss::Expired => PresentationError::Expired,
                CacheMiss::Absent => PresentationError::NotReady,
            })?;

        let handle = self
            .lifecycle
            .locate(hint)
            .filter(ContainerHandle::is_alive)
            .ok_or(PresentationError::NoContainer)?;
        self.advance(request_id, PresentationPhase::AwaitingForeground, Some(&handle));
        debug!(request_id, container = %handle.id(), "awaiting container foreground");

        wait_for_state(
            &handle,
            LifecycleState::is_foreground,
            self.settings.foreground_timeout,
            PresentationError::ForegroundTimeout,
        )
        .await?;
        wait_for_state(
            &handle,
            |state| state == LifecycleState::Resumed,
            self.settings.resume_timeout,
            PresentationError::ResumeTimeout,
        )
        .await?;

        self.advance(request_id, PresentationPhase::Dispatched, None);
        let (completion, done) = RenderCompletion::channel();
        let render = RenderRequest {
            request_id,
            container: handle.clone(),
            bid: bid.clone(),
            completion,
        };
        let viewability = Arc::clone(&self.viewability);
        let container_id = handle.id().clone();
        let dispatched = self.ui.dispatch(Box::new(move || {
            viewability.session_started(&render.bid, &container_id);
            action(render);
        }));
        if !dispatched {
            return Err(PresentationError::RenderFailed {
                message: String::from("ui thread unavailable"),
            });
        }

        let rendered = await_render(&handle, done, self.settings.render_timeout).await;
        self.viewability.session_finished(&bid, rendered.is_ok());
        rendered?;

        self.fire_tracking(&bid);
        Ok(PresentationReceipt {
            request_id,
            placement: placement.clone(),
            bid_id: bid.bid_id,
            adapter: bid.adapter,
            elapsed: self.clock.now().saturating_duration_since(started),
        })
    }

    fn fire_tracking(&self, bid: &CachedBid) {
        let Some(tracker) = &self.tracker else {
            return;
        };
        for url in &bid.tracking_urls {
            let tracker = Arc::clone(tracker);
            let request = HttpRequest::get(url.as_str());
            tokio::spawn(async move {
                if let Err(error) = tracker.execute(request).await {
                    debug!(%error, "tracking url failed");
                }
            });
        }
    }
}

/// Wait until `ready(state)` holds, failing on destruction or after `limit`.
async fn wait_for_state(
    handle: &ContainerHandle,
    ready: impl Fn(LifecycleState) -> bool,
    limit: Duration,
    on_timeout: PresentationError,
) -> Result<(), PresentationError> {
    let Some(mut updates) = handle.subscribe() else {
        return Err(PresentationError::ActivityDestroyed);
    };

    let wait = async {
        loop {
            let state = *updates.borrow_and_update();
            if state == LifecycleState::Destroyed {
                return Err(PresentationError::ActivityDestroyed);
            }
            if ready(state) {
                return Ok(());
            }
            if updates.changed().await.is_err() {
                return Err(PresentationError::ActivityDestroyed);
            }
        }
    };

    tokio::time::timeout(limit, wait)
        .await
        .unwrap_or(Err(on_timeout))
}

/// Wait for the render outcome; destruction of the container fails it.
async fn await_render(
    handle: &ContainerHandle,
    done: oneshot::Receiver<Result<(), String>>,
    limit: Duration,
) -> Result<(), PresentationError> {
    let destroyed = async {
        if let Some(mut updates) = handle.subscribe() {
            loop {
                if *updates.borrow_and_update() == LifecycleState::Destroyed {
                    break;
                }
                if updates.changed().await.is_err() {
                    break;
                }
            }
        }
    };

    tokio::select! {
        biased;
        result = done => match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(PresentationError::RenderFailed { message }),
            Err(_) => Err(PresentationError::RenderFailed {
                message: String::from("render abandoned"),
            }),
        },
        _ = destroyed => Err(PresentationError::ActivityDestroyed),
        _ = tokio::time::sleep(limit) => Err(PresentationError::RenderTimeout),
    }
}
