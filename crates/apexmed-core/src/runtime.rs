//! # Runtime Context
//!
//! [`MediationRuntime`] owns every shared component: breaker registry,
//! latency tracker, pacer, cache, config distributor, metrics and the
//! presentation coordinator. It is built once per process with
//! [`MediationRuntime::init`] and passed by reference.
//!
//! ```text
//! load(placement)
//!   ├─ config.guard_load          → LoadError::Blocked
//!   ├─ one task per BidSource     → orchestrator.call / call_with_hedging
//!   ├─ floor filter, highest CPM  → cache.store
//!   └─ SLO sample                 → config.record_slo_sample
//!
//! show(container, placement, render)
//!   └─ presentation coordinator   → PresentationReceipt | PresentationError
//! ```

use std::sync::{Arc, Mutex, RwLock};

use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::auction::{AuctionClient, BidDocument, BidRequest, BidSource};
use crate::cache::{AdCache, CachedBid};
use crate::circuit_breaker::CircuitRegistry;
use crate::clock::{Clock, SystemClock};
use crate::domain::{AdFormat, AdapterCallKey, AdapterId, PlacementId};
use crate::error::{CallError, ConfigError, CoreError, LoadError, PresentationError};
use crate::http_client::HttpClient;
use crate::latency::LatencyTracker;
use crate::metrics::{HttpTelemetrySink, MetricsAggregator, MetricsGate, TelemetrySink};
use crate::orchestrator::{CallOrchestrator, CallSuccess};
use crate::outcome::Outcome;
use crate::pacing::PlacementPacer;
use crate::presentation::{
    ContainerId, LifecycleSource, PresentationCoordinator, PresentationReceipt, RenderAction,
    UiExecutor,
};
use crate::remote_config::{
    AdoptionDecision, ConfigDistributor, ConfigFetcher, KeyValueStore, SignatureVerifier,
};
use crate::settings::RuntimeSettings;
use crate::viewability::ViewabilityProbe;

/// Host-provided collaborators.
pub struct HostParts {
    pub store: Arc<dyn KeyValueStore>,
    pub http: Arc<dyn HttpClient>,
    pub lifecycle: Arc<dyn LifecycleSource>,
    pub ui: Arc<dyn UiExecutor>,
    pub viewability: ViewabilityProbe,
    pub clock: Arc<dyn Clock>,
}

impl HostParts {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        http: Arc<dyn HttpClient>,
        lifecycle: Arc<dyn LifecycleSource>,
        ui: Arc<dyn UiExecutor>,
    ) -> Self {
        Self {
            store,
            http,
            lifecycle,
            ui,
            viewability: ViewabilityProbe::new(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_viewability(mut self, viewability: ViewabilityProbe) -> Self {
        self.viewability = viewability;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Winner of a load round.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadReceipt {
    pub bid: CachedBid,
    /// Sources asked in this round.
    pub candidates: usize,
    pub attempts: u32,
    pub hedged: bool,
}

pub struct MediationRuntime {
    settings: RuntimeSettings,
    http: Arc<dyn HttpClient>,
    cache: AdCache,
    config: Arc<ConfigDistributor>,
    orchestrator: Arc<CallOrchestrator>,
    metrics: Arc<MetricsAggregator>,
    presentation: PresentationCoordinator,
    fetcher: Option<Arc<ConfigFetcher>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    sources: RwLock<Vec<Arc<dyn BidSource>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MediationRuntime {
    /// Build the runtime. Reads persisted config state once.
    pub fn init(settings: RuntimeSettings, host: HostParts) -> Result<Self, CoreError> {
        settings.validate()?;
        let HostParts {
            store,
            http,
            lifecycle,
            ui,
            viewability,
            clock,
        } = host;

        let config = Arc::new(ConfigDistributor::open(
            store,
            settings.remote_config.slo_failure_threshold,
        )?);
        let gate: Arc<dyn MetricsGate> = config.clone();
        let metrics = Arc::new(MetricsAggregator::new(settings.metrics.clone(), gate));

        let orchestrator = CallOrchestrator::new(
            Arc::new(CircuitRegistry::new(settings.breaker, Arc::clone(&clock))),
            Arc::new(LatencyTracker::new(settings.latency_window)),
            Arc::new(PlacementPacer::new(
                settings.pacing.min_interval,
                Arc::clone(&clock),
            )),
            Arc::clone(&metrics),
        )
        .with_retry(settings.retry.clone())
        .with_hedge(settings.hedge)
        .with_max_in_flight(settings.max_in_flight)
        .with_clock(Arc::clone(&clock));

        let cache = AdCache::new(Arc::clone(&clock));
        let presentation = PresentationCoordinator::new(
            settings.presentation,
            cache.clone(),
            Arc::clone(&config),
            lifecycle,
            ui,
            Arc::clone(&metrics),
        )
        .with_viewability(viewability.resolve())
        .with_tracker(Arc::clone(&http))
        .with_clock(clock);

        let fetcher = match &settings.remote_config.endpoint {
            Some(endpoint) => {
                let key = settings.remote_config.public_key.as_deref().ok_or_else(|| {
                    CoreError::Settings {
                        field: "remote_config.public_key",
                        reason: String::from("required when remote_config.endpoint is set"),
                    }
                })?;
                Some(Arc::new(ConfigFetcher::new(
                    Arc::clone(&http),
                    endpoint.clone(),
                    SignatureVerifier::from_base64(key)?,
                    settings.remote_config.fetch_timeout,
                )))
            }
            None => None,
        };
        let telemetry = settings.metrics.endpoint.as_ref().map(|url| {
            Arc::new(HttpTelemetrySink::new(Arc::clone(&http), url.clone())) as Arc<dyn TelemetrySink>
        });

        info!(
            bucket = config.bucket(),
            config_version = config.active_version(),
            max_in_flight = settings.max_in_flight,
            "mediation runtime initialised"
        );
        Ok(Self {
            settings,
            http,
            cache,
            config,
            orchestrator: Arc::new(orchestrator),
            metrics,
            presentation,
            fetcher,
            telemetry,
            sources: RwLock::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn cache(&self) -> &AdCache {
        &self.cache
    }

    pub fn config(&self) -> &Arc<ConfigDistributor> {
        &self.config
    }

    pub fn orchestrator(&self) -> &Arc<CallOrchestrator> {
        &self.orchestrator
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    pub fn presentation(&self) -> &PresentationCoordinator {
        &self.presentation
    }

    /// Add a bid source. A source for an already registered adapter replaces it.
    pub fn register_source(&self, source: Arc<dyn BidSource>) {
        self.orchestrator
            .register_codes(source.adapter().clone(), source.codes());
        let mut sources = self
            .sources
            .write()
            .expect("bid source lock is not poisoned");
        sources.retain(|existing| existing.adapter() != source.adapter());
        debug!(adapter = %source.adapter(), "bid source registered");
        sources.push(source);
    }

    /// Register an HTTP auction adapter against `auction.endpoint`.
    pub fn register_auction_adapter(&self, adapter: AdapterId) -> Result<(), CoreError> {
        let endpoint = self.settings.auction.endpoint.as_deref().ok_or_else(|| CoreError::Settings {
            field: "auction.endpoint",
            reason: String::from("required to register an auction adapter"),
        })?;
        let client = AuctionClient::new(adapter, Arc::clone(&self.http), endpoint)
            .with_timeout(self.settings.auction.default_load_timeout);
        self.register_source(Arc::new(client));
        Ok(())
    }

    pub fn source_count(&self) -> usize {
        self.sources
            .read()
            .expect("bid source lock is not poisoned")
            .len()
    }

    /// Start the telemetry flusher and the config refresh loop, when configured.
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock().expect("runtime task lock is not poisoned");
        if !tasks.is_empty() {
            return;
        }
        if let Some(sink) = &self.telemetry {
            tasks.push(self.metrics.spawn_flusher(Arc::clone(sink)));
        }
        if let Some(fetcher) = &self.fetcher {
            tasks.push(Arc::clone(fetcher).spawn_refresh(
                Arc::clone(&self.config),
                self.settings.remote_config.refresh_interval,
            ));
        }
        debug!(tasks = tasks.len(), "background tasks started");
    }

    /// Stop background tasks. Pending loads and shows are unaffected.
    pub fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().expect("runtime task lock is not poisoned"));
        for task in &tasks {
            task.abort();
        }
        if !tasks.is_empty() {
            info!(tasks = tasks.len(), "background tasks stopped");
        }
    }

    /// Drop all in-memory reliability state. Persisted config is kept.
    pub async fn reset_for_testing(&self) {
        self.cache.clear().await;
        self.orchestrator.breakers().clear();
        self.orchestrator.latency().clear();
        self.orchestrator.pacer().clear();
        self.metrics.clear();
    }

    /// Fetch and offer the remote bundle once.
    pub async fn refresh_config(&self) -> Result<AdoptionDecision, ConfigError> {
        let fetcher = self.fetcher.as_ref().ok_or(ConfigError::NotConfigured)?;
        fetcher.refresh(&self.config).await
    }

    /// Whether a non-expired bid is cached for `placement`.
    pub async fn is_ready(&self, placement: &PlacementId) -> bool {
        self.cache.peek(placement).await.is_some()
    }

    /// Run one bidding round for `placement` and cache the winner.
    pub async fn load(&self, placement: &PlacementId, format: AdFormat) -> Result<LoadReceipt, LoadError> {
        if let Some(reason) = self.config.guard_load(placement) {
            debug!(placement = %placement, reason, "load blocked by config");
            return Err(LoadError::Blocked { reason });
        }

        let sources = self
            .sources
            .read()
            .expect("bid source lock is not poisoned")
            .clone();
        if sources.is_empty() {
            return Err(LoadError::NoSources);
        }

        let budget = self
            .config
            .load_timeout(placement)
            .unwrap_or(self.settings.auction.default_load_timeout);
        let hedging = self.config.hedging(placement).unwrap_or(true);
        let floor = self.settings.auction.floor_cpm;
        let request = Arc::new(BidRequest::new(placement.clone(), format, floor));
        let candidates = sources.len();

        let mut round = JoinSet::new();
        for source in sources {
            let orchestrator = Arc::clone(&self.orchestrator);
            let request = Arc::clone(&request);
            round.spawn(async move {
                let key = AdapterCallKey::new(source.adapter().clone(), request.placement_id.clone());
                let op = || source.request_bid(&request);
                let result = if hedging {
                    orchestrator.call_with_hedging(&key, budget, op).await
                } else {
                    orchestrator.call(&key, budget, op).await
                };
                (key, result)
            });
        }

        let mut winner: Option<CallSuccess<BidDocument>> = None;
        let mut failures: Vec<CallError> = Vec::new();
        while let Some(joined) = round.join_next().await {
            match joined {
                Ok((key, Ok(success))) if success.value.cpm < floor => {
                    debug!(
                        adapter = %key.adapter,
                        cpm = success.value.cpm,
                        floor,
                        "bid below floor"
                    );
                    failures.push(CallError::Failed {
                        outcome: Outcome::NoFill,
                        attempts: success.attempts,
                    });
                }
                Ok((_, Ok(success))) => {
                    let better = winner
                        .as_ref()
                        .map_or(true, |best| success.value.cpm > best.value.cpm);
                    if better {
                        winner = Some(success);
                    }
                }
                Ok((key, Err(error))) => {
                    debug!(adapter = %key.adapter, reason = error.label(), "bid source failed");
                    failures.push(error);
                }
                Err(error) => warn!(%error, "bid task aborted"),
            }
        }

        let result = match winner {
            Some(success) => {
                let bid = success.value.into_cached(placement.clone());
                match self.cache.store(bid.clone()).await {
                    Ok(()) => {
                        info!(
                            placement = %placement,
                            adapter = %bid.adapter,
                            cpm = bid.cpm,
                            candidates,
                            "bid cached"
                        );
                        Ok(LoadReceipt {
                            bid,
                            candidates,
                            attempts: success.attempts,
                            hedged: success.hedged,
                        })
                    }
                    Err(error) => Err(LoadError::InvalidBid(error)),
                }
            }
            None => Err(pick_failure(failures)),
        };

        self.sample_load(placement, &result);
        result
    }

    /// Show the cached bid for `placement` through the presentation coordinator.
    pub async fn show(
        &self,
        container: Option<&ContainerId>,
        placement: &PlacementId,
        render: RenderAction,
    ) -> Result<PresentationReceipt, PresentationError> {
        let result = self.presentation.show(container, placement, render).await;
        match &result {
            Ok(_) => self.sample(true),
            Err(PresentationError::RenderFailed { .. } | PresentationError::RenderTimeout) => {
                self.sample(false)
            }
            Err(_) => {}
        }
        result
    }

    /// Healthy: a cached bid or a no-fill. Unhealthy: transport, server,
    /// client or generic failures and open circuits. Config blocks and
    /// pacing are not sampled.
    fn sample_load(&self, placement: &PlacementId, result: &Result<LoadReceipt, LoadError>) {
        let healthy = match result {
            Ok(_) => true,
            Err(LoadError::Call(error)) if error.is_no_fill() => true,
            Err(LoadError::Call(CallError::Paced { .. }))
            | Err(LoadError::Blocked { .. })
            | Err(LoadError::NoSources) => return,
            Err(LoadError::Call(_)) | Err(LoadError::InvalidBid(_)) => false,
        };
        if !healthy {
            debug!(placement = %placement, "unhealthy load sampled");
        }
        self.sample(healthy);
    }

    fn sample(&self, healthy: bool) {
        match self.config.record_slo_sample(healthy) {
            Ok(true) => warn!(
                active_version = self.config.active_version(),
                "remote config rolled back"
            ),
            Ok(false) => {}
            Err(error) => warn!(%error, "failed to persist slo sample"),
        }
    }
}

impl Drop for MediationRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// First failure that is not a no-fill, else the first failure.
fn pick_failure(failures: Vec<CallError>) -> LoadError {
    let mut failures = failures.into_iter();
    let Some(first) = failures.next() else {
        return LoadError::Call(CallError::Failed {
            outcome: Outcome::NoFill,
            attempts: 0,
        });
    };
    if !first.is_no_fill() {
        return LoadError::Call(first);
    }
    LoadError::Call(failures.find(|f| !f.is_no_fill()).unwrap_or(first))
}
