//! Timeout, retry and hedged dispatch around adapter calls.
//!
//! [`CallOrchestrator`] is the boundary where adapter failures become typed
//! values: every call resolves to `Ok(CallSuccess)` or a [`CallError`].
//!
//! ```text
//! call(key, budget, op)
//!   ├─ pacer.acquire(key)        → CallError::Paced
//!   ├─ breaker.is_open()         → CallError::CircuitOpen
//!   └─ attempt loop (≤ max_attempts)
//!        ├─ pool permit + op() until the call deadline
//!        ├─ AdapterError → Outcome (vendor code table)
//!        └─ retry transient outcomes after jitter
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::circuit_breaker::CircuitRegistry;
use crate::clock::{Clock, SystemClock};
use crate::domain::{AdapterCallKey, AdapterId};
use crate::error::CallError;
use crate::latency::LatencyTracker;
use crate::metrics::MetricsAggregator;
use crate::outcome::{AdapterError, Outcome, VendorCodeTable};
use crate::pacing::PlacementPacer;
use crate::retry::RetryPolicy;

/// Default number of adapter calls allowed in flight at once.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

/// Hedged dispatch settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HedgeSettings {
    pub enabled: bool,
    /// Hedge delay used until a key has latency history.
    #[serde(with = "crate::settings::duration_ms")]
    pub fallback_delay: Duration,
}

impl Default for HedgeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            fallback_delay: Duration::from_millis(150),
        }
    }
}

/// Successful orchestrated call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSuccess<T> {
    pub value: T,
    /// Attempts or legs started, including the winning one.
    pub attempts: u32,
    /// Latency of the winning attempt.
    pub latency: Duration,
    /// Whether a backup leg was launched.
    pub hedged: bool,
}

pub type CallResult<T> = Result<CallSuccess<T>, CallError>;

type LegResult<T> = (Result<T, Outcome>, Duration);

/// Wraps adapter calls with pacing, circuit breaking, timeouts, retries and
/// hedging, and reports every final outcome to the breaker and metrics.
pub struct CallOrchestrator {
    breakers: Arc<CircuitRegistry>,
    latency: Arc<LatencyTracker>,
    pacer: Arc<PlacementPacer>,
    metrics: Arc<MetricsAggregator>,
    retry: RetryPolicy,
    hedge: HedgeSettings,
    pool: Arc<Semaphore>,
    codes: RwLock<HashMap<AdapterId, Arc<VendorCodeTable>>>,
    default_codes: Arc<VendorCodeTable>,
    clock: Arc<dyn Clock>,
}

impl CallOrchestrator {
    pub fn new(
        breakers: Arc<CircuitRegistry>,
        latency: Arc<LatencyTracker>,
        pacer: Arc<PlacementPacer>,
        metrics: Arc<MetricsAggregator>,
    ) -> Self {
        Self {
            breakers,
            latency,
            pacer,
            metrics,
            retry: RetryPolicy::default(),
            hedge: HedgeSettings::default(),
            pool: Arc::new(Semaphore::new(DEFAULT_MAX_IN_FLIGHT)),
            codes: RwLock::new(HashMap::new()),
            default_codes: Arc::new(VendorCodeTable::http()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_hedge(mut self, hedge: HedgeSettings) -> Self {
        self.hedge = hedge;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.pool = Arc::new(Semaphore::new(max_in_flight.max(1)));
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Install the vendor code table used to normalize an adapter's errors.
    pub fn register_codes(&self, adapter: AdapterId, table: VendorCodeTable) {
        self.codes
            .write()
            .expect("vendor code table lock is not poisoned")
            .insert(adapter, Arc::new(table));
    }

    pub fn breakers(&self) -> &Arc<CircuitRegistry> {
        &self.breakers
    }

    pub fn latency(&self) -> &Arc<LatencyTracker> {
        &self.latency
    }

    pub fn pacer(&self) -> &Arc<PlacementPacer> {
        &self.pacer
    }

    pub fn hedge_settings(&self) -> HedgeSettings {
        self.hedge
    }

    /// Delay before a backup leg: observed p95 for the key, else the fallback.
    pub fn hedge_delay(&self, key: &AdapterCallKey) -> Duration {
        self.latency
            .p95(key)
            .unwrap_or(self.hedge.fallback_delay)
    }

    /// Run `op` with `budget` as the total deadline across attempts,
    /// retrying transient outcomes while the jitter still fits.
    pub async fn call<T, F, Fut>(&self, key: &AdapterCallKey, budget: Duration, mut op: F) -> CallResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        self.admit(key)?;
        let started = self.clock.now();
        let table = self.code_table(&key.adapter);

        let deadline = tokio::time::Instant::now() + budget;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let attempt_started = tokio::time::Instant::now();
            let (result, latency) = match tokio::time::timeout_at(deadline, self.leg(&table, op())).await {
                Ok(leg) => leg,
                Err(_) => (Err(Outcome::Timeout), deadline.saturating_duration_since(attempt_started)),
            };

            match result {
                Ok(value) => {
                    self.settle_success(key, started, latency);
                    return Ok(CallSuccess {
                        value,
                        attempts: attempt,
                        latency,
                        hedged: false,
                    });
                }
                Err(outcome) if self.retry.should_retry(attempt, &outcome) => {
                    let delay = self.retry.next_delay();
                    let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                    if delay >= remaining {
                        debug!(
                            adapter = %key.adapter,
                            placement = %key.placement,
                            attempt,
                            remaining_ms = remaining.as_millis() as u64,
                            "budget exhausted, not retrying"
                        );
                        return Err(self.settle_failure(key, started, outcome, latency, attempt));
                    }
                    debug!(
                        adapter = %key.adapter,
                        placement = %key.placement,
                        attempt,
                        outcome = %outcome,
                        delay_ms = delay.as_millis() as u64,
                        "retrying adapter call"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(outcome) => return Err(self.settle_failure(key, started, outcome, latency, attempt)),
            }
        }
    }

    /// Run `op`, launching one backup leg after the hedge delay if the
    /// primary has not finished. The first successful leg wins and the other
    /// is dropped. Falls back to [`CallOrchestrator::call`] when hedging is
    /// disabled or the delay does not fit in `budget`.
    pub async fn call_with_hedging<T, F, Fut>(
        &self,
        key: &AdapterCallKey,
        budget: Duration,
        op: F,
    ) -> CallResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        let delay = self.hedge_delay(key);
        if !self.hedge.enabled || delay >= budget {
            return self.call(key, budget, op).await;
        }

        self.admit(key)?;
        let started = self.clock.now();
        let table = self.code_table(&key.adapter);

        let deadline = tokio::time::sleep(budget);
        tokio::pin!(deadline);
        let primary = self.leg(&table, op());
        tokio::pin!(primary);

        tokio::select! {
            biased;
            (result, latency) = &mut primary => {
                return match result {
                    Ok(value) => {
                        self.settle_success(key, started, latency);
                        Ok(CallSuccess { value, attempts: 1, latency, hedged: false })
                    }
                    Err(outcome) => Err(self.settle_failure(key, started, outcome, latency, 1)),
                };
            }
            _ = tokio::time::sleep(delay) => {}
        }

        debug!(
            adapter = %key.adapter,
            placement = %key.placement,
            delay_ms = delay.as_millis() as u64,
            "launching hedge leg"
        );
        let backup = self.leg(&table, op());
        tokio::pin!(backup);

        let mut primary_done = false;
        let mut backup_done = false;
        let mut first_failure: Option<(Outcome, Duration)> = None;

        loop {
            let finished = tokio::select! {
                leg = &mut primary, if !primary_done => {
                    primary_done = true;
                    Some(leg)
                }
                leg = &mut backup, if !backup_done => {
                    backup_done = true;
                    Some(leg)
                }
                _ = &mut deadline => None,
            };

            let Some((result, latency)) = finished else {
                return Err(self.settle_failure(key, started, Outcome::Timeout, budget, 2));
            };
            match result {
                Ok(value) => {
                    self.settle_success(key, started, latency);
                    return Ok(CallSuccess {
                        value,
                        attempts: 2,
                        latency,
                        hedged: true,
                    });
                }
                Err(outcome) => {
                    first_failure.get_or_insert((outcome, latency));
                }
            }

            if primary_done && backup_done {
                let (outcome, latency) = first_failure.unwrap_or((Outcome::Timeout, budget));
                return Err(self.settle_failure(key, started, outcome, latency, 2));
            }
        }
    }

    fn admit(&self, key: &AdapterCallKey) -> Result<(), CallError> {
        if let Err(retry_after) = self.pacer.acquire(key) {
            debug!(
                adapter = %key.adapter,
                placement = %key.placement,
                retry_after_ms = retry_after.as_millis() as u64,
                "adapter call paced after no-fill"
            );
            self.metrics.record_rejection("paced");
            return Err(CallError::Paced { retry_after });
        }

        if self.breakers.breaker(key).is_open() {
            debug!(adapter = %key.adapter, placement = %key.placement, "circuit open, failing fast");
            self.metrics.record_rejection("circuit_open");
            return Err(CallError::CircuitOpen);
        }

        Ok(())
    }

    fn code_table(&self, adapter: &AdapterId) -> Arc<VendorCodeTable> {
        self.codes
            .read()
            .expect("vendor code table lock is not poisoned")
            .get(adapter)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default_codes))
    }

    async fn leg<T, Fut>(&self, table: &VendorCodeTable, fut: Fut) -> LegResult<T>
    where
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        let started = self.clock.now();
        let result = match self.pool.acquire().await {
            Ok(_permit) => fut.await.map_err(|error| error.normalize(table)),
            Err(_) => Err(Outcome::Generic(String::from("call pool closed"))),
        };
        (result, self.clock.now().saturating_duration_since(started))
    }

    fn settle_success(&self, key: &AdapterCallKey, started: tokio::time::Instant, latency: Duration) {
        self.breakers.breaker(key).record_success();
        self.pacer.record_fill(key);
        self.latency.record(key, latency);
        self.metrics
            .record_success(key, self.clock.now().saturating_duration_since(started));
    }

    fn settle_failure(
        &self,
        key: &AdapterCallKey,
        started: tokio::time::Instant,
        outcome: Outcome,
        latency: Duration,
        attempts: u32,
    ) -> CallError {
        let breaker = self.breakers.breaker(key);
        if outcome.is_breaker_failure() {
            breaker.record_failure();
            if outcome == Outcome::Timeout {
                self.latency.record(key, latency);
            }
            warn!(
                adapter = %key.adapter,
                placement = %key.placement,
                outcome = %outcome,
                attempts,
                "adapter call failed"
            );
        } else {
            breaker.record_success();
            self.pacer.record_no_fill(key);
            self.latency.record(key, latency);
            debug!(adapter = %key.adapter, placement = %key.placement, "adapter returned no fill");
        }

        self.metrics.record_failure(
            key,
            outcome.label(),
            self.clock.now().saturating_duration_since(started),
        );
        CallError::Failed { outcome, attempts }
    }
}
