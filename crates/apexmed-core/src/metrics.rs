//! Counter and latency aggregation with periodic batched flush.
//!
//! The aggregator is inert while the remote `metricsEnabled` flag is off:
//! recording is a no-op, nothing is retained and no flush reaches the network.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::domain::{AdapterCallKey, PlacementId};
use crate::http_client::{HttpClient, HttpError, HttpRequest};
use crate::latency::{LatencyWindow, Percentiles};

pub const REQUESTS_TOTAL: &str = "requests_total";
pub const REQUESTS_SUCCESS: &str = "requests_success";
pub const PRESENTATIONS_TOTAL: &str = "presentations_total";

/// Metrics aggregation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    #[serde(with = "crate::settings::duration_ms")]
    pub flush_interval: Duration,
    /// Latency samples retained per key between flushes.
    pub reservoir_size: usize,
    /// Telemetry endpoint; no flush loop runs without one.
    pub endpoint: Option<String>,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(30),
            reservoir_size: 256,
            endpoint: None,
        }
    }
}

/// Decides whether metrics are currently collected.
pub trait MetricsGate: Send + Sync {
    fn metrics_enabled(&self) -> bool;
}

/// Gate that is always open.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysEnabled;

impl MetricsGate for AlwaysEnabled {
    fn metrics_enabled(&self) -> bool {
        true
    }
}

/// One flushed telemetry payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryBatch {
    pub timestamp: String,
    pub counters: BTreeMap<String, u64>,
    pub latency_percentiles: BTreeMap<String, Percentiles>,
}

pub type SinkFuture<'a> = Pin<Box<dyn Future<Output = Result<(), HttpError>> + Send + 'a>>;

/// Destination for flushed batches.
pub trait TelemetrySink: Send + Sync {
    fn send<'a>(&'a self, batch: &'a TelemetryBatch) -> SinkFuture<'a>;
}

/// Posts batches as JSON to the observability collaborator.
pub struct HttpTelemetrySink {
    client: Arc<dyn HttpClient>,
    url: String,
}

impl HttpTelemetrySink {
    pub fn new(client: Arc<dyn HttpClient>, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

impl TelemetrySink for HttpTelemetrySink {
    fn send<'a>(&'a self, batch: &'a TelemetryBatch) -> SinkFuture<'a> {
        Box::pin(async move {
            let body = serde_json::to_string(batch)
                .map_err(|e| HttpError::other(format!("telemetry encode failed: {e}")))?;
            let response = self
                .client
                .execute(HttpRequest::post_json(&self.url, body))
                .await?;
            if response.is_success() {
                Ok(())
            } else {
                Err(HttpError::other(format!(
                    "telemetry endpoint returned status {}",
                    response.status
                )))
            }
        })
    }
}

#[derive(Debug, Default)]
struct MetricsState {
    counters: BTreeMap<String, u64>,
    latency: HashMap<AdapterCallKey, LatencyWindow>,
}

impl MetricsState {
    fn bump(&mut self, name: impl Into<String>) {
        *self.counters.entry(name.into()).or_insert(0) += 1;
    }

    fn is_empty(&self) -> bool {
        self.counters.is_empty() && self.latency.is_empty()
    }
}

/// Aggregates per-call counters and latency reservoirs between flushes.
pub struct MetricsAggregator {
    settings: MetricsSettings,
    gate: Arc<dyn MetricsGate>,
    state: Mutex<MetricsState>,
}

impl MetricsAggregator {
    pub fn new(settings: MetricsSettings, gate: Arc<dyn MetricsGate>) -> Self {
        Self {
            settings,
            gate,
            state: Mutex::new(MetricsState::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.gate.metrics_enabled()
    }

    /// Record a successful adapter call.
    pub fn record_success(&self, key: &AdapterCallKey, latency: Duration) {
        self.record(key, None, latency);
    }

    /// Record a failed adapter call under its outcome label.
    pub fn record_failure(&self, key: &AdapterCallKey, label: &str, latency: Duration) {
        self.record(key, Some(label), latency);
    }

    /// Count a call rejected before reaching the network (no latency sample).
    pub fn record_rejection(&self, label: &str) {
        if !self.is_enabled() {
            return;
        }
        let mut state = self.state.lock().expect("metrics lock is not poisoned");
        state.bump(REQUESTS_TOTAL);
        state.bump(format!("outcome.{label}"));
    }

    fn record(&self, key: &AdapterCallKey, failure: Option<&str>, latency: Duration) {
        if !self.is_enabled() {
            return;
        }
        let mut state = self.state.lock().expect("metrics lock is not poisoned");
        state.bump(REQUESTS_TOTAL);
        match failure {
            None => state.bump(REQUESTS_SUCCESS),
            Some(label) => state.bump(format!("outcome.{label}")),
        }
        let capacity = self.settings.reservoir_size;
        state
            .latency
            .entry(key.clone())
            .or_insert_with(|| LatencyWindow::new(capacity))
            .record(latency);
    }

    /// Record a terminal presentation result (`completed` or a failure reason).
    pub fn record_presentation(&self, placement: &PlacementId, result: &str) {
        if !self.is_enabled() {
            return;
        }
        let mut state = self.state.lock().expect("metrics lock is not poisoned");
        state.bump(PRESENTATIONS_TOTAL);
        state.bump(format!("presentation.{result}"));
        debug!(placement = %placement, result, "presentation recorded");
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.state
            .lock()
            .expect("metrics lock is not poisoned")
            .counters
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Current aggregate without clearing it.
    pub fn snapshot(&self) -> TelemetryBatch {
        let state = self.state.lock().expect("metrics lock is not poisoned");
        build_batch(&state)
    }

    /// Take the current aggregate and reset. `None` when disabled or empty.
    pub fn drain(&self) -> Option<TelemetryBatch> {
        let mut state = self.state.lock().expect("metrics lock is not poisoned");
        if !self.is_enabled() {
            *state = MetricsState::default();
            return None;
        }
        if state.is_empty() {
            return None;
        }
        let batch = build_batch(&state);
        *state = MetricsState::default();
        Some(batch)
    }

    /// Drain and send one batch. Send failures are swallowed.
    pub async fn flush(&self, sink: &dyn TelemetrySink) -> bool {
        let Some(batch) = self.drain() else {
            return false;
        };
        match sink.send(&batch).await {
            Ok(()) => {
                debug!(counters = batch.counters.len(), "telemetry batch flushed");
                true
            }
            Err(error) => {
                debug!(%error, "telemetry flush failed; batch dropped");
                false
            }
        }
    }

    /// Flush on a fixed interval until the returned handle is aborted.
    pub fn spawn_flusher(self: &Arc<Self>, sink: Arc<dyn TelemetrySink>) -> JoinHandle<()> {
        let aggregator = Arc::clone(self);
        let period = self.settings.flush_interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                aggregator.flush(sink.as_ref()).await;
            }
        })
    }

    pub fn clear(&self) {
        *self.state.lock().expect("metrics lock is not poisoned") = MetricsState::default();
    }
}

fn build_batch(state: &MetricsState) -> TelemetryBatch {
    let latency_percentiles = state
        .latency
        .iter()
        .map(|(key, window)| (key.to_string(), window.summary()))
        .collect();

    TelemetryBatch {
        timestamp: now_rfc3339(),
        counters: state.counters.clone(),
        latency_percentiles,
    }
}

fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AdapterId, PlacementId};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct SwitchGate(AtomicBool);

    impl MetricsGate for SwitchGate {
        fn metrics_enabled(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        batches: Mutex<Vec<TelemetryBatch>>,
    }

    impl TelemetrySink for CollectingSink {
        fn send<'a>(&'a self, batch: &'a TelemetryBatch) -> SinkFuture<'a> {
            self.batches
                .lock()
                .expect("sink lock is not poisoned")
                .push(batch.clone());
            Box::pin(async { Ok(()) })
        }
    }

    struct FailingSink;

    impl TelemetrySink for FailingSink {
        fn send<'a>(&'a self, _batch: &'a TelemetryBatch) -> SinkFuture<'a> {
            Box::pin(async { Err(HttpError::connect("offline")) })
        }
    }

    fn key() -> AdapterCallKey {
        AdapterCallKey::new(
            AdapterId::parse("ironsource").expect("valid"),
            PlacementId::parse("rewarded").expect("valid"),
        )
    }

    #[tokio::test]
    async fn flush_sends_one_batch_then_clears() {
        let metrics = MetricsAggregator::new(MetricsSettings::default(), Arc::new(AlwaysEnabled));
        metrics.record_success(&key(), Duration::from_millis(40));
        metrics.record_failure(&key(), "timeout", Duration::from_millis(900));

        let sink = CollectingSink::default();
        assert!(metrics.flush(&sink).await);

        let batches = sink.batches.lock().expect("sink lock is not poisoned");
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].counters.get(REQUESTS_TOTAL), Some(&2));
        assert_eq!(batches[0].counters.get(REQUESTS_SUCCESS), Some(&1));
        assert_eq!(batches[0].counters.get("outcome.timeout"), Some(&1));
        let latency = batches[0]
            .latency_percentiles
            .get("ironsource/rewarded")
            .expect("latency for key");
        assert_eq!(latency.count, 2);
        assert_eq!(latency.p99_ms, 900);
        drop(batches);

        assert_eq!(metrics.counter(REQUESTS_TOTAL), 0);
        assert!(!metrics.flush(&sink).await, "empty aggregate is not sent");
    }

    #[tokio::test]
    async fn disabled_gate_keeps_aggregator_inert() {
        let gate = Arc::new(SwitchGate(AtomicBool::new(false)));
        let metrics = MetricsAggregator::new(MetricsSettings::default(), gate.clone());

        metrics.record_success(&key(), Duration::from_millis(10));
        metrics.record_presentation(&key().placement, "completed");
        assert_eq!(metrics.counter(REQUESTS_TOTAL), 0);

        let sink = CollectingSink::default();
        assert!(!metrics.flush(&sink).await);
        assert!(sink.batches.lock().expect("sink lock is not poisoned").is_empty());

        gate.0.store(true, Ordering::SeqCst);
        metrics.record_success(&key(), Duration::from_millis(10));
        assert_eq!(metrics.counter(REQUESTS_TOTAL), 1);
    }

    #[tokio::test]
    async fn sink_failures_are_swallowed() {
        let metrics = MetricsAggregator::new(MetricsSettings::default(), Arc::new(AlwaysEnabled));
        metrics.record_success(&key(), Duration::from_millis(10));

        assert!(!metrics.flush(&FailingSink).await);
        assert_eq!(metrics.counter(REQUESTS_TOTAL), 0);
    }

    #[test]
    fn batch_serializes_with_camel_case_keys() {
        let metrics = MetricsAggregator::new(MetricsSettings::default(), Arc::new(AlwaysEnabled));
        metrics.record_success(&key(), Duration::from_millis(10));

        let json = serde_json::to_value(metrics.snapshot()).expect("serializable");
        assert!(json.get("latencyPercentiles").is_some());
        assert!(json.get("timestamp").and_then(|v| v.as_str()).is_some());
    }
}
