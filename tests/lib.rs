// Shared fixtures for behavior tests
pub use apexmed_core::{
    AdCache, AdapterCallKey, AdapterError, AdapterId, CachedBid, CallOrchestrator,
    CircuitBreakerConfig, CircuitRegistry, Clock, LatencyTracker, ManualClock, MetricsAggregator,
    MetricsSettings, PlacementId, PlacementPacer,
};
pub use apexmed_core::metrics::AlwaysEnabled;
pub use std::sync::Arc;
pub use std::time::Duration;

use time::OffsetDateTime;

pub fn placement(raw: &str) -> PlacementId {
    PlacementId::parse(raw).expect("valid placement")
}

pub fn adapter(raw: &str) -> AdapterId {
    AdapterId::parse(raw).expect("valid adapter")
}

pub fn call_key(adapter_raw: &str, placement_raw: &str) -> AdapterCallKey {
    AdapterCallKey::new(adapter(adapter_raw), placement(placement_raw))
}

pub fn cached_bid(placement_raw: &str, bid_id: &str, ttl_seconds: u64) -> CachedBid {
    CachedBid {
        placement: placement(placement_raw),
        bid_id: bid_id.to_owned(),
        adapter: adapter("unity"),
        cpm: 2.0,
        creative_ref: format!("creative-{bid_id}"),
        ttl_seconds,
        won_at: OffsetDateTime::UNIX_EPOCH,
        tracking_urls: Vec::new(),
    }
}

/// Orchestrator with default settings on `clock`.
pub fn orchestrator(clock: Arc<dyn Clock>) -> CallOrchestrator {
    let metrics = Arc::new(MetricsAggregator::new(
        MetricsSettings::default(),
        Arc::new(AlwaysEnabled),
    ));
    CallOrchestrator::new(
        Arc::new(CircuitRegistry::new(
            CircuitBreakerConfig::default(),
            Arc::clone(&clock),
        )),
        Arc::new(LatencyTracker::new(100)),
        Arc::new(PlacementPacer::new(
            Duration::from_secs(10),
            Arc::clone(&clock),
        )),
        metrics,
    )
    .with_clock(clock)
}
