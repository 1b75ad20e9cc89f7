//! Single-take store of won bids.
//!
//! Expiry is fixed at store time from the monotonic [`Clock`] and re-checked on
//! every read. An expired entry is treated as absent and purged lazily; moving
//! the wall clock never revives it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::domain::{AdapterId, PlacementId};
use crate::error::ValidationError;

/// Longest TTL a bid may carry (24 hours).
pub const MAX_TTL_SECONDS: u64 = 86_400;

/// A won bid waiting to be shown.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedBid {
    pub placement: PlacementId,
    pub bid_id: String,
    pub adapter: AdapterId,
    pub cpm: f64,
    pub creative_ref: String,
    pub ttl_seconds: u64,
    /// Wall time of the win, for reporting only.
    pub won_at: OffsetDateTime,
    pub tracking_urls: Vec<String>,
}

impl CachedBid {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.ttl_seconds == 0 {
            return Err(ValidationError::ZeroTtl);
        }
        if self.ttl_seconds > MAX_TTL_SECONDS {
            return Err(ValidationError::TtlOutOfRange {
                ttl_seconds: self.ttl_seconds,
                max: MAX_TTL_SECONDS,
            });
        }
        if self.creative_ref.trim().is_empty() {
            return Err(ValidationError::EmptyCreative);
        }
        if !self.cpm.is_finite() {
            return Err(ValidationError::NonFiniteValue { field: "cpm" });
        }
        if self.cpm < 0.0 {
            return Err(ValidationError::NegativeValue { field: "cpm" });
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Why a destructive read found nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMiss {
    Absent,
    Expired,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    bid: CachedBid,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct CacheInner {
    map: HashMap<PlacementId, CacheEntry>,
}

impl CacheInner {
    /// Drops the entry for `placement` if it is past expiry.
    fn purge_if_expired(&mut self, placement: &PlacementId, now: Instant) -> bool {
        let expired = self
            .map
            .get(placement)
            .is_some_and(|entry| now >= entry.expires_at);
        if expired {
            self.map.remove(placement);
        }
        expired
    }
}

/// Thread-safe ad cache keyed by placement.
///
/// All operations on a placement run under one lock, so concurrent
/// [`AdCache::take`] calls are linearized and only one caller wins a bid.
#[derive(Debug, Clone)]
pub struct AdCache {
    clock: Arc<dyn Clock>,
    inner: Arc<tokio::sync::Mutex<CacheInner>>,
}

impl Default for AdCache {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl AdCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: Arc::new(tokio::sync::Mutex::new(CacheInner::default())),
        }
    }

    /// Store a bid, replacing any entry already held for its placement.
    pub async fn store(&self, bid: CachedBid) -> Result<(), ValidationError> {
        bid.validate()?;
        let expires_at = self
            .clock
            .now()
            .checked_add(bid.ttl())
            .ok_or(ValidationError::TtlOutOfRange {
                ttl_seconds: bid.ttl_seconds,
                max: MAX_TTL_SECONDS,
            })?;
        let placement = bid.placement.clone();

        let mut inner = self.inner.lock().await;
        let replaced = inner
            .map
            .insert(placement.clone(), CacheEntry { bid, expires_at })
            .is_some();
        debug!(placement = %placement, replaced, "bid cached");
        Ok(())
    }

    /// Non-destructive readiness check.
    pub async fn peek(&self, placement: &PlacementId) -> Option<CachedBid> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        inner.purge_if_expired(placement, now);
        inner.map.get(placement).map(|entry| entry.bid.clone())
    }

    /// Remove and return the bid; at most one caller ever receives it.
    pub async fn take(&self, placement: &PlacementId) -> Option<CachedBid> {
        self.take_detailed(placement).await.ok()
    }

    /// Like [`AdCache::take`], reporting whether a miss was an expiry.
    pub async fn take_detailed(&self, placement: &PlacementId) -> Result<CachedBid, CacheMiss> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        if inner.purge_if_expired(placement, now) {
            debug!(placement = %placement, "cached bid expired");
            return Err(CacheMiss::Expired);
        }
        inner
            .map
            .remove(placement)
            .map(|entry| entry.bid)
            .ok_or(CacheMiss::Absent)
    }

    /// Remove every expired entry.
    pub async fn clear_expired(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        inner.map.retain(|_, entry| entry.expires_at > now);
    }

    pub async fn clear(&self) {
        self.inner.lock().await.map.clear();
    }

    /// Number of entries, including expired ones not yet purged.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn bid(placement: &str, bid_id: &str, ttl_seconds: u64) -> CachedBid {
        CachedBid {
            placement: PlacementId::parse(placement).expect("valid"),
            bid_id: bid_id.to_owned(),
            adapter: AdapterId::parse("mintegral").expect("valid"),
            cpm: 2.5,
            creative_ref: format!("creative-{bid_id}"),
            ttl_seconds,
            won_at: OffsetDateTime::UNIX_EPOCH,
            tracking_urls: Vec::new(),
        }
    }

    fn placement(value: &str) -> PlacementId {
        PlacementId::parse(value).expect("valid")
    }

    #[tokio::test]
    async fn take_is_destructive_and_peek_is_not() {
        let cache = AdCache::new(Arc::new(ManualClock::new()));
        cache.store(bid("rewarded", "b1", 60)).await.expect("stored");

        assert!(cache.peek(&placement("rewarded")).await.is_some());
        assert!(cache.peek(&placement("rewarded")).await.is_some());
        assert_eq!(
            cache.take(&placement("rewarded")).await.map(|b| b.bid_id),
            Some(String::from("b1"))
        );
        assert!(cache.take(&placement("rewarded")).await.is_none());
        assert!(cache.peek(&placement("rewarded")).await.is_none());
    }

    #[tokio::test]
    async fn store_replaces_existing_entry() {
        let cache = AdCache::new(Arc::new(ManualClock::new()));
        cache.store(bid("banner", "old", 60)).await.expect("stored");
        cache.store(bid("banner", "new", 60)).await.expect("stored");

        assert_eq!(cache.len().await, 1);
        assert_eq!(
            cache.take(&placement("banner")).await.map(|b| b.bid_id),
            Some(String::from("new"))
        );
    }

    #[tokio::test]
    async fn entries_expire_on_the_monotonic_clock() {
        let clock = Arc::new(ManualClock::new());
        let cache = AdCache::new(clock.clone());
        cache.store(bid("inter", "b1", 30)).await.expect("stored");

        clock.advance(Duration::from_secs(29));
        assert!(cache.peek(&placement("inter")).await.is_some());

        clock.advance(Duration::from_secs(1));
        assert_eq!(
            cache.take_detailed(&placement("inter")).await,
            Err(CacheMiss::Expired)
        );
        assert_eq!(
            cache.take_detailed(&placement("inter")).await,
            Err(CacheMiss::Absent)
        );
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn invalid_bids_are_rejected() {
        let cache = AdCache::default();

        assert_eq!(
            cache.store(bid("banner", "b1", 0)).await,
            Err(ValidationError::ZeroTtl)
        );

        let mut negative = bid("banner", "b2", 10);
        negative.cpm = -1.0;
        assert_eq!(
            cache.store(negative).await,
            Err(ValidationError::NegativeValue { field: "cpm" })
        );
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn oversized_ttl_is_rejected_without_panicking() {
        let cache = AdCache::default();

        assert_eq!(
            cache.store(bid("rewarded", "b1", u64::MAX)).await,
            Err(ValidationError::TtlOutOfRange {
                ttl_seconds: u64::MAX,
                max: MAX_TTL_SECONDS
            })
        );
        assert!(cache.store(bid("rewarded", "b2", MAX_TTL_SECONDS)).await.is_ok());
        assert_eq!(cache.len().await, 1);
    }
}
