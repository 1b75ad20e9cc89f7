//! Behavior-driven tests for the ad cache
//!
//! These tests verify that a won bid is handed out at most once and that
//! expiry follows monotonic time.

use apexmed_core::CacheMiss;
use apexmed_tests::*;
use time::OffsetDateTime;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn when_many_callers_take_concurrently_then_exactly_one_wins() {
    // Given: One bid cached for a placement
    let cache = AdCache::new(Arc::new(ManualClock::new()));
    cache
        .store(cached_bid("interstitial", "bid-1", 600))
        .await
        .expect("valid bid");

    // When: 32 tasks race to take it
    let mut takers = Vec::new();
    for _ in 0..32 {
        let cache = cache.clone();
        takers.push(tokio::spawn(async move {
            cache.take(&placement("interstitial")).await
        }));
    }
    let mut winners = 0;
    for taker in takers {
        if taker.await.expect("task joins").is_some() {
            winners += 1;
        }
    }

    // Then: Exactly one caller received the bid
    assert_eq!(winners, 1);
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn when_ttl_elapses_then_bid_is_gone_for_peek_and_take() {
    // Given: A bid with a 60s TTL
    let clock = Arc::new(ManualClock::new());
    let cache = AdCache::new(clock.clone());
    cache
        .store(cached_bid("rewarded", "bid-2", 60))
        .await
        .expect("valid bid");

    // When: 59s pass
    clock.advance(Duration::from_secs(59));

    // Then: It is still ready
    assert!(cache.peek(&placement("rewarded")).await.is_some());

    // When: The TTL elapses
    clock.advance(Duration::from_secs(1));

    // Then: The take reports expiry and nothing is served afterwards
    assert_eq!(
        cache.take_detailed(&placement("rewarded")).await,
        Err(CacheMiss::Expired)
    );
    assert!(cache.peek(&placement("rewarded")).await.is_none());
    assert!(cache.take(&placement("rewarded")).await.is_none());
}

#[tokio::test]
async fn when_wall_time_of_win_is_in_the_future_then_expiry_still_uses_monotonic_time() {
    // Given: A bid whose reported win time is far in the future
    let clock = Arc::new(ManualClock::new());
    let cache = AdCache::new(clock.clone());
    let mut bid = cached_bid("banner", "bid-3", 30);
    bid.won_at = OffsetDateTime::now_utc() + time::Duration::days(365);
    cache.store(bid).await.expect("valid bid");

    // When: The TTL elapses on the monotonic clock
    clock.advance(Duration::from_secs(31));

    // Then: The bid is expired regardless of wall time
    assert!(cache.peek(&placement("banner")).await.is_none());
}

#[tokio::test]
async fn when_bid_is_invalid_then_it_is_not_cached() {
    // Given: A bid with a zero TTL
    let cache = AdCache::new(Arc::new(ManualClock::new()));

    // When: It is stored
    let result = cache.store(cached_bid("native", "bid-4", 0)).await;

    // Then: It is rejected and the placement stays empty
    assert!(result.is_err());
    assert_eq!(
        cache.take_detailed(&placement("native")).await,
        Err(CacheMiss::Absent)
    );
}
