use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::clock::Clock;
use crate::domain::AdapterCallKey;

/// Suppresses immediate reloads after a no-fill.
///
/// Pacing state is keyed by [`AdapterCallKey`]: after
/// [`PlacementPacer::record_no_fill`], attempts for that adapter on that
/// placement are rejected with the remaining wait until `min_interval` has
/// elapsed. Other adapters bidding on the same placement are unaffected.
#[derive(Debug)]
pub struct PlacementPacer {
    min_interval: Duration,
    clock: Arc<dyn Clock>,
    last_no_fill: Mutex<HashMap<AdapterCallKey, Instant>>,
}

impl PlacementPacer {
    pub fn new(min_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            min_interval,
            clock,
            last_no_fill: Mutex::new(HashMap::new()),
        }
    }

    /// `Ok` when an attempt may proceed, otherwise the remaining wait.
    pub fn acquire(&self, key: &AdapterCallKey) -> Result<(), Duration> {
        let now = self.clock.now();
        let mut last = self
            .last_no_fill
            .lock()
            .expect("placement pacer lock is not poisoned");
        let Some(at) = last.get(key).copied() else {
            return Ok(());
        };

        let elapsed = now.saturating_duration_since(at);
        if elapsed >= self.min_interval {
            last.remove(key);
            Ok(())
        } else {
            Err(self.min_interval - elapsed)
        }
    }

    pub fn record_no_fill(&self, key: &AdapterCallKey) {
        let now = self.clock.now();
        self.last_no_fill
            .lock()
            .expect("placement pacer lock is not poisoned")
            .insert(key.clone(), now);
    }

    pub fn record_fill(&self, key: &AdapterCallKey) {
        self.last_no_fill
            .lock()
            .expect("placement pacer lock is not poisoned")
            .remove(key);
    }

    pub fn clear(&self) {
        self.last_no_fill
            .lock()
            .expect("placement pacer lock is not poisoned")
            .clear();
    }
}
