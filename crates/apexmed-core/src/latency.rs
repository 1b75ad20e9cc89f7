//! Bounded latency windows and percentile estimation.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use crate::domain::AdapterCallKey;

/// Default number of samples retained per key.
pub const DEFAULT_WINDOW: usize = 100;

/// p50/p95/p99 summary of a sample set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Percentiles {
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub count: usize,
}

/// Nearest-rank percentile over an ascending slice. `p` is in `0.0..=1.0`.
pub fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }

    let index = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[index.min(sorted.len() - 1)]
}

/// Sort a copy of the samples and index p50/p95/p99.
pub fn summarize<'a>(samples: impl IntoIterator<Item = &'a Duration>) -> Percentiles {
    let mut sorted: Vec<Duration> = samples.into_iter().copied().collect();
    if sorted.is_empty() {
        return Percentiles::default();
    }
    sorted.sort_unstable();

    Percentiles {
        p50_ms: as_millis(percentile(&sorted, 0.50)),
        p95_ms: as_millis(percentile(&sorted, 0.95)),
        p99_ms: as_millis(percentile(&sorted, 0.99)),
        count: sorted.len(),
    }
}

fn as_millis(duration: Duration) -> u64 {
    duration.as_millis().min(u128::from(u64::MAX)) as u64
}

/// FIFO window of the most recent samples; the oldest is evicted first.
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, sample: Duration) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn p95(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<Duration> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        Some(percentile(&sorted, 0.95))
    }

    pub fn summary(&self) -> Percentiles {
        summarize(self.samples.iter())
    }
}

/// Per-key latency windows used to derive hedge delays.
#[derive(Debug)]
pub struct LatencyTracker {
    capacity: usize,
    windows: Mutex<HashMap<AdapterCallKey, LatencyWindow>>,
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl LatencyTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, key: &AdapterCallKey, sample: Duration) {
        let mut windows = self
            .windows
            .lock()
            .expect("latency tracker lock is not poisoned");
        windows
            .entry(key.clone())
            .or_insert_with(|| LatencyWindow::new(self.capacity))
            .record(sample);
    }

    pub fn p95(&self, key: &AdapterCallKey) -> Option<Duration> {
        self.windows
            .lock()
            .expect("latency tracker lock is not poisoned")
            .get(key)
            .and_then(LatencyWindow::p95)
    }

    pub fn summary(&self, key: &AdapterCallKey) -> Percentiles {
        self.windows
            .lock()
            .expect("latency tracker lock is not poisoned")
            .get(key)
            .map(LatencyWindow::summary)
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.windows
            .lock()
            .expect("latency tracker lock is not poisoned")
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn window_evicts_oldest_first() {
        let mut window = LatencyWindow::new(3);
        for value in [500, 10, 20, 30] {
            window.record(ms(value));
        }

        assert_eq!(window.len(), 3);
        assert_eq!(window.p95(), Some(ms(30)));
    }

    #[test]
    fn summary_indexes_sorted_samples() {
        let samples: Vec<Duration> = (1..=100).map(ms).collect();
        let summary = summarize(samples.iter());

        assert_eq!(summary.count, 100);
        assert_eq!(summary.p50_ms, 51);
        assert_eq!(summary.p95_ms, 95);
        assert_eq!(summary.p99_ms, 99);
    }

    #[test]
    fn empty_window_has_no_p95() {
        assert_eq!(LatencyWindow::new(10).p95(), None);
        assert_eq!(summarize(std::iter::empty()), Percentiles::default());
    }
}
