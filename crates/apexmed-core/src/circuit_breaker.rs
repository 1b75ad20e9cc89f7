use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::domain::AdapterCallKey;

/// Runtime circuit state for one adapter call key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    #[serde(with = "crate::settings::duration_ms")]
    pub time_window: Duration,
    #[serde(with = "crate::settings::duration_ms")]
    pub recovery: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            time_window: Duration::from_secs(30),
            recovery: Duration::from_secs(15),
        }
    }
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
}

impl Default for CircuitInner {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            opened_at: None,
        }
    }
}

impl CircuitInner {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.failures.front() {
            if now.saturating_duration_since(*oldest) > window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
    }
}

/// Sliding-window circuit breaker for one [`AdapterCallKey`].
///
/// All transitions happen under a single lock. `Open` heals to `HalfOpen`
/// lazily on the next [`CircuitBreaker::is_open`] call once the recovery
/// duration has elapsed, so no external scheduler is needed.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<CircuitInner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            inner: Mutex::new(CircuitInner::default()),
        }
    }

    /// Returns true while calls must fail fast.
    pub fn is_open(&self) -> bool {
        let now = self.clock.now();
        let mut inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        if inner.state != CircuitState::Open {
            return false;
        }

        let healed = inner
            .opened_at
            .map(|opened_at| now.saturating_duration_since(opened_at) >= self.config.recovery)
            .unwrap_or(true);
        if healed {
            inner.state = CircuitState::HalfOpen;
            inner.opened_at = None;
            debug!("circuit breaker recovered to half-open");
            false
        } else {
            true
        }
    }

    pub fn record_success(&self) {
        let mut inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        if inner.state == CircuitState::HalfOpen {
            debug!("circuit breaker closed after half-open success");
        }
        inner.state = CircuitState::Closed;
        inner.failures.clear();
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        inner.failures.push_back(now);
        inner.prune(now, self.config.time_window);

        match inner.state {
            CircuitState::HalfOpen => {
                inner.open(now);
                warn!("circuit breaker re-opened by half-open failure");
            }
            CircuitState::Closed => {
                if inner.failures.len() >= self.config.failure_threshold as usize {
                    inner.open(now);
                    warn!(
                        failures = inner.failures.len(),
                        "circuit breaker opened after threshold failures"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        let inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        inner.state
    }

    /// Failures currently inside the sliding window.
    pub fn recent_failures(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        inner.prune(now, self.config.time_window);
        inner.failures.len()
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }
}

/// One breaker per [`AdapterCallKey`], created on first use.
///
/// The map lock is only held to look up or insert a breaker; breaker
/// transitions run under each breaker's own lock.
#[derive(Debug)]
pub struct CircuitRegistry {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    breakers: Mutex<HashMap<AdapterCallKey, Arc<CircuitBreaker>>>,
}

impl CircuitRegistry {
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn breaker(&self, key: &AdapterCallKey) -> Arc<CircuitBreaker> {
        let mut breakers = self
            .breakers
            .lock()
            .expect("circuit registry lock is not poisoned");
        breakers
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::with_clock(self.config, Arc::clone(&self.clock)))
            })
            .clone()
    }

    pub fn state(&self, key: &AdapterCallKey) -> Option<CircuitState> {
        self.breakers
            .lock()
            .expect("circuit registry lock is not poisoned")
            .get(key)
            .map(|breaker| breaker.state())
    }

    pub fn clear(&self) {
        self.breakers
            .lock()
            .expect("circuit registry lock is not poisoned")
            .clear();
    }
}
