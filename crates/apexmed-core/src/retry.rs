//! Retry eligibility and inter-attempt delay.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::outcome::Outcome;

/// Delay strategy between an attempt and its retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Uses a fixed delay.
    Fixed {
        #[serde(with = "crate::settings::duration_ms")]
        delay: Duration,
    },
    /// Uses a uniformly random delay in `[min, max]`.
    Jitter {
        #[serde(with = "crate::settings::duration_ms")]
        min: Duration,
        #[serde(with = "crate::settings::duration_ms")]
        max: Duration,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Jitter {
            min: Duration::from_millis(10),
            max: Duration::from_millis(100),
        }
    }
}

impl Backoff {
    pub fn delay(self) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Jitter { min, max } => {
                let low = min.as_millis().min(u128::from(u64::MAX)) as u64;
                let high = (max.as_millis().min(u128::from(u64::MAX)) as u64).max(low);
                Duration::from_millis(fastrand::u64(low..=high))
            }
        }
    }
}

/// Which outcomes may be retried, and how often.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Server error codes considered transient.
    pub transient_server_codes: Vec<i64>,
    pub retry_on_timeout: bool,
    pub retry_on_network: bool,
    pub retry_generic: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Backoff::default(),
            transient_server_codes: vec![500, 502, 503, 504],
            retry_on_timeout: true,
            retry_on_network: true,
            retry_generic: false,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn is_retryable(&self, outcome: &Outcome) -> bool {
        match outcome {
            Outcome::Timeout => self.retry_on_timeout,
            Outcome::NetworkError => self.retry_on_network,
            Outcome::ServerError(code) => self.transient_server_codes.contains(code),
            Outcome::Generic(_) => self.retry_generic,
            Outcome::NoFill | Outcome::ClientError(_) => false,
        }
    }

    /// Whether `attempt` (1-based) may be followed by another one.
    pub fn should_retry(&self, attempt: u32, outcome: &Outcome) -> bool {
        attempt < self.max_attempts && self.is_retryable(outcome)
    }

    pub fn next_delay(&self) -> Duration {
        self.backoff.delay()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_bounds() {
        let backoff = Backoff::default();
        for _ in 0..200 {
            let delay = backoff.delay();
            assert!(delay >= Duration::from_millis(10), "delay={delay:?}");
            assert!(delay <= Duration::from_millis(100), "delay={delay:?}");
        }
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let backoff = Backoff::Fixed {
            delay: Duration::from_millis(25),
        };
        assert_eq!(backoff.delay(), Duration::from_millis(25));
    }

    #[test]
    fn default_policy_retries_only_transient_outcomes() {
        let policy = RetryPolicy::default();

        assert!(policy.is_retryable(&Outcome::Timeout));
        assert!(policy.is_retryable(&Outcome::NetworkError));
        assert!(policy.is_retryable(&Outcome::ServerError(503)));
        assert!(!policy.is_retryable(&Outcome::ServerError(501)));
        assert!(!policy.is_retryable(&Outcome::ClientError(400)));
        assert!(!policy.is_retryable(&Outcome::NoFill));
        assert!(!policy.is_retryable(&Outcome::Generic(String::from("boom"))));
    }

    #[test]
    fn retries_at_most_once_by_default() {
        let policy = RetryPolicy::default();

        assert!(policy.should_retry(1, &Outcome::NetworkError));
        assert!(!policy.should_retry(2, &Outcome::NetworkError));
        assert!(!RetryPolicy::no_retry().should_retry(1, &Outcome::Timeout));
    }
}
