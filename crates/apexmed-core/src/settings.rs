//! Runtime settings.
//!
//! Defaults match production values. Settings load from JSON (`from_json_str`)
//! and from `APEXMED_*` environment variables (`from_env`); the active remote
//! bundle further overrides per-placement load timeouts and hedging at run
//! time.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `APEXMED_LOG_LEVEL` | `logging.level` |
//! | `APEXMED_LOG_FORMAT` | `logging.format` |
//! | `APEXMED_AUCTION_URL` | `auction.endpoint` |
//! | `APEXMED_LOAD_TIMEOUT_MS` | `auction.default_load_timeout` |
//! | `APEXMED_CONFIG_URL` | `remote_config.endpoint` |
//! | `APEXMED_CONFIG_PUBLIC_KEY` | `remote_config.public_key` |
//! | `APEXMED_TELEMETRY_URL` | `metrics.endpoint` |
//! | `APEXMED_MAX_IN_FLIGHT` | `max_in_flight` |
//! | `APEXMED_HEDGING` | `hedge.enabled` |
//! | `APEXMED_BREAKER_THRESHOLD` | `breaker.failure_threshold` |

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auction::AuctionSettings;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::CoreError;
use crate::latency::DEFAULT_WINDOW;
use crate::logging::LoggingSettings;
use crate::metrics::MetricsSettings;
use crate::orchestrator::{HedgeSettings, DEFAULT_MAX_IN_FLIGHT};
use crate::presentation::PresentationSettings;
use crate::remote_config::RemoteConfigSettings;
use crate::retry::RetryPolicy;

/// Serde adapter storing a [`Duration`] as integer milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u128::from(u64::MAX)) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// No-fill pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingSettings {
    #[serde(with = "duration_ms")]
    pub min_interval: Duration,
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(10),
        }
    }
}

/// All runtime settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub breaker: CircuitBreakerConfig,
    pub retry: RetryPolicy,
    pub hedge: HedgeSettings,
    pub pacing: PacingSettings,
    pub presentation: PresentationSettings,
    pub metrics: MetricsSettings,
    pub remote_config: RemoteConfigSettings,
    pub auction: AuctionSettings,
    pub logging: LoggingSettings,
    /// Concurrent adapter calls allowed in flight.
    pub max_in_flight: usize,
    /// Latency samples kept per key for hedge delays.
    pub latency_window: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
            hedge: HedgeSettings::default(),
            pacing: PacingSettings::default(),
            presentation: PresentationSettings::default(),
            metrics: MetricsSettings::default(),
            remote_config: RemoteConfigSettings::default(),
            auction: AuctionSettings::default(),
            logging: LoggingSettings::default(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            latency_window: DEFAULT_WINDOW,
        }
    }
}

impl RuntimeSettings {
    pub fn from_json_str(raw: &str) -> Result<Self, CoreError> {
        let settings: Self = serde_json::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Defaults overridden by `APEXMED_*` environment variables.
    pub fn from_env() -> Result<Self, CoreError> {
        Self::default().with_overrides(|name| env::var(name).ok())
    }

    /// Apply overrides from `lookup` (an environment-like source).
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, CoreError> {
        let text = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(level) = text("APEXMED_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = text("APEXMED_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(url) = text("APEXMED_AUCTION_URL") {
            self.auction.endpoint = Some(url);
        }
        if let Some(ms) = parse_var::<u64>(&text, "APEXMED_LOAD_TIMEOUT_MS", "auction.default_load_timeout")? {
            self.auction.default_load_timeout = Duration::from_millis(ms);
        }
        if let Some(url) = text("APEXMED_CONFIG_URL") {
            self.remote_config.endpoint = Some(url);
        }
        if let Some(key) = text("APEXMED_CONFIG_PUBLIC_KEY") {
            self.remote_config.public_key = Some(key);
        }
        if let Some(url) = text("APEXMED_TELEMETRY_URL") {
            self.metrics.endpoint = Some(url);
        }
        if let Some(value) = parse_var::<usize>(&text, "APEXMED_MAX_IN_FLIGHT", "max_in_flight")? {
            self.max_in_flight = value;
        }
        if let Some(value) = parse_var::<bool>(&text, "APEXMED_HEDGING", "hedge.enabled")? {
            self.hedge.enabled = value;
        }
        if let Some(value) = parse_var::<u32>(&text, "APEXMED_BREAKER_THRESHOLD", "breaker.failure_threshold")? {
            self.breaker.failure_threshold = value;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |field: &'static str, reason: &str| {
            Err(CoreError::Settings {
                field,
                reason: reason.to_owned(),
            })
        };

        if self.max_in_flight == 0 {
            return invalid("max_in_flight", "must be at least 1");
        }
        if self.latency_window == 0 {
            return invalid("latency_window", "must be at least 1");
        }
        if self.breaker.failure_threshold == 0 {
            return invalid("breaker.failure_threshold", "must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts", "must be at least 1");
        }
        if self.remote_config.slo_failure_threshold == 0 {
            return invalid("remote_config.slo_failure_threshold", "must be at least 1");
        }
        if self.presentation.foreground_timeout.is_zero()
            || self.presentation.resume_timeout.is_zero()
            || self.presentation.render_timeout.is_zero()
        {
            return invalid("presentation", "timeouts must be non-zero");
        }
        if self.auction.default_load_timeout.is_zero() {
            return invalid("auction.default_load_timeout", "must be non-zero");
        }
        if !self.auction.floor_cpm.is_finite() || self.auction.floor_cpm < 0.0 {
            return invalid("auction.floor_cpm", "must be a finite non-negative number");
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(
    text: &impl Fn(&str) -> Option<String>,
    name: &str,
    field: &'static str,
) -> Result<Option<T>, CoreError>
where
    T::Err: std::fmt::Display,
{
    text(name)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| CoreError::Settings {
                field,
                reason: format!("{name}={raw}: {e}"),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = RuntimeSettings::default();

        assert_eq!(settings.breaker.failure_threshold, 3);
        assert_eq!(settings.breaker.time_window, Duration::from_secs(30));
        assert_eq!(settings.breaker.recovery, Duration::from_secs(15));
        assert_eq!(settings.retry.max_attempts, 2);
        assert_eq!(settings.presentation.foreground_timeout, Duration::from_secs(4));
        assert_eq!(settings.presentation.resume_timeout, Duration::from_secs(2));
        assert_eq!(settings.metrics.flush_interval, Duration::from_secs(30));
        assert_eq!(settings.remote_config.slo_failure_threshold, 5);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn json_overrides_only_named_fields() {
        let settings = RuntimeSettings::from_json_str(
            r#"{"breaker": {"failure_threshold": 5}, "hedge": {"fallback_delay": 90}, "max_in_flight": 8}"#,
        )
        .expect("valid settings");

        assert_eq!(settings.breaker.failure_threshold, 5);
        assert_eq!(settings.breaker.recovery, Duration::from_secs(15));
        assert_eq!(settings.hedge.fallback_delay, Duration::from_millis(90));
        assert!(settings.hedge.enabled);
        assert_eq!(settings.max_in_flight, 8);
    }

    #[test]
    fn env_overrides_are_applied_and_validated() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("APEXMED_LOG_FORMAT", "json"),
            ("APEXMED_LOAD_TIMEOUT_MS", "1200"),
            ("APEXMED_HEDGING", "false"),
            ("APEXMED_CONFIG_URL", "https://config.example.test"),
        ]);
        let settings = RuntimeSettings::default()
            .with_overrides(|name| vars.get(name).map(|v| (*v).to_owned()))
            .expect("valid overrides");

        assert_eq!(settings.logging.format, "json");
        assert_eq!(settings.auction.default_load_timeout, Duration::from_millis(1200));
        assert!(!settings.hedge.enabled);
        assert_eq!(
            settings.remote_config.endpoint.as_deref(),
            Some("https://config.example.test")
        );

        let error = RuntimeSettings::default()
            .with_overrides(|name| (name == "APEXMED_MAX_IN_FLIGHT").then(|| String::from("0")))
            .expect_err("zero pool");
        assert!(matches!(error, CoreError::Settings { field: "max_in_flight", .. }));

        let error = RuntimeSettings::default()
            .with_overrides(|name| (name == "APEXMED_HEDGING").then(|| String::from("maybe")))
            .expect_err("bad bool");
        assert!(matches!(error, CoreError::Settings { field: "hedge.enabled", .. }));
    }
}
