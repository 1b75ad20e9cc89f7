use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::PlacementId;
use crate::error::{ConfigError, ValidationError};

/// Global feature flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeatureFlags {
    pub kill_switch: bool,
    pub disable_show: bool,
    pub metrics_enabled: bool,
}

/// Per-placement overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlacementOverride {
    pub kill_switch: bool,
    pub disable_show: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hedging: Option<bool>,
}

/// One generation of remote configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfigBundle {
    pub version: u64,
    pub rollout_percent: u8,
    #[serde(default)]
    pub features: FeatureFlags,
    #[serde(default)]
    pub placements: BTreeMap<PlacementId, PlacementOverride>,
}

impl RemoteConfigBundle {
    pub fn new(version: u64, rollout_percent: u8) -> Self {
        Self {
            version,
            rollout_percent,
            features: FeatureFlags::default(),
            placements: BTreeMap::new(),
        }
    }

    pub fn with_features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    pub fn with_placement(mut self, placement: PlacementId, overrides: PlacementOverride) -> Self {
        self.placements.insert(placement, overrides);
        self
    }

    /// Parse and validate a raw config body.
    pub fn parse(body: &[u8]) -> Result<Self, ConfigError> {
        let bundle: Self = serde_json::from_slice(body)?;
        bundle.validate()?;
        Ok(bundle)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.rollout_percent > 100 {
            return Err(ValidationError::RolloutOutOfRange {
                value: self.rollout_percent,
            });
        }
        Ok(())
    }

    pub fn placement(&self, placement: &PlacementId) -> Option<&PlacementOverride> {
        self.placements.get(placement)
    }

    pub fn load_timeout(&self, placement: &PlacementId) -> Option<Duration> {
        self.placement(placement)
            .and_then(|overrides| overrides.load_timeout_ms)
            .map(Duration::from_millis)
    }

    pub fn hedging(&self, placement: &PlacementId) -> Option<bool> {
        self.placement(placement).and_then(|overrides| overrides.hedging)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camel_case_document() {
        let body = br#"{
            "version": 7,
            "rolloutPercent": 50,
            "features": {"killSwitch": false, "metricsEnabled": true},
            "placements": {
                "home_banner": {"killSwitch": true},
                "rewarded": {"loadTimeoutMs": 1500, "hedging": false}
            }
        }"#;

        let bundle = RemoteConfigBundle::parse(body).expect("valid bundle");
        let banner = PlacementId::parse("home_banner").expect("valid");
        let rewarded = PlacementId::parse("rewarded").expect("valid");

        assert_eq!(bundle.version, 7);
        assert!(bundle.features.metrics_enabled);
        assert!(!bundle.features.disable_show);
        assert!(bundle.placement(&banner).is_some_and(|o| o.kill_switch));
        assert_eq!(bundle.load_timeout(&rewarded), Some(Duration::from_millis(1500)));
        assert_eq!(bundle.hedging(&rewarded), Some(false));
        assert_eq!(bundle.hedging(&banner), None);
    }

    #[test]
    fn rejects_rollout_above_one_hundred() {
        let error = RemoteConfigBundle::parse(br#"{"version": 1, "rolloutPercent": 101}"#)
            .expect_err("out of range");
        assert!(matches!(
            error,
            ConfigError::Validation(ValidationError::RolloutOutOfRange { value: 101 })
        ));
    }

    #[test]
    fn rejects_invalid_placement_keys() {
        let body = br#"{"version": 1, "rolloutPercent": 10, "placements": {"bad key": {}}}"#;
        assert!(matches!(
            RemoteConfigBundle::parse(body),
            Err(ConfigError::Parse(_))
        ));
    }
}
