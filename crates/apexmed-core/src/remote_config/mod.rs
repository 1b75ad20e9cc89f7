//! # Remote Configuration
//!
//! Signed, staged configuration with automatic rollback.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`RemoteConfigBundle`] | Versioned flags and per-placement overrides |
//! | [`SignatureVerifier`] | Ed25519 check of the raw body against the embedded key |
//! | [`KeyValueStore`] | Persisted bucket, bundles and failure counter |
//! | [`ConfigDistributor`] | Adoption rule, guards, SLO sampler and rollback |
//! | [`ConfigFetcher`] | HTTP fetch, verify and offer |
//!
//! A bundle is adopted only when its version is strictly greater than the
//! active one and the install's rollout bucket falls under `rolloutPercent`.
//! Bundles failing signature verification are discarded and the active
//! bundle stays in effect.

mod bundle;
mod distributor;
mod fetch;
mod signature;
mod store;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use bundle::{FeatureFlags, PlacementOverride, RemoteConfigBundle};
pub use distributor::{
    AdoptionDecision, ConfigDistributor, GuardReason, PLACEMENT_DISABLED, SDK_DISABLED, SHOW_DISABLED,
};
pub use fetch::ConfigFetcher;
pub use signature::{sign_base64, SignatureVerifier, SIGNATURE_HEADER};
pub use store::{FileStore, KeyValueStore, MemoryStore};

/// Remote configuration settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfigSettings {
    /// Config endpoint; the refresh loop only runs when set.
    pub endpoint: Option<String>,
    /// Base64 Ed25519 verification key embedded in the client.
    pub public_key: Option<String>,
    #[serde(with = "crate::settings::duration_ms")]
    pub refresh_interval: Duration,
    #[serde(with = "crate::settings::duration_ms")]
    pub fetch_timeout: Duration,
    /// Consecutive SLO failures that trigger a rollback.
    pub slo_failure_threshold: u32,
}

impl Default for RemoteConfigSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            public_key: None,
            refresh_interval: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(5),
            slo_failure_threshold: 5,
        }
    }
}
