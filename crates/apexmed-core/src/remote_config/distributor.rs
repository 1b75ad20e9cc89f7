use std::str::FromStr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::bundle::RemoteConfigBundle;
use super::store::KeyValueStore;
use crate::domain::PlacementId;
use crate::error::{ConfigError, StoreError};
use crate::metrics::MetricsGate;

/// Rejection reason returned by the load/show guards.
pub type GuardReason = &'static str;

pub const SDK_DISABLED: GuardReason = "sdk_disabled";
pub const PLACEMENT_DISABLED: GuardReason = "placement_disabled";
pub const SHOW_DISABLED: GuardReason = "show_disabled";

const KEY_BUCKET: &str = "rollout_bucket";
const KEY_ACTIVE_VERSION: &str = "config.active_version";
const KEY_CURRENT: &str = "config.current";
const KEY_PREVIOUS: &str = "config.previous";
const KEY_SLO_FAILURES: &str = "config.slo_failures";
const KEY_ROLLBACK_FLOOR: &str = "config.rollback_floor";

/// Result of offering a verified bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdoptionDecision {
    Adopted { version: u64 },
    RejectedStale { version: u64, active: u64 },
    RejectedRollout { bucket: u8, percent: u8 },
    RejectedRolledBack { version: u64, floor: u64 },
}

impl AdoptionDecision {
    pub fn is_adopted(self) -> bool {
        matches!(self, Self::Adopted { .. })
    }
}

#[derive(Debug, Default, Clone)]
struct Generations {
    current: Option<Arc<RemoteConfigBundle>>,
    previous: Option<Arc<RemoteConfigBundle>>,
}

#[derive(Debug, Default)]
struct SloState {
    failures: u32,
    rollback_floor: u64,
}

/// Holds the active and previous bundles and applies the adoption rule.
///
/// Readers see either the old pair or the new pair, never a mix: the pair is
/// replaced as one value under the generation lock. Mutations (offer and
/// rollback) are serialized by a separate lock that also covers persistence.
pub struct ConfigDistributor {
    store: Arc<dyn KeyValueStore>,
    bucket: u8,
    slo_threshold: u32,
    generations: RwLock<Generations>,
    slo: Mutex<SloState>,
}

impl ConfigDistributor {
    /// Load persisted state, assigning and persisting a rollout bucket on
    /// first use. Unreadable bundles fall back to safe defaults.
    pub fn open(store: Arc<dyn KeyValueStore>, slo_threshold: u32) -> Result<Self, ConfigError> {
        let bucket = match store.get(KEY_BUCKET)?.and_then(|raw| raw.parse::<u8>().ok()) {
            Some(bucket) if bucket < 100 => bucket,
            _ => {
                let bucket = fastrand::u8(0..100);
                store.set(KEY_BUCKET, &bucket.to_string())?;
                info!(bucket, "assigned rollout bucket");
                bucket
            }
        };

        let generations = Generations {
            current: load_bundle(store.as_ref(), KEY_CURRENT)?,
            previous: load_bundle(store.as_ref(), KEY_PREVIOUS)?,
        };
        let slo = SloState {
            failures: load_number(store.as_ref(), KEY_SLO_FAILURES)?,
            rollback_floor: load_number(store.as_ref(), KEY_ROLLBACK_FLOOR)?,
        };

        debug!(
            bucket,
            version = generations.current.as_ref().map_or(0, |b| b.version),
            "config distributor opened"
        );
        Ok(Self {
            store,
            bucket,
            slo_threshold: slo_threshold.max(1),
            generations: RwLock::new(generations),
            slo: Mutex::new(slo),
        })
    }

    pub fn bucket(&self) -> u8 {
        self.bucket
    }

    pub fn current(&self) -> Option<Arc<RemoteConfigBundle>> {
        self.read().current.clone()
    }

    pub fn previous(&self) -> Option<Arc<RemoteConfigBundle>> {
        self.read().previous.clone()
    }

    /// Version of the active bundle, 0 when running on defaults.
    pub fn active_version(&self) -> u64 {
        self.read().current.as_ref().map_or(0, |bundle| bundle.version)
    }

    pub fn slo_failures(&self) -> u32 {
        self.slo().failures
    }

    pub fn rollback_floor(&self) -> u64 {
        self.slo().rollback_floor
    }

    /// Adoption rule applied to an already verified bundle.
    pub fn decide(&self, bundle: &RemoteConfigBundle) -> AdoptionDecision {
        let floor = self.rollback_floor();
        self.evaluate(bundle, floor)
    }

    fn evaluate(&self, bundle: &RemoteConfigBundle, floor: u64) -> AdoptionDecision {
        let active = self.active_version();
        if bundle.version <= active {
            AdoptionDecision::RejectedStale {
                version: bundle.version,
                active,
            }
        } else if bundle.version <= floor {
            AdoptionDecision::RejectedRolledBack {
                version: bundle.version,
                floor,
            }
        } else if self.bucket >= bundle.rollout_percent {
            AdoptionDecision::RejectedRollout {
                bucket: self.bucket,
                percent: bundle.rollout_percent,
            }
        } else {
            AdoptionDecision::Adopted {
                version: bundle.version,
            }
        }
    }

    /// Offer a verified bundle; on adoption the active bundle becomes `previous`.
    pub fn offer(&self, bundle: RemoteConfigBundle) -> Result<AdoptionDecision, ConfigError> {
        let mut slo = self.slo();
        let decision = self.evaluate(&bundle, slo.rollback_floor);
        if !decision.is_adopted() {
            debug!(version = bundle.version, ?decision, "config bundle not adopted");
            return Ok(decision);
        }

        let incoming = Arc::new(bundle);
        let outgoing = self.current();
        self.store
            .set(KEY_CURRENT, &serde_json::to_string(incoming.as_ref())?)?;
        match &outgoing {
            Some(previous) => self
                .store
                .set(KEY_PREVIOUS, &serde_json::to_string(previous.as_ref())?)?,
            None => self.store.remove(KEY_PREVIOUS)?,
        }
        self.store
            .set(KEY_ACTIVE_VERSION, &incoming.version.to_string())?;
        self.store.set(KEY_SLO_FAILURES, "0")?;
        slo.failures = 0;

        *self.write() = Generations {
            current: Some(Arc::clone(&incoming)),
            previous: outgoing,
        };
        info!(
            version = incoming.version,
            rollout_percent = incoming.rollout_percent,
            bucket = self.bucket,
            "config bundle adopted"
        );
        Ok(decision)
    }

    /// Count one SLO sample. Returns true when this sample triggered a rollback.
    pub fn record_slo_sample(&self, success: bool) -> Result<bool, ConfigError> {
        let mut slo = self.slo();
        if success {
            if slo.failures != 0 {
                slo.failures = 0;
                self.store.set(KEY_SLO_FAILURES, "0")?;
            }
            return Ok(false);
        }

        slo.failures += 1;
        if slo.failures < self.slo_threshold {
            self.store
                .set(KEY_SLO_FAILURES, &slo.failures.to_string())?;
            return Ok(false);
        }

        let Generations { current, previous } = self.read().clone();
        let Some(bad) = current else {
            // Nothing adopted, nothing to roll back.
            slo.failures = 0;
            self.store.set(KEY_SLO_FAILURES, "0")?;
            return Ok(false);
        };

        match &previous {
            Some(restored) => {
                self.store
                    .set(KEY_CURRENT, &serde_json::to_string(restored.as_ref())?)?;
                self.store
                    .set(KEY_ACTIVE_VERSION, &restored.version.to_string())?;
            }
            None => {
                self.store.remove(KEY_CURRENT)?;
                self.store.remove(KEY_ACTIVE_VERSION)?;
            }
        }
        self.store.remove(KEY_PREVIOUS)?;
        slo.rollback_floor = slo.rollback_floor.max(bad.version);
        self.store
            .set(KEY_ROLLBACK_FLOOR, &slo.rollback_floor.to_string())?;
        slo.failures = 0;
        self.store.set(KEY_SLO_FAILURES, "0")?;

        *self.write() = Generations {
            current: previous.clone(),
            previous: None,
        };
        warn!(
            from_version = bad.version,
            to_version = previous.as_ref().map_or(0, |b| b.version),
            threshold = self.slo_threshold,
            "config rolled back after consecutive SLO failures"
        );
        Ok(true)
    }

    /// Rejection reason when loads are disabled for `placement`.
    pub fn guard_load(&self, placement: &PlacementId) -> Option<GuardReason> {
        let generations = self.read();
        let bundle = generations.current.as_ref()?;
        if bundle.features.kill_switch {
            return Some(SDK_DISABLED);
        }
        if bundle.placement(placement).is_some_and(|o| o.kill_switch) {
            return Some(PLACEMENT_DISABLED);
        }
        None
    }

    /// Rejection reason when shows are disabled for `placement`.
    pub fn guard_show(&self, placement: &PlacementId) -> Option<GuardReason> {
        if let Some(reason) = self.guard_load(placement) {
            return Some(reason);
        }
        let generations = self.read();
        let bundle = generations.current.as_ref()?;
        let placement_disabled = bundle.placement(placement).is_some_and(|o| o.disable_show);
        (bundle.features.disable_show || placement_disabled).then_some(SHOW_DISABLED)
    }

    pub fn load_timeout(&self, placement: &PlacementId) -> Option<Duration> {
        self.read()
            .current
            .as_ref()
            .and_then(|bundle| bundle.load_timeout(placement))
    }

    pub fn hedging(&self, placement: &PlacementId) -> Option<bool> {
        self.read()
            .current
            .as_ref()
            .and_then(|bundle| bundle.hedging(placement))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Generations> {
        self.generations
            .read()
            .expect("config generations lock is not poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Generations> {
        self.generations
            .write()
            .expect("config generations lock is not poisoned")
    }

    fn slo(&self) -> std::sync::MutexGuard<'_, SloState> {
        self.slo.lock().expect("config slo lock is not poisoned")
    }
}

impl MetricsGate for ConfigDistributor {
    fn metrics_enabled(&self) -> bool {
        self.read()
            .current
            .as_ref()
            .is_some_and(|bundle| bundle.features.metrics_enabled)
    }
}

fn load_bundle(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<Arc<RemoteConfigBundle>>, StoreError> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    match serde_json::from_str::<RemoteConfigBundle>(&raw) {
        Ok(bundle) => Ok(Some(Arc::new(bundle))),
        Err(error) => {
            warn!(key, %error, "discarding unreadable persisted bundle");
            Ok(None)
        }
    }
}

/// Unparseable or out-of-range values read as zero.
fn load_number<T: FromStr + Default>(store: &dyn KeyValueStore, key: &str) -> Result<T, StoreError> {
    Ok(store
        .get(key)?
        .and_then(|raw| raw.parse().ok())
        .unwrap_or_default())
}
