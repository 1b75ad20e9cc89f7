//! Optional viewability measurement.
//!
//! Measurement SDKs are optional host dependencies. The host registers
//! factories on a [`ViewabilityProbe`]; the first factory that reports its
//! library as available supplies the bridge, otherwise [`NoopViewability`]
//! is used.

use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::CachedBid;
use crate::presentation::ContainerId;

/// Capability interface to a viewability measurement library.
pub trait ViewabilityBridge: Send + Sync {
    fn name(&self) -> &str;

    /// Called on the UI thread right before the render primitive runs.
    fn session_started(&self, bid: &CachedBid, container: &ContainerId);

    fn session_finished(&self, bid: &CachedBid, completed: bool);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopViewability;

impl ViewabilityBridge for NoopViewability {
    fn name(&self) -> &str {
        "noop"
    }

    fn session_started(&self, _bid: &CachedBid, _container: &ContainerId) {}

    fn session_finished(&self, _bid: &CachedBid, _completed: bool) {}
}

/// Returns a bridge when the backing library is present.
pub type ViewabilityFactory = Box<dyn Fn() -> Option<Arc<dyn ViewabilityBridge>> + Send + Sync>;

#[derive(Default)]
pub struct ViewabilityProbe {
    factories: Vec<(String, ViewabilityFactory)>,
}

impl ViewabilityProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: impl Into<String>, factory: ViewabilityFactory) -> Self {
        self.factories.push((name.into(), factory));
        self
    }

    /// First available bridge in registration order, else the no-op bridge.
    pub fn resolve(&self) -> Arc<dyn ViewabilityBridge> {
        for (name, factory) in &self.factories {
            if let Some(bridge) = factory() {
                info!(bridge = %name, "viewability bridge resolved");
                return bridge;
            }
            debug!(bridge = %name, "viewability bridge unavailable");
        }
        Arc::new(NoopViewability)
    }
}
