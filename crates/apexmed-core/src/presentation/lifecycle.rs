use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;
use tracing::debug;

/// Platform lifecycle callbacks for one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    Started,
    Resumed,
    Paused,
    Stopped,
    Destroyed,
}

/// Visibility state derived from lifecycle events. Ordered by readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    Created,
    Started,
    Resumed,
    Destroyed,
}

impl LifecycleState {
    /// Next state after `event`. `Destroyed` is terminal.
    pub fn apply(self, event: LifecycleEvent) -> Self {
        match (self, event) {
            (Self::Destroyed, _) | (_, LifecycleEvent::Destroyed) => Self::Destroyed,
            (_, LifecycleEvent::Resumed) => Self::Resumed,
            (_, LifecycleEvent::Started) | (_, LifecycleEvent::Paused) => Self::Started,
            (_, LifecycleEvent::Stopped) => Self::Created,
        }
    }

    /// Visible to the user (started or resumed).
    pub fn is_foreground(self) -> bool {
        matches!(self, Self::Started | Self::Resumed)
    }
}

/// Logical id of a host UI container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ContainerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContainerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A host UI container. The host owns it; the runtime only holds
/// [`ContainerHandle`]s.
#[derive(Debug)]
pub struct Container {
    id: ContainerId,
    state: watch::Sender<LifecycleState>,
}

impl Container {
    pub fn new(id: ContainerId) -> Arc<Self> {
        let (state, _) = watch::channel(LifecycleState::Created);
        Arc::new(Self { id, state })
    }

    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn emit(&self, event: LifecycleEvent) {
        self.state.send_if_modified(|state| {
            let next = state.apply(event);
            let changed = next != *state;
            *state = next;
            changed
        });
        debug!(container = %self.id, ?event, state = ?self.state(), "container lifecycle event");
    }

    pub fn handle(self: &Arc<Self>) -> ContainerHandle {
        ContainerHandle {
            id: self.id.clone(),
            container: Arc::downgrade(self),
        }
    }
}

/// Non-owning reference to a container, with an explicit liveness query.
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    id: ContainerId,
    container: Weak<Container>,
}

impl ContainerHandle {
    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    /// False once the host released the container or it was destroyed.
    pub fn is_alive(&self) -> bool {
        self.state()
            .is_some_and(|state| state != LifecycleState::Destroyed)
    }

    pub fn state(&self) -> Option<LifecycleState> {
        self.container.upgrade().map(|container| container.state())
    }

    /// Lifecycle updates. The receiver does not keep the container alive;
    /// it reports closed once the host drops the container.
    pub fn subscribe(&self) -> Option<watch::Receiver<LifecycleState>> {
        self.container
            .upgrade()
            .map(|container| container.state.subscribe())
    }
}

/// Locates the container a presentation should use.
pub trait LifecycleSource: Send + Sync {
    /// The container named by `hint`, or the host's current top container.
    fn locate(&self, hint: Option<&ContainerId>) -> Option<ContainerHandle>;
}

/// Host-side container registry forwarding platform callbacks.
///
/// The most recently registered live container is the default target.
#[derive(Debug, Default)]
pub struct ContainerRegistry {
    containers: Mutex<Vec<Arc<Container>>>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: impl Into<ContainerId>) -> ContainerHandle {
        let container = Container::new(id.into());
        let handle = container.handle();
        let mut containers = self
            .containers
            .lock()
            .expect("container registry lock is not poisoned");
        containers.retain(|existing| existing.id() != container.id());
        containers.push(container);
        handle
    }

    /// Forward a lifecycle callback. A destroyed container is released.
    pub fn emit(&self, id: &ContainerId, event: LifecycleEvent) -> bool {
        let mut containers = self
            .containers
            .lock()
            .expect("container registry lock is not poisoned");
        let Some(index) = containers.iter().position(|c| c.id() == id) else {
            return false;
        };
        containers[index].emit(event);
        if event == LifecycleEvent::Destroyed {
            containers.remove(index);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.containers
            .lock()
            .expect("container registry lock is not poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LifecycleSource for ContainerRegistry {
    fn locate(&self, hint: Option<&ContainerId>) -> Option<ContainerHandle> {
        let containers = self
            .containers
            .lock()
            .expect("container registry lock is not poisoned");
        let found = match hint {
            Some(id) => containers.iter().find(|c| c.id() == id),
            None => containers
                .iter()
                .rev()
                .find(|c| c.state() != LifecycleState::Destroyed),
        };
        found.map(Container::handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_follow_events_and_destroyed_is_terminal() {
        let state = LifecycleState::Created
            .apply(LifecycleEvent::Started)
            .apply(LifecycleEvent::Resumed);
        assert_eq!(state, LifecycleState::Resumed);
        assert_eq!(state.apply(LifecycleEvent::Paused), LifecycleState::Started);
        assert_eq!(
            state.apply(LifecycleEvent::Paused).apply(LifecycleEvent::Stopped),
            LifecycleState::Created
        );

        let destroyed = state.apply(LifecycleEvent::Destroyed);
        assert_eq!(destroyed.apply(LifecycleEvent::Resumed), LifecycleState::Destroyed);
    }

    #[test]
    fn handles_do_not_keep_released_containers_alive() {
        let registry = ContainerRegistry::new();
        let handle = registry.register("main");
        let id = ContainerId::from("main");

        assert!(handle.is_alive());
        assert!(registry.emit(&id, LifecycleEvent::Started));
        assert_eq!(handle.state(), Some(LifecycleState::Started));

        assert!(registry.emit(&id, LifecycleEvent::Destroyed));
        assert!(!handle.is_alive());
        assert!(handle.subscribe().is_none());
        assert!(registry.locate(None).is_none());
    }

    #[test]
    fn locate_prefers_hint_then_latest_container() {
        let registry = ContainerRegistry::new();
        registry.register("first");
        registry.register("second");

        let latest = registry.locate(None).expect("container");
        assert_eq!(latest.id().as_str(), "second");

        let hinted = registry
            .locate(Some(&ContainerId::from("first")))
            .expect("container");
        assert_eq!(hinted.id().as_str(), "first");
        assert!(registry.locate(Some(&ContainerId::from("missing"))).is_none());
    }
}
