//! Reachability monitor with a manual force-offline override.
//!
//! Effective state = (platform-reported reachable) AND (NOT forced
//! offline). Transitions of the effective state are announced on the
//! event bus; the current value is always readable on demand, so contexts
//! that never receive platform transition events (a background worker)
//! still see the right answer.

use crate::events::{EventBus, SyncEvent};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct MonitorState {
    platform_online: bool,
    forced_offline: bool,
}

impl MonitorState {
    fn effective(&self) -> bool {
        self.platform_online && !self.forced_offline
    }
}

/// Shared reachability state.
pub struct NetworkMonitor {
    state: Mutex<MonitorState>,
    bus: EventBus,
}

impl NetworkMonitor {
    /// Create a monitor that starts online.
    pub fn new(bus: EventBus) -> Self {
        Self::with_initial(bus, true)
    }

    /// Create a monitor with an explicit initial platform state.
    pub fn with_initial(bus: EventBus, online: bool) -> Self {
        Self {
            state: Mutex::new(MonitorState {
                platform_online: online,
                forced_offline: false,
            }),
            bus,
        }
    }

    /// Current effective reachability.
    pub fn is_reachable(&self) -> bool {
        self.state.lock().expect("lock poisoned").effective()
    }

    /// Subscribe to the event stream transitions are announced on.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.bus.subscribe()
    }

    /// Record the platform-reported connectivity signal.
    pub fn set_platform_online(&self, online: bool) {
        self.apply(|state| state.platform_online = online);
    }

    /// Force the monitor offline (or release the override).
    pub fn set_forced_offline(&self, forced: bool) {
        self.apply(|state| state.forced_offline = forced);
    }

    fn apply(&self, mutate: impl FnOnce(&mut MonitorState)) {
        let transition = {
            let mut state = self.state.lock().expect("lock poisoned");
            let before = state.effective();
            mutate(&mut state);
            let after = state.effective();
            (before != after).then_some(after)
        };

        if let Some(reachable) = transition {
            debug!(reachable, "Reachability changed");
            self.bus.emit(SyncEvent::NetworkChanged(reachable));
        }
    }
}
