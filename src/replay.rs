//! Background replay: a drain that outlives the foreground context.
//!
//! The worker-context counterpart to the in-process engine. Registration
//! hands the queue to a detached task that waits for connectivity, then
//! binds a fresh queue manager, monitor, and engine to the same database
//! file and drains it to completion. Two drainers may race on the same
//! file; the store tolerates "already gone" removals and the system
//! accepts at-least-once delivery.

use crate::engine::{SyncEngine, SyncEngineConfig};
use crate::error::StoreResult;
use crate::events::{EventBus, SyncEvent};
use crate::network::NetworkMonitor;
use crate::queue::QueueManager;
use crate::store::Store;
use crate::transport::Transport;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Registration tag for queue replay.
pub const SYNC_TAG: &str = "rest-sync-queue";

/// Registers a background replay for a sync tag. Registration failures are
/// reported to the caller, which logs and falls back to the foreground
/// drainer.
pub trait ReplayRegistrar: Send + Sync {
    fn register(&self, tag: &str) -> Result<(), String>;
}

/// Drain the queue at `db_path` once, holding the caller until the drain
/// settles.
pub async fn run_replay(
    db_path: &Path,
    config: SyncEngineConfig,
    transport: Arc<dyn Transport>,
) -> StoreResult<()> {
    let bus = EventBus::new();
    let store = Arc::new(Store::open(db_path)?);
    let monitor = Arc::new(NetworkMonitor::new(bus.clone()));
    let queue = Arc::new(QueueManager::new(store, bus.clone())?);
    let engine = SyncEngine::new(queue, monitor, transport, bus, config);

    engine.start_sync().await;
    Ok(())
}

/// Registrar that runs the replay as a detached task on the current
/// runtime. The task waits on the shared monitor until the network is
/// reachable, then drains. At most one replay task is in flight at a
/// time; registrations while one is active coalesce into it.
pub struct TaskReplayRegistrar {
    db_path: PathBuf,
    config: SyncEngineConfig,
    transport: Arc<dyn Transport>,
    monitor: Arc<NetworkMonitor>,
    active: Arc<AtomicBool>,
}

impl TaskReplayRegistrar {
    pub fn new(
        db_path: PathBuf,
        config: SyncEngineConfig,
        transport: Arc<dyn Transport>,
        monitor: Arc<NetworkMonitor>,
    ) -> Self {
        Self {
            db_path,
            config,
            transport,
            monitor,
            active: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl ReplayRegistrar for TaskReplayRegistrar {
    fn register(&self, tag: &str) -> Result<(), String> {
        if self.active.swap(true, Ordering::SeqCst) {
            debug!(tag, "Replay already registered");
            return Ok(());
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                self.active.store(false, Ordering::SeqCst);
                return Err(format!("no async runtime: {e}"));
            }
        };

        let active = self.active.clone();
        let db_path = self.db_path.clone();
        let config = self.config.clone();
        let transport = self.transport.clone();
        let monitor = self.monitor.clone();
        let tag = tag.to_string();

        handle.spawn(async move {
            if wait_until_reachable(&monitor).await {
                info!(tag = %tag, "Background replay started");
                if let Err(e) = run_replay(&db_path, config, transport).await {
                    warn!(tag = %tag, error = %e, "Background replay failed");
                }
            }
            active.store(false, Ordering::SeqCst);
        });

        Ok(())
    }
}

/// Block until the monitor reports reachable. Returns false when the event
/// stream closed before that happened.
async fn wait_until_reachable(monitor: &NetworkMonitor) -> bool {
    // Subscribe first so a transition between the check and the wait is
    // not missed.
    let mut rx = monitor.subscribe();
    if monitor.is_reachable() {
        return true;
    }
    loop {
        match rx.recv().await {
            Ok(SyncEvent::NetworkChanged(true)) => return true,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {
                if monitor.is_reachable() {
                    return true;
                }
            }
            Err(broadcast::error::RecvError::Closed) => return false,
        }
    }
}
