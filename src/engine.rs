//! Single-flight sync engine.
//!
//! Drains the queue sequentially whenever the network is reachable. Every
//! outcome re-peeks the head, so a newly enqueued higher-priority item
//! preempts the next iteration, and a transiently failing item stays at
//! the head of its class until it succeeds or exhausts its retries.

use crate::events::{EventBus, SyncEvent};
use crate::models::QueuedRequest;
use crate::network::NetworkMonitor;
use crate::queue::QueueManager;
use crate::store::StoreKey;
use crate::transport::Transport;
use crate::util::{backoff, DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_MS};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Hook invoked on a 401 before the entry is retried. A successful refresh
/// retries the same entry without touching its retry count; a failed
/// refresh makes the failure permanent.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self) -> Result<(), String>;
}

/// Retry and backoff configuration.
#[derive(Debug, Clone)]
pub struct SyncEngineConfig {
    /// Give up once an entry's retry count exceeds this.
    pub max_retries: u32,
    /// Backoff base in milliseconds.
    pub backoff_base_ms: u64,
    /// Backoff cap in milliseconds.
    pub backoff_max_ms: u64,
}

impl Default for SyncEngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
        }
    }
}

enum Outcome {
    Success,
    AuthExpired,
    Permanent,
    Transient,
}

/// Non-2xx statuses outside 4xx/5xx (informational, redirects) cannot be
/// fixed by retrying, so they classify as permanent.
fn classify_status(status: u16) -> Outcome {
    match status {
        200..=299 => Outcome::Success,
        401 => Outcome::AuthExpired,
        429 => Outcome::Transient,
        400..=499 => Outcome::Permanent,
        500..=599 => Outcome::Transient,
        _ => Outcome::Permanent,
    }
}

/// Cooperative single-flight drainer.
pub struct SyncEngine {
    queue: Arc<QueueManager>,
    monitor: Arc<NetworkMonitor>,
    transport: Arc<dyn Transport>,
    bus: EventBus,
    config: SyncEngineConfig,
    refresher: RwLock<Option<Arc<dyn TokenRefresher>>>,
    draining: AtomicBool,
}

impl SyncEngine {
    pub fn new(
        queue: Arc<QueueManager>,
        monitor: Arc<NetworkMonitor>,
        transport: Arc<dyn Transport>,
        bus: EventBus,
        config: SyncEngineConfig,
    ) -> Self {
        Self {
            queue,
            monitor,
            transport,
            bus,
            config,
            refresher: RwLock::new(None),
            draining: AtomicBool::new(false),
        }
    }

    /// Install or replace the token refresh hook.
    pub fn set_refresher(&self, refresher: Arc<dyn TokenRefresher>) {
        *self.refresher.write().expect("lock poisoned") = Some(refresher);
    }

    /// Whether a drain is currently in progress.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Spawn a task that starts a drain on every transition to reachable.
    pub fn spawn_reachability_listener(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut rx = engine.bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(SyncEvent::NetworkChanged(true)) => engine.start_sync().await,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Reachability listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Drain the queue until it is empty or the network goes away.
    ///
    /// Returns immediately when offline or when a drain is already in
    /// progress. In-drain failures never terminate the drain or escape as
    /// errors; they surface as [`SyncEvent::RequestFailed`] events.
    pub async fn start_sync(&self) {
        if !self.monitor.is_reachable() {
            return;
        }
        if self.draining.swap(true, Ordering::SeqCst) {
            debug!("Drain already in progress");
            return;
        }

        self.bus.emit(SyncEvent::SyncStarted);

        while self.monitor.is_reachable() {
            let entry = match self.queue.peek_next() {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Peek failed, aborting drain");
                    break;
                }
            };
            let Some((key, item)) = entry else {
                self.bus.emit(SyncEvent::QueueEmpty);
                break;
            };

            match self.transport.execute(&item).await {
                Ok(response) => match classify_status(response.status) {
                    Outcome::Success => {
                        self.try_dequeue(key, &item.id);
                        debug!(id = %item.id, status = response.status, "Request replayed");
                        self.bus.emit(SyncEvent::RequestSucceeded {
                            id: item.id.clone(),
                            response,
                            request: item,
                        });
                    }
                    Outcome::AuthExpired => {
                        let refresher =
                            self.refresher.read().expect("lock poisoned").clone();
                        match refresher {
                            Some(refresher) => match refresher.refresh().await {
                                Ok(()) => {
                                    debug!(id = %item.id, "Token refreshed, retrying entry");
                                    continue;
                                }
                                Err(e) => self.remove_permanent(
                                    key,
                                    item,
                                    format!("token refresh failed: {e}"),
                                ),
                            },
                            None => self.remove_permanent(
                                key,
                                item,
                                "authentication expired (401)".to_string(),
                            ),
                        }
                    }
                    Outcome::Permanent => self.remove_permanent(
                        key,
                        item,
                        format!("permanent response status {}", response.status),
                    ),
                    Outcome::Transient => {
                        self.handle_transient(
                            key,
                            item,
                            format!("transient response status {}", response.status),
                        )
                        .await
                    }
                },
                Err(e) => self.handle_transient(key, item, e.to_string()).await,
            }
        }

        self.draining.store(false, Ordering::SeqCst);
        self.bus.emit(SyncEvent::SyncEnded);
    }

    async fn handle_transient(&self, key: StoreKey, mut item: QueuedRequest, error: String) {
        item.retry_count += 1;
        item.last_error = Some(error.clone());

        // Persisted before any wait so a reload does not reset the ladder.
        match self.queue.update(key, &item) {
            Ok(true) => {}
            Ok(false) => {
                debug!(id = %item.id, "Entry vanished before retry bookkeeping");
                return;
            }
            Err(e) => warn!(id = %item.id, error = %e, "Failed to persist retry count"),
        }

        if item.retry_count > self.config.max_retries {
            let retries = item.retry_count;
            self.remove_permanent(
                key,
                item,
                format!("retries exhausted after {retries} attempts: {error}"),
            );
        } else {
            let delay = backoff(
                item.retry_count,
                self.config.backoff_base_ms,
                self.config.backoff_max_ms,
            );
            debug!(
                id = %item.id,
                retry_count = item.retry_count,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Backing off before retry"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn remove_permanent(&self, key: StoreKey, request: QueuedRequest, error: String) {
        self.try_dequeue(key, &request.id);
        warn!(id = %request.id, error = %error, "Request removed from queue");
        self.bus.emit(SyncEvent::RequestFailed {
            permanent: true,
            request,
            error,
        });
    }

    /// Removal races with `cancel` from another context; "already gone" is
    /// tolerated as a no-op.
    fn try_dequeue(&self, key: StoreKey, id: &str) {
        match self.queue.dequeue(key) {
            Ok(_) => {}
            Err(e) => warn!(id = %id, error = %e, "Dequeue failed"),
        }
    }
}
