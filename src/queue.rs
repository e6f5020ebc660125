//! Queue policy over the durable store.
//!
//! Owns the ordering policy (priority classes, FIFO within a class) and
//! the cached size invariant: the cached size equals the store's count
//! after any completed operation.

use crate::error::StoreResult;
use crate::events::{EventBus, SyncEvent};
use crate::models::{Body, Method, Priority, QueuedRequest};
use crate::store::{Store, StoreKey};
use crate::util::new_id;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A request as handed to [`QueueManager::enqueue`]; identity, timestamp,
/// and retry count are assigned by the queue.
#[derive(Debug, Clone, Default)]
pub struct NewRequest {
    pub url: String,
    pub method: Method,
    pub headers: HashMap<String, String>,
    pub body: Body,
    pub priority: Priority,
    /// Custom queue identity; generated when absent.
    pub id: Option<String>,
}

/// Priority-aware queue over the store.
pub struct QueueManager {
    store: Arc<Store>,
    size: AtomicUsize,
    bus: EventBus,
}

impl QueueManager {
    /// Create a manager, seeding the cached size from the store.
    pub fn new(store: Arc<Store>, bus: EventBus) -> StoreResult<Self> {
        let size = store.count()? as usize;
        Ok(Self {
            store,
            size: AtomicUsize::new(size),
            bus,
        })
    }

    /// Persist a new request. Assigns id (keeping a supplied one),
    /// timestamp, and a zero retry count; emits a queue change. Returns
    /// the assigned id.
    pub fn enqueue(&self, new: NewRequest) -> StoreResult<String> {
        let id = new.id.unwrap_or_else(new_id);
        let item = QueuedRequest {
            id: id.clone(),
            url: new.url,
            method: new.method,
            headers: new.headers,
            body: new.body,
            timestamp: chrono::Utc::now().timestamp_millis(),
            retry_count: 0,
            priority: new.priority,
            last_error: None,
        };

        self.store.add(&item)?;
        let size = self.size.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(id = %id, priority = item.priority.as_str(), size, "Request enqueued");
        self.bus.emit(SyncEvent::QueueChanged(size));
        Ok(id)
    }

    /// Next entry to replay: high, then normal, then low, then the plain
    /// insertion-order head as a final fallback for entries outside the
    /// known classes.
    pub fn peek_next(&self) -> StoreResult<Option<(StoreKey, QueuedRequest)>> {
        for priority in [Priority::High, Priority::Normal, Priority::Low] {
            if let Some(entry) = self.store.peek_first_by_priority(priority)? {
                return Ok(Some(entry));
            }
        }
        self.store.peek_first()
    }

    /// Persist a mutated entry (retry bookkeeping). Returns false when the
    /// entry is already gone.
    pub fn update(&self, key: StoreKey, item: &QueuedRequest) -> StoreResult<bool> {
        self.store.update(key, item)
    }

    /// Remove an entry by storage key; emits a queue change when something
    /// was removed. Removing an already-gone entry is a no-op.
    pub fn dequeue(&self, key: StoreKey) -> StoreResult<bool> {
        let removed = self.store.remove(key)?;
        if removed {
            self.emit_shrink();
        }
        Ok(removed)
    }

    /// Remove an entry by logical id. Returns whether something was
    /// removed.
    pub fn cancel(&self, id: &str) -> StoreResult<bool> {
        let removed = self.store.remove_by_id(id)?.is_some();
        if removed {
            debug!(id = %id, "Request cancelled");
            self.bus.emit(SyncEvent::RequestCancelled(id.to_string()));
            self.emit_shrink();
        }
        Ok(removed)
    }

    /// Snapshot of pending entries for inspection.
    pub fn list_all(&self) -> StoreResult<Vec<QueuedRequest>> {
        self.store.list_all()
    }

    /// Cached queue size.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    fn emit_shrink(&self) {
        let _ = self
            .size
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                Some(v.saturating_sub(1))
            });
        self.bus.emit(SyncEvent::QueueChanged(self.size()));
    }
}
