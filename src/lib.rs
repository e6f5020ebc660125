//! Offline-first HTTP request mediator.
//!
//! `rest-sync-lite` wraps outbound HTTP calls in a durable replay queue:
//! when connectivity is absent or a send fails upstream, the request is
//! persisted to a local SQLite database and replayed in priority order
//! once connectivity returns.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐  enqueue  ┌──────────────┐  persist  ┌─────────┐
//! │  RestSync │──────────▶│ QueueManager │──────────▶│  Store  │
//! │  (facade) │           └──────┬───────┘           │ (SQLite)│
//! └─────┬─────┘                  │ peek/dequeue      └─────────┘
//!       │ direct          ┌─────▼──────┐
//!       ▼                 │ SyncEngine │◀── NetworkMonitor
//! ┌───────────┐  execute  └─────┬──────┘    (reachable?)
//! │ Transport │◀────────────────┘
//! └───────────┘
//! ```
//!
//! The facade decides direct-vs-enqueue and synthesizes a `202 Accepted`
//! response for queued requests. The engine is a single-flight drainer
//! with exponential backoff and a permanent-vs-transient error
//! classification; a token-refresh hook covers expired credentials. All
//! lifecycle observations flow over a typed event bus, and `send` itself
//! rejects only when persistence fails.
//!
//! ## Example
//!
//! ```ignore
//! use rest_sync_lite::{RestSync, RestSyncConfig, SendOptions, Method, BodyInput};
//!
//! let mediator = RestSync::new(RestSyncConfig::default())?;
//! mediator.start();
//!
//! let response = mediator.send("/api/items", SendOptions {
//!     method: Method::Post,
//!     body: BodyInput::json(&serde_json::json!({"n": 1}))?,
//!     ..SendOptions::default()
//! }).await?;
//!
//! if response.is_queued() {
//!     // offline: replay happens when connectivity returns
//! }
//! ```

mod engine;
mod error;
mod events;
mod mediator;
mod migrations;
mod models;
mod network;
mod queue;
mod replay;
mod store;
mod transport;
mod util;

pub mod testing;

pub use engine::{SyncEngine, SyncEngineConfig, TokenRefresher};
pub use error::{
    MediatorError, MediatorResult, StoreError, StoreResult, TransportError, TransportResult,
};
pub use events::{EventBus, SyncEvent};
pub use mediator::{MediatorResponse, RestSync, RestSyncConfig, SendOptions};
pub use migrations::CURRENT_VERSION;
pub use models::{
    Body, BodyInput, HeaderInput, Method, MultipartField, MultipartValue, Priority, QueuedRequest,
};
pub use network::NetworkMonitor;
pub use queue::{NewRequest, QueueManager};
pub use replay::{run_replay, ReplayRegistrar, TaskReplayRegistrar, SYNC_TAG};
pub use store::{Store, StoreKey};
pub use transport::{HttpTransport, HttpTransportConfig, Transport, TransportResponse};
pub use util::{backoff, new_id, normalize_headers, serialize_body};
