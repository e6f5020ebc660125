//! Public facade: direct-vs-enqueue mediation.
//!
//! `send` resolves with the upstream response or a synthesized 202; it
//! rejects only when the request could not be persisted. Everything that
//! happens to a queued entry afterwards surfaces as events, because the
//! original call has already resolved.

use crate::engine::{SyncEngine, SyncEngineConfig, TokenRefresher};
use crate::error::MediatorResult;
use crate::events::{EventBus, SyncEvent};
use crate::models::{BodyInput, HeaderInput, Method, Priority, QueuedRequest};
use crate::network::NetworkMonitor;
use crate::queue::{NewRequest, QueueManager};
use crate::replay::{ReplayRegistrar, SYNC_TAG};
use crate::store::Store;
use crate::transport::{HttpTransport, HttpTransportConfig, Transport, TransportResponse};
use crate::util::{new_id, normalize_headers, serialize_body};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Facade configuration.
#[derive(Debug, Clone)]
pub struct RestSyncConfig {
    /// Database name; the store lives in `<data_dir>/<db_name>.db`.
    pub db_name: String,
    /// Directory holding the database file.
    pub data_dir: PathBuf,
    /// Use a private in-memory store instead of a file (testing).
    pub in_memory: bool,
    /// Give up replaying an entry once its retry count exceeds this.
    pub max_retries: u32,
    /// Backoff base in milliseconds.
    pub backoff_base_ms: u64,
    /// Backoff cap in milliseconds.
    pub backoff_max_ms: u64,
    /// Per-request timeout for the default transport.
    pub request_timeout: Duration,
    /// Base URL that relative request paths resolve against.
    pub base_url: Option<String>,
}

impl Default for RestSyncConfig {
    fn default() -> Self {
        Self {
            db_name: "rest-sync-lite".to_string(),
            data_dir: PathBuf::from("."),
            in_memory: false,
            max_retries: 5,
            backoff_base_ms: crate::util::DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: crate::util::DEFAULT_BACKOFF_MAX_MS,
            request_timeout: Duration::from_secs(30),
            base_url: None,
        }
    }
}

impl RestSyncConfig {
    /// Resolved database file path.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.db", self.db_name))
    }

    fn engine_config(&self) -> SyncEngineConfig {
        SyncEngineConfig {
            max_retries: self.max_retries,
            backoff_base_ms: self.backoff_base_ms,
            backoff_max_ms: self.backoff_max_ms,
        }
    }
}

/// Options accepted by [`RestSync::send`]. `priority` and `id` are queue
/// concerns and never reach the transport.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub method: Method,
    pub headers: HeaderInput,
    pub body: BodyInput,
    pub priority: Priority,
    /// Custom queue identity for later cancellation.
    pub id: Option<String>,
}

/// Response returned by [`RestSync::send`]: either the upstream response
/// or the synthesized deferred acceptance.
#[derive(Debug, Clone)]
pub struct MediatorResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl MediatorResponse {
    /// The synthesized 202 returned when a request is queued.
    fn accepted(id: &str) -> Self {
        let envelope = serde_json::json!({
            "status": "queued",
            "offline": true,
            "id": id,
        });
        Self {
            status: 202,
            status_text: "Accepted".to_string(),
            headers: HashMap::from([(
                "Content-Type".to_string(),
                "application/json".to_string(),
            )]),
            body: envelope.to_string().into_bytes(),
        }
    }

    fn from_transport(response: TransportResponse) -> Self {
        Self {
            status: response.status,
            status_text: reason_phrase(response.status).to_string(),
            headers: response.headers,
            body: response.body,
        }
    }

    /// True for 2xx statuses, the synthesized 202 included.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// True when this is the deferred-acceptance response.
    pub fn is_queued(&self) -> bool {
        self.status == 202
            && serde_json::from_slice::<serde_json::Value>(&self.body)
                .map(|v| v["status"] == "queued")
                .unwrap_or(false)
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

fn new_request(
    url: &str,
    method: Method,
    headers: HashMap<String, String>,
    body: crate::models::Body,
    priority: Priority,
    id: String,
) -> NewRequest {
    NewRequest {
        url: url.to_string(),
        method,
        headers,
        body,
        priority,
        id: Some(id),
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "",
    }
}

/// Offline-first request mediator.
pub struct RestSync {
    monitor: Arc<NetworkMonitor>,
    queue: Arc<QueueManager>,
    engine: Arc<SyncEngine>,
    transport: Arc<dyn Transport>,
    bus: EventBus,
    registrar: RwLock<Option<Arc<dyn ReplayRegistrar>>>,
    listener: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RestSync {
    /// Open the mediator with the default reqwest transport.
    pub fn new(config: RestSyncConfig) -> MediatorResult<Self> {
        let store = if config.in_memory {
            Store::open_in_memory()?
        } else {
            Store::open(&config.database_path())?
        };
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(HttpTransportConfig {
            timeout: config.request_timeout,
            base_url: config.base_url.clone(),
        }));
        Self::with_parts(config, store, transport)
    }

    /// Open the mediator over an existing store and transport (testing and
    /// embedding).
    pub fn with_parts(
        config: RestSyncConfig,
        store: Store,
        transport: Arc<dyn Transport>,
    ) -> MediatorResult<Self> {
        let bus = EventBus::new();
        let store = Arc::new(store);
        let monitor = Arc::new(NetworkMonitor::new(bus.clone()));
        let queue = Arc::new(QueueManager::new(store, bus.clone())?);
        let engine = Arc::new(SyncEngine::new(
            queue.clone(),
            monitor.clone(),
            transport.clone(),
            bus.clone(),
            config.engine_config(),
        ));

        Ok(Self {
            monitor,
            queue,
            engine,
            transport,
            bus,
            registrar: RwLock::new(None),
            listener: Mutex::new(None),
        })
    }

    /// Spawn the reachability listener so transitions back online trigger a
    /// drain automatically. Call once from an async context.
    pub fn start(&self) {
        let mut listener = self.listener.lock().expect("lock poisoned");
        if listener.is_some() {
            warn!("Mediator already started");
            return;
        }
        *listener = Some(self.engine.spawn_reachability_listener());
    }

    /// Install the token refresh hook invoked on 401 responses during
    /// replay.
    pub fn set_token_refresher(&self, refresher: Arc<dyn TokenRefresher>) {
        self.engine.set_refresher(refresher);
    }

    /// Install the background replay registrar invoked on offline enqueue.
    pub fn set_replay_registrar(&self, registrar: Arc<dyn ReplayRegistrar>) {
        *self.registrar.write().expect("lock poisoned") = Some(registrar);
    }

    /// Send a request, or queue it for replay when offline or when the
    /// upstream answers with a server error.
    pub async fn send(&self, url: &str, options: SendOptions) -> MediatorResult<MediatorResponse> {
        let SendOptions {
            method,
            headers,
            body,
            priority,
            id,
        } = options;
        let headers = normalize_headers(headers);
        let body = serialize_body(body);
        let id = id.unwrap_or_else(new_id);

        if self.monitor.is_reachable() {
            let attempt = QueuedRequest {
                id: id.clone(),
                url: url.to_string(),
                method,
                headers: headers.clone(),
                body: body.clone(),
                timestamp: chrono::Utc::now().timestamp_millis(),
                retry_count: 0,
                priority,
                last_error: None,
            };

            match self.transport.execute(&attempt).await {
                Ok(response) if response.status < 500 => {
                    return Ok(MediatorResponse::from_transport(response));
                }
                Ok(response) => {
                    warn!(status = response.status, url, "Server error, queueing for replay");
                }
                Err(e) => {
                    warn!(error = %e, url, "Direct send failed, queueing for replay");
                }
            }
            self.enqueue_accepted(new_request(url, method, headers, body, priority, id), false)
        } else {
            debug!(url, "Offline, queueing request");
            self.enqueue_accepted(new_request(url, method, headers, body, priority, id), true)
        }
    }

    fn enqueue_accepted(
        &self,
        new: NewRequest,
        register_replay: bool,
    ) -> MediatorResult<MediatorResponse> {
        let id = self.queue.enqueue(new)?;

        if register_replay {
            let registrar = self.registrar.read().expect("lock poisoned").clone();
            if let Some(registrar) = registrar {
                if let Err(e) = registrar.register(SYNC_TAG) {
                    warn!(error = %e, tag = SYNC_TAG, "Background replay registration failed");
                }
            }
        }

        Ok(MediatorResponse::accepted(&id))
    }

    /// Drain the queue now. Returns when the drain settles.
    pub async fn sync_now(&self) {
        self.engine.start_sync().await;
    }

    /// Remove a pending request by its queue identity. An entry whose
    /// network call is already in flight cannot be interrupted; the server
    /// may still see it.
    pub fn cancel_request(&self, id: &str) -> MediatorResult<bool> {
        Ok(self.queue.cancel(id)?)
    }

    /// Snapshot of pending requests.
    pub fn list_queue(&self) -> MediatorResult<Vec<QueuedRequest>> {
        Ok(self.queue.list_all()?)
    }

    /// Force the mediator offline (or release the override).
    pub fn set_offline_mode(&self, offline: bool) {
        self.monitor.set_forced_offline(offline);
    }

    /// The reachability monitor, for wiring a platform connectivity probe.
    pub fn monitor(&self) -> Arc<NetworkMonitor> {
        self.monitor.clone()
    }

    /// Current effective reachability.
    pub fn is_online(&self) -> bool {
        self.monitor.is_reachable()
    }

    /// Whether a drain is in progress.
    pub fn is_syncing(&self) -> bool {
        self.engine.is_draining()
    }

    /// Number of pending requests.
    pub fn queue_size(&self) -> usize {
        self.queue.size()
    }

    /// Subscribe to mediator events. Initialize views from the live reads
    /// first; there is no replay for late subscribers.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.bus.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{drain_events, MockTransport};

    struct Fixture {
        mediator: RestSync,
        transport: Arc<MockTransport>,
    }

    fn fixture() -> Fixture {
        let transport = Arc::new(MockTransport::new());
        let mediator = RestSync::with_parts(
            RestSyncConfig {
                in_memory: true,
                backoff_base_ms: 1,
                backoff_max_ms: 5,
                ..RestSyncConfig::default()
            },
            Store::open_in_memory().unwrap(),
            transport.clone(),
        )
        .unwrap();
        Fixture {
            mediator,
            transport,
        }
    }

    #[derive(Default)]
    struct RecordingRegistrar {
        tags: Mutex<Vec<String>>,
    }

    impl ReplayRegistrar for RecordingRegistrar {
        fn register(&self, tag: &str) -> Result<(), String> {
            self.tags.lock().expect("lock poisoned").push(tag.to_string());
            Ok(())
        }
    }

    struct FailingRegistrar;

    impl ReplayRegistrar for FailingRegistrar {
        fn register(&self, _tag: &str) -> Result<(), String> {
            Err("no background facility".to_string())
        }
    }

    #[test]
    fn config_defaults() {
        let config = RestSyncConfig::default();
        assert_eq!(config.db_name, "rest-sync-lite");
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.backoff_base_ms, 1000);
        assert_eq!(config.backoff_max_ms, 30_000);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(
            config.database_path(),
            PathBuf::from("./rest-sync-lite.db")
        );
    }

    #[tokio::test]
    async fn online_send_returns_upstream_response() {
        let f = fixture();
        f.transport.push_status(201);

        let response = f
            .mediator
            .send("/items", SendOptions::default())
            .await
            .unwrap();

        assert_eq!(response.status, 201);
        assert_eq!(response.status_text, "Created");
        assert!(!response.is_queued());
        assert_eq!(f.mediator.queue_size(), 0);
    }

    #[tokio::test]
    async fn offline_send_synthesizes_202() {
        let f = fixture();
        f.mediator.set_offline_mode(true);

        let response = f
            .mediator
            .send(
                "/items",
                SendOptions {
                    method: Method::Post,
                    body: BodyInput::json(&serde_json::json!({"n": 1})).unwrap(),
                    ..SendOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(response.status, 202);
        assert_eq!(response.status_text, "Accepted");
        assert_eq!(
            response.headers.get("Content-Type").map(String::as_str),
            Some("application/json")
        );
        assert!(response.is_queued());

        let envelope: serde_json::Value = response.json().unwrap();
        assert_eq!(envelope["status"], "queued");
        assert_eq!(envelope["offline"], true);
        assert!(envelope["id"].is_string());

        // Nothing reached the transport; the queue holds the request.
        assert_eq!(f.transport.request_count(), 0);
        let pending = f.mediator.list_queue().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, envelope["id"].as_str().unwrap());
        assert_eq!(pending[0].retry_count, 0);
    }

    #[tokio::test]
    async fn offline_send_keeps_supplied_id_and_priority() {
        let f = fixture();
        f.mediator.set_offline_mode(true);

        let response = f
            .mediator
            .send(
                "/items",
                SendOptions {
                    method: Method::Put,
                    priority: Priority::High,
                    id: Some("job-9".to_string()),
                    ..SendOptions::default()
                },
            )
            .await
            .unwrap();

        let envelope: serde_json::Value = response.json().unwrap();
        assert_eq!(envelope["id"], "job-9");

        let pending = f.mediator.list_queue().unwrap();
        assert_eq!(pending[0].priority, Priority::High);
        assert_eq!(pending[0].method, Method::Put);
    }

    #[tokio::test]
    async fn server_error_falls_back_to_enqueue() {
        let f = fixture();
        f.transport.push_status(503);

        let response = f
            .mediator
            .send("/items", SendOptions::default())
            .await
            .unwrap();

        assert_eq!(response.status, 202);
        assert_eq!(f.mediator.queue_size(), 1);
        // The direct attempt did reach the transport.
        assert_eq!(f.transport.request_count(), 1);
    }

    #[tokio::test]
    async fn transport_error_falls_back_to_enqueue() {
        let f = fixture();
        f.transport.push_error("dns failure");

        let response = f
            .mediator
            .send("/items", SendOptions::default())
            .await
            .unwrap();

        assert_eq!(response.status, 202);
        assert_eq!(f.mediator.queue_size(), 1);
    }

    #[tokio::test]
    async fn client_error_passes_through_without_enqueue() {
        let f = fixture();
        f.transport.push_status(404);

        let response = f
            .mediator
            .send("/items", SendOptions::default())
            .await
            .unwrap();

        assert_eq!(response.status, 404);
        assert_eq!(response.status_text, "Not Found");
        assert_eq!(f.mediator.queue_size(), 0);
    }

    #[tokio::test]
    async fn offline_enqueue_registers_background_replay() {
        let f = fixture();
        let registrar = Arc::new(RecordingRegistrar::default());
        f.mediator.set_replay_registrar(registrar.clone());
        f.mediator.set_offline_mode(true);

        f.mediator
            .send("/items", SendOptions::default())
            .await
            .unwrap();

        assert_eq!(
            registrar.tags.lock().unwrap().clone(),
            vec![SYNC_TAG.to_string()]
        );
    }

    #[tokio::test]
    async fn server_error_fallback_does_not_register_replay() {
        let f = fixture();
        let registrar = Arc::new(RecordingRegistrar::default());
        f.mediator.set_replay_registrar(registrar.clone());
        f.transport.push_status(500);

        f.mediator
            .send("/items", SendOptions::default())
            .await
            .unwrap();

        assert!(registrar.tags.lock().unwrap().is_empty());
        assert_eq!(f.mediator.queue_size(), 1);
    }

    #[tokio::test]
    async fn registration_failure_is_swallowed() {
        let f = fixture();
        f.mediator.set_replay_registrar(Arc::new(FailingRegistrar));
        f.mediator.set_offline_mode(true);

        let response = f
            .mediator
            .send("/items", SendOptions::default())
            .await
            .unwrap();
        assert_eq!(response.status, 202);
        assert_eq!(f.mediator.queue_size(), 1);
    }

    #[tokio::test]
    async fn cancel_then_sync_is_a_clean_noop() {
        let f = fixture();
        f.mediator.set_offline_mode(true);
        f.mediator
            .send(
                "/items",
                SendOptions {
                    id: Some("job-1".to_string()),
                    ..SendOptions::default()
                },
            )
            .await
            .unwrap();

        assert!(f.mediator.cancel_request("job-1").unwrap());
        assert!(!f.mediator.cancel_request("job-1").unwrap());
        assert_eq!(f.mediator.queue_size(), 0);

        f.mediator.set_offline_mode(false);
        let mut rx = f.mediator.subscribe();
        f.mediator.sync_now().await;

        let events = drain_events(&mut rx);
        assert!(matches!(events[0], SyncEvent::SyncStarted));
        assert!(matches!(events[1], SyncEvent::QueueEmpty));
        assert!(matches!(events[2], SyncEvent::SyncEnded));
        assert_eq!(f.transport.request_count(), 0);
    }

    #[tokio::test]
    async fn live_reads_reflect_collaborators() {
        let f = fixture();
        assert!(f.mediator.is_online());
        assert!(!f.mediator.is_syncing());
        assert_eq!(f.mediator.queue_size(), 0);

        f.mediator.set_offline_mode(true);
        assert!(!f.mediator.is_online());

        f.mediator
            .send("/items", SendOptions::default())
            .await
            .unwrap();
        assert_eq!(f.mediator.queue_size(), 1);
    }

    #[tokio::test]
    async fn queue_size_matches_store_count_at_rest() {
        let f = fixture();
        f.mediator.set_offline_mode(true);
        for _ in 0..3 {
            f.mediator
                .send("/items", SendOptions::default())
                .await
                .unwrap();
        }
        assert_eq!(f.mediator.queue_size(), 3);
        assert_eq!(f.mediator.list_queue().unwrap().len(), 3);

        f.mediator.set_offline_mode(false);
        f.mediator.sync_now().await;
        assert_eq!(f.mediator.queue_size(), 0);
        assert_eq!(f.mediator.list_queue().unwrap().len(), 0);
    }
}
