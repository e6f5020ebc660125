//! Durable request store over SQLite.
//!
//! One table per database, one database file per store instance. The store
//! owns the bytes: bodies are persisted in their native binary form (BLOB),
//! never base64, and structured forms (multipart, url-encoded field lists,
//! header maps) are kept as JSON text columns.
//!
//! Concurrent access, including a second process draining the same file,
//! goes through WAL mode with a busy timeout; every operation is a single
//! transaction.

use crate::error::{StoreError, StoreResult};
use crate::migrations;
use crate::models::{Body, Method, Priority, QueuedRequest};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Internal storage key, opaque to callers outside this crate.
pub type StoreKey = i64;

const COLUMNS: &str =
    "key, id, url, method, headers, body_kind, body, timestamp, retry_count, priority, last_error";

/// Thread-safe queue store backed by an r2d2 SQLite pool.
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
    path: Option<PathBuf>,
}

impl Store {
    /// Open (or create) the store at the given path, running migrations.
    ///
    /// Fails with [`StoreError::Environment`] when the storage location is
    /// unusable.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Environment(e.to_string()))?;
            }
        }

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA busy_timeout = 5000;
            ",
            )?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| StoreError::Environment(e.to_string()))?;

        {
            let conn = pool.get().map_err(|e| StoreError::Pool(e.to_string()))?;
            migrations::run_migrations(&conn)?;
        }

        info!(path = %path.display(), "Queue store opened");

        Ok(Self {
            pool,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory store for testing. The pool is restricted to a
    /// single connection so every handle sees the same database.
    pub fn open_in_memory() -> StoreResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StoreError::Environment(e.to_string()))?;

        {
            let conn = pool.get().map_err(|e| StoreError::Pool(e.to_string()))?;
            migrations::run_migrations(&conn)?;
        }

        Ok(Self { pool, path: None })
    }

    /// Delete the database file at the given path.
    pub fn destroy(path: &Path) -> StoreResult<()> {
        std::fs::remove_file(path)?;
        debug!(path = %path.display(), "Queue store deleted");
        Ok(())
    }

    /// The backing file path, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Check the store is usable by acquiring a connection and querying it.
    pub fn health_check(&self) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute_batch("SELECT 1")?;
        Ok(())
    }

    fn conn(&self) -> StoreResult<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| StoreError::Pool(e.to_string()))
    }

    /// Persist a request; returns the internal storage key.
    pub fn add(&self, item: &QueuedRequest) -> StoreResult<StoreKey> {
        let conn = self.conn()?;
        let (kind, payload) = encode_body(&item.body)?;
        conn.execute(
            "INSERT INTO request_queue
                (id, url, method, headers, body_kind, body, timestamp, retry_count, priority, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                item.id,
                item.url,
                item.method.as_str(),
                serde_json::to_string(&item.headers)?,
                kind,
                payload,
                item.timestamp,
                item.retry_count,
                item.priority.as_str(),
                item.last_error,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// First entry in storage (insertion) order.
    pub fn peek_first(&self) -> StoreResult<Option<(StoreKey, QueuedRequest)>> {
        self.peek_where("", &[])
    }

    /// First entry of the given priority class, in insertion order.
    pub fn peek_first_by_priority(
        &self,
        priority: Priority,
    ) -> StoreResult<Option<(StoreKey, QueuedRequest)>> {
        self.peek_where("WHERE priority = ?1", &[&priority.as_str()])
    }

    fn peek_where(
        &self,
        clause: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> StoreResult<Option<(StoreKey, QueuedRequest)>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {COLUMNS} FROM request_queue {clause} ORDER BY key ASC LIMIT 1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let result = stmt.query_row(args, RawRow::from_row);
        match result {
            Ok(raw) => Ok(Some(raw.decode()?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch an entry by storage key.
    pub fn get(&self, key: StoreKey) -> StoreResult<Option<QueuedRequest>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {COLUMNS} FROM request_queue WHERE key = ?1");
        let mut stmt = conn.prepare(&sql)?;
        let result = stmt.query_row(params![key], RawRow::from_row);
        match result {
            Ok(raw) => Ok(Some(raw.decode()?.1)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite the entry at the given key. Returns false when the entry is
    /// already gone.
    pub fn update(&self, key: StoreKey, item: &QueuedRequest) -> StoreResult<bool> {
        let conn = self.conn()?;
        let (kind, payload) = encode_body(&item.body)?;
        let count = conn.execute(
            "UPDATE request_queue
             SET id = ?1, url = ?2, method = ?3, headers = ?4, body_kind = ?5, body = ?6,
                 timestamp = ?7, retry_count = ?8, priority = ?9, last_error = ?10
             WHERE key = ?11",
            params![
                item.id,
                item.url,
                item.method.as_str(),
                serde_json::to_string(&item.headers)?,
                kind,
                payload,
                item.timestamp,
                item.retry_count,
                item.priority.as_str(),
                item.last_error,
                key,
            ],
        )?;
        Ok(count > 0)
    }

    /// Remove the entry at the given key. Returns false when already gone.
    pub fn remove(&self, key: StoreKey) -> StoreResult<bool> {
        let conn = self.conn()?;
        let count = conn.execute("DELETE FROM request_queue WHERE key = ?1", params![key])?;
        Ok(count > 0)
    }

    /// Remove the first entry with the given logical id; returns its key.
    pub fn remove_by_id(&self, id: &str) -> StoreResult<Option<StoreKey>> {
        let conn = self.conn()?;
        let key: Option<StoreKey> = match conn.query_row(
            "SELECT key FROM request_queue WHERE id = ?1 ORDER BY key ASC LIMIT 1",
            params![id],
            |row| row.get(0),
        ) {
            Ok(key) => Some(key),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        if let Some(key) = key {
            conn.execute("DELETE FROM request_queue WHERE key = ?1", params![key])?;
            Ok(Some(key))
        } else {
            Ok(None)
        }
    }

    /// Number of pending entries.
    pub fn count(&self) -> StoreResult<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM request_queue", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Snapshot of all pending entries in insertion order.
    pub fn list_all(&self) -> StoreResult<Vec<QueuedRequest>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {COLUMNS} FROM request_queue ORDER BY key ASC");
        let mut stmt = conn.prepare(&sql)?;
        let raws = stmt
            .query_map([], RawRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        raws.into_iter()
            .map(|raw| raw.decode().map(|(_, item)| item))
            .collect()
    }
}

/// Raw column values fetched inside a rusqlite closure; decoding into the
/// typed model happens outside so JSON errors map to [`StoreError`].
struct RawRow {
    key: i64,
    id: String,
    url: String,
    method: String,
    headers: String,
    body_kind: String,
    body: Option<Vec<u8>>,
    timestamp: i64,
    retry_count: i64,
    priority: String,
    last_error: Option<String>,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            id: row.get(1)?,
            url: row.get(2)?,
            method: row.get(3)?,
            headers: row.get(4)?,
            body_kind: row.get(5)?,
            body: row.get(6)?,
            timestamp: row.get(7)?,
            retry_count: row.get(8)?,
            priority: row.get(9)?,
            last_error: row.get(10)?,
        })
    }

    fn decode(self) -> StoreResult<(StoreKey, QueuedRequest)> {
        let headers: HashMap<String, String> = serde_json::from_str(&self.headers)?;
        let body = decode_body(&self.body_kind, self.body)?;
        let item = QueuedRequest {
            id: self.id,
            url: self.url,
            method: Method::from_str(&self.method),
            headers,
            body,
            timestamp: self.timestamp,
            retry_count: self.retry_count.max(0) as u32,
            priority: Priority::from_str(&self.priority),
            last_error: self.last_error,
        };
        Ok((self.key, item))
    }
}

fn encode_body(body: &Body) -> StoreResult<(&'static str, Option<Vec<u8>>)> {
    Ok(match body {
        Body::Empty => ("none", None),
        Body::Text(s) => ("text", Some(s.clone().into_bytes())),
        Body::Bytes(b) => ("bytes", Some(b.clone())),
        Body::Multipart(fields) => ("multipart", Some(serde_json::to_vec(fields)?)),
        Body::UrlEncoded(pairs) => ("urlencoded", Some(serde_json::to_vec(pairs)?)),
        Body::Json(s) => ("json", Some(s.clone().into_bytes())),
    })
}

fn decode_body(kind: &str, payload: Option<Vec<u8>>) -> StoreResult<Body> {
    let payload = payload.unwrap_or_default();
    let as_text = |bytes: Vec<u8>| {
        String::from_utf8(bytes).map_err(|e| StoreError::Corrupt(format!("invalid utf-8 body: {e}")))
    };

    match kind {
        "none" => Ok(Body::Empty),
        "text" => Ok(Body::Text(as_text(payload)?)),
        "bytes" => Ok(Body::Bytes(payload)),
        "multipart" => Ok(Body::Multipart(serde_json::from_slice(&payload)?)),
        "urlencoded" => Ok(Body::UrlEncoded(serde_json::from_slice(&payload)?)),
        "json" => Ok(Body::Json(as_text(payload)?)),
        other => Err(StoreError::Corrupt(format!("unknown body kind: {other}"))),
    }
}
