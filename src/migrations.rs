//! Queue database migrations.
//!
//! Migrations are run in order on open and tracked in the `migrations`
//! table. The queue reached its current shape in v2, which added the
//! priority class and its secondary index.

use crate::error::StoreResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> StoreResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    debug!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_request_queue(conn)?;
    }
    if current_version < 2 {
        migrate_v2_priority(conn)?;
    }

    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: request queue table with an auto-increment storage key.
fn migrate_v1_request_queue(conn: &Connection) -> StoreResult<()> {
    info!("Applying migration v1: request queue");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS request_queue (
            key INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL,
            url TEXT NOT NULL,
            method TEXT NOT NULL,
            headers TEXT NOT NULL,
            body_kind TEXT NOT NULL DEFAULT 'none',
            body BLOB,
            timestamp INTEGER NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_request_queue_id
            ON request_queue(id);
        ",
    )?;

    record_migration(conn, 1, "request_queue")?;
    Ok(())
}

/// V2: priority class column and its secondary index.
fn migrate_v2_priority(conn: &Connection) -> StoreResult<()> {
    info!("Applying migration v2: priority index");

    conn.execute_batch(
        "
        ALTER TABLE request_queue
            ADD COLUMN priority TEXT NOT NULL DEFAULT 'normal';

        CREATE INDEX IF NOT EXISTS priority_idx
            ON request_queue(priority);
        ",
    )?;

    record_migration(conn, 2, "priority_index")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_run_successfully() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"request_queue".to_string()));
        assert!(tables.contains(&"migrations".to_string()));
    }

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn priority_index_exists() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let indexes: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='index'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(indexes.contains(&"priority_idx".to_string()));
    }

    #[test]
    fn request_queue_has_priority_column() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let columns: Vec<String> = conn
            .prepare("PRAGMA table_info(request_queue)")
            .unwrap()
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(columns.contains(&"priority".to_string()));
        assert!(columns.contains(&"retry_count".to_string()));
        assert!(columns.contains(&"body_kind".to_string()));
    }
}
