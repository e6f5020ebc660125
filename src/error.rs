//! Error types for the queue store and transport layers.

use thiserror::Error;

/// Store error type.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No usable storage environment (directory cannot be created, database
    /// cannot be opened).
    #[error("no usable storage environment: {0}")]
    Environment(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error
    #[error("Connection pool error: {0}")]
    Pool(String),

    /// A persisted entry could not be decoded back into a request.
    #[error("corrupt queue entry: {0}")]
    Corrupt(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;

/// Transport error type. Any transport error is classified as a transient
/// outcome by the sync engine.
#[derive(Error, Debug)]
pub enum TransportError {
    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Request could not be built or executed.
    #[error("request failed: {0}")]
    Failed(String),
}

/// Result type alias using TransportError.
pub type TransportResult<T> = Result<T, TransportError>;

/// Mediator error type. `send` rejects only when the request could not be
/// persisted; everything else resolves or surfaces as an event.
#[derive(Error, Debug)]
pub enum MediatorError {
    /// Storage error
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Result type alias using MediatorError.
pub type MediatorResult<T> = Result<T, MediatorError>;
