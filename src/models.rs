//! Queue model types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// HTTP method of a queued request. Always stored upper-cased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Default for Method {
    fn default() -> Self {
        Self::Get
    }
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "PATCH" => Self::Patch,
            "DELETE" => Self::Delete,
            _ => Self::Get,
        }
    }
}

/// Replay priority class. Peek order is high, then normal, then low;
/// FIFO within a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "high" => Self::High,
            "low" => Self::Low,
            _ => Self::Normal,
        }
    }
}

/// One field of a multipart form body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartField {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub value: MultipartValue,
}

/// Payload of a multipart field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultipartValue {
    Text(String),
    Bytes(Vec<u8>),
}

/// Stored request body. Native forms are persisted as-is (binary stays
/// binary, never base64); plain values were JSON-stringified at enqueue
/// time into `Json`, so the store and transport never re-encode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Body {
    Empty,
    Text(String),
    Bytes(Vec<u8>),
    Multipart(Vec<MultipartField>),
    UrlEncoded(Vec<(String, String)>),
    Json(String),
}

impl Default for Body {
    fn default() -> Self {
        Self::Empty
    }
}

/// Body as supplied by the caller, before normalization.
///
/// `Json` holds an arbitrary value and is the only variant that is
/// transformed by [`crate::util::serialize_body`]; every other variant
/// passes through unchanged.
#[derive(Debug, Clone)]
pub enum BodyInput {
    None,
    Text(String),
    Bytes(Vec<u8>),
    Multipart(Vec<MultipartField>),
    UrlEncoded(Vec<(String, String)>),
    Json(serde_json::Value),
}

impl Default for BodyInput {
    fn default() -> Self {
        Self::None
    }
}

impl BodyInput {
    /// Build a JSON body input from any serializable value.
    pub fn json<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }
}

/// Headers as supplied by the caller. All shapes normalize to a plain
/// name-to-value map; `Http` entries keep the lower-cased names the
/// header map stores them under.
#[derive(Debug, Clone)]
pub enum HeaderInput {
    None,
    Pairs(Vec<(String, String)>),
    Map(HashMap<String, String>),
    Http(reqwest::header::HeaderMap),
}

impl Default for HeaderInput {
    fn default() -> Self {
        Self::None
    }
}

/// The persisted queue entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRequest {
    /// Caller-supplied or generated UUID v4. Unique within the queue.
    pub id: String,
    pub url: String,
    pub method: Method,
    pub headers: HashMap<String, String>,
    pub body: Body,
    /// Epoch milliseconds at enqueue time. Tie-break within a priority
    /// class; the storage key is the authoritative insertion order.
    pub timestamp: i64,
    /// Incremented on each transient failure, persisted so a reload does
    /// not reset the backoff ladder. Never decreases.
    pub retry_count: u32,
    pub priority: Priority,
    /// Last failure description, persisted for inspection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
