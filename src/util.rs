//! Identity, backoff, and normalization utilities.

use crate::models::{Body, BodyInput, HeaderInput};
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Default backoff base in milliseconds.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1000;

/// Default backoff cap in milliseconds.
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Jitter is drawn uniformly from `[0, JITTER_CEILING_MS)`.
pub const JITTER_CEILING_MS: u64 = 100;

/// Generate a new queue identity (UUID v4).
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Exponential backoff with jitter: `min(base * 2^attempt, max) + jitter`.
///
/// The result may exceed `max` by up to the jitter ceiling. Overflow-safe
/// for arbitrarily large attempts.
pub fn backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let multiplier = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    let delay = base_ms.saturating_mul(multiplier).min(max_ms);
    let jitter = rand::thread_rng().gen_range(0..JITTER_CEILING_MS);
    Duration::from_millis(delay.saturating_add(jitter))
}

/// Normalize a caller-supplied body into its stored form.
///
/// Identity on every native form; plain values are JSON-stringified here,
/// once, so downstream consumers never re-encode. Callers supply a matching
/// content-type header when using JSON.
pub fn serialize_body(input: BodyInput) -> Body {
    match input {
        BodyInput::None => Body::Empty,
        BodyInput::Text(s) => Body::Text(s),
        BodyInput::Bytes(b) => Body::Bytes(b),
        BodyInput::Multipart(fields) => Body::Multipart(fields),
        BodyInput::UrlEncoded(pairs) => Body::UrlEncoded(pairs),
        BodyInput::Json(value) => Body::Json(value.to_string()),
    }
}

/// Normalize any accepted header shape into a plain name-to-value map.
pub fn normalize_headers(input: HeaderInput) -> HashMap<String, String> {
    match input {
        HeaderInput::None => HashMap::new(),
        HeaderInput::Map(map) => map,
        HeaderInput::Pairs(pairs) => pairs.into_iter().collect(),
        HeaderInput::Http(map) => map
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).to_string(),
                )
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MultipartField, MultipartValue};

    #[test]
    fn new_id_is_uuid_v4() {
        let id = new_id();
        let parsed = Uuid::parse_str(&id).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
    }

    #[test]
    fn new_id_is_unique() {
        assert_ne!(new_id(), new_id());
    }

    #[test]
    fn backoff_first_attempt_at_least_base() {
        let d = backoff(0, 1000, 30_000);
        assert!(d >= Duration::from_millis(1000));
        assert!(d < Duration::from_millis(1000 + JITTER_CEILING_MS));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let d = backoff(3, 1000, 30_000);
        assert!(d >= Duration::from_millis(8000));

        let capped = backoff(100, 1000, 30_000);
        assert!(capped >= Duration::from_millis(30_000));
        assert!(capped < Duration::from_millis(30_000 + JITTER_CEILING_MS));
    }

    #[test]
    fn backoff_large_attempt_does_not_overflow() {
        let d = backoff(u32::MAX, 1000, 30_000);
        assert!(d < Duration::from_millis(30_000 + JITTER_CEILING_MS));
    }

    #[test]
    fn serialize_body_is_identity_on_native_forms() {
        assert_eq!(serialize_body(BodyInput::None), Body::Empty);
        assert_eq!(
            serialize_body(BodyInput::Text("abc".to_string())),
            Body::Text("abc".to_string())
        );
        assert_eq!(
            serialize_body(BodyInput::Bytes(vec![1, 2, 3])),
            Body::Bytes(vec![1, 2, 3])
        );

        let fields = vec![MultipartField {
            name: "file".to_string(),
            filename: Some("a.bin".to_string()),
            content_type: None,
            value: MultipartValue::Bytes(vec![0, 255]),
        }];
        assert_eq!(
            serialize_body(BodyInput::Multipart(fields.clone())),
            Body::Multipart(fields)
        );

        let pairs = vec![("a".to_string(), "1".to_string())];
        assert_eq!(
            serialize_body(BodyInput::UrlEncoded(pairs.clone())),
            Body::UrlEncoded(pairs)
        );
    }

    #[test]
    fn serialize_body_stringifies_plain_values() {
        let body = serialize_body(BodyInput::Json(serde_json::json!({"n": 1})));
        match body {
            Body::Json(text) => {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(value["n"], 1);
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn already_stringified_text_is_untouched() {
        let text = r#"{"n":1}"#.to_string();
        assert_eq!(
            serialize_body(BodyInput::Text(text.clone())),
            Body::Text(text)
        );
    }

    #[test]
    fn normalize_headers_accepts_all_shapes() {
        assert!(normalize_headers(HeaderInput::None).is_empty());

        let pairs = normalize_headers(HeaderInput::Pairs(vec![(
            "X-Token".to_string(),
            "abc".to_string(),
        )]));
        assert_eq!(pairs.get("X-Token").map(String::as_str), Some("abc"));

        let map = normalize_headers(HeaderInput::Map(HashMap::from([(
            "Content-Type".to_string(),
            "text/plain".to_string(),
        )])));
        assert_eq!(
            map.get("Content-Type").map(String::as_str),
            Some("text/plain")
        );

        let mut http = reqwest::header::HeaderMap::new();
        http.insert("x-trace", "t-1".parse().unwrap());
        let from_http = normalize_headers(HeaderInput::Http(http));
        assert_eq!(from_http.get("x-trace").map(String::as_str), Some("t-1"));
    }
}
