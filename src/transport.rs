//! The platform network primitive behind an injectable seam.

use crate::error::{TransportError, TransportResult};
use crate::models::{Body, Method, MultipartField, MultipartValue, QueuedRequest};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Response as seen by the queue: status, headers, raw body bytes.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl TransportResponse {
    /// True for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Executes a queued request against the network.
///
/// The stored body is passed exactly as persisted: JSON stringification
/// happened at enqueue time, text and bytes go over the wire untouched.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &QueuedRequest) -> TransportResult<TransportResponse>;
}

/// Configuration for the reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Base URL that relative request paths resolve against.
    pub base_url: Option<String>,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            base_url: None,
        }
    }
}

/// Default transport over a shared reqwest client.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl HttpTransport {
    /// Create a transport with the given configuration.
    pub fn new(config: HttpTransportConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: config.base_url,
        }
    }

    /// Create a transport with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(HttpTransportConfig::default())
    }

    fn resolve(&self, url: &str) -> String {
        match (&self.base_url, url.starts_with('/')) {
            (Some(base), true) => format!("{}{}", base.trim_end_matches('/'), url),
            _ => url.to_string(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &QueuedRequest) -> TransportResult<TransportResponse> {
        let url = self.resolve(&request.url);
        debug!(method = request.method.as_str(), url = %url, "Executing request");

        let mut builder = self.client.request(to_reqwest_method(request.method), &url);

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        builder = match &request.body {
            Body::Empty => builder,
            Body::Text(text) => builder.body(text.clone()),
            Body::Json(text) => builder.body(text.clone()),
            Body::Bytes(bytes) => builder.body(bytes.clone()),
            Body::UrlEncoded(pairs) => builder.form(pairs),
            Body::Multipart(fields) => builder.multipart(build_form(fields)?),
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();

        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            headers.insert(
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).to_string(),
            );
        }

        let body = response.bytes().await?.to_vec();

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn build_form(fields: &[MultipartField]) -> TransportResult<Form> {
    let mut form = Form::new();
    for field in fields {
        let mut part = match &field.value {
            MultipartValue::Text(text) => Part::text(text.clone()),
            MultipartValue::Bytes(bytes) => Part::bytes(bytes.clone()),
        };
        if let Some(filename) = &field.filename {
            part = part.file_name(filename.clone());
        }
        if let Some(content_type) = &field.content_type {
            part = part
                .mime_str(content_type)
                .map_err(|e| TransportError::Failed(format!("invalid content type: {e}")))?;
        }
        form = form.part(field.name.clone(), part);
    }
    Ok(form)
}
