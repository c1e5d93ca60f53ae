//! Outbound transport: the single path every network call of the client takes.
//!
//! Callers build a [`Request`], hand it to a [`Transport`] and get a
//! [`Response`] back. The production stack is an [`Instrumented`] layer
//! wrapped around a [`HyperTransport`]; tests swap in fakes.

mod hyper_impl;
mod instrument;
pub mod sink;
pub mod trace;

#[cfg(test)]
mod instrument_test;

use bytes::Bytes;
use hyper::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

pub use hyper_impl::HyperTransport;
pub use instrument::Instrumented;
pub use sink::{CallPhase, CallRecord, CallSink, FanoutSink, MemorySink, TracingSink};

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("invalid request to {url}: {message}")]
    InvalidRequest { url: String, message: String },
    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
    #[error("reading response from {url} failed: {message}")]
    Body { url: String, message: String },
    #[error("request to {url} cancelled")]
    Cancelled { url: String },
    #[error("decoding response from {url} failed: {message}")]
    Decode { url: String, message: String },
}

/// Outbound request. Method defaults to GET.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    /// Hard bound on the whole exchange; the transport default applies when unset.
    pub timeout: Option<Duration>,
    /// When false the response body is dropped unread and the call completes
    /// as soon as the status line and headers have arrived.
    pub read_body: bool,
    pub cancel: Option<CancellationToken>,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
            timeout: None,
            read_body: true,
            cancel: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// POST with a JSON-encoded body.
    pub fn post_json<T: Serialize + ?Sized>(url: Url, body: &T) -> Result<Self, TransportError> {
        let encoded = serde_json::to_vec(body).map_err(|e| TransportError::InvalidRequest {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        let mut req = Self::new(Method::POST, url);
        req.body = Some(Bytes::from(encoded));
        Ok(req.header("Content-Type", "application/json"))
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Completes on response headers; the body is never read.
    pub fn without_body(mut self) -> Self {
        self.read_body = false;
        self
    }
}

/// HTTP Response wrapper.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: String,
    pub status: u16,
    pub body: Bytes,
    /// Time from send until the response headers arrived, as seen by the
    /// transport that talked to the network. Unset when it does not track it.
    pub elapsed: Option<Duration>,
}

impl Response {
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            url: url.into(),
            status,
            body: body.into(),
            elapsed: None,
        }
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Message to surface for a non-success response: the `error` field of a
    /// JSON error body, else the body text as sent (trimmed), else `HTTP <status>`.
    pub fn error_message(&self) -> String {
        if let Ok(serde_json::Value::Object(obj)) = serde_json::from_slice(&self.body) {
            if let Some(serde_json::Value::String(msg)) = obj.get("error") {
                return msg.clone();
            }
        }
        let text = self.text();
        let text = text.trim();
        if text.is_empty() {
            format!("HTTP {}", self.status)
        } else {
            text.to_string()
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_slice(&self.body).map_err(|e| TransportError::Decode {
            url: self.url.clone(),
            message: e.to_string(),
        })
    }
}

/// Transport defines the interface for issuing outbound HTTP calls.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, req: Request) -> Result<Response, TransportError>;
}

#[async_trait::async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, req: Request) -> Result<Response, TransportError> {
        (**self).send(req).await
    }
}

/// Builds the production transport: hyper underneath, every call observed by `sink`.
pub fn build(default_timeout: Duration, sink: Arc<dyn CallSink>) -> Arc<dyn Transport> {
    let inner: Arc<dyn Transport> = Arc::new(HyperTransport::new(default_timeout));
    Arc::new(Instrumented::new(inner, sink))
}
