//! Invocation of an allocated service instance.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::address::{self, AddressError};
use crate::transport::{Request, Transport, TransportError};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MODEL: &str = "tinyllama";

const SITE_PATH: &str = "invoke";
const OLLAMA_PATH: &str = "ollama/api/generate";

/// Wire protocol spoken by the instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvokeProtocol {
    /// `POST <addr>/invoke` with `{ServiceID, Input}`.
    #[default]
    Site,
    /// `POST <addr>/ollama/api/generate` with `{model, prompt, stream:false}`.
    Ollama,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum InvokeError {
    #[error("empty input")]
    EmptyInput,
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Non-success status; `message` is the instance's own text.
    #[error("{message}")]
    Failed { status: u16, message: String },
}

/// Result of one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeOutput {
    pub output: String,
    /// Instance that answered, when it said so.
    pub instance_id: Option<String>,
    pub raw: Value,
}

impl InvokeOutput {
    fn from_body(body: Value) -> Self {
        let output = ["Output", "response", "output"]
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| serde_json::to_string_pretty(&body).unwrap_or_default());
        let instance_id = body
            .get("InstanceID")
            .and_then(Value::as_str)
            .map(str::to_string);
        Self {
            output,
            instance_id,
            raw: body,
        }
    }
}

#[async_trait::async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(
        &self,
        address: &str,
        service_id: &str,
        input: &str,
    ) -> Result<InvokeOutput, InvokeError>;
}

pub struct HttpInvoker {
    transport: Arc<dyn Transport>,
    origin: Url,
    protocol: InvokeProtocol,
    model: String,
    timeout: Duration,
    cancel: CancellationToken,
}

impl HttpInvoker {
    pub fn new(transport: Arc<dyn Transport>, origin: Url) -> Self {
        Self {
            transport,
            origin,
            protocol: InvokeProtocol::default(),
            model: DEFAULT_MODEL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_protocol(mut self, protocol: InvokeProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn payload(&self, service_id: &str, input: &str) -> (&'static str, Value) {
        match self.protocol {
            InvokeProtocol::Site => (SITE_PATH, json!({"ServiceID": service_id, "Input": input})),
            InvokeProtocol::Ollama => (
                OLLAMA_PATH,
                json!({"model": self.model, "prompt": input, "stream": false}),
            ),
        }
    }
}

#[async_trait::async_trait]
impl Invoker for HttpInvoker {
    async fn invoke(
        &self,
        address: &str,
        service_id: &str,
        input: &str,
    ) -> Result<InvokeOutput, InvokeError> {
        if input.trim().is_empty() {
            return Err(InvokeError::EmptyInput);
        }
        let (path, body) = self.payload(service_id, input);
        let url = address::endpoint(address, &self.origin, path)?;

        let req = Request::post_json(url, &body)?
            .with_timeout(self.timeout)
            .with_cancel(self.cancel.clone());
        let resp = self.transport.send(req).await?;
        if !resp.is_success() {
            return Err(InvokeError::Failed {
                status: resp.status,
                message: resp.error_message(),
            });
        }

        let decoded = match resp.json::<Value>() {
            Ok(value) => value,
            // Plain-text answers are passed through as the output.
            Err(_) => Value::String(resp.text()),
        };
        Ok(match decoded {
            Value::String(text) => InvokeOutput {
                output: text.clone(),
                instance_id: None,
                raw: Value::String(text),
            },
            other => InvokeOutput::from_body(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::support::fake::{FakeTransport, Route};

    fn invoker(fake: &Arc<FakeTransport>) -> HttpInvoker {
        HttpInvoker::new(fake.clone(), Url::parse("http://origin.test:8081").unwrap())
    }

    #[tokio::test]
    async fn site_protocol_posts_service_and_input() {
        let fake = Arc::new(FakeTransport::new());
        fake.route(
            "POST",
            "http://origin.test:8081/site2-a/invoke",
            Route::ok(r#"{"InstanceID":"site2-a","ServiceID":"LLM1","OutputType":"text","Output":"hi there"}"#),
        );

        let out = invoker(&fake).invoke("/site2-a", "LLM1", "hello").await.unwrap();
        assert_eq!(out.output, "hi there");
        assert_eq!(out.instance_id.as_deref(), Some("site2-a"));
        let body: Value = serde_json::from_str(fake.calls()[0].body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({"ServiceID": "LLM1", "Input": "hello"}));
        assert_eq!(fake.calls()[0].timeout, Some(DEFAULT_TIMEOUT));
    }

    #[tokio::test]
    async fn ollama_protocol_reads_response_field() {
        let fake = Arc::new(FakeTransport::new());
        fake.route(
            "POST",
            "http://10.0.0.5:11434/ollama/api/generate",
            Route::ok(r#"{"model":"tinyllama","response":"generated","done":true}"#),
        );

        let out = invoker(&fake)
            .with_protocol(InvokeProtocol::Ollama)
            .invoke("http://10.0.0.5:11434", "LLM1", "hello")
            .await
            .unwrap();
        assert_eq!(out.output, "generated");
        let body: Value = serde_json::from_str(fake.calls()[0].body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({"model": "tinyllama", "prompt": "hello", "stream": false}));
    }

    #[tokio::test]
    async fn unknown_shape_falls_back_to_pretty_json() {
        let fake = Arc::new(FakeTransport::new());
        fake.route("POST", "http://origin.test:8081/x/invoke", Route::ok(r#"{"a":1}"#));
        let out = invoker(&fake).invoke("/x", "S", "in").await.unwrap();
        assert_eq!(out.output, "{\n  \"a\": 1\n}");
    }

    #[tokio::test]
    async fn empty_input_never_reaches_network() {
        let fake = Arc::new(FakeTransport::new());
        let err = invoker(&fake).invoke("/x", "S", "   ").await.unwrap_err();
        assert!(matches!(err, InvokeError::EmptyInput));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn failure_message_is_preserved() {
        let fake = Arc::new(FakeTransport::new());
        fake.route(
            "POST",
            "http://origin.test:8081/x/invoke",
            Route::status(500, "model not loaded"),
        );
        let err = invoker(&fake).invoke("/x", "S", "in").await.unwrap_err();
        assert_eq!(err.to_string(), "model not loaded");
    }
}
