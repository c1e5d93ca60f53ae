//! Hyper-based implementation of the transport.
//! This module contains the actual request/response handling using hyper client.

use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::Uri;
use bytes::Bytes;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use super::{Request, Response, Transport, TransportError};
use crate::http::client::{create_client, HyperClient};

/// Transport that talks HTTP directly through a pooled hyper client.
pub struct HyperTransport {
    client: HyperClient,
    default_timeout: Duration,
}

impl HyperTransport {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            client: create_client(),
            default_timeout,
        }
    }

    fn build_request(
        req: &Request,
        url: &str,
    ) -> Result<hyper::Request<BoxBody<Bytes, hyper::Error>>, TransportError> {
        let uri = url.parse::<Uri>().map_err(|e| TransportError::InvalidRequest {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let mut builder = hyper::Request::builder().method(req.method.clone()).uri(uri);
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let body: BoxBody<Bytes, hyper::Error> = match &req.body {
            Some(bytes) => Full::new(bytes.clone())
                .map_err(|never: std::convert::Infallible| match never {})
                .boxed(),
            None => Empty::<Bytes>::new()
                .map_err(|never: std::convert::Infallible| match never {})
                .boxed(),
        };

        builder.body(body).map_err(|e| TransportError::InvalidRequest {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    async fn exchange(
        &self,
        http_req: hyper::Request<BoxBody<Bytes, hyper::Error>>,
        url: &str,
        read_body: bool,
    ) -> Result<Response, TransportError> {
        let started = Instant::now();
        let response = self.client.request(http_req).await.map_err(|e| {
            tracing::debug!(
                uri = %url,
                error = %e,
                error_debug = ?e,
                "Hyper client request failed"
            );
            TransportError::Request {
                url: url.to_string(),
                message: e.to_string(),
            }
        })?;

        let headers_at = started.elapsed();
        let status = response.status().as_u16();
        if !read_body {
            // Dropping the response closes the body stream without reading it.
            return Ok(Response::new(url, status, Bytes::new()).with_elapsed(headers_at));
        }

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| TransportError::Body {
                url: url.to_string(),
                message: e.to_string(),
            })?
            .to_bytes();

        Ok(Response::new(url, status, body).with_elapsed(headers_at))
    }
}

#[async_trait::async_trait]
impl Transport for HyperTransport {
    async fn send(&self, req: Request) -> Result<Response, TransportError> {
        let url = req.url.to_string();
        let http_req = Self::build_request(&req, &url)?;
        let timeout_duration = req.timeout.unwrap_or(self.default_timeout);

        let bounded = timeout(timeout_duration, self.exchange(http_req, &url, req.read_body));
        let outcome = match &req.cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        return Err(TransportError::Cancelled { url: url.clone() });
                    }
                    outcome = bounded => outcome,
                }
            }
            None => bounded.await,
        };

        match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(
                    uri = %url,
                    timeout = ?timeout_duration,
                    "Request timed out"
                );
                Err(TransportError::Timeout {
                    url,
                    timeout: timeout_duration,
                })
            }
        }
    }
}
