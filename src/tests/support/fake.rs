// Scripted in-process transport for unit tests.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::transport::{Request, Response, Transport, TransportError};

/// Scripted behaviour for one `METHOD URL` pair.
#[derive(Debug, Clone)]
pub enum Route {
    Respond {
        status: u16,
        body: String,
        delay: Duration,
    },
    Fail(TransportError),
    /// Never answers; only the request timeout (if any) ends the call.
    Hang,
}

impl Route {
    pub fn ok(body: impl Into<String>) -> Self {
        Route::Respond {
            status: 200,
            body: body.into(),
            delay: Duration::ZERO,
        }
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Route::Respond {
            status,
            body: body.into(),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(delay: Duration) -> Self {
        Route::Respond {
            status: 200,
            body: String::new(),
            delay,
        }
    }
}

/// A call seen by the fake.
#[derive(Debug, Clone)]
pub struct SeenCall {
    pub method: String,
    pub url: String,
    pub body: Option<String>,
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub read_body: bool,
}

#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<Vec<SeenCall>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, method: &str, url: &str, route: Route) -> &Self {
        self.routes.lock().insert(format!("{} {}", method, url), route);
        self
    }

    pub fn calls(&self) -> Vec<SeenCall> {
        self.calls.lock().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.url.clone()).collect()
    }
}

async fn wait_or_timeout(delay: Duration, req_timeout: Option<Duration>, url: &str) -> Result<(), TransportError> {
    match req_timeout {
        Some(t) if t < delay => {
            tokio::time::sleep(t).await;
            Err(TransportError::Timeout {
                url: url.to_string(),
                timeout: t,
            })
        }
        _ => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn send(&self, req: Request) -> Result<Response, TransportError> {
        let url = req.url.to_string();
        self.calls.lock().push(SeenCall {
            method: req.method.to_string(),
            url: url.clone(),
            body: req.body.as_ref().map(|b| String::from_utf8_lossy(b).into_owned()),
            headers: req.headers.clone(),
            timeout: req.timeout,
            read_body: req.read_body,
        });

        let route = self
            .routes
            .lock()
            .get(&format!("{} {}", req.method, url))
            .cloned()
            .unwrap_or_else(|| Route::status(404, "404 page not found"));

        let cancel = req.cancel.clone().unwrap_or_default();
        let work = async {
            match route {
                Route::Respond { status, body, delay } => {
                    let started = Instant::now();
                    wait_or_timeout(delay, req.timeout, &url).await?;
                    let body = if req.read_body { body } else { String::new() };
                    Ok(Response::new(url.clone(), status, body).with_elapsed(started.elapsed()))
                }
                Route::Fail(err) => Err(err),
                Route::Hang => {
                    wait_or_timeout(Duration::from_secs(3600), req.timeout, &url).await?;
                    Ok(Response::new(url.clone(), 200, ""))
                }
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled { url: url.clone() }),
            result = work => result,
        }
    }
}
