//! Latency prober: measures round-trip time to service instances.
//!
//! A probe is a `GET <instance>/ping` with caching disabled whose body is
//! never read; the timer stops when the response headers arrive. Each probe
//! carries its own timeout and is cancelled independently of its siblings.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::address::{self, AddressError};
use crate::model::{Candidate, InstanceRef, Measurement};
use crate::time;
use crate::transport::{Request, Transport, TransportError};


pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);
pub const MIN_TIMEOUT: Duration = Duration::from_millis(1);
pub const DEFAULT_PATH: &str = "ping";

/// Slack granted to the transport to report its own timeout before the
/// prober abandons the call itself.
const TIMEOUT_GRACE: Duration = Duration::from_millis(50);

/// How probes across instances are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMode {
    /// All probes in flight at once; total time bounded by the slowest probe.
    #[default]
    Concurrent,
    /// One probe after another, in discovery order.
    Sequential,
}

/// What a single failing probe does to the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// The whole batch fails with the first probe error.
    Abort,
    /// The instance is recorded with an absent delay.
    #[default]
    Record,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("ping {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },
    #[error("ping {url} -> HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("ping {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("ping {address:?}: {source}")]
    Address {
        address: String,
        #[source]
        source: AddressError,
    },
    #[error("probing cancelled")]
    Cancelled,
}

impl ProbeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProbeError::Timeout { .. })
    }

    fn from_transport(url: &Url, timeout: Duration, err: TransportError) -> Self {
        match err {
            TransportError::Timeout { .. } => ProbeError::Timeout {
                url: url.to_string(),
                timeout_ms: time::round_millis(timeout),
            },
            TransportError::Cancelled { .. } => ProbeError::Cancelled,
            other => ProbeError::Transport {
                url: url.to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Prober measures round-trip time to instances through the shared transport.
#[derive(Clone)]
pub struct Prober {
    transport: Arc<dyn Transport>,
    origin: Url,
    path: String,
    timeout: Duration,
    mode: ProbeMode,
    policy: FailurePolicy,
    budget: Option<Duration>,
    cancel: CancellationToken,
}

impl Prober {
    /// Creates a prober resolving site-relative addresses against `origin`.
    pub fn new(transport: Arc<dyn Transport>, origin: Url) -> Self {
        Self {
            transport,
            origin,
            path: DEFAULT_PATH.to_string(),
            timeout: DEFAULT_TIMEOUT,
            mode: ProbeMode::default(),
            policy: FailurePolicy::default(),
            budget: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = clamp_timeout(timeout);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_mode(mut self, mode: ProbeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Overall budget for one `measure_all` call.
    pub fn with_budget(mut self, budget: Option<Duration>) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn mode(&self) -> ProbeMode {
        self.mode
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Measures round-trip time to one instance, in whole milliseconds.
    ///
    /// Fails with [`ProbeError::Timeout`] when no response arrives within
    /// `timeout`; the in-flight request is cancelled. A non-2xx status fails
    /// with [`ProbeError::Status`].
    pub async fn probe(&self, address: &str, timeout: Duration) -> Result<u64, ProbeError> {
        let timeout = clamp_timeout(timeout);
        let url = address::endpoint(address, &self.origin, &self.path).map_err(|source| {
            ProbeError::Address {
                address: address.to_string(),
                source,
            }
        })?;

        let req = Request::get(url.clone())
            .header("Cache-Control", "no-store")
            .header("Pragma", "no-cache")
            .with_timeout(timeout)
            .with_cancel(self.cancel.clone())
            .without_body();

        let started = Instant::now();
        let sent = tokio::time::timeout(timeout + TIMEOUT_GRACE, self.transport.send(req)).await;
        let outer = started.elapsed();

        let resp = match sent {
            Ok(Ok(resp)) => resp,
            Ok(Err(err)) => return Err(ProbeError::from_transport(&url, timeout, err)),
            Err(_) => {
                return Err(ProbeError::Timeout {
                    url: url.to_string(),
                    timeout_ms: time::round_millis(timeout),
                })
            }
        };

        if !resp.is_success() {
            return Err(ProbeError::Status {
                url: url.to_string(),
                status: resp.status,
            });
        }
        // Exchange time only; work done by observers around the transport is excluded.
        let elapsed = resp.elapsed.unwrap_or(outer);
        // A response that made it in only after the bound is still a timeout.
        if elapsed > timeout {
            return Err(ProbeError::Timeout {
                url: url.to_string(),
                timeout_ms: time::round_millis(timeout),
            });
        }

        let delay_ms = time::round_millis(elapsed);
        debug!(
            component = "prober",
            event = "probed",
            url = %url,
            delay_ms,
            "instance answered"
        );
        Ok(delay_ms)
    }

    /// Probes every instance of every candidate and returns one measurement per
    /// instance, in discovery order.
    ///
    /// Under [`FailurePolicy::Record`] failed instances carry no delay; the
    /// batch still fails with the first probe error when no instance at all
    /// could be measured.
    pub async fn measure_all(&self, candidates: &[Candidate]) -> Result<Vec<Measurement>, ProbeError> {
        let targets: Vec<(&Candidate, &InstanceRef)> = candidates
            .iter()
            .flat_map(|c| c.instances.iter().map(move |i| (c, i)))
            .collect();

        let results = match self.mode {
            ProbeMode::Concurrent => self.probe_concurrently(&targets).await,
            ProbeMode::Sequential => self.probe_sequentially(&targets).await,
        };

        let mut measurements = Vec::with_capacity(targets.len());
        let mut first_error = None;
        for ((candidate, instance), result) in targets.iter().zip(results) {
            let (delay_ms, error) = match result {
                Ok(ms) => (Some(ms), None),
                Err(ProbeError::Cancelled) => return Err(ProbeError::Cancelled),
                Err(e) if self.policy == FailurePolicy::Abort => return Err(e),
                Err(e) => {
                    warn!(
                        component = "prober",
                        event = "probe_failed",
                        site = %candidate.site_name,
                        instance = %instance.instance_id,
                        error = %e,
                        "instance recorded without delay"
                    );
                    let message = e.to_string();
                    first_error.get_or_insert(e);
                    (None, Some(message))
                }
            };
            measurements.push(Measurement {
                site_name: candidate.site_name.clone(),
                instance_id: instance.instance_id.clone(),
                address: instance.address.clone(),
                delay_ms,
                error,
            });
        }

        // Nothing to rank: fail like the first instance did.
        if !measurements.iter().any(Measurement::is_measured) {
            if let Some(err) = first_error {
                return Err(err);
            }
        }
        Ok(measurements)
    }

    async fn probe_concurrently(
        &self,
        targets: &[(&Candidate, &InstanceRef)],
    ) -> Vec<Result<u64, ProbeError>> {
        let timeout = match self.budget {
            Some(budget) => self.timeout.min(budget),
            None => self.timeout,
        };
        join_all(
            targets
                .iter()
                .map(|(_, instance)| self.probe(&instance.address, timeout)),
        )
        .await
    }

    async fn probe_sequentially(
        &self,
        targets: &[(&Candidate, &InstanceRef)],
    ) -> Vec<Result<u64, ProbeError>> {
        let deadline = self.budget.map(|b| (b, Instant::now() + b));
        let mut results = Vec::with_capacity(targets.len());

        for (_, instance) in targets {
            let result = match deadline {
                Some((budget, deadline)) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining < MIN_TIMEOUT {
                        Err(self.budget_exhausted(&instance.address, budget))
                    } else {
                        self.probe(&instance.address, self.timeout.min(remaining)).await
                    }
                }
                None => self.probe(&instance.address, self.timeout).await,
            };

            let stop = match &result {
                Err(ProbeError::Cancelled) => true,
                Err(_) => self.policy == FailurePolicy::Abort,
                Ok(_) => false,
            };
            results.push(result);
            if stop {
                break;
            }
        }
        results
    }

    /// Timeout reported for an instance left unprobed because the overall
    /// budget ran out before its turn.
    fn budget_exhausted(&self, address: &str, budget: Duration) -> ProbeError {
        match address::endpoint(address, &self.origin, &self.path) {
            Ok(url) => ProbeError::Timeout {
                url: url.to_string(),
                timeout_ms: time::round_millis(budget),
            },
            Err(source) => ProbeError::Address {
                address: address.to_string(),
                source,
            },
        }
    }
}

fn clamp_timeout(timeout: Duration) -> Duration {
    if timeout < MIN_TIMEOUT {
        warn!(
            component = "prober",
            event = "timeout_clamped",
            requested = ?timeout,
            "min probe timeout is 1ms"
        );
        MIN_TIMEOUT
    } else {
        timeout
    }
}
