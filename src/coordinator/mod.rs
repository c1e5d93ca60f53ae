//! Client for the remote coordinator: candidate discovery, allocation and release.
//!
//! The ranking of measurements happens remotely; this side only speaks the
//! HTTP contract.

use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::address::join_path;
use crate::model::{
    AllocateRequest, AllocateResponse, Candidate, CandidatesRequest, CandidatesResponse,
    CpsViewResponse, CpsViewRow, ReleaseRequest, SelectionNotice, ServiceDescriptor,
    ServicesResponse,
};
use crate::preference::Preference;
use crate::transport::{Request, Response, Transport, TransportError};


pub const PATH_SERVICES: &str = "services";
pub const PATH_CPS_VIEW: &str = "cps/view";
pub const PATH_SELECTION: &str = "client/selection";
pub const PATH_CANDIDATES: &str = "cps/candidates";
pub const PATH_ALLOCATE: &str = "cps/allocate";
pub const PATH_RELEASE: &str = "allocations/release";

#[derive(Debug, Clone, thiserror::Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Non-success answer; `message` is the coordinator's own text.
    #[error("{message}")]
    Rejected { status: u16, message: String },
}

/// Coordinator defines the remote collaborator consumed by the orchestrator.
#[async_trait::async_trait]
pub trait Coordinator: Send + Sync {
    async fn services(&self) -> Result<Vec<ServiceDescriptor>, CoordinatorError>;

    async fn cps_view(&self) -> Result<Vec<CpsViewRow>, CoordinatorError>;

    async fn announce_selection(
        &self,
        service_id: &str,
        preference: &Preference,
    ) -> Result<(), CoordinatorError>;

    async fn candidates(&self, service_id: &str) -> Result<Vec<Candidate>, CoordinatorError>;

    async fn allocate(&self, req: &AllocateRequest) -> Result<AllocateResponse, CoordinatorError>;

    async fn release(&self, allocation_id: &str) -> Result<(), CoordinatorError>;
}

/// HTTP coordinator client routed through the shared transport.
pub struct HttpCoordinator {
    transport: Arc<dyn Transport>,
    base_url: String,
    timeout: Duration,
    cancel: CancellationToken,
}

impl HttpCoordinator {
    /// `base_url` is the API root, e.g. `http://127.0.0.1:8080/api`.
    pub fn new(transport: Arc<dyn Transport>, base_url: &Url, timeout: Duration) -> Self {
        Self {
            transport,
            base_url: base_url.as_str().to_string(),
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn url(&self, path: &str) -> Result<Url, TransportError> {
        let raw = join_path(&self.base_url, path);
        Url::parse(&raw).map_err(|e| TransportError::InvalidRequest {
            url: raw,
            message: e.to_string(),
        })
    }

    fn accept(resp: Response) -> Result<Response, CoordinatorError> {
        if resp.is_success() {
            Ok(resp)
        } else {
            Err(CoordinatorError::Rejected {
                status: resp.status,
                message: resp.error_message(),
            })
        }
    }

    async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R, CoordinatorError> {
        let req = Request::get(self.url(path)?)
            .with_timeout(self.timeout)
            .with_cancel(self.cancel.clone());
        let resp = Self::accept(self.transport.send(req).await?)?;
        Ok(resp.json()?)
    }

    async fn post(
        &self,
        path: &str,
        body: &(impl Serialize + Sync),
        cancellable: bool,
    ) -> Result<Response, CoordinatorError> {
        let mut req = Request::post_json(self.url(path)?, body)?.with_timeout(self.timeout);
        if cancellable {
            req = req.with_cancel(self.cancel.clone());
        }
        Self::accept(self.transport.send(req).await?)
    }
}

#[async_trait::async_trait]
impl Coordinator for HttpCoordinator {
    async fn services(&self) -> Result<Vec<ServiceDescriptor>, CoordinatorError> {
        let resp: ServicesResponse = self.get_json(PATH_SERVICES).await?;
        Ok(resp.services)
    }

    async fn cps_view(&self) -> Result<Vec<CpsViewRow>, CoordinatorError> {
        let resp: CpsViewResponse = self.get_json(PATH_CPS_VIEW).await?;
        Ok(resp.cps)
    }

    async fn announce_selection(
        &self,
        service_id: &str,
        preference: &Preference,
    ) -> Result<(), CoordinatorError> {
        let notice = SelectionNotice {
            service_id,
            gas: 1,
            cost_pref: preference.cost,
            delay_pref: preference.delay,
            selected_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        self.post(PATH_SELECTION, &notice, true).await?;
        Ok(())
    }

    async fn candidates(&self, service_id: &str) -> Result<Vec<Candidate>, CoordinatorError> {
        let resp = self
            .post(PATH_CANDIDATES, &CandidatesRequest { service_id }, true)
            .await?;
        let decoded: CandidatesResponse = resp.json()?;
        Ok(decoded.candidates)
    }

    async fn allocate(&self, req: &AllocateRequest) -> Result<AllocateResponse, CoordinatorError> {
        let resp = self.post(PATH_ALLOCATE, req, true).await?;
        Ok(resp.json()?)
    }

    /// Never bound to the session's cancellation: a held reservation must be
    /// releasable even after the workflow was abandoned.
    async fn release(&self, allocation_id: &str) -> Result<(), CoordinatorError> {
        self.post(PATH_RELEASE, &ReleaseRequest { allocation_id }, false)
            .await?;
        Ok(())
    }
}
