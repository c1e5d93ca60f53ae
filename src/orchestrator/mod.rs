//! Allocation orchestrator: drives one discover → probe → allocate → invoke →
//! release cycle per session.

mod session;


use std::fmt;

use crate::coordinator::CoordinatorError;
use crate::invoke::InvokeError;
use crate::preference::PreferenceError;
use crate::probe::ProbeError;
use crate::transport::TransportError;

pub use session::Session;

/// Workflow state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    #[default]
    Idle,
    CandidatesFetched,
    Measured,
    Allocated,
    Invoked,
    Released,
    Errored,
}

impl State {
    pub fn as_str(self) -> &'static str {
        match self {
            State::Idle => "idle",
            State::CandidatesFetched => "candidates_fetched",
            State::Measured => "measured",
            State::Allocated => "allocated",
            State::Invoked => "invoked",
            State::Released => "released",
            State::Errored => "errored",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage failures. Remote messages are carried verbatim.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no candidates for service {service_id}")]
    NotFound { service_id: String },
    #[error("{0}")]
    ProbeTimeout(String),
    #[error("{0}")]
    ProbeTransport(String),
    #[error("{0}")]
    AllocationDenied(String),
    #[error("{0}")]
    InvocationFailure(String),
    #[error("no active allocation")]
    NoActiveAllocation,
    #[error("allocation {allocation_id} is still held, release it first")]
    ConflictingSession { allocation_id: String },
    #[error("{0}")]
    Coordinator(String),
    #[error("{stage} requires state {expected}, session is {actual}")]
    OutOfOrder {
        stage: &'static str,
        expected: State,
        actual: State,
    },
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Preference(#[from] PreferenceError),
}

impl From<ProbeError> for Error {
    fn from(err: ProbeError) -> Self {
        match err {
            ProbeError::Cancelled => Error::Cancelled,
            e if e.is_timeout() => Error::ProbeTimeout(e.to_string()),
            e => Error::ProbeTransport(e.to_string()),
        }
    }
}

impl From<InvokeError> for Error {
    fn from(err: InvokeError) -> Self {
        match err {
            InvokeError::Transport(TransportError::Cancelled { .. }) => Error::Cancelled,
            e => Error::InvocationFailure(e.to_string()),
        }
    }
}

impl From<CoordinatorError> for Error {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::Transport(TransportError::Cancelled { .. }) => Error::Cancelled,
            e => Error::Coordinator(e.to_string()),
        }
    }
}
