// One client session: holds the workflow state and at most one allocation.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{Error, State};
use crate::coordinator::{Coordinator, CoordinatorError};
use crate::invoke::{InvokeOutput, Invoker};
use crate::model::{AllocateRequest, Allocation, Candidate, Measurement};
use crate::preference::{Preference, PreferenceStore};
use crate::probe::Prober;

/// Session sequences the workflow stages and owns their results.
///
/// Stages run strictly in order: candidates, measurements, allocation,
/// invocation, release. A stage failure moves the session to
/// [`State::Errored`] and keeps the message in [`Session::last_error`]; an
/// allocation obtained before the failure stays held until [`Session::release`].
pub struct Session {
    coordinator: Arc<dyn Coordinator>,
    prober: Prober,
    invoker: Arc<dyn Invoker>,
    store: Arc<dyn PreferenceStore>,
    cancel: CancellationToken,
    announce_selection: bool,

    state: State,
    service_id: Option<String>,
    preference: Preference,
    candidates: Vec<Candidate>,
    measurements: Vec<Measurement>,
    allocation: Option<Allocation>,
    last_output: Option<InvokeOutput>,
    last_error: Option<String>,
}

impl Session {
    /// Creates an idle session; the preference is read from `store` once here.
    pub fn new(
        coordinator: Arc<dyn Coordinator>,
        prober: Prober,
        invoker: Arc<dyn Invoker>,
        store: Arc<dyn PreferenceStore>,
    ) -> Self {
        let preference = store.load();
        Self {
            coordinator,
            prober,
            invoker,
            store,
            cancel: CancellationToken::new(),
            announce_selection: false,
            state: State::Idle,
            service_id: None,
            preference,
            candidates: Vec::new(),
            measurements: Vec::new(),
            allocation: None,
            last_output: None,
            last_error: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_announce_selection(mut self, enabled: bool) -> Self {
        self.announce_selection = enabled;
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn service_id(&self) -> Option<&str> {
        self.service_id.as_deref()
    }

    pub fn preference(&self) -> Preference {
        self.preference
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    pub fn allocation(&self) -> Option<&Allocation> {
        self.allocation.as_ref()
    }

    pub fn last_output(&self) -> Option<&InvokeOutput> {
        self.last_output.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Persists `preference`; it applies to the next allocation request.
    pub fn set_preference(&mut self, preference: Preference) -> Result<(), Error> {
        self.store.save(&preference)?;
        self.preference = preference;
        info!(
            component = "orchestrator",
            event = "preference_set",
            cost = %preference.cost,
            delay = %preference.delay,
            "preference saved"
        );
        Ok(())
    }

    /// `Idle → CandidatesFetched`. Rejected while an allocation is held.
    pub async fn fetch_candidates(&mut self, service_id: &str) -> Result<&[Candidate], Error> {
        if let Some(held) = &self.allocation {
            let err = Error::ConflictingSession {
                allocation_id: held.allocation_id.clone(),
            };
            return self.reject(err);
        }
        self.reset(service_id);
        self.ensure_live()?;

        if self.announce_selection {
            if let Err(e) = self
                .coordinator
                .announce_selection(service_id, &self.preference)
                .await
            {
                warn!(
                    component = "orchestrator",
                    event = "announce_failed",
                    service_id,
                    error = %e,
                    "selection announcement failed"
                );
            }
        }

        let candidates = match self.coordinator.candidates(service_id).await {
            Ok(list) => list,
            Err(e) => return self.fail(e.into()),
        };
        if candidates.iter().all(|c| c.instances.is_empty()) {
            return self.fail(Error::NotFound {
                service_id: service_id.to_string(),
            });
        }

        info!(
            component = "orchestrator",
            event = "candidates_fetched",
            service_id,
            sites = candidates.len(),
            instances = candidates.iter().map(|c| c.instances.len()).sum::<usize>(),
            "candidates fetched"
        );
        self.candidates = candidates;
        self.state = State::CandidatesFetched;
        Ok(&self.candidates)
    }

    /// `CandidatesFetched → Measured`.
    pub async fn measure(&mut self) -> Result<&[Measurement], Error> {
        self.expect_state("measure", State::CandidatesFetched)?;
        self.ensure_live()?;

        let measurements = match self.prober.measure_all(&self.candidates).await {
            Ok(m) => m,
            Err(e) => return self.fail(e.into()),
        };

        info!(
            component = "orchestrator",
            event = "measured",
            measured = measurements.iter().filter(|m| m.is_measured()).count(),
            total = measurements.len(),
            "instances measured"
        );
        self.measurements = measurements;
        self.state = State::Measured;
        Ok(&self.measurements)
    }

    /// `Measured → Allocated`. Only instances with a measured delay are sent.
    pub async fn allocate(&mut self) -> Result<&Allocation, Error> {
        self.expect_state("allocate", State::Measured)?;
        self.ensure_live()?;

        let service_id = self.service_id.clone().unwrap_or_default();
        let req = AllocateRequest {
            service_id: service_id.clone(),
            measurements: self
                .measurements
                .iter()
                .filter(|m| m.is_measured())
                .cloned()
                .collect(),
            cost_pref: self.preference.cost,
            delay_pref: self.preference.delay,
        };

        let resp = match self.coordinator.allocate(&req).await {
            Ok(resp) => resp,
            Err(CoordinatorError::Rejected { message, .. }) => {
                return self.fail(Error::AllocationDenied(message))
            }
            Err(e) => return self.fail(e.into()),
        };

        if resp.allocation_id.is_empty() {
            return self.fail(Error::AllocationDenied(
                "allocation response carries no allocationId".to_string(),
            ));
        }

        let allocation = Allocation {
            allocation_id: resp.allocation_id,
            chosen_address: resp.address,
            chosen_instance_id: resp.instance_id,
            service_id: resp.service_id.unwrap_or(service_id),
            csci_id: resp.csci_id,
            cost: resp.cost,
            gas_remaining: resp.gas_remaining,
        };

        if allocation.chosen_address.trim().is_empty() {
            // Unusable reservation: hand it back, keep it if that fails.
            let id = allocation.allocation_id.clone();
            if let Err(e) = self.coordinator.release(&id).await {
                warn!(
                    component = "orchestrator",
                    event = "release_failed",
                    allocation_id = %id,
                    error = %e,
                    "unusable allocation could not be released"
                );
                self.allocation = Some(allocation);
            }
            return self.fail(Error::AllocationDenied(format!(
                "allocation {} carries no addr",
                id
            )));
        }

        info!(
            component = "orchestrator",
            event = "allocated",
            allocation_id = %allocation.allocation_id,
            instance = %allocation.chosen_instance_id,
            addr = %allocation.chosen_address,
            cost_pref = %self.preference.cost,
            delay_pref = %self.preference.delay,
            "allocation granted"
        );
        self.state = State::Allocated;
        Ok(&*self.allocation.insert(allocation))
    }

    /// `Allocated → Invoked`. Invoking again while the allocation is held is
    /// allowed; a failure keeps the allocation.
    pub async fn invoke(&mut self, input: &str) -> Result<&InvokeOutput, Error> {
        let Some(allocation) = self.allocation.clone() else {
            let actual = self.state;
            return self.reject(Error::OutOfOrder {
                stage: "invoke",
                expected: State::Allocated,
                actual,
            });
        };
        self.last_error = None;
        self.ensure_live()?;

        let output = match self
            .invoker
            .invoke(&allocation.chosen_address, &allocation.service_id, input)
            .await
        {
            Ok(output) => output,
            Err(e) => return self.fail(e.into()),
        };

        info!(
            component = "orchestrator",
            event = "invoked",
            allocation_id = %allocation.allocation_id,
            instance = %output.instance_id.as_deref().unwrap_or(&allocation.chosen_instance_id),
            "instance invoked"
        );
        self.state = State::Invoked;
        Ok(&*self.last_output.insert(output))
    }

    /// `Allocated | Invoked → Released`. Without an allocation nothing is sent.
    ///
    /// Runs even after cancellation so a held reservation is never leaked.
    pub async fn release(&mut self) -> Result<(), Error> {
        let Some(allocation) = self.allocation.clone() else {
            return self.reject(Error::NoActiveAllocation);
        };
        self.last_error = None;

        match self.coordinator.release(&allocation.allocation_id).await {
            Ok(()) => {}
            Err(CoordinatorError::Rejected { status: 404, message }) => {
                // The coordinator no longer knows it; nothing is left to hand back.
                self.allocation = None;
                return self.fail(Error::Coordinator(message));
            }
            Err(e) => return self.fail(e.into()),
        }

        info!(
            component = "orchestrator",
            event = "released",
            allocation_id = %allocation.allocation_id,
            "allocation released"
        );
        self.allocation = None;
        self.state = State::Released;
        Ok(())
    }

    /// Full pipeline up to invocation. The allocation stays held; the caller
    /// ends the session with [`Session::release`].
    pub async fn run(&mut self, service_id: &str, input: &str) -> Result<InvokeOutput, Error> {
        self.fetch_candidates(service_id).await?;
        self.measure().await?;
        self.allocate().await?;
        Ok(self.invoke(input).await?.clone())
    }

    fn reset(&mut self, service_id: &str) {
        self.state = State::Idle;
        self.service_id = Some(service_id.to_string());
        self.candidates.clear();
        self.measurements.clear();
        self.last_output = None;
        self.last_error = None;
    }

    fn ensure_live(&mut self) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return self.fail(Error::Cancelled);
        }
        Ok(())
    }

    fn expect_state(&mut self, stage: &'static str, expected: State) -> Result<(), Error> {
        if self.state != expected {
            let actual = self.state;
            return self.reject(Error::OutOfOrder {
                stage,
                expected,
                actual,
            });
        }
        self.last_error = None;
        Ok(())
    }

    /// Local refusal: recorded, state untouched.
    fn reject<T>(&mut self, err: Error) -> Result<T, Error> {
        warn!(
            component = "orchestrator",
            event = "rejected",
            state = %self.state,
            error = %err,
            "action rejected"
        );
        self.last_error = Some(err.to_string());
        Err(err)
    }

    fn fail<T>(&mut self, err: Error) -> Result<T, Error> {
        warn!(
            component = "orchestrator",
            event = "stage_failed",
            state = %self.state,
            error = %err,
            "workflow stage failed"
        );
        self.last_error = Some(err.to_string());
        self.state = State::Errored;
        Err(err)
    }
}
