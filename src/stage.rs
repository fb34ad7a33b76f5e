//! The three-stage pipeline: data entry, reconciliation, result.
//!
//! `data_dirty` and `reconciliation_dirty` track whether the stage's output is
//! stale relative to its inputs. They gate the advances so the amortization
//! engine and the result snapshot are only recomputed when something changed.

use crate::editing::{self, EditOutcome, RecomputeRequested};
use crate::error::{ReconciliationError, Result};
use crate::gateway::{AmortizationEngine, AmortizationOutput};
use crate::schema::{BaselineKpis, ContractParameters, EditCommand, PaymentStatus};
use crate::selection::SelectionSet;
use crate::store::PaymentRecordStore;
use log::{debug, info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    DataEntry,
    Reconciliation,
    Result,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StageStatus {
    pub stage: Stage,
    pub data_dirty: bool,
    pub reconciliation_dirty: bool,
    pub recalculating: bool,
    pub result_reached: bool,
    #[schemars(description = "True when the current view was computed from inputs that have since changed")]
    pub stale: bool,
}

/// Proof that a recalculation was started. Carries the contract as it was
/// when the call was issued.
#[derive(Debug)]
#[must_use]
pub struct RecalculationTicket {
    contract: ContractParameters,
}

impl RecalculationTicket {
    pub fn contract(&self) -> &ContractParameters {
        &self.contract
    }
}

#[derive(Debug, Clone)]
pub struct StageOrchestrator {
    stage: Stage,
    contract: ContractParameters,
    data_dirty: bool,
    reconciliation_dirty: bool,
    result_reached: bool,
    recalculating: bool,
    store: Option<PaymentRecordStore>,
    kpis: Option<BaselineKpis>,
    result_baseline: Option<PaymentRecordStore>,
}

impl StageOrchestrator {
    /// Starts in data entry. Nothing has been computed for `contract` yet, so
    /// the data stage starts dirty.
    pub fn new(contract: ContractParameters) -> Self {
        Self {
            stage: Stage::DataEntry,
            contract,
            data_dirty: true,
            reconciliation_dirty: false,
            result_reached: false,
            recalculating: false,
            store: None,
            kpis: None,
            result_baseline: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn contract(&self) -> &ContractParameters {
        &self.contract
    }

    pub fn store(&self) -> Option<&PaymentRecordStore> {
        self.store.as_ref()
    }

    pub fn kpis(&self) -> Option<&BaselineKpis> {
        self.kpis.as_ref()
    }

    /// Records as they were when the result stage was last entered.
    pub fn result_baseline(&self) -> Option<&PaymentRecordStore> {
        self.result_baseline.as_ref()
    }

    pub fn is_data_dirty(&self) -> bool {
        self.data_dirty
    }

    pub fn is_reconciliation_dirty(&self) -> bool {
        self.reconciliation_dirty
    }

    pub fn is_recalculating(&self) -> bool {
        self.recalculating
    }

    pub fn status(&self) -> StageStatus {
        let stale = match self.stage {
            Stage::DataEntry => false,
            Stage::Reconciliation => self.data_dirty,
            Stage::Result => self.data_dirty || self.reconciliation_dirty,
        };
        StageStatus {
            stage: self.stage,
            data_dirty: self.data_dirty,
            reconciliation_dirty: self.reconciliation_dirty,
            recalculating: self.recalculating,
            result_reached: self.result_reached,
            stale,
        }
    }

    /// Applies a change to the contract fields. Returns whether anything
    /// actually changed; only a real change marks the data stage dirty.
    pub fn edit_contract<F>(&mut self, edit: F) -> Result<bool>
    where
        F: FnOnce(&mut ContractParameters),
    {
        self.require_stage(Stage::DataEntry, "contract fields")?;

        let mut updated = self.contract.clone();
        edit(&mut updated);
        if updated == self.contract {
            return Ok(false);
        }

        self.contract = updated;
        self.data_dirty = true;
        debug!("Contract {} changed; data stage dirty", self.contract.contract_id);
        Ok(true)
    }

    /// Checks the gate for leaving data entry and marks a call in flight.
    pub fn begin_recalculation(&mut self) -> Result<RecalculationTicket> {
        if self.recalculating {
            return Err(ReconciliationError::RecalculationInFlight);
        }
        if self.stage != Stage::DataEntry {
            return Err(self.blocked(Stage::Reconciliation, "not in the data entry stage"));
        }
        if !self.data_dirty {
            return Err(self.blocked(
                Stage::Reconciliation,
                "contract unchanged since the last recalculation",
            ));
        }
        self.contract.validate()?;

        self.recalculating = true;
        info!("Requesting recalculation for contract {}", self.contract.contract_id);
        Ok(RecalculationTicket {
            contract: self.contract.clone(),
        })
    }

    /// Finishes a call started by [`begin_recalculation`]. On failure the
    /// stage and `data_dirty` are left as they were.
    ///
    /// [`begin_recalculation`]: Self::begin_recalculation
    pub fn complete_recalculation(
        &mut self,
        ticket: RecalculationTicket,
        outcome: Result<AmortizationOutput>,
    ) -> Result<()> {
        if !self.recalculating {
            return Err(ReconciliationError::ContractViolation(
                "completed a recalculation that was never started".to_string(),
            ));
        }
        self.recalculating = false;

        let output = outcome.map_err(|e| match e {
            ReconciliationError::ExternalComputation(_) => e,
            other => ReconciliationError::ExternalComputation(other.to_string()),
        })?;

        let store = PaymentRecordStore::from_schedule(&output.schedule).map_err(|e| {
            warn!("Amortization engine returned a malformed schedule: {}", e);
            ReconciliationError::ExternalComputation(format!("malformed schedule: {}", e))
        })?;

        info!(
            "Seeded {} installments for contract {}",
            store.len(),
            ticket.contract.contract_id
        );

        // Edits that arrived while the call was out stay pending.
        self.data_dirty = self.contract != ticket.contract;
        self.store = Some(store);
        self.kpis = Some(output.kpis);
        self.reconciliation_dirty = false;
        self.result_reached = false;
        self.result_baseline = None;
        self.stage = Stage::Reconciliation;
        Ok(())
    }

    /// Gives up on a call started by [`begin_recalculation`] without an
    /// answer. The stage and `data_dirty` are left as they were.
    ///
    /// [`begin_recalculation`]: Self::begin_recalculation
    pub fn abandon_recalculation(&mut self, ticket: RecalculationTicket) {
        if self.recalculating {
            warn!(
                "Recalculation for contract {} abandoned before the engine answered",
                ticket.contract.contract_id
            );
        }
        self.recalculating = false;
    }

    /// Runs the full data entry → reconciliation advance against `engine`.
    ///
    /// Dropping the returned future before the engine answers (a caller-side
    /// timeout, say) clears the in-flight flag, so the advance can be retried.
    pub async fn advance_to_reconciliation(&mut self, engine: &dyn AmortizationEngine) -> Result<()> {
        let ticket = self.begin_recalculation()?;
        let mut in_flight = InFlight {
            orchestrator: self,
            answered: false,
        };
        let outcome = engine.recalculate(ticket.contract()).await;
        in_flight.answered = true;
        in_flight.orchestrator.complete_recalculation(ticket, outcome)
    }

    pub fn apply_edit(&mut self, command: &EditCommand) -> Result<RecomputeRequested> {
        let store = self.editable_store()?;
        let outcome = editing::apply_edit(store, command)?;
        Ok(self.commit(outcome).unwrap_or_else(|| RecomputeRequested {
            changed_rows: Vec::new(),
        }))
    }

    /// Returns `None` when the selection was empty.
    pub fn apply_bulk_status(
        &mut self,
        selection: &mut SelectionSet,
        status: PaymentStatus,
    ) -> Result<Option<RecomputeRequested>> {
        let store = self.editable_store()?;
        let outcome = editing::apply_bulk_status(store, selection, status)?;
        Ok(self.commit(outcome))
    }

    pub fn reset_rows(&mut self) -> Result<RecomputeRequested> {
        let store = self.editable_store()?;
        let outcome = editing::reset_all(store);
        Ok(self.commit(outcome).unwrap_or_else(|| RecomputeRequested {
            changed_rows: Vec::new(),
        }))
    }

    /// Snapshots the current records as the result baseline. Blocked when the
    /// result was already produced and nothing was edited since.
    pub fn advance_to_result(&mut self) -> Result<&PaymentRecordStore> {
        if self.stage != Stage::Reconciliation {
            return Err(self.blocked(Stage::Result, "not in the reconciliation stage"));
        }
        if self.result_reached && !self.reconciliation_dirty {
            return Err(self.blocked(
                Stage::Result,
                "reconciliation unchanged since the result was produced",
            ));
        }
        let Some(store) = self.store.clone() else {
            return Err(self.blocked(Stage::Result, "no schedule has been generated"));
        };

        info!(
            "Finalizing reconciliation for contract {} ({} of {} installments edited)",
            self.contract.contract_id,
            store.edited_count(),
            store.len()
        );

        self.reconciliation_dirty = false;
        self.result_reached = true;
        self.stage = Stage::Result;
        let baseline: &PaymentRecordStore = self.result_baseline.insert(store);
        Ok(baseline)
    }

    /// Moves back to an earlier stage. Nothing is recomputed or cleared.
    pub fn return_to(&mut self, stage: Stage) -> Result<()> {
        if stage >= self.stage {
            return Err(self.blocked(stage, "can only return to an earlier stage"));
        }
        info!("Returning from {:?} to {:?}", self.stage, stage);
        self.stage = stage;
        Ok(())
    }

    /// Switches to any stage whose output already exists, without
    /// recomputing it. The view may be stale; see [`StageStatus::stale`].
    pub fn navigate(&mut self, stage: Stage) -> Result<()> {
        let available = match stage {
            Stage::DataEntry => true,
            Stage::Reconciliation => self.store.is_some(),
            Stage::Result => self.result_reached,
        };
        if !available {
            return Err(self.blocked(stage, "stage has not been computed yet"));
        }
        self.stage = stage;
        Ok(())
    }

    fn editable_store(&self) -> Result<&PaymentRecordStore> {
        self.require_stage(Stage::Reconciliation, "row edits")?;
        self.store.as_ref().ok_or_else(|| {
            ReconciliationError::ContractViolation("no schedule has been generated".to_string())
        })
    }

    fn commit(&mut self, outcome: EditOutcome) -> Option<RecomputeRequested> {
        let signal = outcome.recompute?;
        self.store = Some(outcome.store);
        self.reconciliation_dirty = true;
        Some(signal)
    }

    fn require_stage(&self, stage: Stage, what: &str) -> Result<()> {
        if self.stage != stage {
            return Err(ReconciliationError::ContractViolation(format!(
                "{} are only accepted in the {:?} stage (current: {:?})",
                what, stage, self.stage
            )));
        }
        Ok(())
    }

    fn blocked(&self, to: Stage, reason: &str) -> ReconciliationError {
        ReconciliationError::StageBlocked {
            from: self.stage,
            to,
            reason: reason.to_string(),
        }
    }
}

/// Clears `recalculating` when an engine call is dropped mid-flight.
struct InFlight<'a> {
    orchestrator: &'a mut StageOrchestrator,
    answered: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.answered {
            warn!(
                "Recalculation for contract {} dropped before the engine answered",
                self.orchestrator.contract.contract_id
            );
            self.orchestrator.recalculating = false;
        }
    }
}
