//! One reconciliation session for one contract.
//!
//! The session owns the stage orchestrator (and through it the record store),
//! the selection state, and the debounced writers. Collaborator failures are
//! caught here and turned into notifications; caller bugs are returned as
//! errors.

use crate::config::EngineConfig;
use crate::derivation::{derive, DerivationOptions, DerivedComparative};
use crate::editing::RecomputeRequested;
use crate::error::{ReconciliationError, Result};
use crate::export::ReportSnapshot;
use crate::gateway::{AmortizationEngine, PersistenceGateway, Snapshot, SnapshotStep};
use crate::mode::{resolve_mode, ViewMode};
use crate::notification::Notification;
use crate::persistence::{DebouncedWriter, WriteQueue};
use crate::schema::{BaselineKpis, ContractParameters, EditCommand, PaymentStatus};
use crate::selection::{PointerButton, SelectionController};
use crate::stage::{Stage, StageOrchestrator, StageStatus};
use crate::store::PaymentRecordStore;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Advanced(Stage),
    /// A collaborator failed; the session stayed where it was.
    Retained {
        stage: Stage,
        notification: Notification,
    },
}

#[derive(Serialize)]
struct ContractStep<'a> {
    contract: &'a ContractParameters,
    kpis: Option<&'a BaselineKpis>,
}

pub struct ReconciliationSession {
    id: Arc<str>,
    config: EngineConfig,
    orchestrator: StageOrchestrator,
    selection: SelectionController,
    engine: Arc<dyn AmortizationEngine>,
    writes: WriteQueue,
    contract_writer: DebouncedWriter,
    reconciliation_writer: DebouncedWriter,
    notifications_tx: UnboundedSender<Notification>,
    notifications_rx: UnboundedReceiver<Notification>,
    derived: Option<DerivedComparative>,
}

impl ReconciliationSession {
    /// Must be called from within a tokio runtime; the debounced writers are
    /// spawned onto it.
    pub fn new(
        id: impl Into<String>,
        contract: ContractParameters,
        config: EngineConfig,
        engine: Arc<dyn AmortizationEngine>,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| ReconciliationError::RuntimeUnavailable)?;

        let id: Arc<str> = Arc::from(id.into());
        let (notifications_tx, notifications_rx) = mpsc::unbounded_channel();

        let writes = WriteQueue::new(Arc::clone(&id), gateway, notifications_tx.clone(), runtime);
        let contract_writer = DebouncedWriter::new(
            SnapshotStep::Contract,
            config.contract_debounce(),
            writes.clone(),
        );
        let reconciliation_writer = DebouncedWriter::new(
            SnapshotStep::Reconciliation,
            config.reconciliation_debounce(),
            writes.clone(),
        );

        info!("Opened reconciliation session {} for contract {}", id, contract.contract_id);

        Ok(Self {
            id,
            config,
            orchestrator: StageOrchestrator::new(contract),
            selection: SelectionController::new(),
            engine,
            writes,
            contract_writer,
            reconciliation_writer,
            notifications_tx,
            notifications_rx,
            derived: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn status(&self) -> StageStatus {
        self.orchestrator.status()
    }

    pub fn orchestrator(&self) -> &StageOrchestrator {
        &self.orchestrator
    }

    pub fn store(&self) -> Option<&PaymentRecordStore> {
        self.orchestrator.store()
    }

    pub fn mode(&self) -> Option<ViewMode> {
        self.orchestrator.store().map(resolve_mode)
    }

    /// Comparative over the live records. Recomputed after every change.
    pub fn derived(&self) -> Option<&DerivedComparative> {
        self.derived.as_ref()
    }

    /// Comparative over the records frozen when the result stage was entered.
    pub fn result_comparative(&self) -> Option<DerivedComparative> {
        let baseline = self.orchestrator.result_baseline()?;
        let kpis = self.orchestrator.kpis()?;
        Some(derive(
            baseline,
            resolve_mode(baseline),
            kpis,
            &self.derivation_options(),
        ))
    }

    pub fn selection(&self) -> &SelectionController {
        &self.selection
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        let mut drained = Vec::new();
        while let Ok(notification) = self.notifications_rx.try_recv() {
            drained.push(notification);
        }
        drained
    }

    pub fn edit_contract<F>(&mut self, edit: F) -> Result<bool>
    where
        F: FnOnce(&mut ContractParameters),
    {
        let changed = self.orchestrator.edit_contract(edit)?;
        if changed {
            let payload = serde_json::to_value(self.orchestrator.contract())?;
            self.contract_writer.schedule(payload);
        }
        Ok(changed)
    }

    /// Asks the engine for a fresh schedule. An engine that fails or does
    /// not answer within the configured timeout leaves the session in data
    /// entry with a retryable notification.
    pub async fn advance_to_reconciliation(&mut self) -> Result<Transition> {
        let engine = Arc::clone(&self.engine);
        let timeout = self.config.recalculation_timeout();
        let advance = self.orchestrator.advance_to_reconciliation(engine.as_ref());
        let outcome = tokio::time::timeout(timeout, advance)
            .await
            .unwrap_or_else(|_| {
                Err(ReconciliationError::ExternalComputation(format!(
                    "amortization engine did not answer within {} ms",
                    timeout.as_millis()
                )))
            });
        if let Err(e) = outcome {
            return self.retain(e);
        }

        self.selection.clear();
        self.recompute();

        let payload = serde_json::to_value(ContractStep {
            contract: self.orchestrator.contract(),
            kpis: self.orchestrator.kpis(),
        })?;
        self.contract_writer.write_now(payload);

        Ok(Transition::Advanced(Stage::Reconciliation))
    }

    pub fn edit(&mut self, command: &EditCommand) -> Result<()> {
        let signal = self.orchestrator.apply_edit(command)?;
        self.after_change(signal)
    }

    /// Sets `status` on every selected row; the selection is cleared.
    pub fn bulk_set_status(&mut self, status: PaymentStatus) -> Result<()> {
        let signal = self
            .orchestrator
            .apply_bulk_status(self.selection.selection_mut(), status)?;
        match signal {
            Some(signal) => self.after_change(signal),
            None => Ok(()),
        }
    }

    pub fn reset_rows(&mut self) -> Result<()> {
        let signal = self.orchestrator.reset_rows()?;
        self.after_change(signal)
    }

    pub fn click(&mut self, row: usize, range: bool) -> Result<()> {
        self.check_row(row)?;
        self.selection.click(row, range);
        Ok(())
    }

    pub fn drag_start(&mut self, row: usize, button: PointerButton) -> Result<bool> {
        self.check_row(row)?;
        Ok(self.selection.drag_start(row, button))
    }

    pub fn drag_enter(&mut self, row: usize) -> Result<()> {
        self.check_row(row)?;
        self.selection.drag_enter(row);
        Ok(())
    }

    pub fn drag_end(&mut self) {
        self.selection.drag_end();
    }

    pub fn select_all(&mut self) {
        let len = self.store().map_or(0, PaymentRecordStore::len);
        self.selection.select_all(len);
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Freezes the current records as the result and queues both the
    /// reconciliation and the result snapshots. Does not wait for the writes;
    /// see [`flush`](Self::flush).
    pub fn advance_to_result(&mut self) -> Result<Transition> {
        let baseline = serde_json::to_value(self.orchestrator.advance_to_result()?)?;
        self.reconciliation_writer.write_now(baseline);

        if let Some(report) = self.result_report() {
            self.writes.enqueue(Snapshot {
                step: SnapshotStep::Result,
                payload: report.to_value()?,
            });
        }

        Ok(Transition::Advanced(Stage::Result))
    }

    /// Waits for every snapshot write queued so far. Timers still pending
    /// are not forced.
    pub async fn flush(&self) {
        self.writes.flush().await;
    }

    pub fn return_to(&mut self, stage: Stage) -> Result<()> {
        self.orchestrator.return_to(stage)?;
        if stage == Stage::DataEntry {
            self.selection.clear();
        }
        Ok(())
    }

    pub fn navigate(&mut self, stage: Stage) -> Result<()> {
        self.orchestrator.navigate(stage)
    }

    /// Live records and comparative, for renderers.
    pub fn report(&self) -> ReportSnapshot {
        ReportSnapshot {
            session_id: self.id.to_string(),
            status: self.status(),
            contract: self.orchestrator.contract().clone(),
            kpis: self.orchestrator.kpis().cloned(),
            records: self
                .orchestrator
                .store()
                .map(PaymentRecordStore::to_records)
                .unwrap_or_default(),
            comparative: self.derived.clone(),
        }
    }

    /// The frozen result, once the result stage has been reached.
    pub fn result_report(&self) -> Option<ReportSnapshot> {
        let baseline = self.orchestrator.result_baseline()?;
        Some(ReportSnapshot {
            session_id: self.id.to_string(),
            status: self.status(),
            contract: self.orchestrator.contract().clone(),
            kpis: self.orchestrator.kpis().cloned(),
            records: baseline.to_records(),
            comparative: self.result_comparative(),
        })
    }

    /// Ends the session. Pending debounced writes are dropped.
    pub fn close(mut self) {
        self.contract_writer.cancel();
        self.reconciliation_writer.cancel();
        info!("Closed reconciliation session {}", self.id);
    }

    fn derivation_options(&self) -> DerivationOptions {
        DerivationOptions::from(&self.config)
    }

    fn recompute(&mut self) {
        self.derived = match (self.orchestrator.store(), self.orchestrator.kpis()) {
            (Some(store), Some(kpis)) => Some(derive(
                store,
                resolve_mode(store),
                kpis,
                &self.derivation_options(),
            )),
            _ => None,
        };
    }

    fn after_change(&mut self, signal: RecomputeRequested) -> Result<()> {
        debug!(
            "Recomputing comparative for session {} after {} row change(s)",
            self.id,
            signal.changed_rows.len()
        );
        self.recompute();

        if let Some(store) = self.orchestrator.store() {
            let payload = serde_json::to_value(store)?;
            self.reconciliation_writer.schedule(payload);
        }
        Ok(())
    }

    fn check_row(&self, row: usize) -> Result<()> {
        let len = self.store().map_or(0, PaymentRecordStore::len);
        if row >= len {
            return Err(ReconciliationError::RowIndexOutOfRange { index: row, len });
        }
        Ok(())
    }

    /// Keeps the session where it is when a collaborator failed. Anything
    /// else is handed back to the caller.
    fn retain(&self, error: ReconciliationError) -> Result<Transition> {
        let Some(notification) = Notification::from_error(&error) else {
            return Err(error);
        };
        warn!("Recalculation failed for session {}: {}", self.id, error);
        let _ = self.notifications_tx.send(notification.clone());
        Ok(Transition::Retained {
            stage: self.orchestrator.stage(),
            notification,
        })
    }
}
