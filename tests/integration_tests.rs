use chrono::{Months, NaiveDate};
use futures::future::BoxFuture;
use futures::FutureExt;
use loan_reconciliation::*;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Flat-installment schedule generator standing in for the real engine.
struct FlatEngine {
    installment: f64,
    fair_installment: f64,
    failures_left: AtomicUsize,
    stalls_left: AtomicUsize,
    calls: AtomicUsize,
}

impl FlatEngine {
    fn new() -> Self {
        Self::failing(0)
    }

    fn failing(times: usize) -> Self {
        Self {
            installment: 500.0,
            fair_installment: 420.0,
            failures_left: AtomicUsize::new(times),
            stalls_left: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Hangs for a minute on the first `times` calls.
    fn stalling(times: usize) -> Self {
        let engine = Self::new();
        engine.stalls_left.store(times, Ordering::SeqCst);
        engine
    }
}

impl AmortizationEngine for FlatEngine {
    fn recalculate<'a>(
        &'a self,
        contract: &'a ContractParameters,
    ) -> BoxFuture<'a, loan_reconciliation::Result<AmortizationOutput>> {
        async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .stalls_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ReconciliationError::ExternalComputation(
                    "rate service timeout".to_string(),
                ));
            }

            let first = contract
                .first_due_date
                .ok_or_else(|| ReconciliationError::ExternalComputation("no first due date".to_string()))?;
            let schedule = (0..contract.installment_count)
                .map(|i| ScheduleEntry {
                    sequence_number: i + 1,
                    due_date: first.checked_add_months(Months::new(i)).unwrap_or(first),
                    contract_amount: self.installment,
                })
                .collect();

            Ok(AmortizationOutput {
                schedule,
                kpis: BaselineKpis {
                    original_installment_amount: contract.original_installment.unwrap_or(self.installment),
                    fair_installment_amount: self.fair_installment,
                    contract_rate: contract.contract_rate,
                    market_rate: Some(1.8),
                    original_total_paid: None,
                    original_total_interest: None,
                },
            })
        }
        .boxed()
    }
}

#[derive(Default)]
struct RecordingGateway {
    writes: Mutex<Vec<(String, Snapshot)>>,
    latencies: Mutex<VecDeque<Duration>>,
    fail: AtomicBool,
}

impl RecordingGateway {
    fn steps(&self) -> Vec<SnapshotStep> {
        self.writes.lock().unwrap().iter().map(|(_, s)| s.step).collect()
    }

    fn last(&self, step: SnapshotStep) -> Option<Snapshot> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(_, s)| s.step == step)
            .map(|(_, s)| s.clone())
    }
}

impl PersistenceGateway for RecordingGateway {
    fn persist<'a>(
        &'a self,
        session_id: &'a str,
        snapshot: Snapshot,
    ) -> BoxFuture<'a, loan_reconciliation::Result<()>> {
        async move {
            let latency = self.latencies.lock().unwrap().pop_front();
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(ReconciliationError::Persistence("HTTP 503".to_string()));
            }
            self.writes
                .lock()
                .unwrap()
                .push((session_id.to_string(), snapshot));
            Ok(())
        }
        .boxed()
    }
}

fn contract() -> ContractParameters {
    ContractParameters {
        contract_id: "CDC-2023-0091".to_string(),
        borrower_name: Some("Maria Souza".to_string()),
        principal: 4_800.0,
        installment_count: 12,
        contract_rate: 3.6,
        first_due_date: NaiveDate::from_ymd_opt(2023, 2, 10),
        original_installment: Some(500.0),
    }
}

fn open_session(
    engine: Arc<FlatEngine>,
    gateway: Arc<RecordingGateway>,
    config: EngineConfig,
) -> ReconciliationSession {
    ReconciliationSession::new("case-17", contract(), config, engine, gateway).unwrap()
}

async fn reconciling_session(
    gateway: Arc<RecordingGateway>,
    config: EngineConfig,
) -> ReconciliationSession {
    let mut session = open_session(Arc::new(FlatEngine::new()), gateway, config);
    let transition = session.advance_to_reconciliation().await.unwrap();
    assert_eq!(transition, Transition::Advanced(Stage::Reconciliation));
    session.flush().await;
    session
}

fn paid(row: usize) -> EditCommand {
    EditCommand::new(row, FieldValue::Status(PaymentStatus::Paid))
}

#[tokio::test(start_paused = true)]
async fn test_full_reconciliation_flow() {
    let gateway = Arc::new(RecordingGateway::default());
    let mut session = reconciling_session(Arc::clone(&gateway), EngineConfig::default()).await;

    assert_eq!(session.store().unwrap().len(), 12);
    assert_eq!(session.mode(), Some(ViewMode::Projected));
    let projected = session.derived().unwrap().clone();
    assert_eq!(projected.rows_considered, 12);
    assert_eq!(projected.amount_paid, 6_000.0);
    assert_eq!(gateway.steps(), vec![SnapshotStep::Contract]);

    session.edit(&paid(0)).unwrap();
    session
        .edit(&EditCommand::new(0, FieldValue::ActualAmountPaid(500.0)))
        .unwrap();
    session.edit(&paid(1)).unwrap();
    session
        .edit(&EditCommand::new(1, FieldValue::ActualAmountPaid(500.0)))
        .unwrap();

    let derived = session.derived().unwrap();
    assert_eq!(derived.mode, ViewMode::Reconciled);
    assert_eq!(derived.rows_considered, 2);
    assert_eq!(derived.amount_paid, 1_000.0);
    assert_eq!(derived.amount_owed, 840.0);
    assert_eq!(derived.total_savings, 160.0);
    assert_eq!(derived.per_installment_savings, 80.0);
    assert!(session.status().reconciliation_dirty);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        gateway.steps(),
        vec![SnapshotStep::Contract, SnapshotStep::Reconciliation]
    );
    let rows = gateway.last(SnapshotStep::Reconciliation).unwrap().payload;
    assert_eq!(rows.as_array().unwrap().len(), 12);
    assert_eq!(rows[1]["status"], "PAID");

    let transition = session.advance_to_result().unwrap();
    assert_eq!(transition, Transition::Advanced(Stage::Result));
    assert_eq!(session.result_comparative().as_ref(), session.derived());
    session.flush().await;

    let result = gateway.last(SnapshotStep::Result).unwrap().payload;
    assert_eq!(result["session_id"], "case-17");
    assert_eq!(result["comparative"]["amount_paid"], 1_000.0);
    assert!(session.drain_notifications().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_engine_failure_is_retryable() {
    let engine = Arc::new(FlatEngine::failing(1));
    let gateway = Arc::new(RecordingGateway::default());
    let mut session = open_session(Arc::clone(&engine), Arc::clone(&gateway), EngineConfig::default());

    let transition = session.advance_to_reconciliation().await.unwrap();
    match transition {
        Transition::Retained { stage, notification } => {
            assert_eq!(stage, Stage::DataEntry);
            assert_eq!(notification.kind, NotificationKind::ExternalComputation);
            assert!(notification.retryable);
        }
        other => panic!("expected the session to stay in data entry, got {:?}", other),
    }

    let status = session.status();
    assert_eq!(status.stage, Stage::DataEntry);
    assert!(status.data_dirty);
    assert!(!status.recalculating);
    assert!(session.store().is_none());
    assert_eq!(session.drain_notifications().len(), 1);

    let retry = session.advance_to_reconciliation().await.unwrap();
    assert_eq!(retry, Transition::Advanced(Stage::Reconciliation));
    assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_engine_timeout_is_retryable() {
    let engine = Arc::new(FlatEngine::stalling(1));
    let config = EngineConfig::from_json_str(r#"{ "recalculation_timeout_ms": 5000 }"#).unwrap();
    let mut session = open_session(Arc::clone(&engine), Arc::new(RecordingGateway::default()), config);

    match session.advance_to_reconciliation().await.unwrap() {
        Transition::Retained { stage, notification } => {
            assert_eq!(stage, Stage::DataEntry);
            assert_eq!(notification.kind, NotificationKind::ExternalComputation);
            assert!(notification.retryable);
            assert!(notification.message.contains("5000 ms"));
        }
        other => panic!("expected the session to stay in data entry, got {:?}", other),
    }
    assert!(!session.status().recalculating);
    assert!(session.status().data_dirty);

    let retry = session.advance_to_reconciliation().await.unwrap();
    assert_eq!(retry, Transition::Advanced(Stage::Reconciliation));
    assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_caller_timeout_does_not_lock_the_session() {
    let engine = Arc::new(FlatEngine::stalling(1));
    let mut session = open_session(
        Arc::clone(&engine),
        Arc::new(RecordingGateway::default()),
        EngineConfig::default(),
    );

    let abandoned =
        tokio::time::timeout(Duration::from_secs(5), session.advance_to_reconciliation()).await;
    assert!(abandoned.is_err());

    let status = session.status();
    assert_eq!(status.stage, Stage::DataEntry);
    assert!(!status.recalculating);

    let retry = session.advance_to_reconciliation().await.unwrap();
    assert_eq!(retry, Transition::Advanced(Stage::Reconciliation));
}

#[tokio::test(start_paused = true)]
async fn test_slow_write_never_overwrites_newer_records() {
    let gateway = Arc::new(RecordingGateway::default());
    let mut session = reconciling_session(Arc::clone(&gateway), EngineConfig::default()).await;
    gateway
        .latencies
        .lock()
        .unwrap()
        .extend([Duration::from_millis(200), Duration::from_millis(10)]);

    session.edit(&paid(0)).unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    session
        .edit(&EditCommand::new(1, FieldValue::Status(PaymentStatus::Late)))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let rows = gateway.last(SnapshotStep::Reconciliation).unwrap().payload;
    assert_eq!(rows[0]["status"], "PAID");
    assert_eq!(rows[1]["status"], "LATE");

    // A hung backend does not hold up the stage change
    gateway
        .latencies
        .lock()
        .unwrap()
        .push_back(Duration::from_secs(3_600));
    session.advance_to_result().unwrap();
    assert_eq!(session.status().stage, Stage::Result);
    assert_eq!(gateway.last(SnapshotStep::Result), None);

    session.flush().await;
    assert_eq!(
        gateway.steps(),
        vec![
            SnapshotStep::Contract,
            SnapshotStep::Reconciliation,
            SnapshotStep::Reconciliation,
            SnapshotStep::Reconciliation,
            SnapshotStep::Result,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_contract_is_not_recalculated() {
    let engine = Arc::new(FlatEngine::new());
    let gateway = Arc::new(RecordingGateway::default());
    let mut session = open_session(Arc::clone(&engine), gateway, EngineConfig::default());

    session.advance_to_reconciliation().await.unwrap();
    session.return_to(Stage::DataEntry).unwrap();

    let blocked = session.advance_to_reconciliation().await;
    assert!(matches!(blocked, Err(ReconciliationError::StageBlocked { .. })));
    assert_eq!(engine.calls.load(Ordering::SeqCst), 1);

    // Viewing the existing schedule needs no recalculation
    session.navigate(Stage::Reconciliation).unwrap();
    assert_eq!(session.status().stage, Stage::Reconciliation);
}

#[tokio::test(start_paused = true)]
async fn test_contract_edits_are_debounced() {
    let gateway = Arc::new(RecordingGateway::default());
    let mut session = open_session(
        Arc::new(FlatEngine::new()),
        Arc::clone(&gateway),
        EngineConfig::default(),
    );

    for principal in [5_000.0, 5_500.0, 6_000.0] {
        assert!(session.edit_contract(|c| c.principal = principal).unwrap());
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
    assert!(gateway.steps().is_empty());

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(gateway.steps(), vec![SnapshotStep::Contract]);
    let payload = gateway.last(SnapshotStep::Contract).unwrap().payload;
    assert_eq!(payload["principal"], 6_000.0);
}

#[tokio::test(start_paused = true)]
async fn test_persistence_failure_never_blocks() {
    let gateway = Arc::new(RecordingGateway::default());
    let mut session = reconciling_session(Arc::clone(&gateway), EngineConfig::default()).await;
    gateway.fail.store(true, Ordering::SeqCst);

    session.edit(&paid(3)).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(session.store().unwrap().get(3).unwrap().status(), PaymentStatus::Paid);

    let transition = session.advance_to_result().unwrap();
    assert_eq!(transition, Transition::Advanced(Stage::Result));

    session.flush().await;
    let notifications = session.drain_notifications();
    assert!(notifications.len() >= 2);
    assert!(notifications
        .iter()
        .all(|n| n.kind == NotificationKind::Persistence));
    assert_eq!(session.derived().unwrap().rows_considered, 1);
}

#[tokio::test(start_paused = true)]
async fn test_range_selection_and_bulk_status() {
    let gateway = Arc::new(RecordingGateway::default());
    let mut session = reconciling_session(gateway, EngineConfig::default()).await;

    session.click(2, false).unwrap();
    session.click(5, true).unwrap();
    let selected: Vec<usize> = session.selection().selection().iter().copied().collect();
    assert_eq!(selected, vec![2, 3, 4, 5]);

    session.bulk_set_status(PaymentStatus::Late).unwrap();

    assert!(session.selection().selection().is_empty());
    let store = session.store().unwrap();
    for (idx, record) in store.iter().enumerate() {
        if (2..=5).contains(&idx) {
            assert_eq!(record.status(), PaymentStatus::Late);
            assert!(record.edited());
        } else {
            assert_eq!(record.status(), PaymentStatus::Open);
            assert!(!record.edited());
        }
    }
    assert_eq!(session.mode(), Some(ViewMode::Reconciled));
    assert_eq!(session.derived().unwrap().rows_considered, 4);

    // Nothing selected: a no-op
    session.bulk_set_status(PaymentStatus::Paid).unwrap();
    assert_eq!(session.derived().unwrap().rows_considered, 4);
}

#[tokio::test(start_paused = true)]
async fn test_drag_selection_through_session() {
    let gateway = Arc::new(RecordingGateway::default());
    let mut session = reconciling_session(gateway, EngineConfig::default()).await;

    assert!(session.drag_start(7, PointerButton::Primary).unwrap());
    session.drag_enter(8).unwrap();
    session.drag_enter(9).unwrap();
    session.drag_end();
    session.drag_enter(10).unwrap();

    let selected: Vec<usize> = session.selection().selection().iter().copied().collect();
    assert_eq!(selected, vec![7, 8, 9]);

    match session.drag_enter(12) {
        Err(ReconciliationError::RowIndexOutOfRange { index, len }) => {
            assert_eq!((index, len), (12, 12))
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_result_is_gated_on_changes() {
    let gateway = Arc::new(RecordingGateway::default());
    let mut session = reconciling_session(gateway, EngineConfig::default()).await;

    session.advance_to_result().unwrap();
    session.return_to(Stage::Reconciliation).unwrap();
    assert!(matches!(
        session.advance_to_result(),
        Err(ReconciliationError::StageBlocked { .. })
    ));

    session
        .edit(&EditCommand::new(4, FieldValue::ExtraAmortization(250.0)))
        .unwrap();
    assert!(session.advance_to_result().is_ok());
    assert_eq!(
        session.result_comparative().unwrap().amount_paid,
        6_250.0
    );
}

#[tokio::test(start_paused = true)]
async fn test_reset_rows_returns_to_projected() {
    let gateway = Arc::new(RecordingGateway::default());
    let mut session = reconciling_session(gateway, EngineConfig::default()).await;

    session.edit(&paid(0)).unwrap();
    session
        .edit(&EditCommand::new(2, FieldValue::ExtraAmortization(200.0)))
        .unwrap();
    assert_eq!(session.mode(), Some(ViewMode::Reconciled));

    session.reset_rows().unwrap();

    assert_eq!(session.mode(), Some(ViewMode::Projected));
    let record = session.store().unwrap().get(2).unwrap();
    assert_eq!(record.extra_amortization(), 0.0);
    assert!(!record.edited());
    assert_eq!(session.derived().unwrap().amount_paid, 6_000.0);
}

#[tokio::test(start_paused = true)]
async fn test_extended_columns_from_config() {
    let gateway = Arc::new(RecordingGateway::default());
    let config = EngineConfig::from_json_str(r#"{ "extended_columns": true }"#).unwrap();
    let mut session = reconciling_session(gateway, config).await;

    let late_date = NaiveDate::from_ymd_opt(2023, 3, 17).unwrap();
    session
        .edit(&EditCommand::new(1, FieldValue::Status(PaymentStatus::Late)))
        .unwrap();
    session
        .edit(&EditCommand::new(1, FieldValue::ActualPaymentDate(late_date)))
        .unwrap();

    let rows = session.derived().unwrap().rows.clone().unwrap();
    assert_eq!(rows.len(), 12);
    assert_eq!(rows[1].days_late, 7);
    assert!(rows[1].considered);
    assert!(!rows[0].considered);
}

#[tokio::test(start_paused = true)]
async fn test_close_cancels_pending_writes() {
    let gateway = Arc::new(RecordingGateway::default());
    let mut session = open_session(
        Arc::new(FlatEngine::new()),
        Arc::clone(&gateway),
        EngineConfig::default(),
    );

    session.edit_contract(|c| c.installment_count = 24).unwrap();
    session.close();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(gateway.steps().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_report_export() {
    let gateway = Arc::new(RecordingGateway::default());
    let mut session = reconciling_session(gateway, EngineConfig::default()).await;
    session.edit(&paid(0)).unwrap();

    let report = session.report();
    assert_eq!(report.records.len(), 12);
    assert_eq!(report.status.stage, Stage::Reconciliation);

    let json = report.to_json().unwrap();
    assert!(json.contains("\"mode\": \"RECONCILED\""));
    assert!(json.contains("CDC-2023-0091"));
    assert!(session.result_report().is_none());
}

#[test]
fn test_session_requires_runtime() {
    let result = ReconciliationSession::new(
        "case-0",
        contract(),
        EngineConfig::default(),
        Arc::new(FlatEngine::new()),
        Arc::new(RecordingGateway::default()),
    );
    assert!(matches!(result, Err(ReconciliationError::RuntimeUnavailable)));
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = EngineConfig {
        fallback_interest_ratio: -0.1,
        ..EngineConfig::default()
    };
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let _guard = runtime.enter();

    let result = ReconciliationSession::new(
        "case-0",
        contract(),
        config,
        Arc::new(FlatEngine::new()),
        Arc::new(RecordingGateway::default()),
    );
    assert!(matches!(result, Err(ReconciliationError::InvalidConfig(_))));
}
