use chrono::{Months, NaiveDate};
use futures::future::BoxFuture;
use futures::FutureExt;
use loan_reconciliation::*;
use std::sync::Arc;

/// Fixed-installment schedule; the real engine is a separate service.
struct FixedInstallmentEngine;

impl AmortizationEngine for FixedInstallmentEngine {
    fn recalculate<'a>(
        &'a self,
        contract: &'a ContractParameters,
    ) -> BoxFuture<'a, loan_reconciliation::Result<AmortizationOutput>> {
        async move {
            let first = contract.first_due_date.ok_or_else(|| {
                ReconciliationError::ExternalComputation("missing first due date".to_string())
            })?;
            let installment = contract
                .original_installment
                .unwrap_or(contract.principal / contract.installment_count as f64);

            let schedule = (0..contract.installment_count)
                .map(|i| ScheduleEntry {
                    sequence_number: i + 1,
                    due_date: first.checked_add_months(Months::new(i)).unwrap_or(first),
                    contract_amount: installment,
                })
                .collect();

            Ok(AmortizationOutput {
                schedule,
                kpis: BaselineKpis {
                    original_installment_amount: installment,
                    fair_installment_amount: 612.40,
                    contract_rate: contract.contract_rate,
                    market_rate: Some(1.92),
                    original_total_paid: Some(installment * contract.installment_count as f64),
                    original_total_interest: Some(
                        installment * contract.installment_count as f64 - contract.principal,
                    ),
                },
            })
        }
        .boxed()
    }
}

struct ConsoleGateway;

impl PersistenceGateway for ConsoleGateway {
    fn persist<'a>(
        &'a self,
        session_id: &'a str,
        snapshot: Snapshot,
    ) -> BoxFuture<'a, loan_reconciliation::Result<()>> {
        async move {
            println!("  💾 [{}] persisted {:?} snapshot", session_id, snapshot.step);
            Ok(())
        }
        .boxed()
    }
}

fn print_comparative(label: &str, derived: &DerivedComparative) {
    println!("\n📊 {} ({:?}, {} installments)", label, derived.mode, derived.rows_considered);
    println!("  Amount paid:          {:>12.2}", derived.amount_paid);
    println!("  Amount owed (fair):   {:>12.2}", derived.amount_owed);
    println!("  Interest paid:        {:>12.2}", derived.interest_paid);
    println!("  Interest owed:        {:>12.2}", derived.interest_owed);
    println!("  Total savings:        {:>12.2}", derived.total_savings);
    println!("  Overrate:             {:>11.1}%", derived.overrate);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("⚖️  Loan Reconciliation Walkthrough\n");

    let contract = ContractParameters {
        contract_id: "CDC-2022-7781".to_string(),
        borrower_name: Some("João Pereira".to_string()),
        principal: 18_000.0,
        installment_count: 36,
        contract_rate: 4.1,
        first_due_date: NaiveDate::from_ymd_opt(2022, 5, 5),
        original_installment: Some(890.0),
    };

    let config = EngineConfig {
        extended_columns: true,
        ..EngineConfig::default()
    };

    let mut session = ReconciliationSession::new(
        "case-0042",
        contract,
        config,
        Arc::new(FixedInstallmentEngine),
        Arc::new(ConsoleGateway),
    )?;

    println!("📋 Generating schedule...");
    session.advance_to_reconciliation().await?;
    if let Some(derived) = session.derived() {
        print_comparative("Projected", derived);
    }

    println!("\n✏️  Marking the first 10 installments as paid (drag select + bulk edit)");
    session.drag_start(0, PointerButton::Primary)?;
    for row in 1..10 {
        session.drag_enter(row)?;
    }
    session.drag_end();
    session.bulk_set_status(PaymentStatus::Paid)?;

    session.edit(&EditCommand::new(
        10,
        FieldValue::Status(PaymentStatus::Late),
    ))?;
    session.edit(&EditCommand::new(
        10,
        FieldValue::ActualPaymentDate(NaiveDate::from_ymd_opt(2023, 3, 21).unwrap()),
    ))?;
    session.edit(&EditCommand::new(
        4,
        FieldValue::ExtraAmortization(1_500.0),
    ))?;

    if let Some(derived) = session.derived() {
        print_comparative("Reconciled", derived);
    }

    session.advance_to_result()?;

    if let Some(rows) = session.result_comparative().and_then(|d| d.rows) {
        println!("\n📄 Per-installment breakdown (CSV):");
        let mut writer = csv::Writer::from_writer(std::io::stdout());
        writer.write_record(["#", "due", "paid_on", "status", "paid", "difference", "days_late"])?;
        for row in rows.iter().filter(|r| r.considered) {
            writer.write_record([
                row.sequence_number.to_string(),
                row.due_date.to_string(),
                row.actual_payment_date.to_string(),
                format!("{:?}", row.status),
                format!("{:.2}", row.amount_paid),
                format!("{:.2}", row.difference),
                row.days_late.to_string(),
            ])?;
        }
        writer.flush()?;
    }

    session.flush().await;
    for notification in session.drain_notifications() {
        println!("⚠️  {}", notification.message);
    }

    session.close();
    println!("\n✅ Done");
    Ok(())
}
