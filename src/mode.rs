use crate::schema::PaymentRecord;
use crate::store::PaymentRecordStore;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViewMode {
    #[schemars(description = "No installment resolved yet; every installment counts toward totals.")]
    Projected,

    #[schemars(description = "At least one installment resolved; only resolved installments count toward totals.")]
    Reconciled,
}

pub fn resolve_mode(store: &PaymentRecordStore) -> ViewMode {
    if store.iter().any(|r| r.status().is_resolved()) {
        ViewMode::Reconciled
    } else {
        ViewMode::Projected
    }
}

/// Whether `record` counts toward totals under `mode`. Open installments stay
/// in the grid but drop out of totals once reconciliation has begun.
pub fn is_considered(record: &PaymentRecord, mode: ViewMode) -> bool {
    match mode {
        ViewMode::Projected => true,
        ViewMode::Reconciled => record.status().is_resolved(),
    }
}

pub fn rows_to_consider(store: &PaymentRecordStore, mode: ViewMode) -> Vec<&PaymentRecord> {
    store.iter().filter(|r| is_considered(r, mode)).collect()
}
