//! Comparative totals derived from the record store.
//!
//! [`derive`] is a pure function of (store, mode, baseline KPIs, options):
//! nothing is accumulated between calls, so the same inputs always produce
//! the same [`DerivedComparative`].

use crate::config::{EngineConfig, DEFAULT_FALLBACK_INTEREST_RATIO};
use crate::mode::{is_considered, ViewMode};
use crate::schema::{BaselineKpis, PaymentStatus};
use crate::store::PaymentRecordStore;
use chrono::NaiveDate;
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivationOptions {
    pub extended_columns: bool,
    pub fallback_interest_ratio: f64,
}

impl Default for DerivationOptions {
    fn default() -> Self {
        Self {
            extended_columns: false,
            fallback_interest_ratio: DEFAULT_FALLBACK_INTEREST_RATIO,
        }
    }
}

impl From<&EngineConfig> for DerivationOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            extended_columns: config.extended_columns,
            fallback_interest_ratio: config.fallback_interest_ratio,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InterestRatioSource {
    /// Inferred from the original schedule's interest over total paid.
    Historical,
    /// Configured approximation.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DerivedComparative {
    pub mode: ViewMode,
    pub rows_considered: usize,

    #[schemars(description = "Recalculated amount owed: fair installment times installments considered")]
    pub amount_owed: f64,

    #[schemars(description = "Actual payments plus extra amortization over installments considered")]
    pub amount_paid: f64,

    pub interest_owed: f64,
    pub interest_paid: f64,

    #[schemars(description = "Fair installment amount")]
    pub installment_owed: f64,

    #[schemars(description = "Average amount paid per installment considered; 0 when none is considered")]
    pub installment_paid: f64,

    pub original_installment: f64,
    pub per_installment_savings: f64,

    #[schemars(description = "Amount paid minus recalculated amount owed")]
    pub total_savings: f64,

    #[schemars(description = "How far the contract rate exceeds the market rate, in percent")]
    pub overrate: f64,

    pub interest_ratio: f64,
    pub interest_ratio_source: InterestRatioSource,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<RowComparative>>,
}

/// Per-installment breakdown shown by the detailed dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RowComparative {
    pub sequence_number: u32,
    pub due_date: NaiveDate,
    pub actual_payment_date: NaiveDate,
    pub status: PaymentStatus,
    pub contract_amount: f64,
    pub amount_paid: f64,
    pub fair_installment: f64,
    #[schemars(description = "Amount paid minus fair installment")]
    pub difference: f64,
    pub interest_paid: f64,
    pub days_late: i64,
    #[schemars(description = "Whether this installment counts toward the totals in the current mode")]
    pub considered: bool,
}

pub fn interest_ratio(kpis: &BaselineKpis, fallback: f64) -> (f64, InterestRatioSource) {
    match (kpis.original_total_interest, kpis.original_total_paid) {
        (Some(interest), Some(paid)) if paid != 0.0 && interest.is_finite() && paid.is_finite() => {
            (interest / paid, InterestRatioSource::Historical)
        }
        _ => (fallback, InterestRatioSource::Fallback),
    }
}

/// Percentage by which `contract_rate` exceeds `market_rate`. 0 when the
/// market rate is missing or zero.
pub fn overrate(contract_rate: f64, market_rate: Option<f64>) -> f64 {
    match market_rate {
        Some(market) if market != 0.0 => (contract_rate - market) / market * 100.0,
        _ => 0.0,
    }
}

pub fn derive(
    store: &PaymentRecordStore,
    mode: ViewMode,
    kpis: &BaselineKpis,
    options: &DerivationOptions,
) -> DerivedComparative {
    let (ratio, ratio_source) = interest_ratio(kpis, options.fallback_interest_ratio);
    let fair = kpis.fair_installment_amount;

    let mut rows_considered = 0usize;
    let mut amount_paid = 0.0;
    for record in store.iter().filter(|r| is_considered(r, mode)) {
        rows_considered += 1;
        amount_paid += record.total_paid();
    }

    let amount_owed = fair * rows_considered as f64;
    let installment_paid = if rows_considered == 0 {
        0.0
    } else {
        amount_paid / rows_considered as f64
    };

    let rows = options.extended_columns.then(|| {
        store
            .iter()
            .map(|record| {
                let paid = record.total_paid();
                RowComparative {
                    sequence_number: record.sequence_number(),
                    due_date: record.due_date(),
                    actual_payment_date: record.actual_payment_date(),
                    status: record.status(),
                    contract_amount: record.contract_amount(),
                    amount_paid: paid,
                    fair_installment: fair,
                    difference: paid - fair,
                    interest_paid: paid * ratio,
                    days_late: (record.actual_payment_date() - record.due_date())
                        .num_days()
                        .max(0),
                    considered: is_considered(record, mode),
                }
            })
            .collect()
    });

    debug!(
        "Derived {:?} comparative over {} of {} installments",
        mode,
        rows_considered,
        store.len()
    );

    DerivedComparative {
        mode,
        rows_considered,
        amount_owed,
        amount_paid,
        interest_owed: amount_owed * ratio,
        interest_paid: amount_paid * ratio,
        installment_owed: fair,
        installment_paid,
        original_installment: kpis.original_installment_amount,
        per_installment_savings: kpis.original_installment_amount - fair,
        total_savings: amount_paid - amount_owed,
        overrate: overrate(kpis.contract_rate, kpis.market_rate),
        interest_ratio: ratio,
        interest_ratio_source: ratio_source,
        rows,
    }
}
