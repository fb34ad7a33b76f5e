use crate::error::{ReconciliationError, Result};
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[schemars(description = "The installment was paid.")]
    Paid,

    #[default]
    #[schemars(description = "Not yet resolved. Open installments only count toward totals while nothing has been reconciled.")]
    Open,

    #[schemars(description = "The installment was folded into a renegotiation.")]
    Renegotiated,

    #[schemars(description = "The installment was paid after its due date.")]
    Late,
}

impl PaymentStatus {
    /// Resolved installments are the ones counted once reconciliation has begun.
    pub fn is_resolved(self) -> bool {
        !matches!(self, Self::Open)
    }
}

/// One row of the projected schedule, as produced by the amortization engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScheduleEntry {
    #[schemars(description = "1-based installment index")]
    pub sequence_number: u32,

    #[schemars(description = "Contractual due date in YYYY-MM-DD format")]
    pub due_date: NaiveDate,

    #[schemars(description = "Amount owed for this installment per the schedule")]
    pub contract_amount: f64,
}

/// One installment: contractual terms plus the user-recorded outcome.
///
/// The contractual side (`sequence_number`, `due_date`, `contract_amount`) is
/// fixed at construction. The four editable fields are only changed through
/// [`crate::editing`], which keeps `edited` in sync with them.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct PaymentRecord {
    #[schemars(description = "1-based installment index, contiguous across the schedule")]
    sequence_number: u32,

    #[schemars(description = "Contractual due date")]
    due_date: NaiveDate,

    #[schemars(description = "Amount owed per the original or recalculated schedule")]
    contract_amount: f64,

    #[schemars(description = "Date the installment was actually paid. Defaults to the due date.")]
    actual_payment_date: NaiveDate,

    #[schemars(description = "Amount actually paid. Defaults to the contract amount.")]
    actual_amount_paid: f64,

    #[schemars(description = "Voluntary prepayment made with this installment. Defaults to 0.")]
    extra_amortization: f64,

    #[schemars(description = "Reconciliation status. Defaults to OPEN.")]
    status: PaymentStatus,

    #[schemars(description = "True when any editable field diverges from its schedule default")]
    edited: bool,
}

impl PaymentRecord {
    pub fn from_schedule(entry: &ScheduleEntry) -> Self {
        Self {
            sequence_number: entry.sequence_number,
            due_date: entry.due_date,
            contract_amount: entry.contract_amount,
            actual_payment_date: entry.due_date,
            actual_amount_paid: entry.contract_amount,
            extra_amortization: 0.0,
            status: PaymentStatus::Open,
            edited: false,
        }
    }

    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    pub fn due_date(&self) -> NaiveDate {
        self.due_date
    }

    pub fn contract_amount(&self) -> f64 {
        self.contract_amount
    }

    pub fn actual_payment_date(&self) -> NaiveDate {
        self.actual_payment_date
    }

    pub fn actual_amount_paid(&self) -> f64 {
        self.actual_amount_paid
    }

    pub fn extra_amortization(&self) -> f64 {
        self.extra_amortization
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn edited(&self) -> bool {
        self.edited
    }

    /// Actual amount paid plus any extra amortization.
    pub fn total_paid(&self) -> f64 {
        self.actual_amount_paid + self.extra_amortization
    }

    /// The default value the schedule implies for `field`.
    pub fn default_value(&self, field: EditableField) -> FieldValue {
        match field {
            EditableField::ActualPaymentDate => FieldValue::ActualPaymentDate(self.due_date),
            EditableField::ActualAmountPaid => FieldValue::ActualAmountPaid(self.contract_amount),
            EditableField::ExtraAmortization => FieldValue::ExtraAmortization(0.0),
            EditableField::Status => FieldValue::Status(PaymentStatus::Open),
        }
    }

    pub fn value(&self, field: EditableField) -> FieldValue {
        match field {
            EditableField::ActualPaymentDate => {
                FieldValue::ActualPaymentDate(self.actual_payment_date)
            }
            EditableField::ActualAmountPaid => FieldValue::ActualAmountPaid(self.actual_amount_paid),
            EditableField::ExtraAmortization => {
                FieldValue::ExtraAmortization(self.extra_amortization)
            }
            EditableField::Status => FieldValue::Status(self.status),
        }
    }

    pub fn diverges_from_default(&self) -> bool {
        EditableField::ALL
            .iter()
            .any(|field| self.value(*field) != self.default_value(*field))
    }

    pub(crate) fn set(&mut self, value: FieldValue) {
        match value {
            FieldValue::ActualPaymentDate(date) => self.actual_payment_date = date,
            FieldValue::ActualAmountPaid(amount) => self.actual_amount_paid = amount,
            FieldValue::ExtraAmortization(amount) => self.extra_amortization = amount,
            FieldValue::Status(status) => self.status = status,
        }
        self.edited = self.diverges_from_default();
    }

    pub(crate) fn mark_edited(&mut self) {
        self.edited = true;
    }

    pub(crate) fn reset(&mut self) {
        self.actual_payment_date = self.due_date;
        self.actual_amount_paid = self.contract_amount;
        self.extra_amortization = 0.0;
        self.status = PaymentStatus::Open;
        self.edited = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EditableField {
    ActualPaymentDate,
    ActualAmountPaid,
    ExtraAmortization,
    Status,
}

impl EditableField {
    pub const ALL: [EditableField; 4] = [
        EditableField::ActualPaymentDate,
        EditableField::ActualAmountPaid,
        EditableField::ExtraAmortization,
        EditableField::Status,
    ];
}

/// A new value for one editable field. The variant names the field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    ActualPaymentDate(NaiveDate),
    ActualAmountPaid(f64),
    ExtraAmortization(f64),
    Status(PaymentStatus),
}

impl FieldValue {
    pub fn field(&self) -> EditableField {
        match self {
            Self::ActualPaymentDate(_) => EditableField::ActualPaymentDate,
            Self::ActualAmountPaid(_) => EditableField::ActualAmountPaid,
            Self::ExtraAmortization(_) => EditableField::ExtraAmortization,
            Self::Status(_) => EditableField::Status,
        }
    }

    pub(crate) fn check(&self) -> Result<()> {
        match *self {
            Self::ActualAmountPaid(amount) | Self::ExtraAmortization(amount) => {
                if !amount.is_finite() || amount < 0.0 {
                    return Err(ReconciliationError::ContractViolation(format!(
                        "{:?} must be a finite, non-negative amount, got {}",
                        self.field(),
                        amount
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// A single-cell edit addressed by 0-based row index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EditCommand {
    pub row_index: usize,
    pub value: FieldValue,
}

impl EditCommand {
    pub fn new(row_index: usize, value: FieldValue) -> Self {
        Self { row_index, value }
    }
}

/// Reference figures computed by the amortization engine. Never recomputed here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct BaselineKpis {
    #[schemars(description = "Installment amount charged under the original contract")]
    pub original_installment_amount: f64,

    #[schemars(description = "Installment amount recalculated at the fair (market) rate")]
    pub fair_installment_amount: f64,

    #[schemars(description = "Interest rate charged by the contract, in percent")]
    pub contract_rate: f64,

    #[schemars(description = "Market reference rate for the same period, in percent")]
    pub market_rate: Option<f64>,

    #[serde(default)]
    #[schemars(description = "Total paid over the original schedule, used to infer the interest share")]
    pub original_total_paid: Option<f64>,

    #[serde(default)]
    #[schemars(description = "Total interest over the original schedule")]
    pub original_total_interest: Option<f64>,
}

/// Contract-level fields entered in the data-entry stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct ContractParameters {
    #[schemars(description = "Identifier of the contract under review")]
    pub contract_id: String,

    #[serde(default)]
    pub borrower_name: Option<String>,

    #[schemars(description = "Financed principal")]
    pub principal: f64,

    #[schemars(description = "Number of monthly installments")]
    pub installment_count: u32,

    #[schemars(description = "Monthly interest rate charged by the contract, in percent")]
    pub contract_rate: f64,

    #[schemars(description = "Due date of the first installment")]
    pub first_due_date: Option<NaiveDate>,

    #[serde(default)]
    #[schemars(description = "Installment amount stated in the contract, if known")]
    pub original_installment: Option<f64>,
}

impl ContractParameters {
    /// Checks the fields required before the schedule can be generated.
    pub fn validate(&self) -> Result<()> {
        if self.contract_id.trim().is_empty() {
            return Err(invalid("contract_id", "must not be empty".to_string()));
        }

        if !self.principal.is_finite() || self.principal <= 0.0 {
            return Err(invalid(
                "principal",
                format!("must be a positive amount, got {}", self.principal),
            ));
        }

        if self.installment_count == 0 {
            return Err(invalid("installment_count", "must be at least 1".to_string()));
        }

        if !self.contract_rate.is_finite() || self.contract_rate < 0.0 {
            return Err(invalid(
                "contract_rate",
                format!("must be a non-negative rate, got {}", self.contract_rate),
            ));
        }

        if self.first_due_date.is_none() {
            return Err(invalid("first_due_date", "is required".to_string()));
        }

        if let Some(installment) = self.original_installment {
            if !installment.is_finite() || installment <= 0.0 {
                return Err(invalid(
                    "original_installment",
                    format!("must be a positive amount, got {}", installment),
                ));
            }
        }

        Ok(())
    }
}

fn invalid(field: &'static str, details: String) -> ReconciliationError {
    ReconciliationError::InvalidContract { field, details }
}
