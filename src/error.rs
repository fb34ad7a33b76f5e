use crate::stage::Stage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconciliationError {
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Row index {index} out of range for a schedule of {len} installments")]
    RowIndexOutOfRange { index: usize, len: usize },

    #[error("Invalid contract field '{field}': {details}")]
    InvalidContract { field: &'static str, details: String },

    #[error("Cannot advance from {from:?} to {to:?}: {reason}")]
    StageBlocked {
        from: Stage,
        to: Stage,
        reason: String,
    },

    #[error("A recalculation is already in flight for this session")]
    RecalculationInFlight,

    #[error("Amortization engine failed: {0}")]
    ExternalComputation(String),

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No async runtime available to schedule persistence")]
    RuntimeUnavailable,

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl ReconciliationError {
    /// Caller bugs upstream of the core. These are never turned into
    /// user-facing notifications.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::ContractViolation(_) | Self::RowIndexOutOfRange { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ReconciliationError>;
