use crate::error::{ReconciliationError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Interest share assumed when the original schedule totals are unknown.
/// An approximation, not a figure derived from the contract.
pub const DEFAULT_FALLBACK_INTEREST_RATIO: f64 = 0.30;

pub const DEFAULT_CONTRACT_DEBOUNCE_MS: u64 = 1_000;

pub const DEFAULT_RECALCULATION_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EngineConfig {
    #[schemars(description = "Quiet period before contract-field edits are persisted, in milliseconds")]
    pub contract_debounce_ms: u64,

    #[schemars(
        description = "Quiet period before reconciliation edits are persisted, in milliseconds. 0 writes on the next tick while still coalescing bursts."
    )]
    pub reconciliation_debounce_ms: u64,

    #[schemars(
        description = "Interest-to-total ratio used when the original schedule totals are not supplied. Range: 0.0 to 1.0."
    )]
    pub fallback_interest_ratio: f64,

    #[schemars(description = "Include the per-installment breakdown in derived results")]
    pub extended_columns: bool,

    #[schemars(
        description = "How long to wait for the amortization engine before treating the call as failed, in milliseconds. Must be positive."
    )]
    pub recalculation_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            contract_debounce_ms: DEFAULT_CONTRACT_DEBOUNCE_MS,
            reconciliation_debounce_ms: 0,
            fallback_interest_ratio: DEFAULT_FALLBACK_INTEREST_RATIO,
            extended_columns: false,
            recalculation_timeout_ms: DEFAULT_RECALCULATION_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.fallback_interest_ratio) {
            return Err(ReconciliationError::InvalidConfig(format!(
                "fallback_interest_ratio {} must be between 0.0 and 1.0",
                self.fallback_interest_ratio
            )));
        }
        if self.recalculation_timeout_ms == 0 {
            return Err(ReconciliationError::InvalidConfig(
                "recalculation_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn contract_debounce(&self) -> Duration {
        Duration::from_millis(self.contract_debounce_ms)
    }

    pub fn reconciliation_debounce(&self) -> Duration {
        Duration::from_millis(self.reconciliation_debounce_ms)
    }

    pub fn recalculation_timeout(&self) -> Duration {
        Duration::from_millis(self.recalculation_timeout_ms)
    }
}
