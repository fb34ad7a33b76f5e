//! Contracts for the collaborators the core talks to. Implementations live
//! outside this crate.

use crate::error::Result;
use crate::schema::{BaselineKpis, ContractParameters, ScheduleEntry};
use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AmortizationOutput {
    pub schedule: Vec<ScheduleEntry>,
    pub kpis: BaselineKpis,
}

/// Generates the projected schedule and the reference figures for a contract.
pub trait AmortizationEngine: Send + Sync {
    fn recalculate<'a>(
        &'a self,
        contract: &'a ContractParameters,
    ) -> BoxFuture<'a, Result<AmortizationOutput>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStep {
    Contract,
    Reconciliation,
    Result,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub step: SnapshotStep,
    pub payload: serde_json::Value,
}

/// Stores partial session snapshots. Only written to during a session.
pub trait PersistenceGateway: Send + Sync {
    fn persist<'a>(&'a self, session_id: &'a str, snapshot: Snapshot) -> BoxFuture<'a, Result<()>>;
}
