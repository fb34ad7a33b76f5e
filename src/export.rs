use crate::derivation::DerivedComparative;
use crate::error::Result;
use crate::schema::{BaselineKpis, ContractParameters, PaymentRecord};
use crate::stage::StageStatus;
use schemars::JsonSchema;
use serde::Serialize;

/// Plain-data view handed to table, chart and PDF renderers.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ReportSnapshot {
    #[schemars(description = "Session (case) identifier")]
    pub session_id: String,

    pub status: StageStatus,

    pub contract: ContractParameters,

    #[schemars(description = "Reference figures from the amortization engine; absent before the first recalculation")]
    pub kpis: Option<BaselineKpis>,

    #[schemars(description = "Installments in schedule order")]
    pub records: Vec<PaymentRecord>,

    #[schemars(description = "Comparative totals derived from `records`; absent before the first recalculation")]
    pub comparative: Option<DerivedComparative>,
}

impl ReportSnapshot {
    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ReportSnapshot)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
