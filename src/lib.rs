//! # Loan Reconciliation
//!
//! Reconciles the projected amortization schedule of a consumer loan against
//! the payments that were actually made, and derives comparative indicators
//! (owed vs. paid, interest split, savings) from the result.
//!
//! ## Core Concepts
//!
//! - **Payment Record Store**: ordered installments; the single source of truth
//! - **Row Edits**: explicit [`EditCommand`]s producing a new store per edit
//! - **Selection**: click, range-click and drag gestures as a small state machine
//! - **View Mode**: `Projected` until any installment is resolved, then `Reconciled`
//! - **Derivation**: totals recomputed from scratch on every change, never accumulated
//! - **Stages**: data entry → reconciliation → result, gated by dirty flags
//!
//! The amortization engine and the persistence backend are collaborators
//! reached through [`AmortizationEngine`] and [`PersistenceGateway`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use loan_reconciliation::*;
//!
//! let mut session = ReconciliationSession::new(
//!     "case-2024-001",
//!     contract,
//!     EngineConfig::default(),
//!     engine,
//!     gateway,
//! )?;
//!
//! session.advance_to_reconciliation().await?;
//! session.edit(&EditCommand::new(0, FieldValue::Status(PaymentStatus::Paid)))?;
//!
//! let derived = session.derived().unwrap();
//! println!("Paid {:.2}, owed {:.2}", derived.amount_paid, derived.amount_owed);
//! ```

pub mod config;
pub mod derivation;
pub mod editing;
pub mod error;
pub mod export;
pub mod gateway;
pub mod mode;
pub mod notification;
pub mod persistence;
pub mod schema;
pub mod selection;
pub mod session;
pub mod stage;
pub mod store;

pub use config::EngineConfig;
pub use derivation::{
    derive, interest_ratio, overrate, DerivationOptions, DerivedComparative, InterestRatioSource,
    RowComparative,
};
pub use editing::{apply_bulk_status, apply_edit, reset_all, EditOutcome, RecomputeRequested};
pub use error::{ReconciliationError, Result};
pub use export::ReportSnapshot;
pub use gateway::{
    AmortizationEngine, AmortizationOutput, PersistenceGateway, Snapshot, SnapshotStep,
};
pub use mode::{resolve_mode, rows_to_consider, ViewMode};
pub use notification::{Notification, NotificationKind};
pub use persistence::{DebouncedWriter, WriteQueue};
pub use schema::*;
pub use selection::{DragState, PointerButton, SelectionController, SelectionSet};
pub use session::{ReconciliationSession, Transition};
pub use stage::{RecalculationTicket, Stage, StageOrchestrator, StageStatus};
pub use store::PaymentRecordStore;

/// Derives the comparative for `store` in whatever mode its rows imply.
pub fn compare(
    store: &PaymentRecordStore,
    kpis: &BaselineKpis,
    options: &DerivationOptions,
) -> DerivedComparative {
    derive(store, resolve_mode(store), kpis, options)
}
