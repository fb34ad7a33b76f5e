//! Row-level and bulk edits over a [`PaymentRecordStore`].
//!
//! Every operation here is a pure function from (store, command) to a new
//! store. The input store is never mutated, so a derivation running against
//! it can never observe a half-applied edit.

use crate::error::Result;
use crate::schema::{EditCommand, FieldValue, PaymentStatus};
use crate::selection::SelectionSet;
use crate::store::PaymentRecordStore;
use log::debug;
use std::sync::Arc;

/// Emitted with every store change so the derivation can be rerun
/// immediately. Autosave is scheduled separately.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct RecomputeRequested {
    pub changed_rows: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct EditOutcome {
    pub store: PaymentRecordStore,
    /// `None` when the operation was a no-op.
    pub recompute: Option<RecomputeRequested>,
}

impl EditOutcome {
    fn unchanged(store: &PaymentRecordStore) -> Self {
        Self {
            store: store.clone(),
            recompute: None,
        }
    }
}

/// Applies a single-cell edit. `edited` is recomputed from the record's
/// defaults, so writing a default value back can clear it.
pub fn apply_edit(store: &PaymentRecordStore, command: &EditCommand) -> Result<EditOutcome> {
    store.check_index(command.row_index)?;
    command.value.check()?;

    let mut records = store.to_shared_vec();
    let slot = &mut records[command.row_index];
    let mut record = slot.as_ref().clone();
    record.set(command.value);
    debug!(
        "Edited installment {}: {:?} (edited = {})",
        record.sequence_number(),
        command.value,
        record.edited()
    );
    *slot = Arc::new(record);

    Ok(EditOutcome {
        store: PaymentRecordStore::from_shared(records),
        recompute: Some(RecomputeRequested {
            changed_rows: vec![command.row_index],
        }),
    })
}

/// Sets `status` on every selected row and empties the selection.
///
/// Only status can be bulk-edited. Selected rows are marked edited whenever
/// the target status is a resolved one. Bulk-reopening a row recomputes
/// `edited` from its other fields instead, so a row that ends up equal to its
/// schedule defaults is not flagged: `edited` always means "differs from the
/// defaults". Nothing is applied if any selected index is out of range.
pub fn apply_bulk_status(
    store: &PaymentRecordStore,
    selection: &mut SelectionSet,
    status: PaymentStatus,
) -> Result<EditOutcome> {
    if selection.is_empty() {
        return Ok(EditOutcome::unchanged(store));
    }

    for &index in selection.iter() {
        store.check_index(index)?;
    }

    let mut records = store.to_shared_vec();
    let mut changed_rows = Vec::with_capacity(selection.len());
    for &index in selection.iter() {
        let mut record = records[index].as_ref().clone();
        record.set(FieldValue::Status(status));
        if status.is_resolved() {
            record.mark_edited();
        }
        records[index] = Arc::new(record);
        changed_rows.push(index);
    }

    debug!(
        "Bulk-set {} installments to {:?}",
        changed_rows.len(),
        status
    );
    selection.clear();

    Ok(EditOutcome {
        store: PaymentRecordStore::from_shared(records),
        recompute: Some(RecomputeRequested { changed_rows }),
    })
}

/// Restores every record to its schedule defaults. This replaces the whole
/// store; no record is shared with the input.
pub fn reset_all(store: &PaymentRecordStore) -> EditOutcome {
    let records = store
        .iter()
        .map(|record| {
            let mut record = record.clone();
            record.reset();
            Arc::new(record)
        })
        .collect::<Vec<_>>();

    debug!("Reset {} installments to schedule defaults", records.len());

    EditOutcome {
        store: PaymentRecordStore::from_shared(records),
        recompute: Some(RecomputeRequested {
            changed_rows: (0..store.len()).collect(),
        }),
    }
}
