use crate::error::{ReconciliationError, Result};
use crate::schema::{PaymentRecord, ScheduleEntry};
use serde::{Serialize, Serializer};
use std::sync::Arc;

/// Ordered, immutable collection of installments.
///
/// Every edit produces a new store. Records that an edit did not touch are
/// shared with the previous store, so `Arc::ptr_eq` on a row tells a renderer
/// whether that row changed.
#[derive(Debug, Clone)]
pub struct PaymentRecordStore {
    records: Arc<[Arc<PaymentRecord>]>,
}

impl PaymentRecordStore {
    /// Seeds a store from a generated schedule. Sequence numbers must run
    /// 1..=n in order.
    pub fn from_schedule(schedule: &[ScheduleEntry]) -> Result<Self> {
        for (idx, entry) in schedule.iter().enumerate() {
            let expected = idx as u32 + 1;
            if entry.sequence_number != expected {
                return Err(ReconciliationError::ContractViolation(format!(
                    "Schedule entry #{} has sequence number {}, expected {}",
                    idx, entry.sequence_number, expected
                )));
            }
            if !entry.contract_amount.is_finite() || entry.contract_amount < 0.0 {
                return Err(ReconciliationError::ContractViolation(format!(
                    "Installment {} has invalid contract amount {}",
                    entry.sequence_number, entry.contract_amount
                )));
            }
        }

        let records = schedule
            .iter()
            .map(|entry| Arc::new(PaymentRecord::from_schedule(entry)))
            .collect::<Vec<_>>();

        Ok(Self::from_shared(records))
    }

    pub(crate) fn from_shared(records: Vec<Arc<PaymentRecord>>) -> Self {
        Self {
            records: records.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PaymentRecord> {
        self.records.get(index).map(|r| r.as_ref())
    }

    /// The shared handle for a row, for change detection between stores.
    pub fn shared(&self, index: usize) -> Option<&Arc<PaymentRecord>> {
        self.records.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PaymentRecord> {
        self.records.iter().map(|r| r.as_ref())
    }

    pub fn edited_count(&self) -> usize {
        self.iter().filter(|r| r.edited()).count()
    }

    /// Indices whose record differs by reference from `previous`.
    pub fn changed_rows(&self, previous: &PaymentRecordStore) -> Vec<usize> {
        self.records
            .iter()
            .enumerate()
            .filter(|(idx, record)| {
                previous
                    .records
                    .get(*idx)
                    .map_or(true, |old| !Arc::ptr_eq(old, record))
            })
            .map(|(idx, _)| idx)
            .collect()
    }

    pub(crate) fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.records.len() {
            return Err(ReconciliationError::RowIndexOutOfRange {
                index,
                len: self.records.len(),
            });
        }
        Ok(())
    }

    pub(crate) fn to_shared_vec(&self) -> Vec<Arc<PaymentRecord>> {
        self.records.to_vec()
    }

    /// Deep copy of the records, used for snapshots and export.
    pub fn to_records(&self) -> Vec<PaymentRecord> {
        self.iter().cloned().collect()
    }
}

impl Default for PaymentRecordStore {
    fn default() -> Self {
        Self::from_shared(Vec::new())
    }
}

impl Serialize for PaymentRecordStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}
