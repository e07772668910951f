//! Applies approved corrections to the target store, one write per discrepancy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::model::{CorrectionOutcome, CorrectionStatus, FieldDiscrepancy};
use crate::source::TargetStore;

/// Discrepancies a caller has explicitly agreed to write.
///
/// There is no way to build one without going through an approval call, so
/// the corrector can never run on a raw detection result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Approved(Vec<FieldDiscrepancy>);

impl Approved {
    /// Approve every detected discrepancy.
    pub fn all(discrepancies: &[FieldDiscrepancy]) -> Self {
        Self(discrepancies.to_vec())
    }

    /// Approve nothing.
    pub fn none() -> Self {
        Self(Vec::new())
    }

    /// Approve the discrepancies whose key is in `keys`.
    pub fn only(discrepancies: &[FieldDiscrepancy], keys: &[&str]) -> Self {
        Self::filter(discrepancies, |d| keys.contains(&d.key.as_str()))
    }

    pub fn filter(
        discrepancies: &[FieldDiscrepancy],
        mut keep: impl FnMut(&FieldDiscrepancy) -> bool,
    ) -> Self {
        Self(discrepancies.iter().filter(|d| keep(d)).cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[FieldDiscrepancy] {
        &self.0
    }
}

/// Cooperative stop signal, checked between two writes.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Write each approved discrepancy's reference value to `store`.
///
/// Exactly one write is attempted per discrepancy and a failed write never
/// stops the batch. Returns one outcome per attempted write, in order; if
/// `cancel` fires, the remaining discrepancies get no outcome.
pub fn apply(
    store: &mut dyn TargetStore,
    approved: &Approved,
    cancel: &CancelFlag,
) -> Vec<CorrectionOutcome> {
    let mut outcomes = Vec::with_capacity(approved.len());

    for d in approved.as_slice() {
        if cancel.is_cancelled() {
            log::warn!(
                "correction cancelled after {} of {} write(s)",
                outcomes.len(),
                approved.len()
            );
            break;
        }

        let (status, error_detail) = match store.apply_field(&d.key, &d.field, &d.reference_value) {
            Ok(0) => {
                log::warn!("{}: '{}' not found, nothing written", store.name(), d.key);
                (CorrectionStatus::NotFound, None)
            }
            Ok(n) => {
                log::debug!(
                    "{}: {}.{} = {} ({n} row(s))",
                    store.name(),
                    d.key,
                    d.field,
                    d.reference_value
                );
                (CorrectionStatus::Applied, None)
            }
            Err(e) => {
                log::warn!("{}: write to '{}' failed: {e}", store.name(), d.key);
                (CorrectionStatus::Failed, Some(e))
            }
        };

        outcomes.push(CorrectionOutcome {
            key: d.key.clone(),
            field: d.field.clone(),
            attempted_value: d.reference_value.clone(),
            status,
            error_detail,
        });
    }

    outcomes
}
