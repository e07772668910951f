//! Run orchestration: fetch both sides, diff, then correct and verify what the
//! caller approves.

use crate::corrector::{self, Approved, CancelFlag};
use crate::error::ReconError;
use crate::matcher::{diff, DiffOptions, DiffOutput};
use crate::model::{FieldDiscrepancy, RowWarning};
use crate::report::{ReconciliationReport, ReportMeta};
use crate::source::{Source, TargetStore};
use crate::verifier;

/// Result of the detection stage. Nothing has been written yet.
#[derive(Debug, Clone)]
pub struct Detection {
    pub meta: ReportMeta,
    pub reference_records: usize,
    pub target_records: usize,
    pub diff: DiffOutput,
    pub warnings: Vec<RowWarning>,
}

impl Detection {
    pub fn discrepancies(&self) -> &[FieldDiscrepancy] {
        &self.diff.discrepancies
    }

    /// Report for a run that stops after detection.
    pub fn into_report(self) -> ReconciliationReport {
        ReconciliationReport::build(self, 0, Vec::new(), Vec::new())
    }
}

/// Fetch both sides and diff them. Either side failing to load aborts the run.
pub fn detect<R, T>(
    name: &str,
    reference: &R,
    target: &T,
    options: &DiffOptions,
) -> Result<Detection, ReconError>
where
    R: Source + ?Sized,
    T: Source + ?Sized,
{
    let ref_out = reference.fetch()?;
    log::info!(
        "{}: {} record(s), {} row(s) skipped",
        reference.name(),
        ref_out.records.len(),
        ref_out.warnings.len()
    );
    let tgt_out = target.fetch()?;
    log::info!(
        "{}: {} record(s), {} row(s) skipped",
        target.name(),
        tgt_out.records.len(),
        tgt_out.warnings.len()
    );

    let diff = diff(&ref_out.records, &tgt_out.records, options);

    let mut warnings = ref_out.warnings;
    warnings.extend(tgt_out.warnings);

    Ok(Detection {
        meta: ReportMeta {
            config_name: name.to_string(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
            reference: reference.name().to_string(),
            target: target.name().to_string(),
            fields: options.fields.clone(),
            key_filter: options.keys.as_ref().map(|k| k.iter().cloned().collect()),
        },
        reference_records: ref_out.records.len(),
        target_records: tgt_out.records.len(),
        diff,
        warnings,
    })
}

/// Apply the approved part of `detection` to `store`, read it back, and
/// report. Verification covers every approved discrepancy, including those
/// whose write failed or found no row.
pub fn reconcile(
    detection: Detection,
    store: &mut dyn TargetStore,
    approve: impl FnOnce(&[FieldDiscrepancy]) -> Approved,
    cancel: &CancelFlag,
) -> Result<ReconciliationReport, ReconError> {
    let approved = approve(detection.discrepancies());
    if approved.is_empty() {
        log::info!("nothing approved, target left untouched");
        return Ok(ReconciliationReport::build(detection, 0, Vec::new(), Vec::new()));
    }

    log::info!("applying {} approved correction(s) to {}", approved.len(), store.name());
    let outcomes = corrector::apply(store, &approved, cancel);

    // Only what was attempted is read back; cancelled entries stay unverified.
    let attempted: Vec<FieldDiscrepancy> = approved.as_slice()[..outcomes.len()].to_vec();
    let verifications = verifier::verify(&*store, &attempted)?;

    Ok(ReconciliationReport::build(
        detection,
        approved.len(),
        outcomes,
        verifications,
    ))
}

/// Detect, approve, correct and verify in one call.
pub fn run<R: Source + ?Sized>(
    name: &str,
    reference: &R,
    target: &mut dyn TargetStore,
    options: &DiffOptions,
    approve: impl FnOnce(&[FieldDiscrepancy]) -> Approved,
) -> Result<ReconciliationReport, ReconError> {
    let detection = detect(name, reference, &*target, options)?;
    reconcile(detection, target, approve, &CancelFlag::new())
}
