use std::collections::HashMap;
use std::fmt::Write as _;

use serde::Serialize;

use crate::engine::Detection;
use crate::matcher::DiffOutput;
use crate::model::{
    Ambiguity, Change, CorrectionOutcome, CorrectionStatus, DiscrepancyState, FieldDiscrepancy,
    RowWarning, VerificationResult,
};

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ReportMeta {
    pub config_name: String,
    pub engine_version: String,
    pub run_at: String,
    pub reference: String,
    pub target: String,
    pub fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_filter: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub reference_records: usize,
    pub target_records: usize,
    pub compared: usize,
    pub matched: usize,
    pub discrepant: usize,
    pub unmatched_reference: usize,
    pub unmatched_target: usize,
    pub ambiguous: usize,
    pub warnings: usize,
    pub approved: usize,
    pub applied: usize,
    pub not_found: usize,
    pub failed: usize,
    pub verified: usize,
    pub mismatched: usize,
    /// Discrepancies without a confirming verification.
    pub unverified: usize,
}

/// Everything one run found and did. Built once at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub meta: ReportMeta,
    pub summary: ReportSummary,
    pub discrepancies: Vec<FieldDiscrepancy>,
    pub outcomes: Vec<CorrectionOutcome>,
    pub verifications: Vec<VerificationResult>,
    pub ambiguities: Vec<Ambiguity>,
    pub warnings: Vec<RowWarning>,
    pub unmatched_reference: Vec<String>,
    pub unmatched_target: Vec<String>,
}

impl ReconciliationReport {
    /// Assemble the report from a detection and whatever correction and
    /// verification happened after it.
    pub fn build(
        detection: Detection,
        approved: usize,
        outcomes: Vec<CorrectionOutcome>,
        verifications: Vec<VerificationResult>,
    ) -> Self {
        let Detection {
            meta,
            reference_records,
            target_records,
            diff,
            warnings,
        } = detection;
        let DiffOutput {
            discrepancies,
            compared,
            matched,
            unmatched_reference,
            unmatched_target,
            ambiguities,
        } = diff;

        let count = |s: CorrectionStatus| outcomes.iter().filter(|o| o.status == s).count();
        let verified = verifications.iter().filter(|v| v.matched).count();

        let confirmed: std::collections::HashSet<(&str, &str)> = verifications
            .iter()
            .filter(|v| v.matched)
            .map(|v| (v.key.as_str(), v.field.as_str()))
            .collect();
        let unverified = discrepancies
            .iter()
            .filter(|d| !confirmed.contains(&(d.key.as_str(), d.field.as_str())))
            .count();

        let summary = ReportSummary {
            reference_records,
            target_records,
            compared,
            matched,
            discrepant: discrepancies.len(),
            unmatched_reference: unmatched_reference.len(),
            unmatched_target: unmatched_target.len(),
            ambiguous: ambiguities.len(),
            warnings: warnings.len(),
            approved,
            applied: count(CorrectionStatus::Applied),
            not_found: count(CorrectionStatus::NotFound),
            failed: count(CorrectionStatus::Failed),
            verified,
            mismatched: verifications.len() - verified,
            unverified,
        };

        Self {
            meta,
            summary,
            discrepancies,
            outcomes,
            verifications,
            ambiguities,
            warnings,
            unmatched_reference,
            unmatched_target,
        }
    }

    /// Where `d` ended up. A confirming read-back wins over everything; a
    /// missing key or failed write is reported before a failed read-back.
    pub fn state_of(&self, d: &FieldDiscrepancy) -> DiscrepancyState {
        let same = |key: &str, field: &str| key == d.key && field == d.field;
        let verification = self.verifications.iter().find(|v| same(v.key.as_str(), v.field.as_str()));
        let outcome = self.outcomes.iter().find(|o| same(o.key.as_str(), o.field.as_str()));

        match (outcome.map(|o| o.status), verification.map(|v| v.matched)) {
            (_, Some(true)) => DiscrepancyState::VerifiedMatched,
            (Some(CorrectionStatus::NotFound), _) => DiscrepancyState::NotFound,
            (Some(CorrectionStatus::Failed), _) => DiscrepancyState::Failed,
            (_, Some(false)) => DiscrepancyState::VerifiedMismatched,
            (Some(CorrectionStatus::Applied), None) => DiscrepancyState::Applied,
            (None, None) => DiscrepancyState::Detected,
        }
    }

    /// Per-discrepancy state, in report order.
    pub fn states(&self) -> Vec<(&FieldDiscrepancy, DiscrepancyState)> {
        self.discrepancies.iter().map(|d| (d, self.state_of(d))).collect()
    }

    /// The corrective change list, independent of any store's update syntax.
    pub fn changes(&self) -> Vec<Change> {
        self.discrepancies.iter().map(FieldDiscrepancy::change).collect()
    }

    /// True when nothing needs a re-run or a human: no open discrepancy, no
    /// ambiguity.
    pub fn is_settled(&self) -> bool {
        self.summary.unverified == 0 && self.summary.ambiguous == 0
    }

    /// Human-readable summary: counts plus one line per discrepancy.
    pub fn render_text(&self) -> String {
        let s = &self.summary;
        let mut out = String::new();

        let _ = writeln!(
            out,
            "reconcile '{}': {} reference record(s) from {}, {} target record(s) from {}",
            self.meta.config_name, s.reference_records, self.meta.reference, s.target_records, self.meta.target,
        );
        if let Some(ref keys) = self.meta.key_filter {
            let _ = writeln!(out, "  restricted to {} key(s): {}", keys.len(), keys.join(", "));
        }
        let _ = writeln!(
            out,
            "  {} compared, {} matched, {} discrepant field(s), {} missing from target, {} missing from reference, {} ambiguous",
            s.compared, s.matched, s.discrepant, s.unmatched_target, s.unmatched_reference, s.ambiguous,
        );

        if !self.discrepancies.is_empty() {
            let outcomes: HashMap<(&str, &str), &CorrectionOutcome> = self
                .outcomes
                .iter()
                .map(|o| ((o.key.as_str(), o.field.as_str()), o))
                .collect();
            let _ = writeln!(out, "discrepancies:");
            for (i, (d, state)) in self.states().into_iter().enumerate() {
                let name = if d.display_name.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", d.display_name)
                };
                let _ = write!(
                    out,
                    "  {:3}. {}{}: {} {} -> {} [{}]",
                    i + 1,
                    d.key,
                    name,
                    d.field,
                    d.current_value,
                    d.reference_value,
                    state,
                );
                if let Some(detail) = outcomes
                    .get(&(d.key.as_str(), d.field.as_str()))
                    .and_then(|o| o.error_detail.as_deref())
                {
                    let _ = write!(out, " {detail}");
                }
                out.push('\n');
            }
        }

        if !self.ambiguities.is_empty() {
            let _ = writeln!(out, "ambiguous (not compared):");
            for a in &self.ambiguities {
                let _ = writeln!(out, "  {} {} {}: {}", a.side, a.key, a.field, a.values.join(" | "));
            }
        }

        if s.approved > 0 || !self.outcomes.is_empty() {
            let _ = writeln!(
                out,
                "corrections: {} approved, {} applied, {} not found, {} failed",
                s.approved, s.applied, s.not_found, s.failed,
            );
        }
        if !self.verifications.is_empty() {
            let _ = writeln!(
                out,
                "verification: {} confirmed, {} mismatched, {} unverified",
                s.verified, s.mismatched, s.unverified,
            );
        }

        if !self.warnings.is_empty() {
            let _ = writeln!(out, "warnings: {} row(s) skipped", self.warnings.len());
            for w in &self.warnings {
                let _ = writeln!(out, "  {} line {}: {}", w.source, w.line, w.reason);
            }
        }

        out
    }
}
