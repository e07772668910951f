//! `rectify-recon`: field-level reconciliation of a target store against an
//! authoritative reference.
//!
//! Engine crate: adapters read both sides into normalized records, the matcher
//! diffs them, and approved corrections are written back and verified. No CLI
//! or network dependencies; remote stores plug in through [`TargetStore`].

pub mod changes;
pub mod config;
pub mod corrector;
pub mod csv_source;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod model;
pub mod normalize;
pub mod report;
pub mod source;
pub mod verifier;

pub use config::{ReconConfig, SourceConfig, SourceKind};
pub use corrector::{Approved, CancelFlag};
pub use csv_source::{CsvSource, CsvStore};
pub use engine::{detect, reconcile, run, Detection};
pub use error::ReconError;
pub use matcher::{diff, DiffOptions, DiffOutput};
pub use model::{
    Ambiguity, Change, CorrectionOutcome, CorrectionStatus, DiscrepancyState, FetchOutput,
    FieldDiscrepancy, Record, RowWarning, Side, VerificationResult,
};
pub use normalize::KeyNormalizer;
pub use report::{ReconciliationReport, ReportSummary};
pub use source::{MemoryStore, RecordLayout, Source, TargetStore};
