use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// One entity's comparable fields, already normalized by its source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub key: String,
    pub display_name: String,
    /// Field name → normalized value. Blank values are never stored.
    pub fields: BTreeMap<String, String>,
}

impl Record {
    pub fn new(key: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            display_name: display_name.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// A row a source skipped instead of failing the whole fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowWarning {
    pub source: String,
    /// 1-based line (CSV) or row index (remote tables).
    pub line: u64,
    pub reason: String,
}

/// Everything one `fetch` / `select` call produced.
#[derive(Debug, Clone, Default)]
pub struct FetchOutput {
    pub records: Vec<Record>,
    pub warnings: Vec<RowWarning>,
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDiscrepancy {
    pub key: String,
    pub display_name: String,
    pub field: String,
    pub reference_value: String,
    pub current_value: String,
}

impl FieldDiscrepancy {
    /// The corrective change this discrepancy calls for.
    pub fn change(&self) -> Change {
        Change {
            key: self.key.clone(),
            field: self.field.clone(),
            value: self.reference_value.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Reference,
    Target,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reference => write!(f, "reference"),
            Self::Target => write!(f, "target"),
        }
    }
}

/// One side carries the same key more than once with conflicting values.
/// The key/field pair is left out of the comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ambiguity {
    pub side: Side,
    pub key: String,
    pub field: String,
    /// Distinct values seen, sorted.
    pub values: Vec<String>,
}

// ---------------------------------------------------------------------------
// Correction + verification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionStatus {
    Applied,
    NotFound,
    Failed,
}

impl std::fmt::Display for CorrectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Applied => write!(f, "applied"),
            Self::NotFound => write!(f, "not_found"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorrectionOutcome {
    pub key: String,
    pub field: String,
    pub attempted_value: String,
    pub status: CorrectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub key: String,
    pub field: String,
    pub expected_value: String,
    /// `None` when the key or field could not be read back.
    pub observed_value: Option<String>,
    pub matched: bool,
}

/// Store-independent corrective statement: set `field` of `key` to `value`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Change {
    pub key: String,
    pub field: String,
    pub value: String,
}

impl Change {
    /// Treat a change as a discrepancy whose current value is unknown.
    /// Used when verifying a saved change list.
    pub fn into_discrepancy(self) -> FieldDiscrepancy {
        FieldDiscrepancy {
            display_name: String::new(),
            current_value: String::new(),
            key: self.key,
            field: self.field,
            reference_value: self.value,
        }
    }
}

/// Where a single discrepancy ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyState {
    Detected,
    Applied,
    NotFound,
    Failed,
    VerifiedMatched,
    VerifiedMismatched,
}

impl DiscrepancyState {
    /// Terminal states that need no further action.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::VerifiedMatched)
    }

    /// Whether re-running the reconciliation could fix it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed | Self::VerifiedMismatched | Self::Applied | Self::Detected)
    }
}

impl std::fmt::Display for DiscrepancyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Detected => write!(f, "detected"),
            Self::Applied => write!(f, "applied"),
            Self::NotFound => write!(f, "not_found"),
            Self::Failed => write!(f, "failed"),
            Self::VerifiedMatched => write!(f, "verified"),
            Self::VerifiedMismatched => write!(f, "mismatched"),
        }
    }
}
