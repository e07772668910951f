use std::fmt;

/// Run-level errors. Anything returned as `Err` aborts the run with no report;
/// row-, write- and verification-scoped problems are carried in the report instead.
#[derive(Debug)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (unmapped field, missing file, etc.).
    ConfigValidation(String),
    /// A backing store could not be reached or read as a whole.
    SourceUnavailable { source: String, reason: String },
    /// A remote store answered but refused the request (HTTP status).
    Rejected { source: String, status: u16, reason: String },
    /// Missing required column in a source's header.
    MissingColumn { source: String, column: String },
    /// A write was requested against a store that only supports reads.
    ReadOnlySource(String),
    /// IO error outside of a specific source (output files, etc.).
    Io(String),
}

impl ReconError {
    pub fn unavailable(source: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceUnavailable {
            source: source.into(),
            reason: reason.to_string(),
        }
    }

    /// True for errors caused by the config rather than the data.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::ConfigParse(_) | Self::ConfigValidation(_))
    }
}

impl fmt::Display for ReconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::SourceUnavailable { source, reason } => {
                write!(f, "source '{source}' unavailable: {reason}")
            }
            Self::Rejected { source, status, reason } => {
                write!(f, "source '{source}' rejected the request ({status}): {reason}")
            }
            Self::MissingColumn { source, column } => {
                write!(f, "source '{source}': missing column '{column}'")
            }
            Self::ReadOnlySource(source) => write!(f, "source '{source}' is read-only"),
            Self::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for ReconError {}
