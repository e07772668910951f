//! CLI Exit Code Registry
//!
//! This is the single source of truth for all `rectify` exit codes.
//! Exit codes are part of the shell contract; scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain     | Description                                   |
//! |---------|------------|-----------------------------------------------|
//! | 0       | Universal  | Success                                       |
//! | 1       | Universal  | General error (unspecified)                   |
//! | 2       | Universal  | CLI usage error (bad args, missing file)      |
//! | 3-9     | reconcile  | Detection, correction and verification codes  |
//! | 50-59   | remote     | Remote target store (PostgREST) failures      |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

use rectify_recon::ReconError;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success: no discrepancies, or everything approved was verified.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, unreadable input file.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Reconcile (3-9)
// =============================================================================

/// `check` found at least one discrepancy.
pub const EXIT_DISCREPANCIES: u8 = 3;

/// The reference (or target) holds conflicting values for a key.
/// Those keys were left out of the comparison.
pub const EXIT_AMBIGUOUS: u8 = 4;

/// Config failed to parse or validate.
pub const EXIT_INVALID_CONFIG: u8 = 5;

/// A source or target could not be read at all.
pub const EXIT_SOURCE_UNAVAILABLE: u8 = 6;

/// `fix`/`verify` left something unresolved: a failed write, a key not
/// found, or a value that did not read back.
pub const EXIT_INCOMPLETE: u8 = 7;

/// The operator declined the approval prompt.
pub const EXIT_DECLINED: u8 = 8;

// =============================================================================
// Remote (50-59): PostgREST target store
// =============================================================================

/// No API key provided (neither flag nor env var).
pub const EXIT_REMOTE_NOT_AUTH: u8 = 50;

/// Auth rejected by the remote store (401/403).
pub const EXIT_REMOTE_AUTH: u8 = 51;

/// Request rejected by the remote store (other 4xx).
pub const EXIT_REMOTE_VALIDATION: u8 = 52;

/// Remote store error (5xx or rate limited) after retries.
pub const EXIT_REMOTE_UPSTREAM: u8 = 53;

/// Map an engine error to its exit code.
pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::ConfigParse(_) | ReconError::ConfigValidation(_) => EXIT_INVALID_CONFIG,
        ReconError::SourceUnavailable { .. } | ReconError::MissingColumn { .. } => {
            EXIT_SOURCE_UNAVAILABLE
        }
        ReconError::Rejected { status, .. } => match *status {
            401 | 403 => EXIT_REMOTE_AUTH,
            429 | 500..=599 => EXIT_REMOTE_UPSTREAM,
            _ => EXIT_REMOTE_VALIDATION,
        },
        ReconError::ReadOnlySource(_) => EXIT_USAGE,
        ReconError::Io(_) => EXIT_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(status: u16) -> ReconError {
        ReconError::Rejected {
            source: "target".into(),
            status,
            reason: String::new(),
        }
    }

    #[test]
    fn remote_status_mapping() {
        assert_eq!(recon_exit_code(&rejected(401)), EXIT_REMOTE_AUTH);
        assert_eq!(recon_exit_code(&rejected(403)), EXIT_REMOTE_AUTH);
        assert_eq!(recon_exit_code(&rejected(404)), EXIT_REMOTE_VALIDATION);
        assert_eq!(recon_exit_code(&rejected(429)), EXIT_REMOTE_UPSTREAM);
        assert_eq!(recon_exit_code(&rejected(503)), EXIT_REMOTE_UPSTREAM);
    }

    #[test]
    fn config_and_source_errors() {
        assert_eq!(
            recon_exit_code(&ReconError::ConfigValidation("x".into())),
            EXIT_INVALID_CONFIG
        );
        assert_eq!(
            recon_exit_code(&ReconError::unavailable("reference", "gone")),
            EXIT_SOURCE_UNAVAILABLE
        );
    }
}
