// rectify - detect and correct field-level drift between a reference and a target store

mod exit_codes;
mod postgrest;
mod recon;
mod stores;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};

use exit_codes::{recon_exit_code, EXIT_ERROR, EXIT_SUCCESS, EXIT_USAGE};
use rectify_recon::ReconError;

#[derive(Parser)]
#[command(name = "rectify")]
#[command(about = "Find records whose fields disagree with a reference, and fix them")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// More log output (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a config without touching any data
    #[command(after_help = "\
Examples:
  rectify validate sizes.rectify.toml")]
    Validate {
        /// Path to the .rectify.toml config file
        config: PathBuf,
    },

    /// Compare target against reference and report discrepancies
    #[command(after_help = "\
Exit codes:
  0  no discrepancies
  3  discrepancies found
  4  ambiguous reference values (keys skipped)

Examples:
  rectify check sizes.rectify.toml
  rectify check sizes.rectify.toml --key 202943 --key 905482
  rectify check sizes.rectify.toml --changes changes.csv
  rectify check sizes.rectify.toml --sql > fix.sql")]
    Check {
        /// Path to the .rectify.toml config file
        config: PathBuf,

        /// Only consider these keys (repeatable)
        #[arg(long = "key", value_name = "KEY")]
        keys: Vec<String>,

        #[command(flatten)]
        out: recon::OutputArgs,

        /// API key for PostgREST stores (default: the config's api_key_env)
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Write reference values into the target, then read them back
    #[command(after_help = "\
Asks for confirmation before writing unless --yes is given. Without a
terminal on stdin, --yes is required.

Exit codes:
  0  everything approved was written and verified
  4  ambiguous reference values (keys skipped)
  7  some corrections failed, found no row, or did not read back
  8  declined at the prompt

Examples:
  rectify fix sizes.rectify.toml
  rectify fix sizes.rectify.toml --dry-run --changes changes.csv
  rectify fix sizes.rectify.toml --yes --output report.json")]
    Fix {
        /// Path to the .rectify.toml config file
        config: PathBuf,

        /// Only consider these keys (repeatable)
        #[arg(long = "key", value_name = "KEY")]
        keys: Vec<String>,

        /// Apply without asking
        #[arg(long, short = 'y')]
        yes: bool,

        /// Show what would change; write nothing
        #[arg(long, conflicts_with = "yes")]
        dry_run: bool,

        #[command(flatten)]
        out: recon::OutputArgs,

        /// API key for PostgREST stores (default: the config's api_key_env)
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Check that the target holds the values of a saved change list
    #[command(after_help = "\
Examples:
  rectify verify sizes.rectify.toml --changes changes.csv
  rectify verify sizes.rectify.toml --changes changes.json --json")]
    Verify {
        /// Path to the .rectify.toml config file
        config: PathBuf,

        /// Change list written by `check`/`fix --changes` (CSV or JSON)
        #[arg(long)]
        changes: PathBuf,

        /// Print results as JSON to stdout
        #[arg(long)]
        json: bool,

        /// API key for PostgREST stores (default: the config's api_key_env)
        #[arg(long)]
        api_key: Option<String>,
    },
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\nengine:  rectify-recon ", env!("CARGO_PKG_VERSION"),
    )
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    // `log` records from the engine are forwarded by tracing-log.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Validate { config } => recon::cmd_validate(config),
        Commands::Check { config, keys, out, api_key } => {
            recon::cmd_check(config, keys, out, api_key)
        }
        Commands::Fix { config, keys, yes, dry_run, out, api_key } => recon::cmd_fix(
            config,
            keys,
            recon::FixOptions { yes, dry_run },
            out,
            api_key,
        ),
        Commands::Verify { config, changes, json, api_key } => {
            recon::cmd_verify(config, changes, json, api_key)
        }
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn args(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_ERROR, message: msg.into(), hint: None }
    }

    /// Create error from an engine error with the matching exit code.
    pub fn recon(err: ReconError) -> Self {
        let code = recon_exit_code(&err);
        let hint = match &err {
            ReconError::Rejected { status: 401 | 403, .. } => {
                Some("check the API key (--api-key or the config's api_key_env)".to_string())
            }
            ReconError::MissingColumn { .. } => {
                Some("column names are matched exactly, including case and spaces".to_string())
            }
            ReconError::SourceUnavailable { .. } => {
                Some("file paths in the config are relative to the config file".to_string())
            }
            _ => None,
        };
        Self { code, message: err.to_string(), hint }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}
