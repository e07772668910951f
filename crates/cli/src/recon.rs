//! `rectify validate|check|fix|verify`: config-driven detection and correction.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use clap::Args;

use rectify_recon::changes::{self, SqlTarget};
use rectify_recon::verifier;
use rectify_recon::{
    detect, reconcile, Approved, CancelFlag, Change, DiffOptions, ReconConfig, ReconciliationReport,
    SourceKind, VerificationResult,
};

use crate::exit_codes::{
    EXIT_AMBIGUOUS, EXIT_DECLINED, EXIT_DISCREPANCIES, EXIT_ERROR, EXIT_INCOMPLETE, EXIT_USAGE,
};
use crate::stores::{load_config, open_reference, open_target};
use crate::CliError;

/// Output flags shared by `check` and `fix`.
#[derive(Args, Debug, Default)]
pub struct OutputArgs {
    /// Print the JSON report to stdout
    #[arg(long)]
    pub json: bool,

    /// Write the JSON report to a file
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Write the change list (key,field,value) to a file; `.json` writes JSON
    #[arg(long)]
    pub changes: Option<PathBuf>,

    /// Print the change list as SQL UPDATE statements to stdout
    #[arg(long, conflicts_with = "json")]
    pub sql: bool,
}

fn recon_err(code: u8, msg: impl Into<String>) -> CliError {
    CliError { code, message: msg.into(), hint: None }
}

fn base_dir(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// `--key` values mapped into the shared key space the way reference keys are.
fn diff_options(config: &ReconConfig, keys: &[String]) -> Result<DiffOptions, CliError> {
    let opts = DiffOptions::new(config.fields.clone());
    if keys.is_empty() {
        return Ok(opts);
    }
    let mut normalized = Vec::with_capacity(keys.len());
    for k in keys {
        let key = config
            .reference
            .key
            .normalize(k)
            .ok_or_else(|| CliError::args("--key cannot be blank"))?;
        normalized.push(key);
    }
    Ok(opts.with_keys(normalized))
}

// ── validate ────────────────────────────────────────────────────────

pub fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    eprintln!(
        "config '{}' is valid: {} field(s), {} -> {}",
        config.name,
        config.fields.len(),
        config.reference.kind,
        config.target.kind,
    );
    Ok(())
}

// ── check ───────────────────────────────────────────────────────────

pub fn cmd_check(
    config_path: PathBuf,
    keys: Vec<String>,
    out: OutputArgs,
    api_key: Option<String>,
) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let dir = base_dir(&config_path);
    let opts = diff_options(&config, &keys)?;

    let reference = open_reference(&config, dir, api_key.clone())?;
    let target = open_target(&config, dir, api_key)?;

    let report = detect(&config.name, &*reference, &*target, &opts)
        .map_err(CliError::recon)?
        .into_report();
    emit(&report, &config, dir, &out)?;
    detection_exit(&report)
}

fn detection_exit(report: &ReconciliationReport) -> Result<(), CliError> {
    let s = &report.summary;
    if s.discrepant > 0 {
        return Err(recon_err(EXIT_DISCREPANCIES, format!("{} discrepancy(ies) found", s.discrepant)));
    }
    if s.ambiguous > 0 {
        return Err(recon_err(EXIT_AMBIGUOUS, format!("{} ambiguous key(s) not compared", s.ambiguous))
            .with_hint("resolve the conflicting reference rows and re-run"));
    }
    Ok(())
}

// ── fix ─────────────────────────────────────────────────────────────

pub struct FixOptions {
    pub yes: bool,
    pub dry_run: bool,
}

pub fn cmd_fix(
    config_path: PathBuf,
    keys: Vec<String>,
    fix: FixOptions,
    out: OutputArgs,
    api_key: Option<String>,
) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let dir = base_dir(&config_path);
    let opts = diff_options(&config, &keys)?;

    let reference = open_reference(&config, dir, api_key.clone())?;
    let mut target = open_target(&config, dir, api_key)?;

    let detection = detect(&config.name, &*reference, &*target, &opts).map_err(CliError::recon)?;
    let pending = detection.discrepancies().len();

    if pending == 0 || fix.dry_run {
        if fix.dry_run && pending > 0 {
            eprintln!("dry run: {pending} correction(s) not applied");
        }
        let report = detection.into_report();
        emit(&report, &config, dir, &out)?;
        return detection_exit(&report);
    }

    let approve_all = if fix.yes {
        true
    } else {
        if !atty::is(atty::Stream::Stdin) {
            return Err(recon_err(
                EXIT_USAGE,
                "refusing to apply corrections without confirmation: stdin is not interactive",
            )
            .with_hint("re-run with --yes to apply, or --dry-run to preview"));
        }
        eprint!("{}", detection.clone().into_report().render_text());
        confirm(pending)?
    };

    let report = reconcile(
        detection,
        target.as_mut(),
        |found| {
            if approve_all {
                Approved::all(found)
            } else {
                Approved::none()
            }
        },
        &CancelFlag::new(),
    )
    .map_err(CliError::recon)?;

    emit(&report, &config, dir, &out)?;

    if !approve_all {
        return Err(recon_err(EXIT_DECLINED, "cancelled; no corrections applied"));
    }

    let s = &report.summary;
    if s.failed > 0 || s.not_found > 0 || s.mismatched > 0 || s.unverified > 0 {
        return Err(recon_err(
            EXIT_INCOMPLETE,
            format!(
                "{} of {} correction(s) unresolved ({} failed, {} not found, {} mismatched)",
                s.unverified, s.discrepant, s.failed, s.not_found, s.mismatched,
            ),
        )
        .with_hint("re-run `rectify fix` to retry; already-correct values are left as is"));
    }
    if s.ambiguous > 0 {
        return Err(recon_err(EXIT_AMBIGUOUS, format!("{} ambiguous key(s) not compared", s.ambiguous)));
    }
    Ok(())
}

/// Ask on stderr, read one line from stdin.
fn confirm(pending: usize) -> Result<bool, CliError> {
    eprint!("Apply {pending} correction(s)? [y/N] ");
    std::io::stderr().flush().ok();

    let mut answer = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut answer)
        .map_err(|e| CliError::io(format!("cannot read answer: {e}")))?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

// ── verify ──────────────────────────────────────────────────────────

pub fn cmd_verify(
    config_path: PathBuf,
    changes_path: PathBuf,
    json: bool,
    api_key: Option<String>,
) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let dir = base_dir(&config_path);

    let text = std::fs::read_to_string(&changes_path).map_err(|e| {
        CliError::args(format!("cannot read change list {}: {e}", changes_path.display()))
    })?;
    let list = changes::read_changes(&text)
        .map_err(|e| CliError::args(format!("{}: {e}", changes_path.display())))?;

    let target = open_target(&config, dir, api_key)?;
    let expected: Vec<_> = list.into_iter().map(Change::into_discrepancy).collect();
    let results = verifier::verify(&*target, &expected).map_err(CliError::recon)?;

    if json {
        let json_str = serde_json::to_string_pretty(&results)
            .map_err(|e| recon_err(EXIT_ERROR, format!("JSON serialization error: {e}")))?;
        println!("{json_str}");
    }
    eprint!("{}", render_verification(target.name(), &results));

    let mismatched = results.iter().filter(|r| !r.matched).count();
    if mismatched > 0 {
        return Err(recon_err(
            EXIT_INCOMPLETE,
            format!("{mismatched} of {} value(s) not in place", results.len()),
        ));
    }
    Ok(())
}

fn render_verification(target: &str, results: &[VerificationResult]) -> String {
    let mut out = format!("verify against {target}: {} value(s)\n", results.len());
    for r in results {
        let status = if r.matched { "ok" } else { "MISMATCH" };
        out.push_str(&format!(
            "  {} {}: expected {}, found {} [{status}]\n",
            r.key,
            r.field,
            r.expected_value,
            r.observed_value.as_deref().unwrap_or("<missing>"),
        ));
    }
    out
}

// ── Output ──────────────────────────────────────────────────────────

/// Write every requested artifact, then the human summary to stderr.
fn emit(
    report: &ReconciliationReport,
    config: &ReconConfig,
    dir: &Path,
    out: &OutputArgs,
) -> Result<(), CliError> {
    let json_str = serde_json::to_string_pretty(report)
        .map_err(|e| recon_err(EXIT_ERROR, format!("JSON serialization error: {e}")))?;

    let output_file = out
        .output
        .clone()
        .or_else(|| config.output.json.as_ref().map(|p| dir.join(p)));
    if let Some(ref path) = output_file {
        std::fs::write(path, &json_str)
            .map_err(|e| CliError::io(format!("cannot write output: {e}")))?;
        eprintln!("wrote {}", path.display());
    }

    if out.json {
        println!("{json_str}");
    }

    if let Some(ref path) = out.changes {
        write_changes(&report.changes(), path)?;
        eprintln!("wrote {}", path.display());
    }

    if out.sql {
        let table = config
            .output
            .sql_table
            .as_deref()
            .or(match config.target.kind {
                SourceKind::Postgrest => config.target.table.as_deref(),
                SourceKind::Csv => None,
            })
            .ok_or_else(|| {
                CliError::args("--sql needs a table name")
                    .with_hint("set output.sql_table in the config")
            })?;
        let sql = changes::render_sql(
            &report.changes(),
            &SqlTarget {
                table,
                key_column: &config.target.columns.key,
                columns: &config.target.columns.fields,
            },
        );
        print!("{sql}");
    }

    eprint!("{}", report.render_text());
    Ok(())
}

fn write_changes(list: &[Change], path: &Path) -> Result<(), CliError> {
    let is_json = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));

    let file = std::fs::File::create(path)
        .map_err(|e| CliError::io(format!("cannot write {}: {e}", path.display())))?;
    if is_json {
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), list)
            .map_err(|e| CliError::io(format!("cannot write {}: {e}", path.display())))
    } else {
        changes::write_changes_csv(list, std::io::BufWriter::new(file))
            .map_err(|e| CliError::io(format!("{}: {e}", path.display())))
    }
}
