//! Build the reference source and target store a config describes.

use std::path::Path;

use rectify_recon::{
    CsvSource, CsvStore, ReconConfig, ReconError, Source, SourceConfig, SourceKind, TargetStore,
};

use crate::postgrest::{self, PostgrestStore};
use crate::CliError;

/// Name shown in reports: the CSV file or PostgREST table, else the side.
fn display_name<'a>(side: &'a str, config: &'a SourceConfig) -> &'a str {
    match config.kind {
        SourceKind::Csv => config.file.as_deref(),
        SourceKind::Postgrest => config.table.as_deref(),
    }
    .unwrap_or(side)
}

fn open_postgrest(
    side: &str,
    config: &SourceConfig,
    fields: &[String],
    api_key: Option<String>,
) -> Result<PostgrestStore, CliError> {
    let env_var = config
        .api_key_env
        .as_deref()
        .unwrap_or(postgrest::DEFAULT_API_KEY_ENV);
    let key = postgrest::resolve_api_key(api_key, env_var)?;
    PostgrestStore::from_config(display_name(side, config), config, fields, key)
        .map_err(CliError::recon)
}

/// Read-only view of the reference side.
pub fn open_reference(
    config: &ReconConfig,
    base_dir: &Path,
    api_key: Option<String>,
) -> Result<Box<dyn Source>, CliError> {
    let side = &config.reference;
    let name = display_name("reference", side);
    let source: Box<dyn Source> = match side.kind {
        SourceKind::Csv => Box::new(
            CsvSource::from_config(name, side, &config.fields, base_dir).map_err(CliError::recon)?,
        ),
        SourceKind::Postgrest => Box::new(open_postgrest("reference", side, &config.fields, api_key)?),
    };
    Ok(source)
}

/// Writable target store.
pub fn open_target(
    config: &ReconConfig,
    base_dir: &Path,
    api_key: Option<String>,
) -> Result<Box<dyn TargetStore>, CliError> {
    let side = &config.target;
    let name = display_name("target", side);
    let store: Box<dyn TargetStore> = match side.kind {
        SourceKind::Csv => Box::new(
            CsvStore::from_config(name, side, &config.fields, base_dir).map_err(CliError::recon)?,
        ),
        SourceKind::Postgrest => Box::new(open_postgrest("target", side, &config.fields, api_key)?),
    };
    Ok(store)
}

/// Read and validate a config file.
pub fn load_config(path: &Path) -> Result<ReconConfig, CliError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        CliError::args(format!("cannot read config {}: {e}", path.display()))
    })?;
    ReconConfig::from_toml(&text).map_err(|e: ReconError| {
        CliError::recon(e).with_hint(format!("in {}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit_codes;

    const CONFIG: &str = r#"
name = "sizes"
fields = ["size"]

[reference]
kind = "csv"
file = "form.csv"
[reference.columns]
key = "id"
[reference.columns.fields]
size = "Size"

[target]
kind = "postgrest"
url = "http://localhost:1"
table = "students"
api_key_env = "RECTIFY_STORES_TEST_KEY"
[target.columns]
key = "s_number"
[target.columns.fields]
size = "tshirt_size"
"#;

    #[test]
    fn names_follow_file_and_table() {
        let config = ReconConfig::from_toml(CONFIG).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let reference = open_reference(&config, dir.path(), None).unwrap();
        assert_eq!(reference.name(), "form.csv");
        let target = open_target(&config, dir.path(), Some("k".into())).unwrap();
        assert_eq!(target.name(), "students");
    }

    #[test]
    fn postgrest_without_key_is_not_auth() {
        std::env::remove_var("RECTIFY_STORES_TEST_KEY");
        let config = ReconConfig::from_toml(CONFIG).unwrap();
        let err = open_target(&config, Path::new("."), None).err().unwrap();
        assert_eq!(err.code, exit_codes::EXIT_REMOTE_NOT_AUTH);
    }

    #[test]
    fn missing_config_is_usage_error() {
        let err = load_config(Path::new("/nonexistent/x.rectify.toml")).unwrap_err();
        assert_eq!(err.code, exit_codes::EXIT_USAGE);
    }

    #[test]
    fn invalid_config_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.rectify.toml");
        std::fs::write(&path, "name = \"x\"\nfields = []\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert_eq!(err.code, exit_codes::EXIT_INVALID_CONFIG);
    }
}
