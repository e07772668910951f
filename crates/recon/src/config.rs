use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;

use crate::error::ReconError;
use crate::normalize::KeyNormalizer;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ReconConfig {
    pub name: String,
    /// Field names to compare. Each must be mapped by both sources.
    pub fields: Vec<String>,
    pub reference: SourceConfig,
    pub target: SourceConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// CSV path, relative to the config file.
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub delimiter: Option<char>,
    /// Copy a CSV target to `<file>.bak` before its first write.
    #[serde(default)]
    pub backup: bool,
    /// PostgREST base URL (without `/rest/v1`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    pub columns: ColumnMapping,
    #[serde(default)]
    pub key: KeyNormalizer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Csv,
    Postgrest,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Csv => write!(f, "csv"),
            Self::Postgrest => write!(f, "postgrest"),
        }
    }
}

// ---------------------------------------------------------------------------
// Column mapping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnMapping {
    pub key: String,
    /// Columns joined with a space to form the display name.
    #[serde(default)]
    pub name: Vec<String>,
    /// Field name → column name.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl ColumnMapping {
    /// Columns needed to read `fields`, key first, then name columns.
    pub fn columns_for(&self, fields: &[String]) -> Vec<String> {
        let mut cols = vec![self.key.clone()];
        for c in &self.name {
            if !cols.contains(c) {
                cols.push(c.clone());
            }
        }
        for f in fields {
            if let Some(c) = self.fields.get(f) {
                if !cols.contains(c) {
                    cols.push(c.clone());
                }
            }
        }
        cols
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    /// Table name used when rendering the change list as SQL.
    #[serde(default)]
    pub sql_table: Option<String>,
    #[serde(default)]
    pub json: Option<String>,
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ReconConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: ReconConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if self.fields.is_empty() {
            return Err(ReconError::ConfigValidation(
                "at least one field to compare is required".into(),
            ));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.trim().is_empty() {
                return Err(ReconError::ConfigValidation("field names cannot be blank".into()));
            }
            if !seen.insert(field) {
                return Err(ReconError::ConfigValidation(format!(
                    "field '{field}' listed more than once"
                )));
            }
        }

        self.reference.validate("reference", &self.fields)?;
        self.target.validate("target", &self.fields)?;
        Ok(())
    }
}

impl SourceConfig {
    fn validate(&self, side: &str, fields: &[String]) -> Result<(), ReconError> {
        if self.columns.key.trim().is_empty() {
            return Err(ReconError::ConfigValidation(format!(
                "{side}: key column cannot be blank"
            )));
        }

        for field in fields {
            if !self.columns.fields.contains_key(field) {
                return Err(ReconError::ConfigValidation(format!(
                    "{side}: field '{field}' has no column mapping"
                )));
            }
        }

        match self.kind {
            SourceKind::Csv => {
                if self.file.as_deref().map_or(true, |f| f.trim().is_empty()) {
                    return Err(ReconError::ConfigValidation(format!(
                        "{side}: csv source requires 'file'"
                    )));
                }
            }
            SourceKind::Postgrest => {
                if self.url.as_deref().map_or(true, |u| u.trim().is_empty()) {
                    return Err(ReconError::ConfigValidation(format!(
                        "{side}: postgrest source requires 'url'"
                    )));
                }
                if self.table.as_deref().map_or(true, |t| t.trim().is_empty()) {
                    return Err(ReconError::ConfigValidation(format!(
                        "{side}: postgrest source requires 'table'"
                    )));
                }
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
name = "T-shirt sizes"
fields = ["tshirt_size"]

[reference]
kind = "csv"
file = "form.csv"
[reference.columns]
key = "Student ID # (NO S)"
name = ["First Name", "Last Name"]
[reference.columns.fields]
tshirt_size = "T-Shirt Size"
[reference.key]
prefix = "s"

[target]
kind = "postgrest"
url = "https://example.supabase.co"
table = "students"
api_key_env = "SUPABASE_KEY"
[target.columns]
key = "s_number"
name = ["name"]
[target.columns.fields]
tshirt_size = "tshirt_size"
"#;

    #[test]
    fn parse_valid() {
        let config = ReconConfig::from_toml(VALID).unwrap();
        assert_eq!(config.name, "T-shirt sizes");
        assert_eq!(config.fields, vec!["tshirt_size"]);
        assert_eq!(config.reference.kind, SourceKind::Csv);
        assert_eq!(config.reference.key.prefix.as_deref(), Some("s"));
        assert!(config.reference.key.lowercase);
        assert_eq!(config.target.kind, SourceKind::Postgrest);
        assert_eq!(config.target.table.as_deref(), Some("students"));
        assert!(!config.target.backup);
        assert!(config.output.sql_table.is_none());
    }

    #[test]
    fn columns_for_dedups() {
        let config = ReconConfig::from_toml(VALID).unwrap();
        let cols = config.target.columns.columns_for(&config.fields);
        assert_eq!(cols, vec!["s_number", "name", "tshirt_size"]);
    }

    #[test]
    fn reject_unmapped_field() {
        let input = VALID.replace(r#"fields = ["tshirt_size"]"#, r#"fields = ["tshirt_size", "grade"]"#);
        let err = ReconConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("'grade' has no column mapping"), "{err}");
        assert!(err.is_config());
    }

    #[test]
    fn reject_empty_fields() {
        let input = VALID.replace(r#"fields = ["tshirt_size"]"#, "fields = []");
        let err = ReconConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("at least one field"));
    }

    #[test]
    fn reject_duplicate_field() {
        let input = VALID.replace(
            r#"fields = ["tshirt_size"]"#,
            r#"fields = ["tshirt_size", "tshirt_size"]"#,
        );
        let err = ReconConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn reject_postgrest_without_table() {
        let input = VALID.replace("table = \"students\"\n", "");
        let err = ReconConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("requires 'table'"), "{err}");
    }

    #[test]
    fn reject_csv_without_file() {
        let input = VALID.replace("file = \"form.csv\"\n", "");
        let err = ReconConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("reference: csv source requires 'file'"), "{err}");
    }

    #[test]
    fn reject_unknown_kind() {
        let input = VALID.replace("kind = \"csv\"", "kind = \"xlsx\"");
        let err = ReconConfig::from_toml(&input).unwrap_err();
        assert!(matches!(err, ReconError::ConfigParse(_)));
    }

    #[test]
    fn delimiter_parses_as_char() {
        let input = VALID
            .replace("file = \"form.csv\"", "file = \"form.tsv\"\ndelimiter = \"\\t\"");
        let config = ReconConfig::from_toml(&input).unwrap();
        assert_eq!(config.reference.delimiter, Some('\t'));
    }
}
