//! Source adapter contract and the pieces every adapter shares.
//!
//! An adapter turns one backing store into normalized [`Record`]s. Rows that
//! cannot be turned into a record are skipped and reported as
//! [`RowWarning`]s; only a store that cannot be read at all fails the fetch.

use std::collections::{BTreeMap, HashSet};

use crate::config::{ColumnMapping, SourceConfig};
use crate::error::ReconError;
use crate::model::{FetchOutput, Record, RowWarning};
use crate::normalize::{display_name, normalize_value, KeyNormalizer};

/// Read side of an adapter.
pub trait Source {
    /// Human-readable name used in warnings and errors.
    fn name(&self) -> &str;

    /// Every record the store holds.
    fn fetch(&self) -> Result<FetchOutput, ReconError>;
}

/// A store the engine is allowed to correct.
pub trait TargetStore: Source {
    /// Records for `keys` only, restricted to `fields`.
    fn select(&self, keys: &[String], fields: &[String]) -> Result<FetchOutput, ReconError>;

    /// Set `field` to `value` on every row keyed `key`.
    ///
    /// Returns the number of rows the write touched. `Err` carries the store's
    /// own error text verbatim.
    fn apply_field(&mut self, key: &str, field: &str, value: &str) -> Result<usize, String>;
}

// ---------------------------------------------------------------------------
// Layout: raw row → Record
// ---------------------------------------------------------------------------

/// Column mapping + key normalization + the fields to read, shared by every
/// row-oriented adapter.
#[derive(Debug, Clone)]
pub struct RecordLayout {
    pub columns: ColumnMapping,
    pub key: KeyNormalizer,
    pub fields: Vec<String>,
}

impl RecordLayout {
    pub fn new(columns: ColumnMapping, key: KeyNormalizer, fields: Vec<String>) -> Self {
        Self { columns, key, fields }
    }

    pub fn from_config(source: &SourceConfig, fields: &[String]) -> Self {
        Self::new(source.columns.clone(), source.key.clone(), fields.to_vec())
    }

    /// Column backing `field`.
    pub fn column_for(&self, field: &str) -> Option<&str> {
        self.columns.fields.get(field).map(String::as_str)
    }

    /// Every column this layout reads.
    pub fn required_columns(&self) -> Vec<String> {
        self.columns.columns_for(&self.fields)
    }

    /// Build a record from one raw row. `get` returns a column's raw value,
    /// or `None` when the row has no such cell. Blank field values are left
    /// out of the record; a blank key or a missing cell rejects the row.
    pub fn build_record<'a>(
        &self,
        get: impl Fn(&str) -> Option<&'a str>,
    ) -> Result<Record, String> {
        let raw_key = get(&self.columns.key)
            .ok_or_else(|| format!("missing value for key column '{}'", self.columns.key))?;
        let key = self
            .key
            .normalize(raw_key)
            .ok_or_else(|| format!("blank key in column '{}'", self.columns.key))?;

        let mut name_parts = Vec::with_capacity(self.columns.name.len());
        for col in &self.columns.name {
            name_parts.push(get(col).unwrap_or(""));
        }

        let mut fields = BTreeMap::new();
        for field in &self.fields {
            let Some(col) = self.column_for(field) else {
                continue;
            };
            let raw = get(col)
                .ok_or_else(|| format!("missing value for column '{col}' (field '{field}')"))?;
            let value = normalize_value(raw);
            if !value.is_empty() {
                fields.insert(field.clone(), value);
            }
        }

        Ok(Record {
            key,
            display_name: display_name(name_parts),
            fields,
        })
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// A writable table held in memory. Duplicate keys are allowed so that
/// ambiguity handling can be exercised; writes touch every row with the key.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    name: String,
    rows: Vec<Record>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>, rows: Vec<Record>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    /// Current value of `field` on the first row keyed `key`.
    pub fn value(&self, key: &str, field: &str) -> Option<&str> {
        self.rows
            .iter()
            .find(|r| r.key == key)
            .and_then(|r| r.field(field))
    }
}

impl Source for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self) -> Result<FetchOutput, ReconError> {
        Ok(FetchOutput {
            records: self.rows.clone(),
            warnings: Vec::new(),
        })
    }
}

impl TargetStore for MemoryStore {
    fn select(&self, keys: &[String], fields: &[String]) -> Result<FetchOutput, ReconError> {
        let wanted: HashSet<&str> = keys.iter().map(String::as_str).collect();
        let records = self
            .rows
            .iter()
            .filter(|r| wanted.contains(r.key.as_str()))
            .map(|r| Record {
                key: r.key.clone(),
                display_name: r.display_name.clone(),
                fields: r
                    .fields
                    .iter()
                    .filter(|(f, _)| fields.contains(f))
                    .map(|(f, v)| (f.clone(), v.clone()))
                    .collect(),
            })
            .collect();
        Ok(FetchOutput {
            records,
            warnings: Vec::new(),
        })
    }

    fn apply_field(&mut self, key: &str, field: &str, value: &str) -> Result<usize, String> {
        let mut touched = 0;
        for row in self.rows.iter_mut().filter(|r| r.key == key) {
            row.fields.insert(field.to_string(), value.to_string());
            touched += 1;
        }
        Ok(touched)
    }
}

/// Turn a warning-producing row error into a [`RowWarning`] and log it.
pub(crate) fn skip_row(source: &str, line: u64, reason: String) -> RowWarning {
    log::warn!("{source}: skipping line {line}: {reason}");
    RowWarning {
        source: source.to_string(),
        line,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn layout() -> RecordLayout {
        let mut fields = BTreeMap::new();
        fields.insert("size".to_string(), "T-Shirt Size".to_string());
        RecordLayout::new(
            ColumnMapping {
                key: "id".into(),
                name: vec!["first".into(), "last".into()],
                fields,
            },
            KeyNormalizer {
                prefix: Some("s".into()),
                lowercase: true,
            },
            vec!["size".into()],
        )
    }

    fn row<'a>(pairs: &'a [(&'a str, &'a str)]) -> HashMap<&'a str, &'a str> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn build_record_normalizes() {
        let r = row(&[("id", " 202943 "), ("first", "Elly"), ("last", "Chang"), ("T-Shirt Size", " m ")]);
        let rec = layout().build_record(|c| r.get(c).copied()).unwrap();
        assert_eq!(rec.key, "s202943");
        assert_eq!(rec.display_name, "Elly Chang");
        assert_eq!(rec.field("size"), Some("M"));
    }

    #[test]
    fn blank_field_left_out() {
        let r = row(&[("id", "1"), ("T-Shirt Size", "  ")]);
        let rec = layout().build_record(|c| r.get(c).copied()).unwrap();
        assert!(rec.fields.is_empty());
        assert_eq!(rec.display_name, "");
    }

    #[test]
    fn blank_key_rejected() {
        let r = row(&[("id", ""), ("T-Shirt Size", "M")]);
        let err = layout().build_record(|c| r.get(c).copied()).unwrap_err();
        assert!(err.contains("blank key"));
    }

    #[test]
    fn missing_cell_rejected() {
        let r = row(&[("id", "7")]);
        let err = layout().build_record(|c| r.get(c).copied()).unwrap_err();
        assert!(err.contains("T-Shirt Size"), "{err}");
    }

    #[test]
    fn memory_store_apply_counts_rows() {
        let mut store = MemoryStore::new(
            "mem",
            vec![
                Record::new("a", "A").with_field("size", "L"),
                Record::new("a", "A").with_field("size", "L"),
                Record::new("b", "B").with_field("size", "S"),
            ],
        );
        assert_eq!(store.apply_field("a", "size", "M"), Ok(2));
        assert_eq!(store.apply_field("zzz", "size", "M"), Ok(0));
        assert_eq!(store.value("a", "size"), Some("M"));
        assert_eq!(store.value("b", "size"), Some("S"));
    }

    #[test]
    fn memory_store_select_filters_keys_and_fields() {
        let store = MemoryStore::new(
            "mem",
            vec![
                Record::new("a", "A").with_field("size", "L").with_field("grade", "10"),
                Record::new("b", "B").with_field("size", "S"),
            ],
        );
        let out = store.select(&["a".into()], &["size".into()]).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].fields.len(), 1);
        assert_eq!(out.records[0].field("size"), Some("L"));
    }
}
