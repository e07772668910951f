//! Flat-file adapters: a read-only CSV source and a writable CSV store.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::SourceConfig;
use crate::error::ReconError;
use crate::model::FetchOutput;
use crate::source::{skip_row, RecordLayout, Source, TargetStore};

// ---------------------------------------------------------------------------
// Read-only source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CsvSource {
    name: String,
    path: PathBuf,
    delimiter: u8,
    layout: RecordLayout,
}

impl CsvSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, layout: RecordLayout) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            delimiter: b',',
            layout,
        }
    }

    /// Build from config; `file` is resolved against `base_dir`.
    pub fn from_config(
        name: &str,
        config: &SourceConfig,
        fields: &[String],
        base_dir: &Path,
    ) -> Result<Self, ReconError> {
        let file = config.file.as_deref().ok_or_else(|| {
            ReconError::ConfigValidation(format!("{name}: csv source requires 'file'"))
        })?;
        let mut source = Self::new(name, base_dir.join(file), RecordLayout::from_config(config, fields));
        if let Some(d) = config.delimiter {
            source = source.with_delimiter(d)?;
        }
        Ok(source)
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Result<Self, ReconError> {
        if !delimiter.is_ascii() {
            return Err(ReconError::ConfigValidation(format!(
                "{}: delimiter must be a single ASCII character",
                self.name
            )));
        }
        self.delimiter = delimiter as u8;
        Ok(self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_table(&self) -> Result<CsvTable, ReconError> {
        let data = std::fs::read(&self.path).map_err(|e| {
            ReconError::unavailable(&self.name, format!("cannot read {}: {e}", self.path.display()))
        })?;
        CsvTable::parse(&self.name, &data, self.delimiter)
    }

    fn read(&self, keep: impl Fn(&str) -> bool, fields: &[String]) -> Result<FetchOutput, ReconError> {
        let table = self.read_table()?;

        let layout = RecordLayout {
            fields: fields.to_vec(),
            ..self.layout.clone()
        };
        for col in layout.required_columns() {
            table.column(&self.name, &col)?;
        }

        let mut out = FetchOutput::default();
        for (line, reason) in &table.bad_rows {
            out.warnings.push(skip_row(&self.name, *line, reason.clone()));
        }
        for (line, row) in &table.rows {
            let get = |col: &str| table.headers.get(col).and_then(|&i| row.get(i)).map(String::as_str);
            match layout.build_record(get) {
                Ok(record) if keep(&record.key) => out.records.push(record),
                Ok(_) => {}
                Err(reason) => out.warnings.push(skip_row(&self.name, *line, reason)),
            }
        }

        log::debug!(
            "{}: read {} record(s), {} skipped",
            self.name,
            out.records.len(),
            out.warnings.len()
        );
        Ok(out)
    }
}

impl Source for CsvSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self) -> Result<FetchOutput, ReconError> {
        self.read(|_| true, &self.layout.fields)
    }
}

// ---------------------------------------------------------------------------
// Writable store
// ---------------------------------------------------------------------------

/// CSV file the engine may correct. Every successful write rewrites the file
/// through a temp file + rename, keeping the header, column order and all
/// unrelated cells.
#[derive(Debug, Clone)]
pub struct CsvStore {
    source: CsvSource,
    backup: bool,
    backed_up: bool,
}

impl CsvStore {
    pub fn new(source: CsvSource) -> Self {
        Self {
            source,
            backup: false,
            backed_up: false,
        }
    }

    pub fn from_config(
        name: &str,
        config: &SourceConfig,
        fields: &[String],
        base_dir: &Path,
    ) -> Result<Self, ReconError> {
        let source = CsvSource::from_config(name, config, fields, base_dir)?;
        Ok(Self::new(source).with_backup(config.backup))
    }

    /// Copy the file to `<file>.bak` before the first write.
    pub fn with_backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut p = self.source.path.clone().into_os_string();
        p.push(".bak");
        PathBuf::from(p)
    }

    fn ensure_backup(&mut self) -> Result<(), String> {
        if !self.backup || self.backed_up {
            return Ok(());
        }
        let dest = self.backup_path();
        std::fs::copy(&self.source.path, &dest)
            .map_err(|e| format!("cannot back up to {}: {e}", dest.display()))?;
        log::info!("{}: backup written to {}", self.source.name, dest.display());
        self.backed_up = true;
        Ok(())
    }

    fn write_table(&self, table: &CsvTable) -> Result<(), String> {
        let mut tmp = self.source.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        {
            let mut file = std::fs::File::create(&tmp)
                .map_err(|e| format!("cannot write {}: {e}", tmp.display()))?;
            if table.bom {
                file.write_all(UTF8_BOM).map_err(|e| e.to_string())?;
            }
            let mut writer = csv::WriterBuilder::new()
                .delimiter(self.source.delimiter)
                .flexible(true)
                .from_writer(file);
            writer.write_record(&table.header_row).map_err(|e| e.to_string())?;
            for (_, row) in &table.rows {
                writer.write_record(row).map_err(|e| e.to_string())?;
            }
            writer.flush().map_err(|e| e.to_string())?;
        }

        std::fs::rename(&tmp, &self.source.path)
            .map_err(|e| format!("cannot replace {}: {e}", self.source.path.display()))
    }
}

impl Source for CsvStore {
    fn name(&self) -> &str {
        self.source.name()
    }

    fn fetch(&self) -> Result<FetchOutput, ReconError> {
        self.source.fetch()
    }
}

impl TargetStore for CsvStore {
    fn select(&self, keys: &[String], fields: &[String]) -> Result<FetchOutput, ReconError> {
        let wanted: HashSet<&str> = keys.iter().map(String::as_str).collect();
        self.source.read(|k| wanted.contains(k), fields)
    }

    fn apply_field(&mut self, key: &str, field: &str, value: &str) -> Result<usize, String> {
        let layout = &self.source.layout;
        let column = layout
            .column_for(field)
            .ok_or_else(|| format!("field '{field}' has no column mapping"))?;

        let mut table = self.source.read_table().map_err(|e| e.to_string())?;
        if let Some((line, reason)) = table.bad_rows.first() {
            return Err(format!("refusing to rewrite file with unreadable line {line}: {reason}"));
        }
        let key_idx = table.column(&self.source.name, &layout.columns.key).map_err(|e| e.to_string())?;
        let col_idx = table.column(&self.source.name, column).map_err(|e| e.to_string())?;

        let mut touched = 0;
        for (_, row) in table.rows.iter_mut() {
            let row_key = row.get(key_idx).and_then(|k| layout.key.normalize(k));
            if row_key.as_deref() != Some(key) {
                continue;
            }
            if row.len() <= col_idx {
                row.resize(col_idx + 1, String::new());
            }
            row[col_idx] = value.to_string();
            touched += 1;
        }

        if touched > 0 {
            self.ensure_backup()?;
            self.write_table(&table)?;
        }
        Ok(touched)
    }
}

// ---------------------------------------------------------------------------
// Raw table
// ---------------------------------------------------------------------------

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// A CSV file held as raw strings, with 1-based line numbers per row.
#[derive(Debug)]
struct CsvTable {
    bom: bool,
    /// Header cells as written in the file; `headers` holds the trimmed lookup.
    header_row: Vec<String>,
    headers: HashMap<String, usize>,
    rows: Vec<(u64, Vec<String>)>,
    /// Records the reader could not decode (bad UTF-8, etc.).
    bad_rows: Vec<(u64, String)>,
}

impl CsvTable {
    fn parse(source: &str, data: &[u8], delimiter: u8) -> Result<Self, ReconError> {
        let bom = data.starts_with(UTF8_BOM);
        let body = if bom { &data[UTF8_BOM.len()..] } else { data };
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .delimiter(delimiter)
            .from_reader(body);

        let header_row: Vec<String> = reader
            .headers()
            .map_err(|e| ReconError::unavailable(source, format!("cannot read header: {e}")))?
            .iter()
            .map(str::to_string)
            .collect();

        let mut headers = HashMap::new();
        for (i, h) in header_row.iter().enumerate() {
            headers.entry(h.trim().to_string()).or_insert(i);
        }

        let mut rows = Vec::new();
        let mut bad_rows = Vec::new();
        for (i, record) in reader.records().enumerate() {
            match record {
                Ok(r) => {
                    let line = r.position().map(|p| p.line()).unwrap_or(i as u64 + 2);
                    rows.push((line, r.iter().map(str::to_string).collect()));
                }
                Err(e) => {
                    let line = e.position().map(|p| p.line()).unwrap_or(i as u64 + 2);
                    bad_rows.push((line, format!("unreadable record: {e}")));
                }
            }
        }

        Ok(Self {
            bom,
            header_row,
            headers,
            rows,
            bad_rows,
        })
    }

    fn column(&self, source: &str, name: &str) -> Result<usize, ReconError> {
        self.headers
            .get(name)
            .copied()
            .ok_or_else(|| ReconError::MissingColumn {
                source: source.into(),
                column: name.into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColumnMapping;
    use crate::normalize::KeyNormalizer;
    use std::collections::BTreeMap;

    const STUDENTS: &str = "\
s_number,name,tshirt_size,grade
s202943,Elly Chang,L,11
s905482,Kevin Chirayil,M,12
,No Key,S,9
s260168,Avani Yalamanchili,m,10
";

    fn layout() -> RecordLayout {
        let mut fields = BTreeMap::new();
        fields.insert("tshirt_size".to_string(), "tshirt_size".to_string());
        RecordLayout::new(
            ColumnMapping {
                key: "s_number".into(),
                name: vec!["name".into()],
                fields,
            },
            KeyNormalizer::default(),
            vec!["tshirt_size".into()],
        )
    }

    fn store_in(dir: &tempfile::TempDir, contents: &str) -> CsvStore {
        let path = dir.path().join("students.csv");
        std::fs::write(&path, contents).unwrap();
        CsvStore::new(CsvSource::new("students", path, layout()))
    }

    #[test]
    fn fetch_skips_blank_key_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, STUDENTS);
        let out = store.fetch().unwrap();
        assert_eq!(out.records.len(), 3);
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].line, 4);
        assert_eq!(out.records[2].field("tshirt_size"), Some("M"));
    }

    #[test]
    fn missing_file_is_unavailable() {
        let source = CsvSource::new("form", "/nonexistent/form.csv", layout());
        let err = source.fetch().unwrap_err();
        assert!(matches!(err, ReconError::SourceUnavailable { .. }), "{err}");
    }

    #[test]
    fn missing_column_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, "s_number,name\ns1,A\n");
        let err = store.fetch().unwrap_err();
        assert!(err.to_string().contains("missing column 'tshirt_size'"), "{err}");
    }

    #[test]
    fn short_row_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, "s_number,name,tshirt_size\ns1,A,L\ns2,B\n");
        let out = store.fetch().unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].reason.contains("tshirt_size"));
    }

    #[test]
    fn apply_rewrites_only_target_cell() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir, STUDENTS);
        assert_eq!(store.apply_field("s202943", "tshirt_size", "M"), Ok(1));

        let written = std::fs::read_to_string(store.source.path()).unwrap();
        assert!(written.starts_with("s_number,name,tshirt_size,grade\n"));
        assert!(written.contains("s202943,Elly Chang,M,11"));
        assert!(written.contains("s905482,Kevin Chirayil,M,12"));
        assert!(written.contains(",No Key,S,9"));
    }

    #[test]
    fn apply_unknown_key_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir, STUDENTS).with_backup(true);
        assert_eq!(store.apply_field("s000111", "tshirt_size", "M"), Ok(0));
        assert!(!store.backup_path().exists());
        assert_eq!(std::fs::read_to_string(store.source.path()).unwrap(), STUDENTS);
    }

    #[test]
    fn apply_same_value_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir, STUDENTS);
        assert_eq!(store.apply_field("s905482", "tshirt_size", "M"), Ok(1));
        assert_eq!(store.apply_field("s905482", "tshirt_size", "M"), Ok(1));
    }

    #[test]
    fn backup_written_once_before_first_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir, STUDENTS).with_backup(true);
        store.apply_field("s202943", "tshirt_size", "M").unwrap();
        store.apply_field("s905482", "tshirt_size", "L").unwrap();

        let backup = std::fs::read_to_string(store.backup_path()).unwrap();
        assert_eq!(backup, STUDENTS);
    }

    #[test]
    fn select_restricts_to_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, STUDENTS);
        let out = store
            .select(&["s905482".into(), "s999999".into()], &["tshirt_size".into()])
            .unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].key, "s905482");
    }

    #[test]
    fn undecodable_row_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("students.csv");
        std::fs::write(
            &path,
            b"s_number,name,tshirt_size\ns1,A,L\ns2,B\xff\xfe,M\ns3,C,S\n".as_slice(),
        )
        .unwrap();
        let mut store = CsvStore::new(CsvSource::new("students", path, layout()));

        let out = store.fetch().unwrap();
        let keys: Vec<&str> = out.records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["s1", "s3"]);
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].line, 3);

        let err = store.apply_field("s1", "tshirt_size", "M").unwrap_err();
        assert!(err.contains("unreadable line 3"), "{err}");
    }

    #[test]
    fn apply_keeps_header_as_written() {
        let dir = tempfile::tempdir().unwrap();
        let original = "\u{feff} s_number ,name, tshirt_size ,grade\ns202943,Elly Chang,L,11\n";
        let mut store = store_in(&dir, original);
        assert_eq!(store.fetch().unwrap().records[0].field("tshirt_size"), Some("L"));

        assert_eq!(store.apply_field("s202943", "tshirt_size", "M"), Ok(1));
        let written = std::fs::read_to_string(store.source.path()).unwrap();
        assert_eq!(written, "\u{feff} s_number ,name, tshirt_size ,grade\ns202943,Elly Chang,M,11\n");
    }

    #[test]
    fn tab_delimited() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("form.tsv");
        std::fs::write(&path, "s_number\tname\ttshirt_size\ns1\tA\txl\n").unwrap();
        let source = CsvSource::new("form", path, layout()).with_delimiter('\t').unwrap();
        let out = source.fetch().unwrap();
        assert_eq!(out.records[0].field("tshirt_size"), Some("XL"));
    }
}
