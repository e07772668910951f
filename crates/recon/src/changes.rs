//! Change list IO: the `(key, field, value)` triples a run wants written,
//! as CSV, JSON, or SQL for operators who apply changes by hand.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use crate::model::Change;

pub const CHANGES_HEADER: [&str; 3] = ["key", "field", "value"];

/// Write `changes` as CSV with a `key,field,value` header.
pub fn write_changes_csv(changes: &[Change], writer: impl Write) -> Result<(), String> {
    let mut csv = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(writer);

    csv.write_record(CHANGES_HEADER)
        .map_err(|e| format!("CSV write error: {e}"))?;
    for c in changes {
        csv.write_record([&c.key, &c.field, &c.value])
            .map_err(|e| format!("CSV write error: {e}"))?;
    }

    csv.flush().map_err(|e| format!("CSV flush error: {e}"))?;
    Ok(())
}

/// Read a change list written by [`write_changes_csv`].
pub fn read_changes_csv(reader: impl std::io::Read) -> Result<Vec<Change>, String> {
    let mut csv = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv
        .headers()
        .map_err(|e| format!("CSV parse error in header: {e}"))?
        .clone();
    let pos = |name: &str| {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .ok_or_else(|| format!("change list is missing the '{name}' column"))
    };
    let (k, f, v) = (pos("key")?, pos("field")?, pos("value")?);

    let mut changes = Vec::new();
    for (i, result) in csv.records().enumerate() {
        let record = result.map_err(|e| format!("CSV parse error at row {}: {e}", i + 1))?;
        let get = |idx: usize| record.get(idx).unwrap_or("").to_string();
        let change = Change {
            key: get(k),
            field: get(f),
            value: get(v),
        };
        if change.key.is_empty() || change.field.is_empty() {
            return Err(format!("row {}: key and field are required", i + 1));
        }
        changes.push(change);
    }
    Ok(changes)
}

/// Read a change list in either format. JSON is recognized by a leading `[`.
pub fn read_changes(input: &str) -> Result<Vec<Change>, String> {
    if input.trim_start().starts_with('[') {
        serde_json::from_str(input).map_err(|e| format!("invalid change list JSON: {e}"))
    } else {
        read_changes_csv(input.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// SQL
// ---------------------------------------------------------------------------

/// Where the SQL rendering of a change list points.
#[derive(Debug, Clone)]
pub struct SqlTarget<'a> {
    pub table: &'a str,
    pub key_column: &'a str,
    /// Field name → column name. Unmapped fields use the field name.
    pub columns: &'a BTreeMap<String, String>,
}

impl SqlTarget<'_> {
    fn column<'c>(&'c self, field: &'c str) -> &'c str {
        self.columns.get(field).map(String::as_str).unwrap_or(field)
    }
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn quote_ident(name: &str) -> String {
    let plain = name
        .chars()
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// One `UPDATE` per change, followed by a `SELECT` that reads the touched
/// keys back for checking.
pub fn render_sql(changes: &[Change], target: &SqlTarget<'_>) -> String {
    let table = quote_ident(target.table);
    let key_col = quote_ident(target.key_column);

    let mut out = String::new();
    out.push_str(&format!("-- {} correction(s) for {}\n", changes.len(), target.table));
    if changes.is_empty() {
        return out;
    }

    for c in changes {
        out.push_str(&format!(
            "UPDATE {table} SET {} = {} WHERE {key_col} = {};\n",
            quote_ident(target.column(&c.field)),
            quote_literal(&c.value),
            quote_literal(&c.key),
        ));
    }

    let keys: BTreeSet<&str> = changes.iter().map(|c| c.key.as_str()).collect();
    let mut select_cols = vec![key_col.clone()];
    for field in changes.iter().map(|c| c.field.as_str()).collect::<BTreeSet<_>>() {
        let col = quote_ident(target.column(field));
        if !select_cols.contains(&col) {
            select_cols.push(col);
        }
    }

    out.push_str("\n-- verify\n");
    out.push_str(&format!(
        "SELECT {} FROM {table} WHERE {key_col} IN ({}) ORDER BY {key_col};\n",
        select_cols.join(", "),
        keys.iter().map(|k| quote_literal(k)).collect::<Vec<_>>().join(", "),
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(key: &str, field: &str, value: &str) -> Change {
        Change {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    #[test]
    fn csv_written_then_read() {
        let changes = vec![change("s202943", "size", "M"), change("s905482", "size", "XL, TALL")];
        let mut buf = Vec::new();
        write_changes_csv(&changes, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("key,field,value\ns202943,size,M\n"));
        assert_eq!(read_changes(&text).unwrap(), changes);
    }

    #[test]
    fn json_detected_by_bracket() {
        let input = r#"  [{"key":"s1","field":"size","value":"L"}]"#;
        assert_eq!(read_changes(input).unwrap(), vec![change("s1", "size", "L")]);
    }

    #[test]
    fn csv_columns_found_by_name() {
        let input = "value,key,field\nM,s1,size\n";
        assert_eq!(read_changes(input).unwrap(), vec![change("s1", "size", "M")]);
    }

    #[test]
    fn csv_missing_column_rejected() {
        let err = read_changes("key,value\ns1,M\n").unwrap_err();
        assert!(err.contains("'field'"), "{err}");
    }

    #[test]
    fn csv_blank_key_rejected() {
        let err = read_changes("key,field,value\n,size,M\n").unwrap_err();
        assert!(err.starts_with("row 1"), "{err}");
    }

    #[test]
    fn sql_updates_and_verify_select() {
        let columns = BTreeMap::from([("size".to_string(), "tshirt_size".to_string())]);
        let target = SqlTarget {
            table: "students",
            key_column: "s_number",
            columns: &columns,
        };
        let sql = render_sql(
            &[change("s905482", "size", "L"), change("s202943", "size", "M")],
            &target,
        );
        assert_eq!(
            sql,
            "-- 2 correction(s) for students\n\
             UPDATE students SET tshirt_size = 'L' WHERE s_number = 's905482';\n\
             UPDATE students SET tshirt_size = 'M' WHERE s_number = 's202943';\n\
             \n-- verify\n\
             SELECT s_number, tshirt_size FROM students WHERE s_number IN ('s202943', 's905482') ORDER BY s_number;\n"
        );
    }

    #[test]
    fn sql_escapes_quotes() {
        let columns = BTreeMap::new();
        let target = SqlTarget {
            table: "Student List",
            key_column: "id",
            columns: &columns,
        };
        let sql = render_sql(&[change("o'brien", "nick", "it's")], &target);
        assert!(sql.contains(r#"UPDATE "Student List" SET nick = 'it''s' WHERE id = 'o''brien';"#), "{sql}");
    }

    #[test]
    fn sql_empty_list_is_comment_only() {
        let columns = BTreeMap::new();
        let target = SqlTarget {
            table: "students",
            key_column: "id",
            columns: &columns,
        };
        assert_eq!(render_sql(&[], &target), "-- 0 correction(s) for students\n");
    }
}
