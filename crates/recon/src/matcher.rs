use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::model::{Ambiguity, FieldDiscrepancy, Record, Side};

/// What to compare.
#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    pub fields: Vec<String>,
    /// Restrict the whole comparison (including unmatched counts) to these keys.
    pub keys: Option<BTreeSet<String>>,
}

impl DiffOptions {
    pub fn new(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            keys: None,
        }
    }

    pub fn with_keys(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    fn wants(&self, key: &str) -> bool {
        self.keys.as_ref().map_or(true, |k| k.contains(key))
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiffOutput {
    /// Sorted by key, then field.
    pub discrepancies: Vec<FieldDiscrepancy>,
    /// Keys present on both sides.
    pub compared: usize,
    /// Shared keys with no discrepant or ambiguous field.
    pub matched: usize,
    /// Target keys with no reference counterpart, sorted.
    pub unmatched_reference: Vec<String>,
    /// Reference keys with no target counterpart, sorted.
    pub unmatched_target: Vec<String>,
    pub ambiguities: Vec<Ambiguity>,
}

/// One key's view of one side after folding duplicates.
#[derive(Debug, Default)]
struct Indexed<'a> {
    display_name: &'a str,
    values: BTreeMap<&'a str, BTreeSet<&'a str>>,
}

impl<'a> Indexed<'a> {
    /// The value for `field`, if present and unambiguous.
    fn value(&self, field: &str) -> Option<&'a str> {
        match self.values.get(field) {
            Some(vals) if vals.len() == 1 => vals.iter().next().copied(),
            _ => None,
        }
    }

    fn is_ambiguous(&self, field: &str) -> bool {
        self.values.get(field).map_or(false, |v| v.len() > 1)
    }
}

fn index<'a>(
    records: &'a [Record],
    side: Side,
    options: &DiffOptions,
    fields: &[&str],
    ambiguities: &mut Vec<Ambiguity>,
) -> BTreeMap<&'a str, Indexed<'a>> {
    let mut map: BTreeMap<&'a str, Indexed<'a>> = BTreeMap::new();

    for record in records.iter().filter(|r| options.wants(&r.key)) {
        let entry = map.entry(record.key.as_str()).or_default();
        if entry.display_name.is_empty() {
            entry.display_name = &record.display_name;
        }
        for field in fields {
            if let Some((name, value)) = record.fields.get_key_value(*field) {
                entry
                    .values
                    .entry(name.as_str())
                    .or_default()
                    .insert(value.as_str());
            }
        }
    }

    for (key, indexed) in &map {
        for (field, values) in &indexed.values {
            if values.len() > 1 {
                log::warn!(
                    "{side}: key '{key}' has conflicting values for '{field}': {}",
                    values.iter().copied().collect::<Vec<_>>().join(", ")
                );
                ambiguities.push(Ambiguity {
                    side,
                    key: key.to_string(),
                    field: field.to_string(),
                    values: values.iter().map(|v| v.to_string()).collect(),
                });
            }
        }
    }

    map
}

/// Join `reference` and `target` by key and report every field whose
/// normalized values differ. The reference value is always the correct one.
pub fn diff(reference: &[Record], target: &[Record], options: &DiffOptions) -> DiffOutput {
    let mut fields: Vec<&str> = options.fields.iter().map(String::as_str).collect();
    fields.sort_unstable();
    fields.dedup();

    let mut ambiguities = Vec::new();
    let ref_map = index(reference, Side::Reference, options, &fields, &mut ambiguities);
    let tgt_map = index(target, Side::Target, options, &fields, &mut ambiguities);
    ambiguities.sort_by(|a, b| (&a.key, &a.field, a.side as u8).cmp(&(&b.key, &b.field, b.side as u8)));

    let mut out = DiffOutput {
        ambiguities,
        ..DiffOutput::default()
    };

    for (key, ref_rec) in &ref_map {
        let Some(tgt_rec) = tgt_map.get(key) else {
            out.unmatched_target.push(key.to_string());
            continue;
        };
        out.compared += 1;

        let mut clean = true;
        for field in &fields {
            if ref_rec.is_ambiguous(field) || tgt_rec.is_ambiguous(field) {
                clean = false;
                continue;
            }
            let (Some(reference_value), Some(current_value)) =
                (ref_rec.value(field), tgt_rec.value(field))
            else {
                continue;
            };
            if reference_value != current_value {
                clean = false;
                out.discrepancies.push(FieldDiscrepancy {
                    key: key.to_string(),
                    display_name: if ref_rec.display_name.is_empty() {
                        tgt_rec.display_name.to_string()
                    } else {
                        ref_rec.display_name.to_string()
                    },
                    field: field.to_string(),
                    reference_value: reference_value.to_string(),
                    current_value: current_value.to_string(),
                });
            }
        }
        if clean {
            out.matched += 1;
        }
    }

    out.unmatched_reference = tgt_map
        .keys()
        .filter(|k| !ref_map.contains_key(*k))
        .map(|k| k.to_string())
        .collect();

    log::info!(
        "diff: {} compared, {} matched, {} discrepant field(s), {} reference-only, {} target-only, {} ambiguous",
        out.compared,
        out.matched,
        out.discrepancies.len(),
        out.unmatched_target.len(),
        out.unmatched_reference.len(),
        out.ambiguities.len(),
    );

    out
}
