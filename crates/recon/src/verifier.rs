use std::collections::{BTreeMap, BTreeSet};

use crate::error::ReconError;
use crate::model::{FieldDiscrepancy, VerificationResult};
use crate::source::TargetStore;

/// Re-read the affected keys from `store` and check each discrepancy's
/// reference value actually landed.
///
/// One `select` covers every key. A key or field that cannot be read back
/// counts as a mismatch. A key present more than once must hold the expected
/// value on every row to match.
pub fn verify(
    store: &dyn TargetStore,
    discrepancies: &[FieldDiscrepancy],
) -> Result<Vec<VerificationResult>, ReconError> {
    if discrepancies.is_empty() {
        return Ok(Vec::new());
    }

    let keys: Vec<String> = discrepancies
        .iter()
        .map(|d| d.key.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let fields: Vec<String> = discrepancies
        .iter()
        .map(|d| d.field.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let fetched = store.select(&keys, &fields)?;

    let mut observed: BTreeMap<(&str, &str), BTreeSet<&str>> = BTreeMap::new();
    for record in &fetched.records {
        for (field, value) in &record.fields {
            observed
                .entry((record.key.as_str(), field.as_str()))
                .or_default()
                .insert(value.as_str());
        }
    }

    let results: Vec<VerificationResult> = discrepancies
        .iter()
        .map(|d| {
            let seen = observed.get(&(d.key.as_str(), d.field.as_str()));
            let matched = seen.map_or(false, |vals| {
                vals.len() == 1 && vals.contains(d.reference_value.as_str())
            });
            // On mismatch prefer showing a value other than the expected one.
            let observed_value = seen.and_then(|vals| {
                vals.iter()
                    .find(|v| **v != d.reference_value)
                    .or_else(|| vals.iter().next())
                    .map(|v| v.to_string())
            });

            if !matched {
                log::warn!(
                    "verify: {}.{} expected {}, observed {}",
                    d.key,
                    d.field,
                    d.reference_value,
                    observed_value.as_deref().unwrap_or("<missing>")
                );
            }

            VerificationResult {
                key: d.key.clone(),
                field: d.field.clone(),
                expected_value: d.reference_value.clone(),
                observed_value,
                matched,
            }
        })
        .collect();

    log::info!(
        "verify: {} of {} value(s) confirmed",
        results.iter().filter(|r| r.matched).count(),
        results.len()
    );
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Record;
    use crate::source::MemoryStore;

    fn disc(key: &str, reference: &str) -> FieldDiscrepancy {
        FieldDiscrepancy {
            key: key.into(),
            display_name: String::new(),
            field: "size".into(),
            reference_value: reference.into(),
            current_value: String::new(),
        }
    }

    #[test]
    fn matched_and_mismatched() {
        let store = MemoryStore::new(
            "mem",
            vec![
                Record::new("s202943", "").with_field("size", "M"),
                Record::new("s905482", "").with_field("size", "M"),
            ],
        );
        let res = verify(&store, &[disc("s202943", "M"), disc("s905482", "L")]).unwrap();
        assert!(res[0].matched);
        assert_eq!(res[0].observed_value.as_deref(), Some("M"));
        assert!(!res[1].matched);
        assert_eq!(res[1].observed_value.as_deref(), Some("M"));
    }

    #[test]
    fn missing_key_is_mismatch() {
        let store = MemoryStore::new("mem", vec![]);
        let res = verify(&store, &[disc("gone", "M")]).unwrap();
        assert!(!res[0].matched);
        assert!(res[0].observed_value.is_none());
    }

    #[test]
    fn duplicate_rows_must_all_agree() {
        let store = MemoryStore::new(
            "mem",
            vec![
                Record::new("a", "").with_field("size", "M"),
                Record::new("a", "").with_field("size", "L"),
            ],
        );
        let res = verify(&store, &[disc("a", "M")]).unwrap();
        assert!(!res[0].matched);
        assert_eq!(res[0].observed_value.as_deref(), Some("L"));
    }

    #[test]
    fn empty_input_skips_select() {
        let store = MemoryStore::new("mem", vec![]);
        assert!(verify(&store, &[]).unwrap().is_empty());
    }
}
