//! Conflict-aware merge of new annotation values into the remote store.
//!
//! [`merge`] turns caller records into the write-set actually sent to the
//! backend. It never writes an unknown body, never overwrites a field the
//! [`ProtectionPolicy`] protects, and never emits a record that would only
//! carry its identifier.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::str::FromStr;

use serde_json::Value;

use crate::error::ValidationError;
use crate::types::{is_empty_value, parse_bodyid, AnnotationRecord, BodyId, FieldMap, BODYID_FIELD};

/// Field protected by default: the user who first made an annotation.
pub const DEFAULT_PROTECTED_FIELD: &str = "user";

/// Which existing remote values a write may overwrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtectionPolicy {
    /// Never overwrite a field that already has a value.
    All,
    /// Overwrite everything.
    None,
    /// Never overwrite an existing value of one of these fields.
    Named(BTreeSet<String>),
}

impl Default for ProtectionPolicy {
    fn default() -> Self {
        Self::named([DEFAULT_PROTECTED_FIELD])
    }
}

impl ProtectionPolicy {
    pub fn named<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Named(fields.into_iter().map(Into::into).collect())
    }

    /// Whether applying this policy needs the existing annotation index.
    pub fn needs_existing(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Whether `field` must be dropped from a write, given the fields the
    /// body already has populated remotely.
    ///
    /// A field absent from `existing` is never protected.
    pub fn protects(&self, field: &str, existing: Option<&BTreeSet<String>>) -> bool {
        let already_present = existing.is_some_and(|set| set.contains(field));
        match self {
            Self::All => already_present,
            Self::None => false,
            Self::Named(names) => already_present && names.contains(field),
        }
    }
}

impl FromStr for ProtectionPolicy {
    type Err = ValidationError;

    /// `all`/`true`, `none`/`false`, or a comma-separated list of field names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "all" | "true" => Ok(Self::All),
            "none" | "false" => Ok(Self::None),
            list => {
                let names: BTreeSet<String> = list
                    .split(',')
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(String::from)
                    .collect();
                if names.is_empty() {
                    return Err(ValidationError::InvalidInput(format!(
                        "invalid protection policy \"{s}\""
                    )));
                }
                Ok(Self::Named(names))
            }
        }
    }
}

/// Body ID to the set of field names already populated remotely.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExistingAnnotationIndex {
    fields: HashMap<BodyId, BTreeSet<String>>,
}

impl ExistingAnnotationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from annotation rows as returned by the store.
    ///
    /// Only non-empty values count as populated. Rows without a usable
    /// `bodyid` are ignored.
    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a FieldMap>) -> Self {
        let mut index = Self::new();
        for row in rows {
            let Some(bodyid) = row.get(BODYID_FIELD).and_then(parse_bodyid) else {
                continue;
            };
            let populated = row
                .iter()
                .filter(|(k, v)| k.as_str() != BODYID_FIELD && !is_empty_value(v))
                .map(|(k, _)| k.clone());
            index.insert(bodyid, populated);
        }
        index
    }

    pub fn insert<I, S>(&mut self, bodyid: BodyId, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields
            .entry(bodyid)
            .or_default()
            .extend(fields.into_iter().map(Into::into));
    }

    pub fn fields_for(&self, bodyid: BodyId) -> Option<&BTreeSet<String>> {
        self.fields.get(&bodyid)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Caller-controlled merge behaviour.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOptions {
    pub protect: ProtectionPolicy,
    /// Write empty values (as explicit nulls) instead of omitting them.
    pub write_empty_fields: bool,
}

/// Fail if any body ID appears more than once.
pub fn ensure_unique(records: &[AnnotationRecord]) -> Result<(), ValidationError> {
    let mut seen = HashSet::with_capacity(records.len());
    let duplicates: BTreeSet<BodyId> = records
        .iter()
        .filter(|r| !seen.insert(r.bodyid))
        .map(|r| r.bodyid)
        .collect();

    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::DuplicateOrNullId {
            duplicates: duplicates.into_iter().collect(),
            null_rows: Vec::new(),
        })
    }
}

/// Compute the write-set for `records`.
///
/// Steps, in order:
/// 1. reject duplicate identifiers;
/// 2. unless `write_empty_fields`, drop empty values;
/// 3. reject the whole batch if any body is not known to exist
///    (`existence` maps body ID to existence; a missing entry means unknown);
/// 4. drop fields the protection policy guards against `existing`;
/// 5. drop records left with nothing but their identifier;
/// 6. normalize remaining empty values to explicit nulls.
///
/// Output preserves input order.
pub fn merge(
    records: Vec<AnnotationRecord>,
    options: &MergeOptions,
    existence: &HashMap<BodyId, bool>,
    existing: &ExistingAnnotationIndex,
) -> Result<Vec<AnnotationRecord>, ValidationError> {
    ensure_unique(&records)?;

    let mut records = records;
    if !options.write_empty_fields {
        for record in &mut records {
            record.fields.retain(|_, v| !is_empty_value(v));
        }
    }

    let unknown: Vec<BodyId> = records
        .iter()
        .map(|r| r.bodyid)
        .filter(|id| existence.get(id) != Some(&true))
        .collect();
    if !unknown.is_empty() {
        return Err(ValidationError::UnknownIdentifier(unknown));
    }

    Ok(records
        .into_iter()
        .filter_map(|mut record| {
            let present = existing.fields_for(record.bodyid);
            record
                .fields
                .retain(|field, _| !options.protect.protects(field, present));

            if record.is_identifier_only() {
                return None;
            }

            for value in record.fields.values_mut() {
                if is_empty_value(value) {
                    *value = Value::Null;
                }
            }
            Some(record)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn record(bodyid: BodyId, fields: Value) -> AnnotationRecord {
        AnnotationRecord::new(bodyid, serde_json::from_value(fields).unwrap())
    }

    fn all_exist(records: &[AnnotationRecord]) -> HashMap<BodyId, bool> {
        records.iter().map(|r| (r.bodyid, true)).collect()
    }

    fn options(protect: ProtectionPolicy, write_empty_fields: bool) -> MergeOptions {
        MergeOptions {
            protect,
            write_empty_fields,
        }
    }

    #[test]
    fn duplicates_fail_before_anything_else() {
        let records = vec![
            record(1, json!({"status": "a"})),
            record(1, json!({"status": "b"})),
        ];
        // Existence is empty, so an unknown-ID error would surface if the
        // duplicate check did not run first.
        let result = merge(
            records,
            &MergeOptions::default(),
            &HashMap::new(),
            &ExistingAnnotationIndex::new(),
        );
        assert_matches!(
            result,
            Err(ValidationError::DuplicateOrNullId { duplicates, .. }) if duplicates == vec![1]
        );
    }

    #[test]
    fn protected_named_field_elides_identifier_only_record() {
        let records = vec![
            record(1, json!({"status": "Soma Anchor"})),
            record(2, json!({"status": "Soma Anchor"})),
        ];
        let mut existing = ExistingAnnotationIndex::new();
        existing.insert(1, ["status"]);

        let writes = merge(
            records.clone(),
            &options(ProtectionPolicy::named(["status"]), false),
            &all_exist(&records),
            &existing,
        )
        .unwrap();

        assert_eq!(writes, vec![record(2, json!({"status": "Soma Anchor"}))]);
    }

    #[test]
    fn named_policy_overwrites_unprotected_fields() {
        let records = vec![record(1, json!({"user": "bob", "type": "LC4"}))];
        let mut existing = ExistingAnnotationIndex::new();
        existing.insert(1, ["user", "type"]);

        let writes = merge(
            records.clone(),
            &MergeOptions::default(),
            &all_exist(&records),
            &existing,
        )
        .unwrap();

        assert_eq!(writes, vec![record(1, json!({"type": "LC4"}))]);
    }

    #[test]
    fn protected_field_absent_remotely_is_written() {
        let records = vec![record(1, json!({"user": "bob"}))];
        let writes = merge(
            records.clone(),
            &MergeOptions::default(),
            &all_exist(&records),
            &ExistingAnnotationIndex::new(),
        )
        .unwrap();
        assert_eq!(writes, records);
    }

    #[test]
    fn protect_all_is_idempotent() {
        let records = vec![
            record(1, json!({"status": "Anchor", "type": "LC4"})),
            record(2, json!({"status": "Traced"})),
        ];
        let exists = all_exist(&records);
        let opts = options(ProtectionPolicy::All, false);

        let mut existing = ExistingAnnotationIndex::new();
        existing.insert(1, ["status"]);

        let first = merge(records.clone(), &opts, &exists, &existing).unwrap();
        assert_eq!(
            first,
            vec![
                record(1, json!({"type": "LC4"})),
                record(2, json!({"status": "Traced"})),
            ]
        );

        // Apply the first write-set to the index, then merge again.
        for w in &first {
            existing.insert(w.bodyid, w.fields.keys().cloned());
        }
        let second = merge(records, &opts, &exists, &existing).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn protect_none_keeps_every_surviving_field() {
        let records = vec![record(1, json!({"status": "Anchor", "user": "bob", "type": ""}))];
        let mut existing = ExistingAnnotationIndex::new();
        existing.insert(1, ["status", "user", "type"]);

        let writes = merge(
            records.clone(),
            &options(ProtectionPolicy::None, false),
            &all_exist(&records),
            &existing,
        )
        .unwrap();

        assert_eq!(writes, vec![record(1, json!({"status": "Anchor", "user": "bob"}))]);
    }

    #[test]
    fn empty_fields_are_dropped_by_default() {
        let records = vec![
            record(1, json!({"status": null, "type": ""})),
            record(2, json!({"status": null, "type": "LC4"})),
        ];
        let writes = merge(
            records.clone(),
            &options(ProtectionPolicy::None, false),
            &all_exist(&records),
            &ExistingAnnotationIndex::new(),
        )
        .unwrap();
        assert_eq!(writes, vec![record(2, json!({"type": "LC4"}))]);
    }

    #[test]
    fn written_empty_fields_become_explicit_nulls() {
        let records = vec![record(1, json!({"status": "", "type": null, "user": "bob"}))];
        let writes = merge(
            records.clone(),
            &options(ProtectionPolicy::None, true),
            &all_exist(&records),
            &ExistingAnnotationIndex::new(),
        )
        .unwrap();
        assert_eq!(
            writes,
            vec![record(1, json!({"status": null, "type": null, "user": "bob"}))]
        );
    }

    #[test]
    fn unknown_identifiers_reject_the_whole_batch() {
        let records = vec![
            record(1, json!({"status": "a"})),
            record(2, json!({"status": "b"})),
            record(3, json!({"status": "c"})),
        ];
        let existence = HashMap::from([(1, true), (2, false)]);
        let result = merge(
            records,
            &options(ProtectionPolicy::None, false),
            &existence,
            &ExistingAnnotationIndex::new(),
        );
        assert_eq!(result, Err(ValidationError::UnknownIdentifier(vec![2, 3])));
    }

    #[test]
    fn output_preserves_input_order() {
        let records: Vec<_> = [5, 3, 9, 1]
            .into_iter()
            .map(|id| record(id, json!({"status": "x"})))
            .collect();
        let writes = merge(
            records.clone(),
            &options(ProtectionPolicy::None, false),
            &all_exist(&records),
            &ExistingAnnotationIndex::new(),
        )
        .unwrap();
        let ids: Vec<_> = writes.iter().map(|r| r.bodyid).collect();
        assert_eq!(ids, [5, 3, 9, 1]);
    }

    #[test]
    fn existing_index_ignores_empty_remote_values() {
        let rows: Vec<FieldMap> = serde_json::from_value(json!([
            {"bodyid": 1, "status": "Anchor", "type": null, "user": ""},
            {"status": "orphan"},
        ]))
        .unwrap();
        let index = ExistingAnnotationIndex::from_rows(&rows);
        assert_eq!(index.len(), 1);
        let fields = index.fields_for(1).unwrap();
        assert!(fields.contains("status"));
        assert!(!fields.contains("type"));
        assert!(!fields.contains("user"));
    }

    #[test]
    fn policy_parsing() {
        assert_eq!("all".parse::<ProtectionPolicy>().unwrap(), ProtectionPolicy::All);
        assert_eq!("false".parse::<ProtectionPolicy>().unwrap(), ProtectionPolicy::None);
        assert_eq!(
            "user, status".parse::<ProtectionPolicy>().unwrap(),
            ProtectionPolicy::named(["status", "user"])
        );
        assert_matches!(" , ".parse::<ProtectionPolicy>(), Err(ValidationError::InvalidInput(_)));
    }
}
