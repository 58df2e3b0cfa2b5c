//! Caller input shapes and the canonical annotation table.
//!
//! Callers hand over annotations as a column table, a list of records or a
//! single record. [`AnnotationInput`] captures those shapes at the boundary
//! and [`AnnotationInput::into_table`] normalizes them into one
//! [`AnnotationTable`] before any validation or merge logic runs.

use std::collections::{BTreeSet, HashSet};

use serde::Deserialize;
use serde_json::Value;

use crate::error::ValidationError;
use crate::types::{parse_bodyid, AnnotationRecord, BodyId, FieldMap, BODYID_FIELD};

static NULL: Value = Value::Null;

/// Column-oriented document: `{"columns": [...], "rows": [[...], ...]}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// The shapes of annotation input accepted at the API boundary.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AnnotationInput {
    Table(ColumnTable),
    Records(Vec<FieldMap>),
    Record(FieldMap),
}

impl AnnotationInput {
    /// Normalize into the canonical table representation.
    pub fn into_table(self) -> Result<AnnotationTable, ValidationError> {
        match self {
            Self::Table(table) => AnnotationTable::from_columns(table.columns, table.rows),
            Self::Records(records) => Ok(AnnotationTable::from_records(records)),
            Self::Record(record) => Ok(AnnotationTable::from_records(vec![record])),
        }
    }
}

impl From<Vec<AnnotationRecord>> for AnnotationInput {
    fn from(records: Vec<AnnotationRecord>) -> Self {
        let rows = records
            .iter()
            .map(|r| match r.to_json() {
                Value::Object(map) => map,
                _ => FieldMap::new(),
            })
            .collect();
        Self::Records(rows)
    }
}

/// A batch of annotation rows with a fixed, ordered column set.
///
/// Every row is viewed through the full column set; a cell a row does not
/// carry reads as null, the same as an explicit null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationTable {
    columns: Vec<String>,
    rows: Vec<FieldMap>,
}

impl AnnotationTable {
    /// Build from records; columns are the union of keys in first-seen order.
    pub fn from_records(rows: Vec<FieldMap>) -> Self {
        let mut seen = HashSet::new();
        let mut columns = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if seen.insert(key.as_str()) {
                    columns.push(key.clone());
                }
            }
        }
        Self { columns, rows }
    }

    /// Build from a column list and positional rows.
    pub fn from_columns(
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    ) -> Result<Self, ValidationError> {
        let mut unique = HashSet::new();
        if let Some(dup) = columns.iter().find(|c| !unique.insert(c.as_str())) {
            return Err(ValidationError::InvalidInput(format!(
                "duplicate column \"{dup}\""
            )));
        }

        let mut records = Vec::with_capacity(rows.len());
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != columns.len() {
                return Err(ValidationError::InvalidInput(format!(
                    "row {i} has {} values, expected {}",
                    row.len(),
                    columns.len()
                )));
            }
            records.push(columns.iter().cloned().zip(row).collect());
        }

        Ok(Self {
            columns,
            rows: records,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn rows(&self) -> &[FieldMap] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column, with missing cells read as null.
    pub fn column_values<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.rows.iter().map(move |row| row.get(column).unwrap_or(&NULL))
    }

    /// Extract body identifiers, rejecting missing, non-integer and
    /// duplicated ones.
    ///
    /// All empty and duplicated identifiers are collected before failing so
    /// the caller can fix the whole table at once.
    pub fn body_ids(&self) -> Result<Vec<BodyId>, ValidationError> {
        let mut ids = Vec::with_capacity(self.rows.len());
        let mut null_rows = Vec::new();
        let mut seen = HashSet::new();
        let mut duplicates = BTreeSet::new();

        for (row, value) in self.column_values(BODYID_FIELD).enumerate() {
            if value.is_null() {
                null_rows.push(row);
                continue;
            }
            let id = parse_bodyid(value).ok_or_else(|| ValidationError::InvalidIdentifier {
                row,
                value: value.to_string(),
            })?;
            if !seen.insert(id) {
                duplicates.insert(id);
            }
            ids.push(id);
        }

        if !duplicates.is_empty() || !null_rows.is_empty() {
            return Err(ValidationError::DuplicateOrNullId {
                duplicates: duplicates.into_iter().collect(),
                null_rows,
            });
        }
        Ok(ids)
    }

    /// Convert into annotation records, one per row, in row order.
    ///
    /// Each record carries every non-identifier column; cells the row did
    /// not supply become explicit nulls.
    pub fn into_records(self) -> Result<Vec<AnnotationRecord>, ValidationError> {
        let ids = self.body_ids()?;
        let columns = self.columns;

        Ok(ids
            .into_iter()
            .zip(self.rows)
            .map(|(bodyid, mut row)| {
                let fields = columns
                    .iter()
                    .filter(|c| c.as_str() != BODYID_FIELD)
                    .map(|c| (c.clone(), row.remove(c).unwrap_or(Value::Null)))
                    .collect();
                AnnotationRecord::new(bodyid, fields)
            })
            .collect())
    }
}
