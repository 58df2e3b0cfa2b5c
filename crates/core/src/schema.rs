//! Annotation schema model and table validation.
//!
//! The store publishes a JSON Schema describing the annotation fields it
//! knows how to type. [`validate`] checks a candidate table against it:
//! required columns present, declared types respected, no empty values in
//! non-nullable columns, and no columns outside the known field list.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SchemaError;
use crate::table::AnnotationTable;
use crate::types::{is_empty_value, BODYID_FIELD};

/// Marker type name that makes a field nullable.
const NULL_TYPE: &str = "null";

/// Runtime kind of a JSON cell value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array,
    Object,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => Self::Integer,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    /// Kinds accepted for a declared JSON Schema type name.
    fn accepted_for(declared: &str) -> Option<&'static [ValueKind]> {
        match declared {
            "integer" => Some(&[Self::Integer]),
            "number" => Some(&[Self::Integer, Self::Number]),
            "string" => Some(&[Self::String]),
            "boolean" => Some(&[Self::Boolean]),
            "array" => Some(&[Self::Array]),
            "object" => Some(&[Self::Object]),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A property's `type`: a single name or a list that may include `"null"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TypeDecl {
    Single(String),
    Many(Vec<String>),
}

impl TypeDecl {
    fn names(&self) -> Vec<&str> {
        match self {
            Self::Single(name) => vec![name.as_str()],
            Self::Many(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

/// One entry of the schema's `properties` object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PropertySpec {
    #[serde(rename = "type", default)]
    pub type_decl: Option<TypeDecl>,
}

/// The JSON Schema document describing annotation fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AnnotationSchema {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySpec>,
}

impl AnnotationSchema {
    pub fn from_json(value: Value) -> Result<Self, SchemaError> {
        serde_json::from_value(value).map_err(|e| SchemaError::Malformed(e.to_string()))
    }

    /// Resolve the typed description of a single field, if the schema has one.
    pub fn field(&self, name: &str) -> Option<Result<FieldSchema, SchemaError>> {
        let spec = self.properties.get(name)?;
        let required = self.required.iter().any(|r| r == name);
        Some(FieldSchema::resolve(name, spec, required))
    }
}

/// Resolved constraints for one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    pub name: String,
    /// Acceptable value kinds; empty means the schema does not constrain it.
    pub accepted: Vec<ValueKind>,
    pub nullable: bool,
    pub required: bool,
}

impl FieldSchema {
    fn resolve(name: &str, spec: &PropertySpec, required: bool) -> Result<Self, SchemaError> {
        let Some(decl) = &spec.type_decl else {
            return Ok(Self {
                name: name.to_string(),
                accepted: Vec::new(),
                nullable: true,
                required,
            });
        };

        let mut nullable = false;
        let mut accepted = BTreeSet::new();
        for declared in decl.names() {
            if declared == NULL_TYPE {
                nullable = true;
                continue;
            }
            let kinds =
                ValueKind::accepted_for(declared).ok_or_else(|| SchemaError::UnsupportedType {
                    column: name.to_string(),
                    declared: declared.to_string(),
                })?;
            accepted.extend(kinds.iter().copied());
        }

        Ok(Self {
            name: name.to_string(),
            accepted: accepted.into_iter().collect(),
            nullable,
            required,
        })
    }

    fn accepts(&self, kind: ValueKind) -> bool {
        self.accepted.is_empty() || self.accepted.contains(&kind)
    }
}

/// What the non-empty cells of a column look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Empty,
    Uniform(ValueKind),
    Mixed,
}

fn column_kind<'a>(values: impl Iterator<Item = &'a Value>) -> (ColumnKind, bool) {
    let mut kind = ColumnKind::Empty;
    let mut has_empty = false;
    for value in values {
        if is_empty_value(value) {
            has_empty = true;
            continue;
        }
        let k = ValueKind::of(value);
        kind = match kind {
            ColumnKind::Empty => ColumnKind::Uniform(k),
            ColumnKind::Uniform(prev) if prev == k => kind,
            _ => ColumnKind::Mixed,
        };
    }
    (kind, has_empty)
}

fn check_column(table: &AnnotationTable, field: &FieldSchema) -> Result<(), SchemaError> {
    let (kind, has_empty) = column_kind(table.column_values(&field.name));

    let mismatch = |actual| SchemaError::TypeMismatch {
        column: field.name.clone(),
        expected: field.accepted.clone(),
        actual,
    };

    match kind {
        ColumnKind::Empty => {}
        ColumnKind::Uniform(k) => {
            if !field.accepts(k) {
                return Err(mismatch(k));
            }
        }
        ColumnKind::Mixed => {
            let offending = table
                .column_values(&field.name)
                .filter(|v| !is_empty_value(v))
                .map(ValueKind::of)
                .find(|k| !field.accepts(*k));
            if let Some(k) = offending {
                return Err(mismatch(k));
            }
        }
    }

    if has_empty && !field.nullable {
        return Err(SchemaError::NullNotAllowed(field.name.clone()));
    }
    Ok(())
}

/// Check a table against the schema and the store's known field list.
///
/// Checks run in order: required columns, per-column type and nullability
/// (in table column order), then unknown columns. The first failure is
/// returned. The identifier column is always a known field.
pub fn validate(
    table: &AnnotationTable,
    schema: &AnnotationSchema,
    known_fields: &BTreeSet<String>,
) -> Result<(), SchemaError> {
    if let Some(missing) = schema.required.iter().find(|r| !table.has_column(r)) {
        return Err(SchemaError::MissingRequiredField(missing.clone()));
    }

    for column in table.columns() {
        if let Some(field) = schema.field(column) {
            check_column(table, &field?)?;
        }
    }

    let unknown: Vec<String> = table
        .columns()
        .iter()
        .filter(|c| c.as_str() != BODYID_FIELD && !known_fields.contains(c.as_str()))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(SchemaError::UnknownField(unknown));
    }

    Ok(())
}
