//! Annotation record types shared by the validator, merger and client.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Integer key identifying a segmented neuron body.
pub type BodyId = i64;

/// Column / JSON key that carries the body identifier.
pub const BODYID_FIELD: &str = "bodyid";

/// Field name to value mapping for one body.
pub type FieldMap = Map<String, Value>;

/// Whether a value counts as "no value": JSON null or the empty string.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Interpret a JSON value as a body identifier.
///
/// Accepts integers, integral floats (tables often carry IDs as floats once
/// a column has gaps) and decimal strings. Returns `None` for anything else.
pub fn parse_bodyid(value: &Value) -> Option<BodyId> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Some(i);
            }
            let f = n.as_f64()?;
            if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                Some(f as BodyId)
            } else {
                None
            }
        }
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// One body's identifier plus the field values to write for it.
///
/// Serializes flat, as the write endpoint expects: `{"bodyid": 1, "status": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub bodyid: BodyId,
    #[serde(flatten)]
    pub fields: FieldMap,
}

impl AnnotationRecord {
    /// Build a record, discarding any `bodyid` key inside `fields`.
    pub fn new(bodyid: BodyId, mut fields: FieldMap) -> Self {
        fields.remove(BODYID_FIELD);
        Self { bodyid, fields }
    }

    /// A record that would write nothing but its identifier.
    pub fn is_identifier_only(&self) -> bool {
        self.fields.is_empty()
    }

    /// Render as the flat JSON object sent to the backend.
    pub fn to_json(&self) -> Value {
        let mut obj = Map::with_capacity(self.fields.len() + 1);
        obj.insert(BODYID_FIELD.to_string(), Value::from(self.bodyid));
        for (k, v) in &self.fields {
            obj.insert(k.clone(), v.clone());
        }
        Value::Object(obj)
    }
}
