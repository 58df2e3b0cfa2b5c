//! Annotation query construction.

use clio_core::types::{BodyId, BODYID_FIELD};
use serde_json::{Map, Value};

/// Filters for fetching neuron annotations.
///
/// With no body IDs and no filters the query selects every annotation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationQuery {
    pub bodyids: Option<Vec<BodyId>>,
    pub filters: Map<String, Value>,
    pub version: Option<String>,
    /// Passed through as `show=` on full-table fetches.
    pub show: Option<String>,
}

impl AnnotationQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_bodies(ids: impl IntoIterator<Item = BodyId>) -> Self {
        Self {
            bodyids: Some(ids.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Add a column filter. A leading underscore is stripped, so reserved
    /// words can be spelled `_class`.
    pub fn filter(mut self, field: &str, value: impl Into<Value>) -> Self {
        let field = field.strip_prefix('_').unwrap_or(field);
        self.filters.insert(field.to_string(), value.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn show(mut self, show: impl Into<String>) -> Self {
        self.show = Some(show.into());
        self
    }

    /// True when the query has neither body IDs nor filters.
    pub fn is_unfiltered(&self) -> bool {
        self.bodyids.is_none() && self.filters.is_empty()
    }

    /// JSON body for the `neurons/query` endpoint.
    pub fn to_body(&self) -> Value {
        let mut body = self.filters.clone();
        if let Some(ids) = &self.bodyids {
            body.insert(BODYID_FIELD.to_string(), Value::from(ids.clone()));
        }
        Value::Object(body)
    }
}
