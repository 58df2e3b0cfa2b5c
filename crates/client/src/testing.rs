//! In-memory [`AnnotationBackend`] for unit tests.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use clio_core::schema::AnnotationSchema;
use clio_core::types::{AnnotationRecord, BodyId, FieldMap, BODYID_FIELD};
use serde_json::{json, Value};

use crate::backend::AnnotationBackend;
use crate::cache::{AnnotationCaches, SchemaBundle};
use crate::error::{BackendError, ClioResult};

pub struct MemoryBackend {
    caches: AnnotationCaches,
    pub schema: AnnotationSchema,
    pub fields: BTreeSet<String>,
    /// Stored annotation rows by body ID.
    pub annotations: Mutex<HashMap<BodyId, FieldMap>>,
    /// Bodies present in the segmentation but possibly unannotated.
    pub segmentation: HashSet<BodyId>,
    pub head: String,
    /// One-based POST number that answers with HTTP 500.
    pub fail_post: Option<usize>,
    pub posts: Mutex<Vec<(Vec<BodyId>, String)>>,
    pub annotated_fetches: AtomicUsize,
    pub existence_queries: Mutex<Vec<Vec<BodyId>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let schema = AnnotationSchema::from_json(json!({
            "required": ["bodyid"],
            "properties": {
                "bodyid": {"type": "integer"},
                "status": {"type": ["string", "null"]},
                "user": {"type": "string"},
                "type": {"type": ["string", "null"]},
                "soma_side": {"type": ["string", "null"]},
            }
        }))
        .unwrap();
        let fields = ["bodyid", "status", "user", "type", "soma_side", "notes"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        Self {
            caches: AnnotationCaches::new(),
            schema,
            fields,
            annotations: Mutex::new(HashMap::new()),
            segmentation: HashSet::new(),
            head: "v1.2".to_string(),
            fail_post: None,
            posts: Mutex::new(Vec::new()),
            annotated_fetches: AtomicUsize::new(0),
            existence_queries: Mutex::new(Vec::new()),
        }
    }

    /// Add a stored annotation row; the body also joins the segmentation.
    pub fn with_annotation(mut self, bodyid: BodyId, fields: Value) -> Self {
        let fields: FieldMap = serde_json::from_value(fields).unwrap();
        self.annotations.get_mut().unwrap().insert(bodyid, fields);
        self.segmentation.insert(bodyid);
        self
    }

    pub fn with_bodies(mut self, ids: impl IntoIterator<Item = BodyId>) -> Self {
        self.segmentation.extend(ids);
        self
    }

    pub fn failing_post(mut self, n: usize) -> Self {
        self.fail_post = Some(n);
        self
    }

    pub fn posted_ids(&self) -> Vec<Vec<BodyId>> {
        self.posts.lock().unwrap().iter().map(|(ids, _)| ids.clone()).collect()
    }
}

#[async_trait]
impl AnnotationBackend for MemoryBackend {
    fn caches(&self) -> &AnnotationCaches {
        &self.caches
    }

    async fn fetch_schema_bundle(&self) -> ClioResult<SchemaBundle> {
        Ok(SchemaBundle {
            schema: self.schema.clone(),
            fields: self.fields.clone(),
        })
    }

    async fn fetch_annotated_ids(&self) -> ClioResult<HashSet<BodyId>> {
        self.annotated_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.annotations.lock().unwrap().keys().copied().collect())
    }

    async fn query_existence(&self, ids: &[BodyId]) -> ClioResult<HashMap<BodyId, bool>> {
        self.existence_queries.lock().unwrap().push(ids.to_vec());
        Ok(ids
            .iter()
            .map(|id| (*id, self.segmentation.contains(id)))
            .collect())
    }

    async fn fetch_existing_annotations(&self, ids: &[BodyId]) -> ClioResult<Vec<FieldMap>> {
        let annotations = self.annotations.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| {
                annotations.get(id).map(|fields| {
                    let mut row = fields.clone();
                    row.insert(BODYID_FIELD.to_string(), json!(id));
                    row
                })
            })
            .collect())
    }

    async fn head_version(&self) -> ClioResult<String> {
        Ok(self.head.clone())
    }

    async fn post_annotations(&self, records: &[AnnotationRecord], version: &str) -> ClioResult<()> {
        let mut posts = self.posts.lock().unwrap();
        if self.fail_post == Some(posts.len() + 1) {
            return Err(BackendError::Status {
                status: 500,
                url: "memory://neurons".to_string(),
                body: "internal error".to_string(),
            }
            .into());
        }
        posts.push((records.iter().map(|r| r.bodyid).collect(), version.to_string()));

        let mut annotations = self.annotations.lock().unwrap();
        for record in records {
            let row = annotations.entry(record.bodyid).or_default();
            for (field, value) in &record.fields {
                row.insert(field.clone(), value.clone());
            }
        }
        Ok(())
    }
}
