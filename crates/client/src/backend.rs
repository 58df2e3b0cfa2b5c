//! The seam between annotation workflows and the store they talk to.
//!
//! [`ClioClient`](crate::ClioClient) is the HTTP implementation. The
//! existence check, uploader and [`set_annotations`](crate::set_annotations)
//! only see this trait, so they run unchanged against an in-memory store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use clio_core::types::{AnnotationRecord, BodyId, FieldMap};

use crate::cache::{AnnotationCaches, SchemaBundle};
use crate::error::ClioResult;

#[async_trait]
pub trait AnnotationBackend: Send + Sync {
    /// Caches owned by this backend instance.
    fn caches(&self) -> &AnnotationCaches;

    /// Fetch the annotation JSON schema and the known field names.
    async fn fetch_schema_bundle(&self) -> ClioResult<SchemaBundle>;

    /// Fetch every body ID that has at least one annotation.
    async fn fetch_annotated_ids(&self) -> ClioResult<HashSet<BodyId>>;

    /// Ask the segmentation store which of `ids` exist.
    async fn query_existence(&self, ids: &[BodyId]) -> ClioResult<HashMap<BodyId, bool>>;

    /// Current annotation rows for `ids`.
    async fn fetch_existing_annotations(&self, ids: &[BodyId]) -> ClioResult<Vec<FieldMap>>;

    /// The dataset's current head version.
    async fn head_version(&self) -> ClioResult<String>;

    /// Write one batch of annotation records. Never retried.
    async fn post_annotations(&self, records: &[AnnotationRecord], version: &str)
        -> ClioResult<()>;

    /// Schema bundle, fetched once and cached.
    async fn schema(&self) -> ClioResult<Arc<SchemaBundle>> {
        self.caches()
            .schema
            .get_or_try_init(|| self.fetch_schema_bundle())
            .await
    }

    /// Annotated body IDs, fetched once and cached.
    async fn annotated_ids(&self) -> ClioResult<Arc<HashSet<BodyId>>> {
        self.caches()
            .annotated_ids
            .get_or_try_init(|| self.fetch_annotated_ids())
            .await
    }
}
