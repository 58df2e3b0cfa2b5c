//! Conflict-aware annotation writes.
//!
//! [`set_annotations`] runs the whole write path against a backend:
//! normalize input, validate against the schema, check that every body
//! exists, merge against existing annotations under the protection policy,
//! and upload the result in chunks. Input problems surface before anything
//! is written.

use std::collections::HashSet;

use clio_core::chunking::{plan_chunks, UploadProgress, DEFAULT_CHUNK_SIZE};
use clio_core::merge::{merge, ExistingAnnotationIndex, MergeOptions, ProtectionPolicy};
use clio_core::schema::validate;
use clio_core::table::AnnotationInput;
use clio_core::types::{AnnotationRecord, BodyId};
use serde::Serialize;

use crate::backend::AnnotationBackend;
use crate::error::ClioResult;
use crate::existence::exists;
use crate::upload::upload;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetAnnotationsOptions {
    pub protect: ProtectionPolicy,
    /// Send empty values as explicit nulls, clearing the stored value.
    pub write_empty_fields: bool,
    pub chunk_size: usize,
    /// Version to write at; the head version when `None`.
    pub version: Option<String>,
    /// Compute the write-set without sending it.
    pub dry_run: bool,
}

impl Default for SetAnnotationsOptions {
    fn default() -> Self {
        Self {
            protect: ProtectionPolicy::default(),
            write_empty_fields: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            version: None,
            dry_run: false,
        }
    }
}

impl SetAnnotationsOptions {
    fn merge_options(&self) -> MergeOptions {
        MergeOptions {
            protect: self.protect.clone(),
            write_empty_fields: self.write_empty_fields,
        }
    }
}

/// What a [`set_annotations`] call wrote, or would write on a dry run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadReport {
    /// Records in the write-set.
    pub total: usize,
    /// Records applied remotely; zero on a dry run.
    pub uploaded: usize,
    pub chunks: usize,
    pub version: String,
    pub dry_run: bool,
    /// Input bodies that needed no write.
    pub skipped: Vec<BodyId>,
    /// The planned write-set, in input order.
    pub writes: Vec<AnnotationRecord>,
}

/// Validate, merge and upload annotations for the backend's dataset.
pub async fn set_annotations<B, F>(
    backend: &B,
    input: impl Into<AnnotationInput>,
    options: &SetAnnotationsOptions,
    on_progress: F,
) -> ClioResult<UploadReport>
where
    B: AnnotationBackend + ?Sized,
    F: FnMut(UploadProgress),
{
    let table = input.into().into_table()?;
    let bundle = backend.schema().await?;
    validate(&table, &bundle.schema, &bundle.fields)?;

    let records = table.into_records()?;
    let ids: Vec<BodyId> = records.iter().map(|r| r.bodyid).collect();

    let existence = exists(backend, &ids).await?;

    let existing = if options.protect.needs_existing() {
        let present: Vec<BodyId> = ids
            .iter()
            .copied()
            .filter(|id| existence.get(id) == Some(&true))
            .collect();
        let rows = backend.fetch_existing_annotations(&present).await?;
        ExistingAnnotationIndex::from_rows(&rows)
    } else {
        ExistingAnnotationIndex::new()
    };

    let writes = merge(records, &options.merge_options(), &existence, &existing)?;
    let chunks = plan_chunks(writes.len(), options.chunk_size)?.len();
    let written: HashSet<BodyId> = writes.iter().map(|r| r.bodyid).collect();
    let skipped: Vec<BodyId> = ids.into_iter().filter(|id| !written.contains(id)).collect();

    tracing::info!(
        records = writes.len(),
        skipped = skipped.len(),
        protect = ?options.protect,
        dry_run = options.dry_run,
        "Merged annotation write-set"
    );

    if options.dry_run {
        let version = match &options.version {
            Some(v) => v.clone(),
            None => backend.head_version().await?,
        };
        return Ok(UploadReport {
            total: writes.len(),
            uploaded: 0,
            chunks,
            version,
            dry_run: true,
            skipped,
            writes,
        });
    }

    let summary = upload(
        backend,
        &writes,
        options.chunk_size,
        options.version.as_deref(),
        on_progress,
    )
    .await?;

    Ok(UploadReport {
        total: writes.len(),
        uploaded: summary.uploaded,
        chunks: summary.chunks,
        version: summary.version,
        dry_run: false,
        skipped,
        writes,
    })
}
