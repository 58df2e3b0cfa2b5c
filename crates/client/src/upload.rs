//! Sequential chunked upload of a merged write-set.

use clio_core::chunking::{plan_chunks, UploadProgress};
use clio_core::types::{AnnotationRecord, BodyId};

use crate::backend::AnnotationBackend;
use crate::error::{ClioResult, UploadError};

/// Outcome of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSummary {
    pub uploaded: usize,
    pub chunks: usize,
    pub version: String,
}

/// Send `writes` in order, `chunk_size` records per request.
///
/// `version` defaults to the backend's head version. `on_progress` runs
/// after every successful chunk. The first failing chunk aborts the upload
/// with an [`UploadError`]; chunks sent before it stay applied.
pub async fn upload<B, F>(
    backend: &B,
    writes: &[AnnotationRecord],
    chunk_size: usize,
    version: Option<&str>,
    mut on_progress: F,
) -> ClioResult<UploadSummary>
where
    B: AnnotationBackend + ?Sized,
    F: FnMut(UploadProgress),
{
    let ranges = plan_chunks(writes.len(), chunk_size)?;
    let version = match version {
        Some(v) => v.to_string(),
        None => backend.head_version().await?,
    };

    let total = writes.len();
    let chunks = ranges.len();
    let mut uploaded = 0;

    for (chunk_index, range) in ranges.into_iter().enumerate() {
        let start = range.start;
        let chunk = &writes[range];

        if let Err(e) = backend.post_annotations(chunk, &version).await {
            tracing::error!(
                chunk_index,
                chunks,
                uploaded,
                total,
                error = %e,
                "Annotation upload aborted"
            );
            let unsent: Vec<BodyId> = writes[start..].iter().map(|r| r.bodyid).collect();
            return Err(UploadError {
                chunk_index,
                chunks,
                records_uploaded: uploaded,
                total,
                unsent,
                source: Box::new(e),
            }
            .into());
        }

        uploaded += chunk.len();
        tracing::info!(
            chunk_index,
            chunks,
            records = chunk.len(),
            uploaded,
            total,
            version = %version,
            "Uploaded annotation chunk"
        );
        on_progress(UploadProgress {
            chunk_index,
            chunks,
            uploaded,
            total,
        });
    }

    Ok(UploadSummary {
        uploaded,
        chunks,
        version,
    })
}
