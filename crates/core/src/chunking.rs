//! Upload batching.

use std::ops::Range;

use serde::Serialize;

use crate::error::ValidationError;

/// Records per upload request unless the caller asks otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 50;

/// Split `total` records into contiguous index ranges of at most
/// `chunk_size`, in order.
pub fn plan_chunks(total: usize, chunk_size: usize) -> Result<Vec<Range<usize>>, ValidationError> {
    if chunk_size == 0 {
        return Err(ValidationError::InvalidInput(
            "chunk size must be at least 1".to_string(),
        ));
    }
    Ok((0..total)
        .step_by(chunk_size)
        .map(|start| start..(start + chunk_size).min(total))
        .collect())
}

/// Cumulative upload progress, reported after each chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UploadProgress {
    /// Zero-based index of the chunk just sent.
    pub chunk_index: usize,
    pub chunks: usize,
    /// Records applied remotely so far.
    pub uploaded: usize,
    pub total: usize,
}

impl UploadProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.uploaded as f64 / self.total as f64
        }
    }
}
