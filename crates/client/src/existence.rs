//! Two-tier body existence check.
//!
//! Bodies that already carry an annotation are known to exist; that set is
//! cached per client. Only the remaining IDs go to the segmentation store,
//! in one batched query.

use std::collections::{BTreeSet, HashMap};

use clio_core::types::BodyId;

use crate::backend::AnnotationBackend;
use crate::error::ClioResult;

/// Map every ID in `ids` to whether the body exists.
///
/// The result has exactly one entry per distinct input ID. An ID the
/// segmentation store leaves out of its answer is reported as missing.
pub async fn exists<B>(backend: &B, ids: &[BodyId]) -> ClioResult<HashMap<BodyId, bool>>
where
    B: AnnotationBackend + ?Sized,
{
    let ids: BTreeSet<BodyId> = ids.iter().copied().collect();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let annotated = backend.annotated_ids().await?;
    let (known, unknown): (Vec<BodyId>, Vec<BodyId>) =
        ids.into_iter().partition(|id| annotated.contains(id));

    let mut result: HashMap<BodyId, bool> = known.iter().map(|id| (*id, true)).collect();
    if unknown.is_empty() {
        return Ok(result);
    }

    tracing::debug!(
        annotated = known.len(),
        queried = unknown.len(),
        "Checking segmentation for unannotated bodies"
    );
    let answered = backend.query_existence(&unknown).await?;
    for id in unknown {
        result.insert(id, answered.get(&id).copied().unwrap_or(false));
    }
    Ok(result)
}
