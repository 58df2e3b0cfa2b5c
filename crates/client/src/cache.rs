//! Explicit, lazily populated caches owned by a client instance.
//!
//! The annotation schema and the set of annotated body IDs are expensive
//! to fetch and rarely change, so each client keeps one copy of each,
//! fetched on first use and kept until [`LazyCache::invalidate`] is called.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;

use clio_core::schema::AnnotationSchema;
use clio_core::types::BodyId;
use tokio::sync::Mutex;

/// A value fetched on first access and memoized until invalidated.
///
/// Population holds the lock for the duration of the fetch, so concurrent
/// first accesses run the fetch once.
#[derive(Debug)]
pub struct LazyCache<T> {
    slot: Mutex<Option<Arc<T>>>,
}

impl<T> Default for LazyCache<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }
}

impl<T> LazyCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value, running `fetch` to populate it if empty.
    ///
    /// A failed fetch leaves the cache empty.
    pub async fn get_or_try_init<F, Fut, E>(&self, fetch: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(value) = slot.as_ref() {
            return Ok(Arc::clone(value));
        }
        let value = Arc::new(fetch().await?);
        *slot = Some(Arc::clone(&value));
        Ok(value)
    }

    /// The cached value, if populated.
    pub async fn peek(&self) -> Option<Arc<T>> {
        self.slot.lock().await.clone()
    }

    /// Drop the cached value; the next access fetches again.
    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}

/// The schema document plus the store's list of known field names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaBundle {
    pub schema: AnnotationSchema,
    pub fields: BTreeSet<String>,
}

/// The per-client caches used by validation and existence checks.
#[derive(Debug, Default)]
pub struct AnnotationCaches {
    pub schema: LazyCache<SchemaBundle>,
    pub annotated_ids: LazyCache<HashSet<BodyId>>,
}

impl AnnotationCaches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget both cached values so backend-side changes become visible.
    pub async fn invalidate(&self) {
        self.schema.invalidate().await;
        self.annotated_ids.invalidate().await;
    }
}
