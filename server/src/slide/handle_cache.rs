//! Bounded pool of open slide handles
//!
//! Opening a whole-slide file is expensive, so handles are pooled with O(1)
//! LRU ordering: an `IndexMap` keeps insertion order, and refreshing recency
//! means removing and re-inserting at the end. Recency is refreshed
//! probabilistically (one access in N) so hot reads stay on the read lock.
//!
//! Slide metadata lives in a `DashMap` beside the handles: it is consulted
//! on every tile request but written once per slide.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use indexmap::IndexMap;
use openslide_rs::OpenSlide;
use tokio::sync::RwLock;
use tracing::debug;

use super::types::{SlideError, SlideMetadata};

/// Refresh LRU position once per this many accesses
const LRU_REFRESH_PERIOD: u64 = 8;

pub struct SlideHandleCache {
    handles: RwLock<IndexMap<String, Arc<OpenSlide>>>,
    metadata: DashMap<String, Arc<SlideMetadata>>,
    max_handles: usize,
    access_counter: AtomicU64,
}

impl SlideHandleCache {
    pub fn new(max_handles: usize) -> Self {
        Self {
            handles: RwLock::new(IndexMap::with_capacity(max_handles)),
            metadata: DashMap::new(),
            max_handles: max_handles.max(1),
            access_counter: AtomicU64::new(0),
        }
    }

    /// Get a pooled handle, opening the slide on first use. Evicts the
    /// least-recently-used handle (and its metadata) past capacity.
    pub async fn get_or_open(&self, id: &str, path: &Path) -> Result<Arc<OpenSlide>, SlideError> {
        if let Some(handle) = self.get_cached(id).await {
            return Ok(handle);
        }

        let mut handles = self.handles.write().await;
        // Double-check: another task may have opened it while we waited
        if let Some(handle) = handles.get(id) {
            return Ok(Arc::clone(handle));
        }

        debug!("Opening slide {} at {:?}", id, path);
        let handle = OpenSlide::new(path)
            .map_err(|e| SlideError::OpenError(format!("failed to open {:?}: {}", path, e)))?;
        let handle = Arc::new(handle);

        if handles.len() >= self.max_handles
            && let Some((evicted_id, _)) = handles.shift_remove_index(0)
        {
            debug!("Evicted slide handle: {}", evicted_id);
            self.metadata.remove(&evicted_id);
        }

        handles.insert(id.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Get a pooled handle without opening anything
    pub async fn get_cached(&self, id: &str) -> Option<Arc<OpenSlide>> {
        let handle = {
            let handles = self.handles.read().await;
            handles.get(id).map(Arc::clone)
        };
        let handle = handle?;

        let count = self.access_counter.fetch_add(1, Ordering::Relaxed);
        if count % LRU_REFRESH_PERIOD == 0 {
            // Best effort; a racing refresh only reorders recency
            let mut handles = self.handles.write().await;
            if let Some(h) = handles.shift_remove(id) {
                handles.insert(id.to_string(), h);
            }
        }
        Some(handle)
    }

    pub fn get_metadata(&self, id: &str) -> Option<Arc<SlideMetadata>> {
        self.metadata.get(id).map(|r| Arc::clone(r.value()))
    }

    pub fn set_metadata(&self, id: &str, meta: Arc<SlideMetadata>) {
        self.metadata.insert(id.to_string(), meta);
    }
}
