//! Slide identifier to filesystem path resolution
//!
//! Resolutions are cached under `path:{id}` with no TTL; paths change
//! rarely, so entries live until their on-read existence check fails and
//! lazily evicts them. A miss falls back to a targeted walk of the
//! configured roots, teaching the cache every mapping it meets along the
//! way. Concurrent walks for the same identifier are accepted duplicate
//! work; they converge on the same answer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};

use crate::cache::{CacheBackend, TieredCache, cache_key};

use super::scan::{is_slide_file, should_skip, stable_slide_id};
use super::types::CatalogError;

pub struct PathResolver {
    cache: Arc<TieredCache>,
    roots: Vec<PathBuf>,
    extensions: Vec<String>,
    exclude: Vec<String>,
}

impl PathResolver {
    pub fn new(
        cache: Arc<TieredCache>,
        roots: Vec<PathBuf>,
        extensions: Vec<String>,
        exclude: Vec<String>,
    ) -> Self {
        Self {
            cache,
            roots,
            extensions,
            exclude,
        }
    }

    /// Resolve an identifier to a validated filesystem path.
    ///
    /// Never returns a path whose existence check failed in this call.
    pub async fn resolve(&self, id: &str) -> Result<PathBuf, CatalogError> {
        let key = cache_key(&["path", id]);

        if let Some(raw) = self.cache.get(&key).await {
            let path = PathBuf::from(String::from_utf8_lossy(&raw).into_owned());
            if path.exists() {
                return Ok(path);
            }
            debug!("Evicting stale path mapping for {}: {:?}", id, path);
            self.cache.delete(&key).await;
        }

        info!("Path cache miss for {}, walking roots", id);
        let roots = self.roots.clone();
        let extensions = self.extensions.clone();
        let exclude = self.exclude.clone();
        let target = id.to_string();
        let (found, learned) =
            tokio::task::spawn_blocking(move || walk_for_id(&roots, &extensions, &exclude, &target))
                .await
                .map_err(|e| CatalogError::IoError(std::io::Error::other(e)))?;

        for (learned_id, path) in learned {
            self.record(&learned_id, &path).await;
        }

        found.ok_or_else(|| CatalogError::NotFound(format!("slide id {}", id)))
    }

    /// Store one identifier → path mapping (no TTL; evicted lazily)
    pub async fn record(&self, id: &str, path: &Path) {
        let key = cache_key(&["path", id]);
        let value = Bytes::from(path.to_string_lossy().into_owned().into_bytes());
        self.cache.set(&key, value, None).await;
    }
}

/// Depth-first walk across the roots looking for the slide whose stable
/// identifier matches `target`. Returns the match (if any) and every
/// (identifier, path) pair encountered before stopping.
fn walk_for_id(
    roots: &[PathBuf],
    extensions: &[String],
    exclude: &[String],
    target: &str,
) -> (Option<PathBuf>, Vec<(String, PathBuf)>) {
    let mut learned = Vec::new();
    let mut todo: Vec<PathBuf> = roots.to_vec();

    while let Some(dir) = todo.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if should_skip(&name, exclude) {
                continue;
            }
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let path = entry.path();
            if file_type.is_dir() {
                todo.push(path);
            } else if file_type.is_file() && is_slide_file(&name, extensions) {
                let id = stable_slide_id(&path);
                learned.push((id.clone(), path.clone()));
                if id == target {
                    return (Some(path), learned);
                }
            }
        }
    }

    (None, learned)
}
