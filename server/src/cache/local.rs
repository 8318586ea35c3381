//! Process-local cache tier
//!
//! A bounded LRU map of byte payloads with lazy TTL expiry and a best-effort
//! JSON snapshot on disk so warm state survives a process restart. Reads
//! refresh recency; inserting beyond capacity evicts the least-recently-used
//! entry.
//!
//! Expiry uses `tokio::time::Instant`, so tests can drive it with a paused
//! runtime clock instead of wall-clock sleeps.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::backend::{CacheBackend, CacheHealth};

/// A cached payload with its optional expiry deadline
struct LocalEntry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl LocalEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// Serialized snapshot row; TTLs are stored as time remaining at save
#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    key: String,
    value: Vec<u8>,
    ttl_remaining_ms: Option<u64>,
}

/// Bounded in-process cache tier with disk persistence
pub struct LocalBackend {
    entries: RwLock<LruCache<String, LocalEntry>>,
    snapshot_path: Option<PathBuf>,
}

impl LocalBackend {
    /// Create a local tier holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            snapshot_path: None,
        }
    }

    /// Create a local tier that snapshots to `path` on shutdown/periodically
    pub fn with_snapshot(capacity: usize, path: impl Into<PathBuf>) -> Self {
        let mut backend = Self::new(capacity);
        backend.snapshot_path = Some(path.into());
        backend
    }

    /// Number of live entries (expired-but-unreaped entries included)
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Load the snapshot file, if any. Absence or corruption leaves the
    /// cache empty; startup must never fail on cache state.
    pub async fn load_snapshot(&self) {
        let Some(path) = self.snapshot_path.as_deref() else {
            return;
        };
        let rows = match read_snapshot(path) {
            Ok(Some(rows)) => rows,
            Ok(None) => return,
            Err(e) => {
                warn!("Ignoring unreadable cache snapshot {:?}: {}", path, e);
                return;
            }
        };

        let now = Instant::now();
        let mut entries = self.entries.write().await;
        // Rows are saved most-recent-first; insert oldest-first so LRU
        // ordering is restored.
        let count = rows.len();
        for row in rows.into_iter().rev() {
            entries.put(
                row.key,
                LocalEntry {
                    value: Bytes::from(row.value),
                    expires_at: row
                        .ttl_remaining_ms
                        .map(|ms| now + Duration::from_millis(ms)),
                },
            );
        }
        debug!("Loaded {} cache entries from snapshot {:?}", count, path);
    }

    /// Write the current entries to the snapshot file, best effort
    pub async fn save_snapshot(&self) {
        let Some(path) = self.snapshot_path.as_deref() else {
            return;
        };
        let now = Instant::now();
        let rows: Vec<PersistedEntry> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .filter(|(_, entry)| !entry.is_expired(now))
                .map(|(key, entry)| PersistedEntry {
                    key: key.clone(),
                    value: entry.value.to_vec(),
                    ttl_remaining_ms: entry
                        .expires_at
                        .map(|deadline| deadline.saturating_duration_since(now).as_millis() as u64),
                })
                .collect()
        };

        match serde_json::to_vec(&rows) {
            Ok(data) => {
                if let Err(e) = std::fs::write(path, data) {
                    warn!("Failed to write cache snapshot {:?}: {}", path, e);
                } else {
                    debug!("Saved {} cache entries to snapshot {:?}", rows.len(), path);
                }
            }
            Err(e) => warn!("Failed to serialize cache snapshot: {}", e),
        }
    }
}

fn read_snapshot(path: &Path) -> std::io::Result<Option<Vec<PersistedEntry>>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read(path)?;
    match serde_json::from_slice(&data) {
        Ok(rows) => Ok(Some(rows)),
        Err(e) => Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
    }
}

#[async_trait]
impl CacheBackend for LocalBackend {
    async fn get(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let expired = entries.peek(key).is_some_and(|e| e.is_expired(now));
        if expired {
            entries.pop(key);
            return None;
        }
        entries.get(key).map(|e| e.value.clone())
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) {
        let entry = LocalEntry {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
        };
        self.entries.write().await.put(key.to_string(), entry);
    }

    async fn delete(&self, key: &str) {
        self.entries.write().await.pop(key);
    }

    async fn exists(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    async fn health(&self) -> CacheHealth {
        CacheHealth {
            available: true,
            backend: "local",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set_delete() {
        let cache = LocalBackend::new(8);

        assert!(cache.get("k").await.is_none());
        cache.set("k", Bytes::from_static(b"v"), None).await;
        assert_eq!(cache.get("k").await, Some(Bytes::from_static(b"v")));
        assert!(cache.exists("k").await);

        cache.delete("k").await;
        assert!(cache.get("k").await.is_none());
        assert!(!cache.exists("k").await);
    }

    #[tokio::test]
    async fn test_lru_eviction_at_capacity() {
        let cache = LocalBackend::new(2);
        cache.set("a", Bytes::from_static(b"1"), None).await;
        cache.set("b", Bytes::from_static(b"2"), None).await;

        // Touch "a" so "b" becomes least recently used
        assert!(cache.get("a").await.is_some());

        cache.set("c", Bytes::from_static(b"3"), None).await;
        assert!(cache.get("a").await.is_some());
        assert!(cache.get("b").await.is_none());
        assert!(cache.get("c").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_with_paused_clock() {
        let cache = LocalBackend::new(8);
        cache
            .set("k", Bytes::from_static(b"v"), Some(Duration::from_secs(1)))
            .await;

        assert!(cache.exists("k").await);
        assert_eq!(cache.get("k").await, Some(Bytes::from_static(b"v")));

        tokio::time::advance(Duration::from_millis(1_100)).await;

        assert!(!cache.exists("k").await);
        assert!(cache.get("k").await.is_none());
        // Lazy reap removed the entry on read
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");

        let cache = LocalBackend::with_snapshot(8, &path);
        cache.set("a", Bytes::from_static(b"alpha"), None).await;
        cache
            .set("b", Bytes::from_static(b"beta"), Some(Duration::from_secs(3600)))
            .await;
        cache.save_snapshot().await;

        let restored = LocalBackend::with_snapshot(8, &path);
        restored.load_snapshot().await;
        assert_eq!(restored.get("a").await, Some(Bytes::from_static(b"alpha")));
        assert_eq!(restored.get("b").await, Some(Bytes::from_static(b"beta")));
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        std::fs::write(&path, b"not json at all").unwrap();

        let cache = LocalBackend::with_snapshot(8, &path);
        cache.load_snapshot().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_missing_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalBackend::with_snapshot(8, dir.path().join("absent.json"));
        cache.load_snapshot().await;
        assert!(cache.is_empty().await);
    }
}
