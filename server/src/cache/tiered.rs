//! Layered cache combining the shared and local tiers
//!
//! Reads consult the local tier first, then the shared tier. Writes go to
//! the shared tier and, when write-through is on, mirror into the local tier
//! so hot keys stop paying the network round-trip. With no shared tier
//! configured (or one that is down), everything runs on the local tier; a
//! request never fails because the shared tier is unreachable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use metrics::counter;

use super::backend::{CacheBackend, CacheHealth};
use super::local::LocalBackend;

/// The layered cache every service reads and writes through
pub struct TieredCache {
    shared: Option<Arc<dyn CacheBackend>>,
    local: Arc<LocalBackend>,
    write_through: bool,
}

impl TieredCache {
    pub fn new(
        shared: Option<Arc<dyn CacheBackend>>,
        local: Arc<LocalBackend>,
        write_through: bool,
    ) -> Self {
        Self {
            shared,
            local,
            write_through,
        }
    }

    /// Local-tier-only cache (no shared tier configured)
    pub fn local_only(local: Arc<LocalBackend>) -> Self {
        Self::new(None, local, true)
    }

    /// Whether a shared tier was configured at startup
    pub fn shared_configured(&self) -> bool {
        self.shared.is_some()
    }

    /// A shared tier is configured but currently unreachable
    pub async fn degraded(&self) -> bool {
        match &self.shared {
            Some(shared) => !shared.health().await.available,
            None => false,
        }
    }

    /// Handle to the local tier, for snapshot persistence
    pub fn local(&self) -> &Arc<LocalBackend> {
        &self.local
    }
}

#[async_trait]
impl CacheBackend for TieredCache {
    async fn get(&self, key: &str) -> Option<Bytes> {
        if let Some(value) = self.local.get(key).await {
            counter!("wsibrowse_cache_hits_total", "tier" => "local").increment(1);
            return Some(value);
        }
        if let Some(shared) = &self.shared
            && let Some(value) = shared.get(key).await
        {
            counter!("wsibrowse_cache_hits_total", "tier" => "shared").increment(1);
            // Promote so the next read skips the network round-trip; the
            // bounded LRU reclaims the slot if the key never comes back
            self.local.set(key, value.clone(), None).await;
            return Some(value);
        }
        counter!("wsibrowse_cache_misses_total").increment(1);
        None
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) {
        match &self.shared {
            Some(shared) => {
                shared.set(key, value.clone(), ttl).await;
                if self.write_through {
                    self.local.set(key, value, ttl).await;
                }
            }
            None => self.local.set(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) {
        self.local.delete(key).await;
        if let Some(shared) = &self.shared {
            shared.delete(key).await;
        }
    }

    async fn exists(&self, key: &str) -> bool {
        if self.local.exists(key).await {
            return true;
        }
        match &self.shared {
            Some(shared) => shared.exists(key).await,
            None => false,
        }
    }

    async fn health(&self) -> CacheHealth {
        match &self.shared {
            Some(shared) => shared.health().await,
            None => self.local.health().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Stand-in for a shared tier whose transport is down
    struct UnreachableBackend;

    #[async_trait]
    impl CacheBackend for UnreachableBackend {
        async fn get(&self, _key: &str) -> Option<Bytes> {
            None
        }
        async fn set(&self, _key: &str, _value: Bytes, _ttl: Option<Duration>) {}
        async fn delete(&self, _key: &str) {}
        async fn exists(&self, _key: &str) -> bool {
            false
        }
        async fn health(&self) -> CacheHealth {
            CacheHealth {
                available: false,
                backend: "redis",
            }
        }
    }

    /// Shared tier that works, for write-through checks
    struct RecordingBackend {
        inner: LocalBackend,
    }

    #[async_trait]
    impl CacheBackend for RecordingBackend {
        async fn get(&self, key: &str) -> Option<Bytes> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) {
            self.inner.set(key, value, ttl).await;
        }
        async fn delete(&self, key: &str) {
            self.inner.delete(key).await;
        }
        async fn exists(&self, key: &str) -> bool {
            self.inner.exists(key).await
        }
        async fn health(&self) -> CacheHealth {
            CacheHealth {
                available: true,
                backend: "redis",
            }
        }
    }

    #[tokio::test]
    async fn test_local_only_round_trip() {
        let cache = TieredCache::local_only(Arc::new(LocalBackend::new(8)));
        cache.set("k", Bytes::from_static(b"v"), None).await;
        assert_eq!(cache.get("k").await, Some(Bytes::from_static(b"v")));
        assert!(cache.exists("k").await);
        cache.delete("k").await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_failover_to_local_when_shared_unreachable() {
        let cache = TieredCache::new(
            Some(Arc::new(UnreachableBackend)),
            Arc::new(LocalBackend::new(8)),
            true,
        );

        // Writes and reads still succeed, served by the local tier
        cache.set("k", Bytes::from_static(b"v"), None).await;
        assert_eq!(cache.get("k").await, Some(Bytes::from_static(b"v")));
        assert!(cache.exists("k").await);

        // Health reports the degradation
        assert!(cache.degraded().await);
        assert!(!cache.health().await.available);
    }

    #[tokio::test]
    async fn test_write_through_populates_both_tiers() {
        let shared = Arc::new(RecordingBackend {
            inner: LocalBackend::new(8),
        });
        let local = Arc::new(LocalBackend::new(8));
        let cache = TieredCache::new(Some(shared.clone()), local.clone(), true);

        cache.set("k", Bytes::from_static(b"v"), None).await;
        assert!(shared.exists("k").await);
        assert!(local.exists("k").await);
    }

    #[tokio::test]
    async fn test_no_write_through_skips_local() {
        let shared = Arc::new(RecordingBackend {
            inner: LocalBackend::new(8),
        });
        let local = Arc::new(LocalBackend::new(8));
        let cache = TieredCache::new(Some(shared.clone()), local.clone(), false);

        cache.set("k", Bytes::from_static(b"v"), None).await;
        assert!(shared.exists("k").await);
        assert!(!local.exists("k").await);

        // The read still finds it through the shared tier
        assert_eq!(cache.get("k").await, Some(Bytes::from_static(b"v")));
    }

    #[tokio::test]
    async fn test_shared_hit_after_local_miss() {
        let shared = Arc::new(RecordingBackend {
            inner: LocalBackend::new(8),
        });
        shared.set("k", Bytes::from_static(b"v"), None).await;

        let cache = TieredCache::new(Some(shared), Arc::new(LocalBackend::new(8)), true);
        assert_eq!(cache.get("k").await, Some(Bytes::from_static(b"v")));
    }

    #[tokio::test]
    async fn test_shared_hit_is_promoted_into_local() {
        let shared = Arc::new(RecordingBackend {
            inner: LocalBackend::new(8),
        });
        shared.set("k", Bytes::from_static(b"v"), None).await;

        let local = Arc::new(LocalBackend::new(8));
        let cache = TieredCache::new(Some(shared.clone()), local.clone(), true);

        assert!(!local.exists("k").await);
        assert_eq!(cache.get("k").await, Some(Bytes::from_static(b"v")));

        // The second read is served locally, even with the shared tier gone
        assert!(local.exists("k").await);
        shared.delete("k").await;
        assert_eq!(cache.get("k").await, Some(Bytes::from_static(b"v")));
    }

    /// Shared tier that drops everything while `down` is set
    struct FlakyBackend {
        inner: LocalBackend,
        down: std::sync::atomic::AtomicBool,
    }

    impl FlakyBackend {
        fn new() -> Self {
            Self {
                inner: LocalBackend::new(8),
                down: std::sync::atomic::AtomicBool::new(true),
            }
        }

        fn is_down(&self) -> bool {
            self.down.load(std::sync::atomic::Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl CacheBackend for FlakyBackend {
        async fn get(&self, key: &str) -> Option<Bytes> {
            if self.is_down() {
                return None;
            }
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) {
            if !self.is_down() {
                self.inner.set(key, value, ttl).await;
            }
        }
        async fn delete(&self, key: &str) {
            if !self.is_down() {
                self.inner.delete(key).await;
            }
        }
        async fn exists(&self, key: &str) -> bool {
            !self.is_down() && self.inner.exists(key).await
        }
        async fn health(&self) -> CacheHealth {
            CacheHealth {
                available: !self.is_down(),
                backend: "redis",
            }
        }
    }

    #[tokio::test]
    async fn test_writes_repopulate_shared_tier_after_recovery() {
        let shared = Arc::new(FlakyBackend::new());
        let cache = TieredCache::new(Some(shared.clone()), Arc::new(LocalBackend::new(8)), true);

        // While the shared tier is down the write still lands locally
        cache.set("k", Bytes::from_static(b"v"), None).await;
        assert!(cache.degraded().await);
        assert!(!shared.inner.exists("k").await);
        assert_eq!(cache.get("k").await, Some(Bytes::from_static(b"v")));

        // After recovery, new writes reach the shared tier again
        shared.down.store(false, std::sync::atomic::Ordering::Relaxed);
        cache.set("k2", Bytes::from_static(b"w"), None).await;
        assert!(!cache.degraded().await);
        assert!(shared.inner.exists("k2").await);
    }

    #[tokio::test]
    async fn test_not_degraded_without_shared_tier() {
        let cache = TieredCache::local_only(Arc::new(LocalBackend::new(8)));
        assert!(!cache.degraded().await);
        assert!(cache.health().await.available);
        assert_eq!(cache.health().await.backend, "local");
    }
}
