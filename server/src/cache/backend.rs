//! Cache backend contract and key helpers

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Keys longer than this collapse to a digest so backend key limits never bite
const MAX_KEY_LEN: usize = 200;

/// Health probe result for a cache backend
#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    /// Whether the backend is currently reachable
    pub available: bool,
    /// Backend name ("redis" or "local")
    pub backend: &'static str,
}

/// Uniform get/set/delete/exists contract over a keyed byte store.
///
/// Implementations absorb their own transport failures: a failed read is a
/// miss, a failed write is a no-op. Callers only observe degradation through
/// `health()`.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch the payload stored under `key`, if present and unexpired
    async fn get(&self, key: &str) -> Option<Bytes>;

    /// Store `value` under `key`; `None` TTL means no expiry
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>);

    /// Remove the entry stored under `key`
    async fn delete(&self, key: &str);

    /// Whether an unexpired entry exists under `key`
    async fn exists(&self, key: &str) -> bool;

    /// Probe backend reachability
    async fn health(&self) -> CacheHealth;
}

/// Build a namespaced cache key from its parts.
///
/// The first part is the namespace (`tile`, `thumb`, `meta`, `tree`, `dir`,
/// `path`) so artifact classes never collide and expire independently.
pub fn cache_key(parts: &[&str]) -> String {
    let joined = parts.join(":");
    if joined.len() <= MAX_KEY_LEN {
        return joined;
    }
    // Keep the namespace readable, digest the rest
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    format!("{}:{:x}", parts[0], hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_short() {
        assert_eq!(cache_key(&["tile", "abc", "3", "1", "2"]), "tile:abc:3:1:2");
    }

    #[test]
    fn test_cache_key_long_is_digested() {
        let long = "x".repeat(400);
        let key = cache_key(&["tree", &long]);
        assert!(key.starts_with("tree:"));
        assert!(key.len() < 100);
        // Deterministic
        assert_eq!(key, cache_key(&["tree", &long]));
    }

    #[test]
    fn test_cache_key_namespaces_differ() {
        assert_ne!(cache_key(&["tile", "a"]), cache_key(&["thumb", "a"]));
    }
}
