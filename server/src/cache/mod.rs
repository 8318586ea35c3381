//! Layered cache for derived slide artifacts
//!
//! This module provides:
//! - `CacheBackend` trait: uniform get/set/delete/exists over a keyed store
//! - `RedisBackend`: the shared, cross-worker tier
//! - `LocalBackend`: the bounded in-process tier with disk persistence
//! - `TieredCache`: the composition every service talks to
//!
//! Shared-tier failures never propagate to callers; they degrade to
//! local-tier-only operation and show up in `health()`.

mod backend;
mod local;
mod remote;
mod tiered;

pub use backend::{CacheBackend, CacheHealth, cache_key};
pub use local::LocalBackend;
pub use remote::{RedisBackend, SharedTierError};
pub use tiered::TieredCache;
