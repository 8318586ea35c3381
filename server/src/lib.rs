//! Whole-slide image browsing and tile server
//!
//! Serves a catalog of slide directories and OpenSeadragon-compatible
//! deep-zoom tiles, backed by a tiered cache: an optional shared Redis tier
//! for cross-worker reuse and a bounded in-process tier that keeps working
//! when Redis is down.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod etag;
pub mod slide;

pub use cache::{CacheBackend, LocalBackend, RedisBackend, TieredCache};
pub use catalog::{CatalogService, PathResolver};
pub use config::Config;
pub use slide::TileProducer;
