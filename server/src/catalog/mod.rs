//! Directory index and slide identifier resolution
//!
//! This module provides:
//! - filesystem scanning with include/exclude rules and sidecar folding
//! - `PathResolver` mapping stable slide identifiers to validated paths
//! - `CatalogService` serving the browsable tree and slide listings
//! - HTTP routes for the browsing API

mod resolver;
pub mod routes;
mod scan;
mod service;
mod types;

pub use resolver::PathResolver;
pub use routes::{CatalogAppState, catalog_routes};
pub use scan::stable_slide_id;
pub use service::CatalogService;
pub use types::{CatalogError, DirectoryNode, NodeKind, SlideSummary};
