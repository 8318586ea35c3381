//! Catalog types and error definitions

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while browsing roots or resolving identifiers
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Path outside configured roots: {0}")]
    PermissionDenied(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// What a directory entry is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Folder,
    Slide,
}

/// A node in the browsable tree. Rebuilt from the filesystem on every cache
/// miss, never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryNode {
    /// Stable identifier derived from the absolute path
    pub id: String,
    /// Display name (root nodes use their configured label)
    pub name: String,
    /// Absolute path
    pub path: String,
    pub kind: NodeKind,
    /// Immediate children; `None` until expanded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<DirectoryNode>>,
    /// Recognized slide files directly inside this directory
    pub slide_count: usize,
    /// Whether this folder has browsable subdirectories
    pub has_children: bool,
}

/// Listing entry for a recognized slide file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlideSummary {
    pub id: String,
    pub name: String,
    pub path: String,
    /// File size in bytes
    pub size: u64,
    /// Modification time, seconds since the epoch
    pub mtime: i64,
}
