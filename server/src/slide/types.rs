//! Slide-related types and error definitions

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::CatalogError;

/// Errors that can occur when producing slide artifacts
#[derive(Debug, Error)]
pub enum SlideError {
    #[error("Slide not found: {0}")]
    NotFound(String),

    #[error("Path outside configured roots: {0}")]
    PermissionDenied(String),

    #[error("Failed to open slide: {0}")]
    OpenError(String),

    #[error("Failed to read tile: {0}")]
    TileError(String),

    #[error("Invalid level: {0}")]
    InvalidLevel(u32),

    #[error("Invalid tile coordinates: level={level}, x={x}, y={y}")]
    InvalidTileCoordinates { level: u32, x: u32, y: u32 },

    #[error("Decode concurrency limit reached, queue full")]
    Backpressure,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<CatalogError> for SlideError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::NotFound(s) => SlideError::NotFound(s),
            CatalogError::PermissionDenied(s) => SlideError::PermissionDenied(s),
            CatalogError::IoError(e) => SlideError::IoError(e),
        }
    }
}

/// Metadata for a whole-slide image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlideMetadata {
    /// Stable identifier derived from the path
    pub id: String,
    /// Display name (file name)
    pub name: String,
    /// Absolute path
    pub path: String,
    /// Full resolution width in pixels
    pub width: u64,
    /// Full resolution height in pixels
    pub height: u64,
    /// Tile edge length for serving
    pub tile_size: u32,
    /// Number of deep-zoom levels
    pub num_levels: u32,
    /// Native pyramid level count reported by the reader
    pub level_count: u32,
    /// File format (svs, ndpi, ...)
    pub format: String,
    /// Scanner vendor (if available)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    /// Objective power (if available)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objective_power: Option<String>,
    /// Microns per pixel X (if available)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mpp_x: Option<f64>,
    /// Microns per pixel Y (if available)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mpp_y: Option<f64>,
    /// Names of embedded associated images (thumbnail, macro, label, ...)
    #[serde(default)]
    pub associated_images: Vec<String>,
    /// Total size on disk; for multi-file formats this includes the sidecar
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// Modification time, seconds since the epoch
    pub mtime: i64,
}

/// Request for a specific deep-zoom tile
#[derive(Debug, Clone)]
pub struct TileRequest {
    pub slide_id: String,
    /// Deep-zoom level (0 = 1x1, max = full resolution)
    pub level: u32,
    pub x: u32,
    pub y: u32,
}
