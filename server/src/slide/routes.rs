//! HTTP surface for slide artifacts
//!
//! The deep-zoom routes follow the layout OpenSeadragon derives from a
//! descriptor URL: `GET /dzi/{id}.dzi` for the descriptor and
//! `GET /dzi/{id}_files/{level}/{x}_{y}.jpeg` for tiles.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::etag::{cached_response, weak_etag};

use super::producer::TileProducer;
use super::types::{SlideError, TileRequest};

const META_CACHE_CONTROL: &str = "public, max-age=300";
const THUMB_CACHE_CONTROL: &str = "public, max-age=86400";
const TILE_CACHE_CONTROL: &str = "public, max-age=3600";

#[derive(Clone)]
pub struct SlideAppState {
    pub producer: Arc<TileProducer>,
}

#[derive(Debug, Serialize)]
pub struct SlideErrorResponse {
    pub error: String,
    pub code: String,
}

impl SlideError {
    fn code(&self) -> &'static str {
        match self {
            SlideError::NotFound(_) => "not_found",
            SlideError::PermissionDenied(_) => "permission_denied",
            SlideError::InvalidLevel(_) => "invalid_level",
            SlideError::InvalidTileCoordinates { .. } => "invalid_coordinates",
            SlideError::Backpressure => "backpressure",
            SlideError::OpenError(_) => "open_error",
            SlideError::TileError(_) => "tile_error",
            SlideError::IoError(_) => "io_error",
        }
    }
}

impl IntoResponse for SlideError {
    fn into_response(self) -> Response {
        // Out-of-range pyramid addresses are absent resources, not bad syntax
        let status = match &self {
            SlideError::NotFound(_)
            | SlideError::InvalidLevel(_)
            | SlideError::InvalidTileCoordinates { .. } => StatusCode::NOT_FOUND,
            SlideError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            SlideError::Backpressure => StatusCode::SERVICE_UNAVAILABLE,
            SlideError::OpenError(_) | SlideError::TileError(_) | SlideError::IoError(_) => {
                error!("Slide request failed: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = axum::Json(SlideErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        });
        (status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct ThumbQuery {
    pub max_px: Option<u32>,
}

/// GET /api/meta/{id}
pub async fn get_metadata(
    State(state): State<SlideAppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, SlideError> {
    let meta = state.producer.metadata(&id).await?;
    let json = serde_json::to_vec(meta.as_ref())
        .map_err(|e| SlideError::OpenError(format!("metadata serialization failed: {}", e)))?;
    let etag = weak_etag(&[b"meta", id.as_bytes(), &json]);
    Ok(cached_response(
        &headers,
        &etag,
        "application/json",
        META_CACHE_CONTROL,
        json.into(),
    ))
}

/// GET /api/thumb/{id}?max_px=512
pub async fn get_thumbnail(
    State(state): State<SlideAppState>,
    Path(id): Path<String>,
    Query(query): Query<ThumbQuery>,
    headers: HeaderMap,
) -> Result<Response, SlideError> {
    let jpeg = state.producer.thumbnail(&id, query.max_px).await?;
    let etag = weak_etag(&[b"thumb", id.as_bytes(), &jpeg]);
    Ok(cached_response(
        &headers,
        &etag,
        "image/jpeg",
        THUMB_CACHE_CONTROL,
        jpeg,
    ))
}

/// GET /api/associated/{id}
pub async fn list_associated(
    State(state): State<SlideAppState>,
    Path(id): Path<String>,
) -> Result<axum::Json<Vec<String>>, SlideError> {
    Ok(axum::Json(state.producer.associated_names(&id).await?))
}

/// GET /api/associated/{id}/{name}
pub async fn get_associated_image(
    State(state): State<SlideAppState>,
    Path((id, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, SlideError> {
    let jpeg = state.producer.associated_image(&id, &name).await?;
    let etag = weak_etag(&[b"assoc", id.as_bytes(), name.as_bytes(), &jpeg]);
    Ok(cached_response(
        &headers,
        &etag,
        "image/jpeg",
        THUMB_CACHE_CONTROL,
        jpeg,
    ))
}

/// GET /dzi/{id}.dzi
pub async fn get_dzi_descriptor(
    State(state): State<SlideAppState>,
    Path(file): Path<String>,
    headers: HeaderMap,
) -> Result<Response, SlideError> {
    let id = parse_descriptor_name(&file)
        .ok_or_else(|| SlideError::NotFound(format!("descriptor {}", file)))?;
    let xml = state.producer.dzi(id).await?;
    let etag = weak_etag(&[b"dzi", id.as_bytes(), xml.as_bytes()]);
    Ok(cached_response(
        &headers,
        &etag,
        "application/xml",
        META_CACHE_CONTROL,
        xml.into(),
    ))
}

/// GET /dzi/{id}_files/{level}/{x}_{y}.jpeg
pub async fn get_dzi_tile(
    State(state): State<SlideAppState>,
    Path((dir, level, tile)): Path<(String, u32, String)>,
    headers: HeaderMap,
) -> Result<Response, SlideError> {
    let id = parse_files_dir(&dir)
        .ok_or_else(|| SlideError::NotFound(format!("tile directory {}", dir)))?;
    let (x, y) =
        parse_tile_name(&tile).ok_or_else(|| SlideError::NotFound(format!("tile {}", tile)))?;

    let req = TileRequest {
        slide_id: id.to_string(),
        level,
        x,
        y,
    };
    let jpeg = state.producer.tile(&req).await?;
    // Hashing the bytes keeps the tag tracking regenerated content after a
    // slide file is replaced and the cached tile expires
    let etag = weak_etag(&[
        b"tile",
        id.as_bytes(),
        &level.to_be_bytes(),
        &x.to_be_bytes(),
        &y.to_be_bytes(),
        &jpeg,
    ]);
    Ok(cached_response(
        &headers,
        &etag,
        "image/jpeg",
        TILE_CACHE_CONTROL,
        jpeg,
    ))
}

/// `{id}.dzi` → `{id}`
fn parse_descriptor_name(file: &str) -> Option<&str> {
    file.strip_suffix(".dzi").filter(|id| !id.is_empty())
}

/// `{id}_files` → `{id}`
fn parse_files_dir(dir: &str) -> Option<&str> {
    dir.strip_suffix("_files").filter(|id| !id.is_empty())
}

/// `{x}_{y}.jpeg` (or `.jpg`) → (x, y)
fn parse_tile_name(tile: &str) -> Option<(u32, u32)> {
    let stem = tile
        .strip_suffix(".jpeg")
        .or_else(|| tile.strip_suffix(".jpg"))?;
    let (x, y) = stem.split_once('_')?;
    Some((x.parse().ok()?, y.parse().ok()?))
}

/// Metadata and thumbnail routes, mounted under /api
pub fn slide_api_routes(state: SlideAppState) -> Router {
    Router::new()
        .route("/meta/:id", get(get_metadata))
        .route("/thumb/:id", get(get_thumbnail))
        .route("/associated/:id", get(list_associated))
        .route("/associated/:id/:name", get(get_associated_image))
        .with_state(state)
}

/// Deep-zoom descriptor and tile routes, mounted under /dzi
pub fn dzi_routes(state: SlideAppState) -> Router {
    Router::new()
        .route("/:file", get(get_dzi_descriptor))
        .route("/:dir/:level/:tile", get(get_dzi_tile))
        .with_state(state)
}
