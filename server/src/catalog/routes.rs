//! HTTP route handlers for the browsing API

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::service::CatalogService;
use super::types::{CatalogError, DirectoryNode, SlideSummary};

/// Application state for catalog routes
#[derive(Clone)]
pub struct CatalogAppState {
    pub catalog: Arc<CatalogService>,
}

/// Error response for the browsing API
#[derive(Debug, Serialize)]
pub struct CatalogErrorResponse {
    pub error: String,
    pub code: String,
}

impl From<CatalogError> for CatalogErrorResponse {
    fn from(e: CatalogError) -> Self {
        let code = match &e {
            CatalogError::NotFound(_) => "not_found",
            CatalogError::PermissionDenied(_) => "permission_denied",
            CatalogError::IoError(_) => "io_error",
        };
        Self {
            error: e.to_string(),
            code: code.to_string(),
        }
    }
}

impl IntoResponse for CatalogErrorResponse {
    fn into_response(self) -> Response {
        let status = match self.code.as_str() {
            "not_found" => StatusCode::NOT_FOUND,
            "permission_denied" => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: String,
}

/// GET /api/tree - Shallow nodes for every configured root
pub async fn get_tree(
    State(state): State<CatalogAppState>,
) -> Result<Json<Vec<DirectoryNode>>, CatalogErrorResponse> {
    let nodes = state.catalog.tree().await.map_err(|e| {
        tracing::error!("Failed to build tree: {}", e);
        CatalogErrorResponse::from(e)
    })?;
    Ok(Json(nodes))
}

/// GET /api/expand?path= - Immediate children of a directory
pub async fn expand_dir(
    State(state): State<CatalogAppState>,
    Query(query): Query<PathQuery>,
) -> Result<Json<Vec<DirectoryNode>>, CatalogErrorResponse> {
    let children = state.catalog.expand(&query.path).await.map_err(|e| {
        tracing::debug!("Failed to expand {}: {}", query.path, e);
        CatalogErrorResponse::from(e)
    })?;
    Ok(Json(children))
}

/// GET /api/dir?path= - Slide listing for a directory
pub async fn list_dir(
    State(state): State<CatalogAppState>,
    Query(query): Query<PathQuery>,
) -> Result<Json<Vec<SlideSummary>>, CatalogErrorResponse> {
    let slides = state.catalog.list_slides(&query.path).await.map_err(|e| {
        tracing::debug!("Failed to list {}: {}", query.path, e);
        CatalogErrorResponse::from(e)
    })?;
    Ok(Json(slides))
}

/// Build catalog API routes
pub fn catalog_routes(state: CatalogAppState) -> Router {
    Router::new()
        .route("/tree", get(get_tree))
        .route("/expand", get(expand_dir))
        .route("/dir", get(list_dir))
        .with_state(state)
}
