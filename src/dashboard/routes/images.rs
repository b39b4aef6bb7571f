use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::orchestrator::catalog::CatalogError;
use crate::orchestrator::role::Role;
use crate::orchestrator::state::CatalogSnapshot;

use super::{ApiError, DashboardState, ImageRequest};

pub async fn list_images(State(state): State<DashboardState>) -> Json<Vec<CatalogSnapshot>> {
    Json(
        Role::ALL
            .iter()
            .map(|r| state.controller.catalog_snapshot(*r))
            .collect(),
    )
}

pub async fn refresh(State(state): State<DashboardState>) -> Json<Value> {
    let warnings = state.controller.refresh_images().await;
    Json(json!({ "warnings": warnings }))
}

/// Start a pull in the background. Pulls take minutes, so the reply only
/// says whether one was started.
pub async fn download(
    State(state): State<DashboardState>,
    Path(role): Path<Role>,
    Json(req): Json<ImageRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if !state.controller.catalog().belongs_to(role, &req.image) {
        let e = CatalogError::WrongRole { role, image: req.image };
        return Err(ApiError::new(StatusCode::BAD_REQUEST, e.to_string()));
    }
    if state.controller.catalog().is_downloading(&req.image) {
        return Ok((StatusCode::OK, Json(json!({ "status": "already_in_progress" }))));
    }
    state.controller.spawn_download(role, req.image);
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "started" }))))
}

pub async fn cancel(
    State(state): State<DashboardState>,
    Path(role): Path<Role>,
    Json(req): Json<ImageRequest>,
) -> Json<Value> {
    let cancelled = state.controller.cancel_download(role, &req.image);
    Json(json!({ "cancelled": cancelled }))
}

pub async fn delete(
    State(state): State<DashboardState>,
    Path(role): Path<Role>,
    Json(req): Json<ImageRequest>,
) -> Result<Json<Value>, ApiError> {
    match state.controller.delete(role, &req.image).await {
        Ok(()) => Ok(Json(json!({ "deleted": req.image }))),
        Err(e @ CatalogError::InUse(_)) => Err(ApiError::new(StatusCode::CONFLICT, e.to_string())),
        Err(e) => Err(ApiError::internal(e)),
    }
}
