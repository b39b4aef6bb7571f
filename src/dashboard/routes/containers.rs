use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::orchestrator::role::Role;
use crate::orchestrator::supervisor::StartError;
use crate::orchestrator::ToggleError;

use super::{ApiError, DashboardState};

pub async fn toggle(
    State(state): State<DashboardState>,
    Path(role): Path<Role>,
) -> Result<Json<Value>, ApiError> {
    match state.controller.toggle(role).await {
        Ok(outcome) => Ok(Json(json!({ "role": role, "outcome": outcome }))),
        Err(e @ ToggleError::Start(StartError::NoImageSelected(_))) => {
            Err(ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))
        }
        Err(e) => Err(ApiError::internal(e)),
    }
}

pub async fn run(
    State(state): State<DashboardState>,
    Path(role): Path<Role>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state
        .controller
        .run_management_agent(role)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({
        "role": role,
        "outcome": outcome,
        "success": outcome.is_success(),
        "message": outcome.message(),
    })))
}
