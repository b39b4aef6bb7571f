use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::orchestrator::provision::ProvisioningReport;
use crate::orchestrator::CleanCertsReport;

use super::{ApiError, DashboardState};

pub async fn provision_now(
    State(state): State<DashboardState>,
) -> Result<Json<ProvisioningReport>, ApiError> {
    state
        .controller
        .run_provisioning_now()
        .await
        .map(Json)
        .map_err(ApiError::internal)
}

pub async fn provision_agent(State(state): State<DashboardState>) -> Result<Json<Value>, ApiError> {
    let outcome = state
        .controller
        .provision_agent()
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({ "outcome": outcome, "message": outcome.message() })))
}

pub async fn clean_certs(
    State(state): State<DashboardState>,
) -> Result<Json<CleanCertsReport>, ApiError> {
    state
        .controller
        .clean_certs()
        .await
        .map(Json)
        .map_err(ApiError::internal)
}
