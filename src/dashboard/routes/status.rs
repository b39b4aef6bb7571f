use axum::extract::State;
use axum::Json;

use crate::orchestrator::state::StatusSnapshot;

use super::DashboardState;

pub async fn get_status(State(state): State<DashboardState>) -> Json<StatusSnapshot> {
    Json(state.controller.status_snapshot())
}
