use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::orchestrator::Controller;

use super::routes::{self, DashboardState};

pub async fn start_dashboard_server(
    port: u16,
    controller: Arc<Controller>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let state = DashboardState { controller };

    let app = routes::api_router(state).layer(CorsLayer::permissive());

    let addr = format!("127.0.0.1:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "control API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;

    Ok(())
}
