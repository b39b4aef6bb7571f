use anyhow::Result;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

use crate::config;
use crate::dashboard::server::start_dashboard_server;
use crate::orchestrator::role::Role;
use crate::ui::summary::print_startup_summary;

const SETUP_POLL: Duration = Duration::from_millis(200);

/// Run the full lifecycle in the foreground until Ctrl+C.
pub async fn run(config_file: Option<&Path>, no_dashboard: bool) -> Result<()> {
    let (config, path) = config::load(config_file)?;
    info!(config = %config::display_name(path.as_deref()), "starting");

    let dashboard_port = (config.dashboard.enabled && !no_dashboard).then_some(config.dashboard.port);
    let controller = super::build_controller(config)?;
    controller.start_engine();

    if let Some(port) = dashboard_port {
        let api_controller = controller.clone();
        let cancel = controller.shutdown_token();
        tokio::spawn(async move {
            if let Err(e) = start_dashboard_server(port, api_controller, cancel).await {
                error!("control API failed: {:#}", e);
            }
        });
    }

    let setup = async {
        while !controller.setup_complete() {
            tokio::time::sleep(SETUP_POLL).await;
        }
    };
    tokio::select! {
        _ = setup => {
            let containers: Vec<_> = Role::ALL
                .iter()
                .map(|r| controller.container(*r).snapshot())
                .collect();
            print_startup_summary(&containers, dashboard_port, &controller.warnings());
            tokio::signal::ctrl_c().await?;
        }
        _ = tokio::signal::ctrl_c() => {}
    }

    controller.shutdown().await;
    Ok(())
}
