use anyhow::Result;
use std::path::Path;

use crate::orchestrator::role::Role;
use crate::ui::summary::print_status;

pub async fn run(config_file: Option<&Path>) -> Result<()> {
    let controller = super::connect(config_file).await?;

    let daemon = controller.daemon_status().await;
    for role in Role::ALL {
        controller.container_status(role).await;
    }
    let readiness = controller.service_readiness().await;
    let containers: Vec<_> = Role::ALL
        .iter()
        .map(|r| controller.container(*r).snapshot())
        .collect();

    print_status(
        daemon,
        readiness,
        &containers,
        controller.catalog().update_available(),
    );
    Ok(())
}
