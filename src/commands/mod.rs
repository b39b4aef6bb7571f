pub mod doctor;
pub mod images;
pub mod provision;
pub mod status;
pub mod toggle;
pub mod up;
pub mod validate;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config;
use crate::config::model::PekitConfig;
use crate::docker::DockerEngine;
use crate::orchestrator::Controller;
use crate::platform::NativeBootstrap;
use crate::registry::HttpRegistry;

/// How long commands wait for the engine to answer.
const ENGINE_WAIT: Duration = Duration::from_secs(10);

/// Build a controller for the given settings against the local engine.
pub fn build_controller(config: PekitConfig) -> Result<Arc<Controller>> {
    let engine = Arc::new(DockerEngine::connect()?);
    let registry = Arc::new(
        HttpRegistry::new(&config.registry, config.timing.probe_timeout())
            .context("building registry client")?,
    );
    let bootstrap = Arc::new(NativeBootstrap::new(ENGINE_WAIT));
    Controller::new(config, engine, bootstrap, registry)
}

/// Controller for one-shot commands: existing containers are adopted, never
/// removed, and nothing starts or stops on its own.
pub async fn connect(config_file: Option<&Path>) -> Result<Arc<Controller>> {
    let (mut config, _path) = config::load(config_file)?;
    config.policy.kill_orphans = false;
    config.policy.start_automatically = false;
    config.policy.provision_automatically = false;
    config.policy.shutdown_on_exit = false;

    let controller = build_controller(config)?;
    controller.attach().await?;
    Ok(controller)
}
