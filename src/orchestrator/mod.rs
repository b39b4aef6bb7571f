pub mod catalog;
pub mod health;
pub mod ports;
pub mod provision;
pub mod role;
pub mod state;
pub mod supervisor;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::config::model::PekitConfig;
use crate::docker::{ContainerEngine, EngineError};
use crate::platform::HostBootstrap;
use crate::registry::RegistryClient;

use catalog::{CatalogError, DownloadOutcome, ImageCatalog};
use health::HealthMonitor;
use provision::{
    run_in, InstallOutcome, ManagementRunOutcome, ProvisionError, ProvisioningReport,
    ProvisioningWorkflow, AGENT_CLEAN_COMMAND, MANAGEMENT_RUN_COMMAND,
};
use role::{Role, BUILD_PORT, CONSOLE_PORT, DEMO_PORT};
use state::{
    CatalogSnapshot, DaemonStatus, Liveness, ManagedContainer, Readiness, StatusSnapshot,
};
use supervisor::{ContainerSupervisor, OrphanAction, StartError, StartOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleOutcome {
    Started,
    Adopted,
    AlreadyRunning,
    Stopped,
}

impl From<StartOutcome> for ToggleOutcome {
    fn from(outcome: StartOutcome) -> Self {
        match outcome {
            StartOutcome::Started => ToggleOutcome::Started,
            StartOutcome::Adopted => ToggleOutcome::Adopted,
            StartOutcome::AlreadyRunning => ToggleOutcome::AlreadyRunning,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToggleError {
    #[error(transparent)]
    Start(#[from] StartError),

    #[error("could not stop container: {0}")]
    Stop(#[from] EngineError),
}

/// Result of wiping certificates so the agent can be provisioned again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CleanCertsReport {
    pub master_cleaned: bool,
    pub agent_cleaned: bool,
}

/// Composes the catalog, supervisor, health monitor and provisioning
/// workflow, and owns the process-wide shutdown signal.
///
/// Startup order:
///   1. Wait for the engine and work out its address
///   2. Remove or adopt containers left from an earlier run
///   3. Refresh the image catalog
///   4. Optionally start both containers
///   5. Optionally provision once both are ready
/// The health monitor runs alongside for the lifetime of the process.
pub struct Controller {
    config: PekitConfig,
    engine: Arc<dyn ContainerEngine>,
    bootstrap: Arc<dyn HostBootstrap>,
    registry: Arc<dyn RegistryClient>,
    master: Arc<ManagedContainer>,
    agent: Arc<ManagedContainer>,
    catalog: Arc<ImageCatalog>,
    supervisor: Arc<ContainerSupervisor>,
    health: Arc<HealthMonitor>,
    provisioning: Arc<ProvisioningWorkflow>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    setup_complete: AtomicBool,
    warnings: RwLock<Vec<String>>,
}

impl Controller {
    pub fn new(
        config: PekitConfig,
        engine: Arc<dyn ContainerEngine>,
        bootstrap: Arc<dyn HostBootstrap>,
        registry: Arc<dyn RegistryClient>,
    ) -> Result<Arc<Self>> {
        let shutdown = CancellationToken::new();
        let master = Arc::new(ManagedContainer::new(Role::Master, &config.master));
        let agent = Arc::new(ManagedContainer::new(Role::Agent, &config.agent));

        let patterns: BTreeMap<Role, String> = Role::ALL
            .iter()
            .map(|r| (*r, config.role(*r).image.clone()))
            .collect();
        let catalog = Arc::new(ImageCatalog::new(
            engine.clone(),
            registry.clone(),
            patterns,
            config.registry.credentials(),
            shutdown.clone(),
        ));
        let supervisor = Arc::new(ContainerSupervisor::new(
            engine.clone(),
            config.policy.clone(),
        ));
        let health = Arc::new(
            HealthMonitor::new(
                engine.clone(),
                bootstrap.clone(),
                config.timing.health_interval(),
                config.timing.probe_timeout(),
            )
            .context("building health probe client")?,
        );
        let provisioning = Arc::new(ProvisioningWorkflow::new(
            engine.clone(),
            config.timing.provision_poll(),
            config.timing.sign_delay(),
        ));

        Ok(Arc::new(Self {
            config,
            engine,
            bootstrap,
            registry,
            master,
            agent,
            catalog,
            supervisor,
            health,
            provisioning,
            shutdown,
            tracker: TaskTracker::new(),
            setup_complete: AtomicBool::new(false),
            warnings: RwLock::new(Vec::new()),
        }))
    }

    pub fn config(&self) -> &PekitConfig {
        &self.config
    }

    pub fn container(&self, role: Role) -> &Arc<ManagedContainer> {
        match role {
            Role::Master => &self.master,
            Role::Agent => &self.agent,
        }
    }

    pub fn catalog(&self) -> &ImageCatalog {
        &self.catalog
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    pub fn setup_complete(&self) -> bool {
        self.setup_complete.load(Ordering::SeqCst)
    }

    /// One-time warnings collected during startup.
    pub fn warnings(&self) -> Vec<String> {
        self.warnings.read().clone()
    }

    fn warn_user(&self, message: String) {
        warn!("{}", message);
        self.warnings.write().push(message);
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Spawn the initialization sequence and the health monitor loop.
    pub fn start_engine(self: &Arc<Self>) {
        let this = self.clone();
        self.tracker.spawn(async move {
            if let Err(e) = this.initialize().await {
                if this.is_running() {
                    error!("initialization failed: {:#}", e);
                } else {
                    info!("initialization abandoned: {:#}", e);
                }
            }
        });

        let health = self.health.clone();
        let containers = vec![self.master.clone(), self.agent.clone()];
        let console = self.master.clone();
        let supervisor = self.supervisor.clone();
        let shutdown = self.shutdown.clone();
        self.tracker
            .spawn(health.run(containers, console, supervisor, shutdown));
    }

    async fn initialize(self: &Arc<Self>) -> Result<()> {
        self.attach().await?;

        if self.config.policy.start_automatically && self.is_running() {
            for role in Role::ALL {
                match self.start(role).await {
                    Ok(outcome) => info!(role = %role, ?outcome, "autostart"),
                    Err(e) => error!(role = %role, "autostart failed: {}", e),
                }
            }
        }

        if self.config.policy.provision_automatically && self.is_running() {
            let this = self.clone();
            self.tracker.spawn(async move {
                this.auto_provision().await;
            });
        }
        Ok(())
    }

    /// Connect to the engine, deal with leftover containers and load the
    /// image catalog. Marks setup complete.
    pub async fn attach(&self) -> Result<()> {
        self.bootstrap
            .ensure_engine(self.engine.as_ref(), &self.shutdown)
            .await
            .context("container engine is not available")?;
        let address = self.bootstrap.engine_address(self.engine.as_ref()).await;
        info!(address = %address, "container engine address");
        self.supervisor.set_address(address);

        if self.config.registry.credentials().is_some() {
            if let Err(e) = self.registry.verify_login().await {
                self.warn_user(format!("registry login failed: {}", e));
            }
        }

        for role in Role::ALL {
            let container = self.container(role);
            match self.supervisor.cleanup_orphan(container).await {
                Ok(OrphanAction::None) => {}
                Ok(action) => info!(role = %role, ?action, "leftover container handled"),
                Err(e) => warn!(role = %role, "could not check for leftover container: {}", e),
            }
        }

        for warning in self.refresh_images().await {
            self.warn_user(warning);
        }
        self.setup_complete.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn auto_provision(&self) {
        info!("waiting to provision");
        let result = self
            .provisioning
            .run_once(
                &self.master,
                &self.agent,
                &self.health,
                &self.supervisor.address(),
                &self.shutdown,
            )
            .await;
        match result {
            Ok(report) => info!(?report, "automatic provisioning finished"),
            Err(ProvisionError::ShuttingDown) | Err(ProvisionError::Engine(EngineError::Cancelled)) => {
                info!("automatic provisioning abandoned")
            }
            Err(e) => error!("automatic provisioning failed: {}", e),
        }
    }

    /// Stop background work and, if configured, remove both containers.
    pub async fn shutdown(&self) {
        info!("shutting down");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        if self.config.policy.shutdown_on_exit {
            self.stop_all().await;
        }
    }

    // -----------------------------------------------------------------------
    // Containers
    // -----------------------------------------------------------------------

    /// Image a role would be started from.
    pub fn image_for(&self, role: Role) -> Option<String> {
        if self.config.policy.use_latest_image {
            self.catalog.newest_local(role)
        } else {
            self.container(role).selected_image()
        }
    }

    /// Pin the image used when `use_latest_image` is off.
    pub fn select_image(&self, role: Role, image: Option<String>) {
        info!(role = %role, image = ?image, "image selected");
        self.container(role).set_selected_image(image);
    }

    pub async fn start(&self, role: Role) -> Result<StartOutcome, StartError> {
        let image = self.image_for(role);
        self.supervisor
            .start(self.container(role), image.as_deref())
            .await
    }

    pub async fn stop(&self, role: Role) -> Result<bool, EngineError> {
        self.supervisor.stop(self.container(role)).await
    }

    /// Stop a live container, start a dead one.
    pub async fn toggle(&self, role: Role) -> Result<ToggleOutcome, ToggleError> {
        let container = self.container(role);
        if self.health.is_alive(container).await.is_alive() {
            self.stop(role).await?;
            Ok(ToggleOutcome::Stopped)
        } else {
            Ok(self.start(role).await?.into())
        }
    }

    pub async fn stop_all(&self) {
        for role in Role::ALL {
            if let Err(e) = self.stop(role).await {
                warn!(role = %role, "stop failed: {}", e);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Images
    // -----------------------------------------------------------------------

    /// Refresh both roles. Returns any one-time warnings.
    pub async fn refresh_images(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for role in Role::ALL {
            match self.catalog.refresh(role).await {
                Ok(outcome) => warnings.extend(outcome.warning),
                Err(e) => warn!(role = %role, "image refresh failed: {}", e),
            }
        }
        warnings
    }

    pub async fn download(&self, role: Role, image: &str) -> Result<DownloadOutcome, CatalogError> {
        self.catalog.download(role, image).await
    }

    /// Run [`Self::download`] in the background; the outcome is logged.
    pub fn spawn_download(self: &Arc<Self>, role: Role, image: String) {
        let this = self.clone();
        self.tracker.spawn(async move {
            match this.download(role, &image).await {
                Ok(_) | Err(CatalogError::Cancelled) => {}
                Err(e) => error!(role = %role, image = %image, "download failed: {}", e),
            }
        });
    }

    pub fn cancel_download(&self, role: Role, image: &str) -> bool {
        self.catalog.cancel_download(role, image)
    }

    pub async fn delete(&self, role: Role, image: &str) -> Result<(), CatalogError> {
        self.catalog.delete(role, image).await
    }

    // -----------------------------------------------------------------------
    // Remote commands
    // -----------------------------------------------------------------------

    pub async fn run_management_agent(&self, role: Role) -> Result<ManagementRunOutcome, EngineError> {
        let code = run_in(
            self.engine.as_ref(),
            self.container(role),
            MANAGEMENT_RUN_COMMAND,
            &self.shutdown,
        )
        .await?;
        let outcome = ManagementRunOutcome::from_exit(code);
        info!(role = %role, exit_code = code, "{}", outcome.message());
        Ok(outcome)
    }

    /// Run every provisioning step now, without waiting for readiness.
    pub async fn run_provisioning_now(&self) -> Result<ProvisioningReport, ProvisionError> {
        self.provisioning
            .provision(
                &self.master,
                &self.agent,
                &self.supervisor.address(),
                &self.shutdown,
            )
            .await
    }

    /// Install the agent software only: fix name resolution, then run the
    /// installer. Certificate signing is left to the user.
    pub async fn provision_agent(&self) -> Result<InstallOutcome, EngineError> {
        let address = self.supervisor.address();
        let engine = self.engine.as_ref();
        run_in(
            engine,
            &self.agent,
            &provision::hosts_command(&self.master.hostname, &address),
            &self.shutdown,
        )
        .await?;
        let code = run_in(
            engine,
            &self.agent,
            &provision::install_command(&self.master.hostname),
            &self.shutdown,
        )
        .await?;
        let outcome = InstallOutcome::from_exit(code);
        info!(exit_code = code, "{}", outcome.message());
        Ok(outcome)
    }

    /// Delete the agent's certificate on the master and every certificate on
    /// the agent, so provisioning can be repeated.
    pub async fn clean_certs(&self) -> Result<CleanCertsReport, EngineError> {
        let engine = self.engine.as_ref();
        let server_running = self.service_readiness().await == Readiness::Running;
        let master_cleaned = if self.health.is_alive(&self.master).await.is_alive() {
            let cmd = provision::master_clean_command(&self.agent.hostname, server_running);
            run_in(engine, &self.master, &cmd, &self.shutdown).await? == 0
        } else {
            false
        };
        let agent_cleaned = if self.health.is_alive(&self.agent).await.is_alive() {
            run_in(engine, &self.agent, AGENT_CLEAN_COMMAND, &self.shutdown).await? == 0
        } else {
            false
        };
        info!(master_cleaned, agent_cleaned, "certificates cleaned");
        Ok(CleanCertsReport {
            master_cleaned,
            agent_cleaned,
        })
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    pub async fn daemon_status(&self) -> DaemonStatus {
        self.health.daemon_status().await
    }

    pub async fn container_status(&self, role: Role) -> Liveness {
        self.health.is_alive(self.container(role)).await
    }

    pub async fn service_readiness(&self) -> Readiness {
        self.health.service_readiness(&self.master).await
    }

    pub fn console_url(&self) -> Option<String> {
        self.master.url(CONSOLE_PORT)
    }

    pub fn build_url(&self) -> Option<String> {
        self.master.url(BUILD_PORT)
    }

    pub fn demo_url(&self) -> Option<String> {
        self.agent.url(DEMO_PORT)
    }

    pub fn terminal_hint(&self, role: Role) -> String {
        self.container(role).terminal_hint()
    }

    pub fn catalog_snapshot(&self, role: Role) -> CatalogSnapshot {
        self.catalog.snapshot(role)
    }

    /// Last polled state of everything, cheap to call.
    pub fn status_snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            daemon: self.health.last_daemon_status(),
            readiness: self.health.last_readiness(),
            engine_address: self.supervisor.address(),
            setup_complete: self.setup_complete(),
            update_available: self.catalog.update_available(),
            catalog_changed: self.catalog.take_changed(),
            provisioning: self.provisioning.snapshot(),
            containers: Role::ALL
                .iter()
                .map(|r| self.container(*r).snapshot())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::testing::FakeEngine;
    use crate::platform::testing::FixedBootstrap;
    use crate::platform::NativeBootstrap;
    use crate::registry::testing::StaticRegistry;
    use std::time::Duration;

    const MASTER_IMAGE: &str = "geoffwilliams/pe_master_public_lowmem";
    const AGENT_IMAGE: &str = "geoffwilliams/pe_agent_demo";

    fn config() -> PekitConfig {
        let mut config = PekitConfig::default();
        config.registry.username = Some("bob".to_string());
        config.registry.password = Some("secret".to_string());
        config.policy.start_automatically = false;
        config.policy.provision_automatically = false;
        config.timing.health_interval_ms = 20;
        config.timing.provision_poll_ms = 20;
        config.timing.sign_delay_secs = 0;
        config.timing.probe_timeout_secs = 1;
        config
    }

    fn controller(config: PekitConfig) -> (Arc<Controller>, Arc<FakeEngine>, Arc<StaticRegistry>) {
        let engine = Arc::new(FakeEngine::new());
        engine.add_image(&[&format!("{}:2016.2.1", MASTER_IMAGE)]);
        engine.add_image(&[&format!("{}:2016.2.1", AGENT_IMAGE)]);
        let registry = Arc::new(StaticRegistry::with(AGENT_IMAGE, &["2016.2.1", "2016.4.0"]));
        let controller = Controller::new(
            config,
            engine.clone(),
            Arc::new(FixedBootstrap::new("127.0.0.1")),
            registry.clone(),
        )
        .unwrap();
        (controller, engine, registry)
    }

    #[tokio::test]
    async fn attach_loads_catalog_and_completes_setup() {
        let (controller, _engine, _registry) = controller(config());
        assert!(!controller.setup_complete());
        controller.attach().await.unwrap();

        assert!(controller.setup_complete());
        assert_eq!(
            controller.catalog_snapshot(Role::Agent).downloadable,
            vec![format!("{}:2016.4.0", AGENT_IMAGE)]
        );
        let snapshot = controller.status_snapshot();
        assert!(snapshot.update_available);
        assert_eq!(snapshot.engine_address, "127.0.0.1");
    }

    #[tokio::test]
    async fn toggle_starts_then_stops() {
        let (controller, engine, _registry) = controller(config());
        controller.attach().await.unwrap();

        assert_eq!(controller.toggle(Role::Agent).await.unwrap(), ToggleOutcome::Started);
        assert!(controller.demo_url().unwrap().starts_with("http://127.0.0.1:"));
        let created = engine.containers.lock()[&controller.config().agent.container_name]
            .spec
            .image
            .clone();
        assert_eq!(created, format!("{}:2016.2.1", AGENT_IMAGE));

        assert_eq!(controller.toggle(Role::Agent).await.unwrap(), ToggleOutcome::Stopped);
        assert!(controller.demo_url().is_none());
    }

    #[tokio::test]
    async fn pinned_image_used_when_latest_disabled() {
        let mut cfg = config();
        cfg.policy.use_latest_image = false;
        let (controller, _engine, _registry) = controller(cfg);
        controller.attach().await.unwrap();

        assert!(matches!(
            controller.start(Role::Master).await,
            Err(StartError::NoImageSelected(Role::Master))
        ));
        controller.select_image(Role::Master, Some(format!("{}:2016.2.1", MASTER_IMAGE)));
        assert_eq!(controller.start(Role::Master).await.unwrap(), StartOutcome::Started);
    }

    #[tokio::test]
    async fn orphans_are_adopted_when_not_killed() {
        let mut cfg = config();
        cfg.policy.kill_orphans = false;
        let (controller, engine, _registry) = controller(cfg);
        engine.add_container("pe_kit_master__", true, 300);

        controller.attach().await.unwrap();
        assert_eq!(
            controller.container(Role::Master).handle().as_deref(),
            Some("pe_kit_master__-id")
        );
        assert_eq!(engine.create_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn management_run_reports_outcome() {
        let (controller, engine, _registry) = controller(config());
        controller.attach().await.unwrap();
        controller.start(Role::Agent).await.unwrap();
        engine.script_exec("puppet agent", 2);

        let outcome = controller.run_management_agent(Role::Agent).await.unwrap();
        assert_eq!(outcome, ManagementRunOutcome::Changes);
    }

    #[tokio::test]
    async fn provision_agent_fixes_hosts_before_installing() {
        let (controller, engine, _registry) = controller(config());
        controller.attach().await.unwrap();
        controller.start(Role::Agent).await.unwrap();

        let outcome = controller.provision_agent().await.unwrap();
        assert_eq!(outcome, InstallOutcome::Installed);
        let log = engine.executed();
        assert!(log[0].1.contains("/etc/hosts"));
        assert!(log[1].1.contains("install.bash"));
    }

    #[tokio::test]
    async fn clean_certs_touches_only_live_containers() {
        let (controller, engine, _registry) = controller(config());
        controller.attach().await.unwrap();
        controller.start(Role::Agent).await.unwrap();

        let report = controller.clean_certs().await.unwrap();
        assert_eq!(
            report,
            CleanCertsReport {
                master_cleaned: false,
                agent_cleaned: true
            }
        );
        assert_eq!(engine.executed().len(), 1);
        assert!(engine.executed()[0].1.contains(AGENT_CLEAN_COMMAND));
    }

    #[tokio::test]
    async fn engine_autostarts_and_shuts_down_cleanly() {
        let mut cfg = config();
        cfg.policy.start_automatically = true;
        let (controller, engine, _registry) = controller(cfg);

        controller.start_engine();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !(controller.container(Role::Master).is_alive()
                && controller.container(Role::Agent).is_alive())
            {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(controller.status_snapshot().daemon, DaemonStatus::Running);

        controller.shutdown().await;
        assert!(!controller.is_running());
        assert!(engine.containers.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_does_not_wait_for_engine_bootstrap() {
        let engine = Arc::new(FakeEngine::new());
        engine.daemon_up.store(false, Ordering::SeqCst);
        let controller = Controller::new(
            config(),
            engine,
            Arc::new(NativeBootstrap::new(Duration::from_secs(30))),
            Arc::new(StaticRegistry::default()),
        )
        .unwrap();

        controller.start_engine();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!controller.setup_complete());

        let started = tokio::time::Instant::now();
        controller.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!controller.setup_complete());
    }

    #[tokio::test]
    async fn automatic_provisioning_waits_for_console() {
        let mut cfg = config();
        cfg.policy.start_automatically = true;
        cfg.policy.provision_automatically = true;
        cfg.policy.shutdown_on_exit = false;
        let (controller, engine, _registry) = controller(cfg);

        controller.start_engine();
        tokio::time::sleep(Duration::from_millis(200)).await;
        // no console answers on the fake engine's ports
        assert!(engine.executed().is_empty());
        assert_eq!(
            controller.status_snapshot().provisioning.phase,
            provision::ProvisioningPhase::WaitingForReadiness
        );

        controller.shutdown().await;
        assert_eq!(engine.containers.lock().len(), 2);
    }
}
