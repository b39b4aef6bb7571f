use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::docker::{ContainerDetails, ContainerEngine, EngineError};
use crate::orchestrator::state::{DaemonStatus, Liveness, ManagedContainer, Readiness};
use crate::orchestrator::supervisor::ContainerSupervisor;
use crate::platform::HostBootstrap;

/// Liveness from an inspection taken at `now`.
pub fn liveness_from(details: &ContainerDetails, now: DateTime<Utc>) -> Liveness {
    if !details.running {
        return Liveness::Down;
    }
    let uptime = details
        .started_at
        .and_then(|started| (now - started).to_std().ok())
        .unwrap_or_default();
    Liveness::Up { uptime }
}

/// Ask the engine whether the named container is running. Never fails:
/// a missing container or an unreachable engine both read as down.
pub async fn container_liveness(engine: &dyn ContainerEngine, name: &str) -> Liveness {
    match engine.inspect_container(name).await {
        Ok(details) => liveness_from(&details, Utc::now()),
        Err(EngineError::NotFound(_)) => Liveness::Down,
        Err(e) => {
            warn!(container = %name, "liveness check failed: {}", e);
            Liveness::Down
        }
    }
}

pub async fn daemon_status(engine: &dyn ContainerEngine, bootstrap: &dyn HostBootstrap) -> DaemonStatus {
    match engine.version().await {
        Ok(_) => DaemonStatus::Running,
        Err(_) if bootstrap.in_progress() => DaemonStatus::Loading,
        Err(e) => {
            debug!("engine not answering: {}", e);
            DaemonStatus::Stopped
        }
    }
}

/// HTTP client for the management console: self-signed certificate, short timeout.
pub fn probe_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(timeout)
        .build()
}

/// Only a 200 counts as ready; every failure means the service is still booting.
pub async fn probe_url(client: &reqwest::Client, url: &str) -> Readiness {
    match client.get(url).send().await {
        Ok(response) if response.status() == reqwest::StatusCode::OK => Readiness::Running,
        Ok(response) => {
            debug!(url = %url, status = %response.status(), "console not ready");
            Readiness::Loading
        }
        Err(e) => {
            debug!(url = %url, "console probe failed: {}", e);
            Readiness::Loading
        }
    }
}

/// Background liveness and readiness polling.
pub struct HealthMonitor {
    engine: Arc<dyn ContainerEngine>,
    bootstrap: Arc<dyn HostBootstrap>,
    client: reqwest::Client,
    interval: Duration,
    daemon: RwLock<DaemonStatus>,
    readiness: RwLock<Readiness>,
}

impl HealthMonitor {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        bootstrap: Arc<dyn HostBootstrap>,
        interval: Duration,
        probe_timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            engine,
            bootstrap,
            client: probe_client(probe_timeout)?,
            interval,
            daemon: RwLock::new(DaemonStatus::Stopped),
            readiness: RwLock::new(Readiness::Error),
        })
    }

    /// Status from the last poll.
    pub fn last_daemon_status(&self) -> DaemonStatus {
        *self.daemon.read()
    }

    /// Readiness from the last poll.
    pub fn last_readiness(&self) -> Readiness {
        *self.readiness.read()
    }

    pub async fn daemon_status(&self) -> DaemonStatus {
        daemon_status(self.engine.as_ref(), self.bootstrap.as_ref()).await
    }

    /// Query the engine and record the result on the container.
    pub async fn is_alive(&self, container: &ManagedContainer) -> Liveness {
        let liveness = container_liveness(self.engine.as_ref(), &container.name).await;
        let previous = container.liveness();
        if previous.is_alive() != liveness.is_alive() {
            info!(
                container = %container.name,
                alive = liveness.is_alive(),
                "container liveness changed"
            );
        }
        container.set_liveness(liveness);
        liveness
    }

    /// Probe the console of `container`. Without a derived URL the answer is `Error`.
    pub async fn service_readiness(&self, container: &ManagedContainer) -> Readiness {
        match container.console_url() {
            Some(url) => probe_url(&self.client, &url).await,
            None => Readiness::Error,
        }
    }

    fn record_daemon(&self, status: DaemonStatus) {
        let mut current = self.daemon.write();
        if *current != status {
            info!(from = %*current, to = %status, "container engine status changed");
            *current = status;
        }
    }

    fn record_readiness(&self, readiness: Readiness) {
        let mut current = self.readiness.write();
        if *current != readiness {
            info!(from = %*current, to = %readiness, "console readiness changed");
            *current = readiness;
        }
    }

    /// One polling cycle. `console` is the container whose service is probed.
    pub async fn poll_once(
        &self,
        containers: &[Arc<ManagedContainer>],
        console: &ManagedContainer,
        supervisor: &ContainerSupervisor,
    ) {
        let daemon = self.daemon_status().await;
        self.record_daemon(daemon);

        for container in containers {
            let was_alive = container.is_alive();
            let liveness = self.is_alive(container).await;
            if was_alive && !liveness.is_alive() {
                supervisor.mark_gone(container);
            }
        }

        let readiness = if daemon == DaemonStatus::Stopped {
            Readiness::Stopped
        } else {
            self.service_readiness(console).await
        };
        self.record_readiness(readiness);
    }

    /// Poll until `shutdown` fires.
    pub async fn run(
        self: Arc<Self>,
        containers: Vec<Arc<ManagedContainer>>,
        console: Arc<ManagedContainer>,
        supervisor: Arc<ContainerSupervisor>,
        shutdown: CancellationToken,
    ) {
        info!(interval = ?self.interval, "health monitor started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.poll_once(&containers, &console, &supervisor) => {}
                    }
                }
            }
        }
        info!("health monitor stopped");
    }
}
