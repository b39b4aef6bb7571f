use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::docker::exec::login_shell;
use crate::docker::{ContainerEngine, EngineError};
use crate::orchestrator::health::HealthMonitor;
use crate::orchestrator::state::{ManagedContainer, Readiness};

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("shutting down")]
    ShuttingDown,

    #[error("provisioning already ran")]
    AlreadyRan,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Position in the provisioning sequence. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningPhase {
    Idle,
    WaitingForReadiness,
    InstallingAgent,
    FixingHostResolution,
    SigningCertificate,
    RunningManagementAgent,
    Done,
}

/// Exit codes of every step of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProvisioningReport {
    pub install_exit: i64,
    pub hosts_exit: i64,
    pub sign_exit: i64,
    pub run_exit: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningSnapshot {
    pub phase: ProvisioningPhase,
    pub report: Option<ProvisioningReport>,
}

/// Meaning of an agent installer exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallOutcome {
    Installed,
    /// Master unreachable or still starting.
    MasterUnavailable,
    /// Transient failure; retrying usually helps.
    Temporary,
    Failed(i64),
}

impl InstallOutcome {
    pub fn from_exit(code: i64) -> Self {
        match code {
            0 => InstallOutcome::Installed,
            7 | 35 => InstallOutcome::MasterUnavailable,
            1 => InstallOutcome::Temporary,
            other => InstallOutcome::Failed(other),
        }
    }

    pub fn message(&self) -> String {
        match self {
            InstallOutcome::Installed => "agent installed".to_string(),
            InstallOutcome::MasterUnavailable => {
                "master is not reachable yet, wait for it to finish starting and retry".to_string()
            }
            InstallOutcome::Temporary => "temporary failure, please retry".to_string(),
            InstallOutcome::Failed(code) => {
                format!("installer failed with exit code {}, check the logs", code)
            }
        }
    }
}

/// Meaning of a `--detailed-exitcodes` management run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagementRunOutcome {
    NoChanges,
    Changes,
    /// Run failed, or another run is in progress.
    FailedOrBusy,
    NotInstalled,
    ResourceErrors(i64),
}

impl ManagementRunOutcome {
    pub fn from_exit(code: i64) -> Self {
        match code {
            0 => ManagementRunOutcome::NoChanges,
            2 => ManagementRunOutcome::Changes,
            1 => ManagementRunOutcome::FailedOrBusy,
            -1 => ManagementRunOutcome::NotInstalled,
            other => ManagementRunOutcome::ResourceErrors(other),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ManagementRunOutcome::NoChanges | ManagementRunOutcome::Changes
        )
    }

    pub fn message(&self) -> String {
        match self {
            ManagementRunOutcome::NoChanges => "run ok, no changes".to_string(),
            ManagementRunOutcome::Changes => "run ok, changes applied".to_string(),
            ManagementRunOutcome::FailedOrBusy => {
                "run failed or another run is already in progress".to_string()
            }
            ManagementRunOutcome::NotInstalled => "agent software is not installed".to_string(),
            ManagementRunOutcome::ResourceErrors(code) => {
                format!("run finished with resource errors (exit code {})", code)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Remote commands
// ---------------------------------------------------------------------------

pub const MANAGEMENT_RUN_COMMAND: &str = "puppet agent --detailed-exitcodes -t";

pub fn install_command(master_host: &str) -> String {
    format!(
        "curl -k https://{}:8140/packages/current/install.bash > /tmp/pe_installer && bash < /tmp/pe_installer",
        master_host
    )
}

/// Append `address master_host short` to /etc/hosts unless already present.
pub fn hosts_command(master_host: &str, address: &str) -> String {
    let short = master_host.split('.').next().unwrap_or(master_host);
    format!(
        "grep {host} /etc/hosts || echo '{addr} {host} {short}' >> /etc/hosts",
        host = master_host,
        addr = address,
        short = short
    )
}

pub fn sign_command(agent_host: &str) -> String {
    format!(
        "puppet cert sign {host} || puppetserver ca sign --certname {host}",
        host = agent_host
    )
}

/// Remove the agent's certificate on the master. A running server purges the
/// node; otherwise only the certificate is cleaned.
pub fn master_clean_command(agent_host: &str, server_running: bool) -> String {
    if server_running {
        format!("puppet node purge {}", agent_host)
    } else {
        format!("puppet cert clean {}", agent_host)
    }
}

pub const AGENT_CLEAN_COMMAND: &str = "rm -rf /etc/puppetlabs/puppet/ssl";

/// Run `command` in `container` under a login shell and return its exit code.
pub async fn run_in(
    engine: &dyn ContainerEngine,
    container: &ManagedContainer,
    command: &str,
    cancel: &CancellationToken,
) -> Result<i64, EngineError> {
    debug!(container = %container.name, "running: {}", command);
    let exit_code = engine
        .exec(&container.name, login_shell(command), cancel)
        .await?;
    debug!(container = %container.name, exit_code, "command finished");
    Ok(exit_code)
}

// ---------------------------------------------------------------------------
// ProvisioningWorkflow
// ---------------------------------------------------------------------------

/// Install agent, fix name resolution, sign the certificate and trigger the
/// first management run, once both containers are up and the console answers.
pub struct ProvisioningWorkflow {
    engine: Arc<dyn ContainerEngine>,
    poll_interval: Duration,
    sign_delay: Duration,
    phase: RwLock<ProvisioningPhase>,
    report: RwLock<Option<ProvisioningReport>>,
    claimed: std::sync::atomic::AtomicBool,
}

impl ProvisioningWorkflow {
    pub fn new(engine: Arc<dyn ContainerEngine>, poll_interval: Duration, sign_delay: Duration) -> Self {
        Self {
            engine,
            poll_interval,
            sign_delay,
            phase: RwLock::new(ProvisioningPhase::Idle),
            report: RwLock::new(None),
            claimed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn phase(&self) -> ProvisioningPhase {
        *self.phase.read()
    }

    pub fn report(&self) -> Option<ProvisioningReport> {
        *self.report.read()
    }

    pub fn snapshot(&self) -> ProvisioningSnapshot {
        ProvisioningSnapshot {
            phase: self.phase(),
            report: self.report(),
        }
    }

    fn enter(&self, phase: ProvisioningPhase) {
        let mut current = self.phase.write();
        if phase > *current {
            info!(phase = ?phase, "provisioning");
            *current = phase;
        }
    }

    /// Automatic run: waits for readiness, then provisions. Runs at most once
    /// per process; later calls return [`ProvisionError::AlreadyRan`].
    pub async fn run_once(
        &self,
        master: &ManagedContainer,
        agent: &ManagedContainer,
        health: &HealthMonitor,
        address: &str,
        shutdown: &CancellationToken,
    ) -> Result<ProvisioningReport, ProvisionError> {
        if self
            .claimed
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            return Err(ProvisionError::AlreadyRan);
        }
        self.wait_for_readiness(master, agent, health, shutdown).await?;
        self.provision(master, agent, address, shutdown).await
    }

    async fn wait_for_readiness(
        &self,
        master: &ManagedContainer,
        agent: &ManagedContainer,
        health: &HealthMonitor,
        shutdown: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        self.enter(ProvisioningPhase::WaitingForReadiness);
        loop {
            if shutdown.is_cancelled() {
                info!("provisioning abandoned, shutting down");
                return Err(ProvisionError::ShuttingDown);
            }
            let master_alive = health.is_alive(master).await.is_alive();
            let agent_alive = health.is_alive(agent).await.is_alive();
            if master_alive
                && agent_alive
                && health.service_readiness(master).await == Readiness::Running
            {
                return Ok(());
            }
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// The four provisioning steps, in order, without waiting for readiness.
    pub async fn provision(
        &self,
        master: &ManagedContainer,
        agent: &ManagedContainer,
        address: &str,
        shutdown: &CancellationToken,
    ) -> Result<ProvisioningReport, ProvisionError> {
        let engine = self.engine.as_ref();

        self.enter(ProvisioningPhase::InstallingAgent);
        let install_exit = run_in(engine, agent, &install_command(&master.hostname), shutdown).await?;
        let install = InstallOutcome::from_exit(install_exit);
        if install != InstallOutcome::Installed {
            warn!(exit_code = install_exit, "{}", install.message());
        }

        self.enter(ProvisioningPhase::FixingHostResolution);
        let hosts_exit = run_in(engine, agent, &hosts_command(&master.hostname, address), shutdown).await?;

        self.enter(ProvisioningPhase::SigningCertificate);
        tokio::select! {
            _ = shutdown.cancelled() => return Err(ProvisionError::ShuttingDown),
            _ = tokio::time::sleep(self.sign_delay) => {}
        }
        let sign_exit = run_in(engine, master, &sign_command(&agent.hostname), shutdown).await?;

        self.enter(ProvisioningPhase::RunningManagementAgent);
        let run_exit = run_in(engine, agent, MANAGEMENT_RUN_COMMAND, shutdown).await?;

        let report = ProvisioningReport {
            install_exit,
            hosts_exit,
            sign_exit,
            run_exit,
        };
        *self.report.write() = Some(report);
        self.enter(ProvisioningPhase::Done);
        info!(
            run = %ManagementRunOutcome::from_exit(run_exit).message(),
            "provisioning complete"
        );
        Ok(report)
    }
}
