use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::config::model::PolicyConfig;
use crate::docker::{ContainerDetails, ContainerEngine, ContainerSpec, EngineError};
use crate::orchestrator::health::{container_liveness, liveness_from};
use crate::orchestrator::ports::{derive_urls, port_plan};
use crate::orchestrator::role::Role;
use crate::orchestrator::state::{Liveness, ManagedContainer, Runtime};

const CGROUP_BIND: &str = "/sys/fs/cgroup:/sys/fs/cgroup:ro";

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("no image selected for {0}; download one first")]
    NoImageSelected(Role),

    #[error("could not create container: {0}")]
    Create(String),

    #[error("could not start container: {0}")]
    Start(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A container with the same name existed and was taken over.
    Adopted,
    AlreadyRunning,
}

/// What startup cleanup did with a container left over from an earlier run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanAction {
    None,
    Removed,
    Adopted { running: bool },
}

/// Starts and stops managed containers and keeps their runtime fields in
/// step with the engine.
pub struct ContainerSupervisor {
    engine: Arc<dyn ContainerEngine>,
    policy: PolicyConfig,
    address: RwLock<String>,
}

impl ContainerSupervisor {
    pub fn new(engine: Arc<dyn ContainerEngine>, policy: PolicyConfig) -> Self {
        Self {
            engine,
            policy,
            address: RwLock::new("127.0.0.1".to_string()),
        }
    }

    /// Host address used when building URLs.
    pub fn set_address(&self, address: String) {
        *self.address.write() = address;
    }

    pub fn address(&self) -> String {
        self.address.read().clone()
    }

    /// Creation parameters for `container` running `image`.
    pub fn container_spec(&self, container: &ManagedContainer, image: &str) -> ContainerSpec {
        let mut binds = vec![CGROUP_BIND.to_string()];
        if let Some(dir) = &self.policy.shared_dir {
            binds.push(format!("{}:/shared", dir.display()));
        }
        let cap_add = match container.role {
            Role::Master => vec!["SYS_ADMIN".to_string()],
            Role::Agent => Vec::new(),
        };
        ContainerSpec {
            name: container.name.clone(),
            hostname: container.hostname.clone(),
            image: image.to_string(),
            ports: port_plan(container.role, self.policy.expose_ports),
            binds,
            privileged: true,
            cap_add,
        }
    }

    fn commit(&self, container: &ManagedContainer, details: &ContainerDetails) {
        let urls = if details.running {
            derive_urls(container.role, &self.address(), &details.published)
        } else {
            Default::default()
        };
        container.set_runtime(Runtime {
            handle: Some(details.id.clone()),
            ports: details.published.clone(),
            urls,
        });
        container.set_liveness(liveness_from(details, Utc::now()));
    }

    /// Deal with a container of the same name left behind by an earlier run.
    pub async fn cleanup_orphan(
        &self,
        container: &ManagedContainer,
    ) -> Result<OrphanAction, EngineError> {
        let _guard = container.op_lock.lock().await;
        let details = match self.engine.inspect_container(&container.name).await {
            Ok(details) => details,
            Err(EngineError::NotFound(_)) => return Ok(OrphanAction::None),
            Err(e) => return Err(e),
        };

        if self.policy.kill_orphans {
            info!(container = %container.name, "removing leftover container");
            self.engine.remove_container(&details.id).await?;
            container.clear_runtime();
            container.set_liveness(Liveness::Down);
            return Ok(OrphanAction::Removed);
        }

        info!(
            container = %container.name,
            status = %details.status,
            "adopting existing container"
        );
        self.commit(container, &details);
        Ok(OrphanAction::Adopted {
            running: details.running,
        })
    }

    /// Start `container` from `image`. Calling this on a running container
    /// is a no-op.
    pub async fn start(
        &self,
        container: &ManagedContainer,
        image: Option<&str>,
    ) -> Result<StartOutcome, StartError> {
        let _guard = container.op_lock.lock().await;

        let liveness = container_liveness(self.engine.as_ref(), &container.name).await;
        if liveness.is_alive() {
            container.set_liveness(liveness);
            if container.handle().is_none() {
                self.derive_urls_locked(container).await?;
            }
            return Ok(StartOutcome::AlreadyRunning);
        }

        let image = image
            .filter(|i| !i.is_empty())
            .ok_or(StartError::NoImageSelected(container.role))?;
        let spec = self.container_spec(container, image);

        let (id, outcome) = match self.engine.create_container(&spec).await {
            Ok(id) => {
                info!(container = %container.name, image = %image, "container created");
                (id, StartOutcome::Started)
            }
            Err(EngineError::Conflict(msg)) => {
                warn!(container = %container.name, "name already in use, adopting: {}", msg);
                let existing = self.engine.inspect_container(&container.name).await?;
                (existing.id, StartOutcome::Adopted)
            }
            Err(e) => {
                error!(container = %container.name, "create failed: {}", e);
                return Err(StartError::Create(e.explanation()));
            }
        };

        if let Err(e) = self.engine.start_container(&id).await {
            error!(container = %container.name, "start failed: {}", e);
            return Err(StartError::Start(e.explanation()));
        }

        let details = self.engine.inspect_container(&id).await?;
        self.commit(container, &details);
        info!(
            container = %container.name,
            urls = ?container.runtime().urls,
            "container started"
        );
        Ok(outcome)
    }

    /// Read back the published ports of `container` and rebuild its URLs.
    pub async fn derive_urls(&self, container: &ManagedContainer) -> Result<(), EngineError> {
        let _guard = container.op_lock.lock().await;
        self.derive_urls_locked(container).await
    }

    async fn derive_urls_locked(&self, container: &ManagedContainer) -> Result<(), EngineError> {
        let target = container.handle().unwrap_or_else(|| container.name.clone());
        let details = self.engine.inspect_container(&target).await?;
        self.commit(container, &details);
        Ok(())
    }

    /// Remove `container` if it is running. Returns whether anything was done,
    /// so redundant calls at shutdown are harmless.
    pub async fn stop(&self, container: &ManagedContainer) -> Result<bool, EngineError> {
        let _guard = container.op_lock.lock().await;

        let liveness = container_liveness(self.engine.as_ref(), &container.name).await;
        if !liveness.is_alive() {
            container.set_liveness(Liveness::Down);
            return Ok(false);
        }

        let target = container.handle().unwrap_or_else(|| container.name.clone());
        self.engine.remove_container(&target).await?;
        container.clear_runtime();
        container.set_liveness(Liveness::Down);
        info!(container = %container.name, "container stopped");
        Ok(true)
    }

    /// Forget the engine handle of a container that died on its own. Skipped
    /// while a start or stop holds the container.
    pub fn mark_gone(&self, container: &ManagedContainer) {
        if let Ok(_guard) = container.op_lock.try_lock() {
            if container.handle().is_some() {
                info!(container = %container.name, "container is gone");
                container.clear_runtime();
            }
        }
    }
}
