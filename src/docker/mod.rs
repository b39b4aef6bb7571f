pub mod container;
pub mod exec;
pub mod image;
#[cfg(test)]
pub mod testing;

use std::collections::BTreeMap;
use std::ops::ControlFlow;

use anyhow::Context;
use async_trait::async_trait;
use bollard::Docker;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::config::model::Credentials;
use crate::docker::container::PortMap;

/// Errors reported by the container engine, classified the way the
/// orchestrator needs to react to them.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no such object: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("engine error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("cannot talk to the container engine: {0}")]
    Transport(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    /// The engine's own explanation text, suitable for showing to a user.
    pub fn explanation(&self) -> String {
        match self {
            EngineError::NotFound(m) | EngineError::Conflict(m) | EngineError::Transport(m) => {
                m.clone()
            }
            EngineError::Api { message, .. } => message.clone(),
            EngineError::Cancelled => "cancelled".to_string(),
        }
    }
}

impl From<bollard::errors::Error> for EngineError {
    fn from(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => EngineError::NotFound(message),
            bollard::errors::Error::DockerResponseServerError {
                status_code: 409,
                message,
            } => EngineError::Conflict(message),
            bollard::errors::Error::DockerResponseServerError {
                status_code,
                message,
            } => EngineError::Api {
                status: status_code,
                message,
            },
            other => EngineError::Transport(other.to_string()),
        }
    }
}

/// Everything needed to create one managed container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub hostname: String,
    pub image: String,
    pub ports: Vec<PortMap>,
    pub binds: Vec<String>,
    pub privileged: bool,
    pub cap_add: Vec<String>,
}

/// The subset of an engine inspection the orchestrator cares about.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerDetails {
    pub id: String,
    pub status: String,
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    /// Container TCP port -> first published host port.
    pub published: BTreeMap<u16, u16>,
}

/// A locally stored image and every tag alias pointing at it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalImage {
    pub id: String,
    pub repo_tags: Vec<String>,
}

/// One chunk of a streamed image pull.
#[derive(Debug, Clone, Default)]
pub struct PullProgress {
    pub status: Option<String>,
    pub progress: Option<String>,
}

/// Capability interface over the local container engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Engine version string; an error means the daemon is not answering.
    async fn version(&self) -> Result<String, EngineError>;

    async fn inspect_container(&self, name_or_id: &str) -> Result<ContainerDetails, EngineError>;

    /// Create a container and return its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    /// Force-remove a container. Removing a missing container succeeds.
    async fn remove_container(&self, name_or_id: &str) -> Result<(), EngineError>;

    async fn list_images(&self) -> Result<Vec<LocalImage>, EngineError>;

    /// Stream an image pull. `on_progress` sees every chunk and may break to
    /// abort the pull, which then fails with [`EngineError::Cancelled`].
    async fn pull_image(
        &self,
        image: &str,
        credentials: Option<&Credentials>,
        on_progress: &mut (dyn for<'p> FnMut(&'p PullProgress) -> ControlFlow<()> + Send),
    ) -> Result<(), EngineError>;

    async fn remove_image(&self, image: &str) -> Result<(), EngineError>;

    /// Run a command inside a container and return its exit code. Output is
    /// logged at debug level as it streams; `cancel` is checked on every chunk.
    async fn exec(
        &self,
        container: &str,
        cmd: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<i64, EngineError>;

    /// Gateway address of the engine's default bridge network, if any.
    async fn bridge_gateway(&self) -> Result<Option<String>, EngineError>;
}

/// [`ContainerEngine`] backed by the local Docker daemon.
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Build a client from the usual `DOCKER_HOST` / socket defaults. This
    /// does not contact the daemon.
    pub fn connect() -> anyhow::Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("connecting to Docker daemon")?;
        Ok(Self { docker })
    }

}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn version(&self) -> Result<String, EngineError> {
        let version = self.docker.version().await?;
        version
            .version
            .ok_or_else(|| EngineError::Transport("engine reported no version".to_string()))
    }

    async fn inspect_container(&self, name_or_id: &str) -> Result<ContainerDetails, EngineError> {
        container::inspect_container(&self.docker, name_or_id).await
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        container::create_container(&self.docker, spec).await
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        container::start_container(&self.docker, id).await
    }

    async fn remove_container(&self, name_or_id: &str) -> Result<(), EngineError> {
        container::remove_container(&self.docker, name_or_id).await
    }

    async fn list_images(&self) -> Result<Vec<LocalImage>, EngineError> {
        image::list_images(&self.docker).await
    }

    async fn pull_image(
        &self,
        image: &str,
        credentials: Option<&Credentials>,
        on_progress: &mut (dyn for<'p> FnMut(&'p PullProgress) -> ControlFlow<()> + Send),
    ) -> Result<(), EngineError> {
        image::pull_image(&self.docker, image, credentials, on_progress).await
    }

    async fn remove_image(&self, image: &str) -> Result<(), EngineError> {
        image::remove_image(&self.docker, image).await
    }

    async fn exec(
        &self,
        container: &str,
        cmd: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<i64, EngineError> {
        exec::exec_in_container(&self.docker, container, cmd, cancel).await
    }

    async fn bridge_gateway(&self) -> Result<Option<String>, EngineError> {
        container::bridge_gateway(&self.docker).await
    }
}
