use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;

use crate::config::model::RoleConfig;
use crate::orchestrator::role::{Role, CONSOLE_PORT};

/// Observed liveness of a managed container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Down,
    Up { uptime: Duration },
}

impl Liveness {
    pub fn is_alive(&self) -> bool {
        matches!(self, Liveness::Up { .. })
    }

    pub fn uptime(&self) -> Option<Duration> {
        match self {
            Liveness::Up { uptime } => Some(*uptime),
            Liveness::Down => None,
        }
    }
}

/// State of the management service inside the master container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Readiness {
    Stopped,
    Loading,
    Running,
    Error,
}

/// State of the container engine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonStatus {
    Stopped,
    Loading,
    Running,
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Readiness::Stopped => "stopped",
            Readiness::Loading => "loading",
            Readiness::Running => "running",
            Readiness::Error => "error",
        })
    }
}

impl fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DaemonStatus::Stopped => "stopped",
            DaemonStatus::Loading => "loading",
            DaemonStatus::Running => "running",
        })
    }
}

/// Engine-side facts about a container instance. Written as one unit so a
/// reader never sees a handle from one instance next to URLs of another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Runtime {
    pub handle: Option<String>,
    /// Container port -> published host port.
    pub ports: BTreeMap<u16, u16>,
    /// Container port -> URL reachable from the host.
    pub urls: BTreeMap<u16, String>,
}

/// One of the two supervised containers.
///
/// Static identity comes from configuration; [`Runtime`] and liveness are a
/// cache of engine state, changed only by the supervisor and health monitor.
pub struct ManagedContainer {
    pub role: Role,
    pub name: String,
    pub hostname: String,
    /// Repository name local images are matched against.
    pub image_pattern: String,
    selected_image: RwLock<Option<String>>,
    runtime: RwLock<Runtime>,
    liveness: RwLock<Liveness>,
    /// Serialises start/stop on this container.
    pub(crate) op_lock: tokio::sync::Mutex<()>,
}

impl ManagedContainer {
    pub fn new(role: Role, config: &RoleConfig) -> Self {
        Self {
            role,
            name: config.container_name.clone(),
            hostname: config.hostname.clone(),
            image_pattern: config.image.clone(),
            selected_image: RwLock::new(config.selected_image.clone()),
            runtime: RwLock::new(Runtime::default()),
            liveness: RwLock::new(Liveness::Down),
            op_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn runtime(&self) -> Runtime {
        self.runtime.read().clone()
    }

    pub(crate) fn set_runtime(&self, runtime: Runtime) {
        *self.runtime.write() = runtime;
    }

    pub(crate) fn clear_runtime(&self) {
        *self.runtime.write() = Runtime::default();
    }

    pub fn handle(&self) -> Option<String> {
        self.runtime.read().handle.clone()
    }

    pub fn url(&self, port: u16) -> Option<String> {
        self.runtime.read().urls.get(&port).cloned()
    }

    /// Secure administrative URL (master only).
    pub fn console_url(&self) -> Option<String> {
        self.url(CONSOLE_PORT)
    }

    pub fn liveness(&self) -> Liveness {
        *self.liveness.read()
    }

    pub(crate) fn set_liveness(&self, liveness: Liveness) {
        *self.liveness.write() = liveness;
    }

    pub fn is_alive(&self) -> bool {
        self.liveness().is_alive()
    }

    pub fn selected_image(&self) -> Option<String> {
        self.selected_image.read().clone()
    }

    pub(crate) fn set_selected_image(&self, image: Option<String>) {
        *self.selected_image.write() = image;
    }

    /// Shell command a user can paste to get a terminal in this container.
    pub fn terminal_hint(&self) -> String {
        format!("docker exec -ti {} bash", self.name)
    }

    pub fn snapshot(&self) -> ContainerSnapshot {
        let runtime = self.runtime();
        let liveness = self.liveness();
        ContainerSnapshot {
            role: self.role,
            name: self.name.clone(),
            hostname: self.hostname.clone(),
            image: self.selected_image(),
            alive: liveness.is_alive(),
            uptime_secs: liveness.uptime().map(|d| d.as_secs()),
            handle: runtime.handle,
            ports: runtime.ports,
            urls: runtime.urls,
            terminal_hint: self.terminal_hint(),
        }
    }
}

// ---------------------------------------------------------------------------
// Read-only snapshots handed to the presentation layer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ContainerSnapshot {
    pub role: Role,
    pub name: String,
    pub hostname: String,
    pub image: Option<String>,
    pub alive: bool,
    pub uptime_secs: Option<u64>,
    pub handle: Option<String>,
    pub ports: BTreeMap<u16, u16>,
    pub urls: BTreeMap<u16, String>,
    pub terminal_hint: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CatalogSnapshot {
    pub role: Role,
    pub local: Vec<String>,
    pub downloadable: Vec<String>,
    pub downloading: Vec<String>,
    pub update_available: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub daemon: DaemonStatus,
    pub readiness: Readiness,
    pub engine_address: String,
    pub setup_complete: bool,
    pub update_available: bool,
    /// True once after the image lists changed; clients re-read the catalog.
    pub catalog_changed: bool,
    pub provisioning: crate::orchestrator::provision::ProvisioningSnapshot,
    pub containers: Vec<ContainerSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> ManagedContainer {
        ManagedContainer::new(
            Role::Agent,
            &RoleConfig {
                image: "acme/agent".to_string(),
                container_name: "acme_agent".to_string(),
                hostname: "agent.acme.test".to_string(),
                selected_image: None,
            },
        )
    }

    #[test]
    fn new_container_has_no_handle_or_urls() {
        let c = agent();
        let snap = c.snapshot();
        assert!(!snap.alive);
        assert_eq!(snap.handle, None);
        assert!(snap.urls.is_empty());
        assert_eq!(c.terminal_hint(), "docker exec -ti acme_agent bash");
    }

    #[test]
    fn runtime_replaced_and_cleared_as_a_unit() {
        let c = agent();
        c.set_runtime(Runtime {
            handle: Some("abc".to_string()),
            ports: BTreeMap::from([(9090, 32768)]),
            urls: BTreeMap::from([(9090, "http://127.0.0.1:32768".to_string())]),
        });
        assert_eq!(c.handle().as_deref(), Some("abc"));
        assert_eq!(c.url(9090).as_deref(), Some("http://127.0.0.1:32768"));

        c.clear_runtime();
        assert_eq!(c.runtime(), Runtime::default());
    }

    #[test]
    fn uptime_only_reported_while_up() {
        let c = agent();
        c.set_liveness(Liveness::Up {
            uptime: Duration::from_secs(42),
        });
        assert_eq!(c.snapshot().uptime_secs, Some(42));
        c.set_liveness(Liveness::Down);
        assert_eq!(c.snapshot().uptime_secs, None);
    }

    #[test]
    fn statuses_serialize_lowercase() {
        assert_eq!(
            serde_json::to_string(&Readiness::Loading).unwrap(),
            "\"loading\""
        );
        assert_eq!(DaemonStatus::Running.to_string(), "running");
    }
}
