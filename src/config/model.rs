use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::orchestrator::role::Role;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PekitConfig {
    #[serde(default = "default_master")]
    pub master: RoleConfig,
    #[serde(default = "default_agent")]
    pub agent: RoleConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

impl Default for PekitConfig {
    fn default() -> Self {
        Self {
            master: default_master(),
            agent: default_agent(),
            registry: RegistryConfig::default(),
            policy: PolicyConfig::default(),
            timing: TimingConfig::default(),
            dashboard: DashboardConfig::default(),
        }
    }
}

impl PekitConfig {
    pub fn role(&self, role: Role) -> &RoleConfig {
        match role {
            Role::Master => &self.master,
            Role::Agent => &self.agent,
        }
    }
}

/// Static configuration of one managed container.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RoleConfig {
    /// Repository name; local images are matched by this prefix.
    pub image: String,
    pub container_name: String,
    pub hostname: String,
    /// Explicit image to run when `policy.use_latest_image` is off.
    #[serde(default)]
    pub selected_image: Option<String>,
}

fn default_master() -> RoleConfig {
    RoleConfig {
        image: "geoffwilliams/pe_master_public_lowmem".to_string(),
        container_name: "pe_kit_master__".to_string(),
        hostname: "pe-puppet.localdomain".to_string(),
        selected_image: None,
    }
}

fn default_agent() -> RoleConfig {
    RoleConfig {
        image: "geoffwilliams/pe_agent_demo".to_string(),
        container_name: "pe_kit_agent__".to_string(),
        hostname: "agent.localdomain".to_string(),
        selected_image: None,
    }
}

/// Username/password pair handed to the registry and the engine.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn default_registry_address() -> String {
    "https://registry-1.docker.io".to_string()
}

fn default_auth_url() -> String {
    "https://auth.docker.io/token".to_string()
}

fn default_auth_service() -> String {
    "registry.docker.io".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RegistryConfig {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Registry API base URL (`/v2/<repo>/tags/list` is appended).
    #[serde(default = "default_registry_address")]
    pub address: String,
    /// Bearer token endpoint.
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_auth_service")]
    pub auth_service: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            address: default_registry_address(),
            auth_url: default_auth_url(),
            auth_service: default_auth_service(),
        }
    }
}

impl RegistryConfig {
    /// Both username and password, if configured and non-empty.
    pub fn credentials(&self) -> Option<Credentials> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some(Credentials {
                username: u.to_string(),
                password: p.to_string(),
            }),
            _ => None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PolicyConfig {
    #[serde(default = "default_true")]
    pub start_automatically: bool,
    #[serde(default = "default_true")]
    pub provision_automatically: bool,
    #[serde(default = "default_true")]
    pub kill_orphans: bool,
    #[serde(default = "default_true")]
    pub use_latest_image: bool,
    #[serde(default = "default_true")]
    pub shutdown_on_exit: bool,
    #[serde(default = "default_true")]
    pub expose_ports: bool,
    /// Host directory mounted at `/shared` in both containers.
    #[serde(default)]
    pub shared_dir: Option<PathBuf>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            start_automatically: true,
            provision_automatically: true,
            kill_orphans: true,
            use_latest_image: true,
            shutdown_on_exit: true,
            expose_ports: true,
            shared_dir: None,
        }
    }
}

fn default_health_interval_ms() -> u64 {
    1000
}

fn default_provision_poll_ms() -> u64 {
    2000
}

fn default_sign_delay_secs() -> u64 {
    5
}

fn default_probe_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TimingConfig {
    #[serde(default = "default_health_interval_ms")]
    pub health_interval_ms: u64,
    #[serde(default = "default_provision_poll_ms")]
    pub provision_poll_ms: u64,
    /// Pause between installing the agent and signing its certificate.
    #[serde(default = "default_sign_delay_secs")]
    pub sign_delay_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            health_interval_ms: default_health_interval_ms(),
            provision_poll_ms: default_provision_poll_ms(),
            sign_delay_secs: default_sign_delay_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

impl TimingConfig {
    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    pub fn provision_poll(&self) -> Duration {
        Duration::from_millis(self.provision_poll_ms)
    }

    pub fn sign_delay(&self) -> Duration {
        Duration::from_secs(self.sign_delay_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

fn default_dashboard_port() -> u16 {
    9876
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DashboardConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_dashboard_port")]
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_dashboard_port(),
        }
    }
}
