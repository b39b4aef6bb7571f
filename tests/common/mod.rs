#![allow(dead_code)]
use std::net::TcpListener;
use std::path::PathBuf;
use tempfile::TempDir;

pub struct TestProject {
    pub dir: TempDir,
    pub config_path: PathBuf,
}

impl TestProject {
    pub fn new(config_toml: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("pekit.toml");
        std::fs::write(&config_path, config_toml).unwrap();
        Self { dir, config_path }
    }
}

pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Whether a Docker daemon answers on this machine.
pub fn docker_available() -> bool {
    std::process::Command::new("docker")
        .args(["version", "--format", "{{.Server.Version}}"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Force-remove containers by name using the Docker CLI, so cleanup works
/// even when a test fails halfway.
pub fn docker_cleanup(names: &[&str]) {
    for name in names {
        let _ = std::process::Command::new("docker")
            .args(["rm", "-f", name])
            .output();
    }
}
