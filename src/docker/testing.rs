//! In-memory [`ContainerEngine`] for unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::model::Credentials;
use crate::docker::{
    ContainerDetails, ContainerEngine, ContainerSpec, EngineError, LocalImage,
    PullProgress,
};

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub spec: ContainerSpec,
    pub details: ContainerDetails,
}

pub struct FakeEngine {
    pub containers: Mutex<HashMap<String, FakeContainer>>,
    pub images: Mutex<Vec<LocalImage>>,
    pub images_in_use: Mutex<HashSet<String>>,
    pub exec_log: Mutex<Vec<(String, String)>>,
    exec_codes: Mutex<Vec<(String, i64)>>,
    pub daemon_up: AtomicBool,
    pub create_calls: AtomicUsize,
    pub pull_calls: AtomicUsize,
    pub pull_chunks: AtomicUsize,
    /// When set, every pull chunk after the first waits for a permit.
    pub pull_gate: Option<Semaphore>,
    next_port: AtomicU16,
    next_id: AtomicUsize,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self {
            containers: Mutex::new(HashMap::new()),
            images: Mutex::new(Vec::new()),
            images_in_use: Mutex::new(HashSet::new()),
            exec_log: Mutex::new(Vec::new()),
            exec_codes: Mutex::new(Vec::new()),
            daemon_up: AtomicBool::new(true),
            create_calls: AtomicUsize::new(0),
            pull_calls: AtomicUsize::new(0),
            pull_chunks: AtomicUsize::new(3),
            pull_gate: None,
            next_port: AtomicU16::new(32768),
            next_id: AtomicUsize::new(1),
        }
    }
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pull_gate() -> Self {
        Self {
            pull_gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn add_image(&self, tags: &[&str]) {
        let id = format!("sha256:{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.images.lock().push(LocalImage {
            id,
            repo_tags: tags.iter().map(|t| t.to_string()).collect(),
        });
    }

    /// Register a container that already exists in the engine.
    pub fn add_container(&self, name: &str, running: bool, uptime_secs: i64) {
        let id = format!("{}-id", name);
        let details = ContainerDetails {
            id: id.clone(),
            status: if running { "running" } else { "created" }.to_string(),
            running,
            started_at: running.then(|| Utc::now() - ChronoDuration::seconds(uptime_secs)),
            published: BTreeMap::new(),
        };
        self.containers.lock().insert(
            name.to_string(),
            FakeContainer {
                id,
                spec: ContainerSpec {
                    name: name.to_string(),
                    ..Default::default()
                },
                details,
            },
        );
    }

    /// Commands containing `needle` exit with `code`.
    pub fn script_exec(&self, needle: &str, code: i64) {
        self.exec_codes.lock().push((needle.to_string(), code));
    }

    pub fn kill(&self, name: &str) {
        if let Some(c) = self.containers.lock().get_mut(name) {
            c.details.running = false;
            c.details.status = "exited".to_string();
        }
    }

    pub fn executed(&self) -> Vec<(String, String)> {
        self.exec_log.lock().clone()
    }

    pub fn local_tags(&self) -> Vec<String> {
        self.images
            .lock()
            .iter()
            .flat_map(|i| i.repo_tags.clone())
            .collect()
    }

    fn find(&self, name_or_id: &str) -> Option<FakeContainer> {
        self.containers
            .lock()
            .values()
            .find(|c| c.spec.name == name_or_id || c.id == name_or_id)
            .cloned()
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn version(&self) -> Result<String, EngineError> {
        if self.daemon_up.load(Ordering::SeqCst) {
            Ok("1.12.1".to_string())
        } else {
            Err(EngineError::Transport("connection refused".to_string()))
        }
    }

    async fn inspect_container(&self, name_or_id: &str) -> Result<ContainerDetails, EngineError> {
        if !self.daemon_up.load(Ordering::SeqCst) {
            return Err(EngineError::Transport("connection refused".to_string()));
        }
        self.find(name_or_id)
            .map(|c| c.details)
            .ok_or_else(|| EngineError::NotFound(format!("No such container: {}", name_or_id)))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.find(&spec.name).is_some() {
            return Err(EngineError::Conflict(format!(
                "The container name \"/{}\" is already in use",
                spec.name
            )));
        }
        if !self.local_tags().contains(&spec.image) {
            return Err(EngineError::NotFound(format!("No such image: {}", spec.image)));
        }
        let id = format!("{}-{}", spec.name, self.next_id.fetch_add(1, Ordering::SeqCst));
        let details = ContainerDetails {
            id: id.clone(),
            status: "created".to_string(),
            running: false,
            started_at: None,
            published: BTreeMap::new(),
        };
        self.containers.lock().insert(
            spec.name.clone(),
            FakeContainer {
                id: id.clone(),
                spec: spec.clone(),
                details,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        let mut containers = self.containers.lock();
        let container = containers
            .values_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| EngineError::NotFound(format!("No such container: {}", id)))?;
        container.details.running = true;
        container.details.status = "running".to_string();
        container.details.started_at = Some(Utc::now());
        for pm in &container.spec.ports {
            let host = pm
                .host_port
                .unwrap_or_else(|| self.next_port.fetch_add(1, Ordering::SeqCst));
            container.details.published.insert(pm.container_port, host);
        }
        Ok(())
    }

    async fn remove_container(&self, name_or_id: &str) -> Result<(), EngineError> {
        self.containers
            .lock()
            .retain(|name, c| name != name_or_id && c.id != name_or_id);
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<LocalImage>, EngineError> {
        if !self.daemon_up.load(Ordering::SeqCst) {
            return Err(EngineError::Transport("connection refused".to_string()));
        }
        Ok(self.images.lock().clone())
    }

    async fn pull_image(
        &self,
        image: &str,
        _credentials: Option<&Credentials>,
        on_progress: &mut (dyn for<'p> FnMut(&'p PullProgress) -> ControlFlow<()> + Send),
    ) -> Result<(), EngineError> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        let chunks = self.pull_chunks.load(Ordering::SeqCst);
        for i in 0..chunks {
            if i > 0 {
                if let Some(gate) = &self.pull_gate {
                    gate.acquire()
                        .await
                        .map_err(|_| EngineError::Transport("gate closed".to_string()))?
                        .forget();
                }
            }
            let progress = PullProgress {
                status: Some(format!("Downloading layer {}", i)),
                progress: None,
            };
            if on_progress(&progress).is_break() {
                return Err(EngineError::Cancelled);
            }
        }
        self.add_image(&[image]);
        Ok(())
    }

    async fn remove_image(&self, image: &str) -> Result<(), EngineError> {
        if self.images_in_use.lock().contains(image) {
            return Err(EngineError::Conflict(format!(
                "conflict: unable to remove repository reference \"{}\"",
                image
            )));
        }
        let mut images = self.images.lock();
        let before = images.len();
        images.retain(|i| !i.repo_tags.iter().any(|t| t == image));
        if images.len() == before {
            return Err(EngineError::NotFound(format!("No such image: {}", image)));
        }
        Ok(())
    }

    async fn exec(
        &self,
        container: &str,
        cmd: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<i64, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if self.find(container).is_none() {
            return Err(EngineError::NotFound(format!("No such container: {}", container)));
        }
        let line = cmd.join(" ");
        self.exec_log.lock().push((container.to_string(), line.clone()));
        let exit_code = self
            .exec_codes
            .lock()
            .iter()
            .find(|(needle, _)| line.contains(needle.as_str()))
            .map(|(_, code)| *code)
            .unwrap_or(0);
        Ok(exit_code)
    }

    async fn bridge_gateway(&self) -> Result<Option<String>, EngineError> {
        Ok(Some("172.17.0.1".to_string()))
    }
}
