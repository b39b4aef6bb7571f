use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::model::Credentials;
use crate::docker::{ContainerEngine, EngineError, PullProgress};
use crate::orchestrator::role::Role;
use crate::orchestrator::state::CatalogSnapshot;
use crate::registry::RegistryClient;

/// Tag prefix marking the year-led calendar versioning scheme.
const DATED_TAG_PREFIX: &str = "20";

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("download cancelled")]
    Cancelled,

    #[error("image is in use by a container: {0}")]
    InUse(String),

    #[error("{image} is not in the {role} image repository")]
    WrongRole { role: Role, image: String },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    Completed,
    /// The same image was already being pulled; nothing was started.
    AlreadyInProgress,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub local: usize,
    pub downloadable: usize,
    /// Set once per process when the remote check was skipped.
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct RoleImages {
    local: Vec<String>,
    downloadable: Vec<String>,
    update_available: bool,
}

/// One in-flight pull. The id tells a pull apart from a later pull of the
/// same image.
#[derive(Debug, Clone)]
struct DownloadJob {
    id: u64,
    cancel: CancellationToken,
}

fn tag_of(image: &str) -> &str {
    image.rsplit_once(':').map(|(_, tag)| tag).unwrap_or(image)
}

fn is_dated(image: &str) -> bool {
    tag_of(image).starts_with(DATED_TAG_PREFIX)
}

/// Catalog order: dated tags first, each group descending.
pub fn catalog_order(a: &str, b: &str) -> CmpOrdering {
    is_dated(b).cmp(&is_dated(a)).then_with(|| b.cmp(a))
}

/// Sort image references newest-looking first.
pub fn sort_images(images: &mut [String]) {
    images.sort_by(|a, b| catalog_order(a, b));
}

/// Whether the newest downloadable image is newer than the newest local one.
pub fn is_update(newest_downloadable: Option<&str>, newest_local: Option<&str>) -> bool {
    match (newest_downloadable, newest_local) {
        (Some(remote), Some(local)) => catalog_order(remote, local) == CmpOrdering::Less,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Local and remote images per role, plus in-flight downloads.
pub struct ImageCatalog {
    engine: Arc<dyn ContainerEngine>,
    registry: Arc<dyn RegistryClient>,
    patterns: BTreeMap<Role, String>,
    credentials: Option<Credentials>,
    images: RwLock<BTreeMap<Role, RoleImages>>,
    jobs: DashMap<String, DownloadJob>,
    next_job: AtomicU64,
    changed: AtomicBool,
    warned_no_credentials: AtomicBool,
    shutdown: CancellationToken,
}

impl ImageCatalog {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        registry: Arc<dyn RegistryClient>,
        patterns: BTreeMap<Role, String>,
        credentials: Option<Credentials>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            engine,
            registry,
            patterns,
            credentials,
            images: RwLock::new(BTreeMap::new()),
            jobs: DashMap::new(),
            next_job: AtomicU64::new(1),
            changed: AtomicBool::new(false),
            warned_no_credentials: AtomicBool::new(false),
            shutdown,
        }
    }

    fn pattern(&self, role: Role) -> &str {
        self.patterns.get(&role).map(String::as_str).unwrap_or_default()
    }

    /// Whether `image` is a tag of the role's repository.
    pub fn belongs_to(&self, role: Role, image: &str) -> bool {
        image
            .strip_prefix(self.pattern(role))
            .is_some_and(|rest| rest.len() > 1 && rest.starts_with(':'))
    }

    /// Re-read local images and registry tags for `role`.
    ///
    /// Only a failure to list local images is an error; registry problems
    /// leave the downloadable list empty for this cycle.
    pub async fn refresh(&self, role: Role) -> Result<RefreshOutcome, CatalogError> {
        let pattern = self.pattern(role).to_string();
        let prefix = format!("{}:", pattern);

        let mut local: Vec<String> = self
            .engine
            .list_images()
            .await?
            .into_iter()
            .flat_map(|image| image.repo_tags)
            .filter(|tag| tag.starts_with(&prefix))
            .collect();
        local.sort();
        local.dedup();
        sort_images(&mut local);

        let mut warning = None;
        let mut downloadable: Vec<String> = if self.credentials.is_none() {
            if !self.warned_no_credentials.swap(true, Ordering::SeqCst) {
                let msg = "no registry credentials configured; skipping check for new images"
                    .to_string();
                warn!("{}", msg);
                warning = Some(msg);
            }
            Vec::new()
        } else {
            match self.registry.list_tags(&pattern).await {
                Ok(tags) => tags
                    .into_iter()
                    .map(|tag| format!("{}:{}", pattern, tag))
                    .filter(|image| !local.contains(image))
                    .collect(),
                Err(e) => {
                    warn!(role = %role, "registry check failed: {}", e);
                    Vec::new()
                }
            }
        };
        sort_images(&mut downloadable);

        let update_available = is_update(
            downloadable.first().map(String::as_str),
            local.first().map(String::as_str),
        );
        debug!(
            role = %role,
            local = local.len(),
            downloadable = downloadable.len(),
            update_available,
            "image catalog refreshed"
        );

        let outcome = RefreshOutcome {
            local: local.len(),
            downloadable: downloadable.len(),
            warning,
        };
        self.images.write().insert(
            role,
            RoleImages {
                local,
                downloadable,
                update_available,
            },
        );
        self.changed.store(true, Ordering::SeqCst);
        Ok(outcome)
    }

    /// Pull `image`, refreshing the role's lists afterwards.
    ///
    /// Cancelling the job (see [`Self::cancel_download`]) or shutting down
    /// aborts the pull at the next streamed chunk.
    pub async fn download(&self, role: Role, image: &str) -> Result<DownloadOutcome, CatalogError> {
        if !self.belongs_to(role, image) {
            return Err(CatalogError::WrongRole {
                role,
                image: image.to_string(),
            });
        }
        let job = match self.jobs.entry(image.to_string()) {
            Entry::Occupied(_) => {
                info!(image = %image, "download already in progress");
                return Ok(DownloadOutcome::AlreadyInProgress);
            }
            Entry::Vacant(slot) => {
                let job = DownloadJob {
                    id: self.next_job.fetch_add(1, Ordering::SeqCst),
                    cancel: self.shutdown.child_token(),
                };
                slot.insert(job.clone());
                job
            }
        };
        self.changed.store(true, Ordering::SeqCst);
        info!(role = %role, image = %image, "downloading image");

        let cancel = &job.cancel;
        let mut on_progress = |progress: &PullProgress| {
            if cancel.is_cancelled() {
                return ControlFlow::Break(());
            }
            if let Some(status) = &progress.status {
                debug!(image = %image, "{} {}", status, progress.progress.as_deref().unwrap_or(""));
            }
            ControlFlow::Continue(())
        };

        let result = self
            .engine
            .pull_image(image, self.credentials.as_ref(), &mut on_progress)
            .await;
        self.jobs.remove_if(image, |_, current| current.id == job.id);
        self.changed.store(true, Ordering::SeqCst);

        match result {
            Ok(()) => {
                info!(image = %image, "download complete");
                self.refresh(role).await?;
                Ok(DownloadOutcome::Completed)
            }
            Err(EngineError::Cancelled) => {
                info!(image = %image, "download cancelled");
                Err(CatalogError::Cancelled)
            }
            Err(e) => {
                warn!(image = %image, "download failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Signal the in-flight pull of `image` to stop. Returns false if it was
    /// not being downloaded.
    pub fn cancel_download(&self, role: Role, image: &str) -> bool {
        match self.jobs.remove(image) {
            Some((_, job)) => {
                info!(role = %role, image = %image, "cancelling download");
                job.cancel.cancel();
                self.changed.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub async fn delete(&self, role: Role, image: &str) -> Result<(), CatalogError> {
        match self.engine.remove_image(image).await {
            Ok(()) => {
                info!(role = %role, image = %image, "image deleted");
                self.refresh(role).await?;
                Ok(())
            }
            Err(EngineError::Conflict(msg)) => Err(CatalogError::InUse(msg)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_downloading(&self, image: &str) -> bool {
        self.jobs.contains_key(image)
    }

    pub fn downloading(&self) -> Vec<String> {
        let mut jobs: Vec<String> = self.jobs.iter().map(|j| j.key().clone()).collect();
        jobs.sort();
        jobs
    }

    pub fn local(&self, role: Role) -> Vec<String> {
        self.images
            .read()
            .get(&role)
            .map(|i| i.local.clone())
            .unwrap_or_default()
    }

    pub fn downloadable(&self, role: Role) -> Vec<String> {
        self.images
            .read()
            .get(&role)
            .map(|i| i.downloadable.clone())
            .unwrap_or_default()
    }

    /// Newest local image for `role`.
    pub fn newest_local(&self, role: Role) -> Option<String> {
        self.local(role).into_iter().next()
    }

    /// True if a newer image exists remotely for either role.
    pub fn update_available(&self) -> bool {
        self.images.read().values().any(|i| i.update_available)
    }

    /// Returns whether the catalog changed since the last call.
    pub fn take_changed(&self) -> bool {
        self.changed.swap(false, Ordering::SeqCst)
    }

    pub fn snapshot(&self, role: Role) -> CatalogSnapshot {
        let pattern = format!("{}:", self.pattern(role));
        let images = self.images.read();
        let entry = images.get(&role).cloned().unwrap_or_default();
        CatalogSnapshot {
            role,
            local: entry.local,
            downloadable: entry.downloadable,
            downloading: self
                .downloading()
                .into_iter()
                .filter(|j| j.starts_with(&pattern))
                .collect(),
            update_available: entry.update_available,
        }
    }
}
