//! Host-side collaborators: bringing the container engine up and finding the
//! address under which published container ports are reachable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use tokio_util::sync::CancellationToken;

use crate::docker::{ContainerEngine, EngineError};

/// One-time host preparation for the container engine.
#[async_trait]
pub trait HostBootstrap: Send + Sync {
    /// True while the engine is being brought up.
    fn in_progress(&self) -> bool;

    /// Wait until the engine answers, or give up. Returns
    /// [`EngineError::Cancelled`] as soon as `cancel` fires.
    async fn ensure_engine(
        &self,
        engine: &dyn ContainerEngine,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError>;

    /// Address at which published container ports can be reached from the host.
    async fn engine_address(&self, engine: &dyn ContainerEngine) -> String;
}

/// Bootstrap for hosts where the engine runs natively or is reached through
/// `DOCKER_HOST`. Nothing is launched; the engine is only waited for.
#[derive(Default)]
pub struct NativeBootstrap {
    in_progress: Arc<AtomicBool>,
    max_wait: Option<Duration>,
}

impl NativeBootstrap {
    pub fn new(max_wait: Duration) -> Self {
        Self {
            in_progress: Arc::new(AtomicBool::new(false)),
            max_wait: Some(max_wait),
        }
    }
}

/// Host part of a `tcp://host:port` engine URL.
pub fn host_from_docker_host(value: &str) -> Option<String> {
    let rest = value.strip_prefix("tcp://")?;
    let host = rest.split(['/', ':']).next()?;
    (!host.is_empty()).then(|| host.to_string())
}

#[async_trait]
impl HostBootstrap for NativeBootstrap {
    fn in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    async fn ensure_engine(
        &self,
        engine: &dyn ContainerEngine,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        self.in_progress.store(true, Ordering::SeqCst);
        let max_wait = self.max_wait.unwrap_or(Duration::from_secs(30));

        let wait = tokio::time::timeout(max_wait, async {
            (|| async { engine.version().await })
                .retry(
                    ExponentialBuilder::default()
                        .with_min_delay(Duration::from_millis(250))
                        .with_max_delay(Duration::from_secs(3))
                        .without_max_times(),
                )
                .notify(|err: &EngineError, dur: Duration| {
                    tracing::debug!("engine not answering: {}, retrying in {:?}", err, dur);
                })
                .await
        });
        let result = tokio::select! {
            result = wait => result,
            _ = cancel.cancelled() => {
                self.in_progress.store(false, Ordering::SeqCst);
                tracing::debug!("stopped waiting for the engine");
                return Err(EngineError::Cancelled);
            }
        };

        self.in_progress.store(false, Ordering::SeqCst);
        match result {
            Ok(Ok(version)) => {
                tracing::info!(version = %version, "container engine is up");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(EngineError::Transport(format!(
                "engine did not answer within {}",
                humantime::format_duration(max_wait)
            ))),
        }
    }

    async fn engine_address(&self, engine: &dyn ContainerEngine) -> String {
        if let Some(host) = std::env::var("DOCKER_HOST")
            .ok()
            .as_deref()
            .and_then(host_from_docker_host)
        {
            return host;
        }
        match engine.bridge_gateway().await {
            Ok(Some(gateway)) => gateway,
            Ok(None) => "127.0.0.1".to_string(),
            Err(e) => {
                tracing::warn!("could not read bridge network gateway: {}", e);
                "127.0.0.1".to_string()
            }
        }
    }
}
