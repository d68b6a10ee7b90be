// Container runtime facade

mod docker;

pub use docker::DockerRuntime;

use crate::models::{ContainerRecord, ImageInfo, NetworkInfo, ResourceKind, RuntimeEvent, VolumeInfo};
use async_trait::async_trait;
use bollard::models::ContainerStatsResponse;
use futures_util::stream::BoxStream;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// Live event stream. Infinite while the connection holds; once it yields an
/// error or ends, callers must subscribe again.
pub type EventStream = BoxStream<'static, Result<RuntimeEvent, RuntimeError>>;

pub type SharedRuntime = Arc<dyn ContainerRuntime>;

#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// The target vanished between listing and acting on it.
    #[error("not found: {0}")]
    NotFound(String),
    #[error("runtime call failed: {0}")]
    Api(String),
    #[error("event stream closed")]
    StreamClosed,
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}

/// Parameters for creating and starting a detached container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSpec {
    pub image: String,
    pub command: Option<Vec<String>>,
    pub name: String,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PruneTarget {
    Containers,
    Images,
    Volumes,
    Networks,
}

impl PruneTarget {
    pub fn resource_kind(&self) -> ResourceKind {
        match self {
            PruneTarget::Containers => ResourceKind::Containers,
            PruneTarget::Images => ResourceKind::Images,
            PruneTarget::Volumes => ResourceKind::Volumes,
            PruneTarget::Networks => ResourceKind::Networks,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneReport {
    pub target: PruneTarget,
    pub deleted: Vec<String>,
    pub space_reclaimed: i64,
}

/// Capability interface over the container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerRecord>, RuntimeError>;

    /// Inspect one container; fills `command` in addition to the list fields.
    async fn get_container(&self, name_or_id: &str) -> Result<ContainerRecord, RuntimeError>;

    /// Create and start a detached container. Returns the new container id.
    async fn run_container(&self, spec: RunSpec) -> Result<String, RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError>;

    async fn restart_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn pause_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn unpause_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn kill_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError>;

    async fn prune(&self, target: PruneTarget) -> Result<PruneReport, RuntimeError>;

    /// One non-streaming stats read.
    async fn stats_once(&self, id: &str) -> Result<ContainerStatsResponse, RuntimeError>;

    async fn list_networks(&self) -> Result<Vec<NetworkInfo>, RuntimeError>;

    async fn list_images(&self) -> Result<Vec<ImageInfo>, RuntimeError>;

    async fn list_volumes(&self) -> Result<Vec<VolumeInfo>, RuntimeError>;

    fn events(&self) -> EventStream;
}

/// Serializes every call into the wrapped runtime behind one lock. Each call
/// holds the lock for exactly one runtime operation.
///
/// `events()` is not serialized: the subscription lives for the whole process
/// and holding the lock for it would starve every other caller.
pub struct LockedRuntime {
    inner: SharedRuntime,
    lock: Mutex<()>,
}

impl LockedRuntime {
    pub fn new(inner: SharedRuntime) -> Self {
        Self {
            inner,
            lock: Mutex::new(()),
        }
    }

    pub fn shared(inner: SharedRuntime) -> SharedRuntime {
        Arc::new(Self::new(inner))
    }
}

#[async_trait]
impl ContainerRuntime for LockedRuntime {
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerRecord>, RuntimeError> {
        let _guard = self.lock.lock().await;
        self.inner.list_containers(all).await
    }

    async fn get_container(&self, name_or_id: &str) -> Result<ContainerRecord, RuntimeError> {
        let _guard = self.lock.lock().await;
        self.inner.get_container(name_or_id).await
    }

    async fn run_container(&self, spec: RunSpec) -> Result<String, RuntimeError> {
        let _guard = self.lock.lock().await;
        self.inner.run_container(spec).await
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        let _guard = self.lock.lock().await;
        self.inner.start_container(id).await
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let _guard = self.lock.lock().await;
        self.inner.stop_container(id, timeout).await
    }

    async fn restart_container(&self, id: &str) -> Result<(), RuntimeError> {
        let _guard = self.lock.lock().await;
        self.inner.restart_container(id).await
    }

    async fn pause_container(&self, id: &str) -> Result<(), RuntimeError> {
        let _guard = self.lock.lock().await;
        self.inner.pause_container(id).await
    }

    async fn unpause_container(&self, id: &str) -> Result<(), RuntimeError> {
        let _guard = self.lock.lock().await;
        self.inner.unpause_container(id).await
    }

    async fn kill_container(&self, id: &str) -> Result<(), RuntimeError> {
        let _guard = self.lock.lock().await;
        self.inner.kill_container(id).await
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        let _guard = self.lock.lock().await;
        self.inner.remove_container(id, force).await
    }

    async fn prune(&self, target: PruneTarget) -> Result<PruneReport, RuntimeError> {
        let _guard = self.lock.lock().await;
        self.inner.prune(target).await
    }

    async fn stats_once(&self, id: &str) -> Result<ContainerStatsResponse, RuntimeError> {
        let _guard = self.lock.lock().await;
        self.inner.stats_once(id).await
    }

    async fn list_networks(&self) -> Result<Vec<NetworkInfo>, RuntimeError> {
        let _guard = self.lock.lock().await;
        self.inner.list_networks().await
    }

    async fn list_images(&self) -> Result<Vec<ImageInfo>, RuntimeError> {
        let _guard = self.lock.lock().await;
        self.inner.list_images().await
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeInfo>, RuntimeError> {
        let _guard = self.lock.lock().await;
        self.inner.list_volumes().await
    }

    fn events(&self) -> EventStream {
        self.inner.events()
    }
}
