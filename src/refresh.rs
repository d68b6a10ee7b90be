// Re-read runtime state and publish it to the data controller

use crate::controller::{BatchUpdate, DataController};
use crate::runtime::{RuntimeError, SharedRuntime};
use crate::sampler;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct Refresher {
    runtime: SharedRuntime,
    controller: Arc<DataController>,
}

impl Refresher {
    pub fn new(runtime: SharedRuntime, controller: Arc<DataController>) -> Self {
        Self { runtime, controller }
    }

    /// List and sample every container, then publish `containers_updated`.
    /// Returns the number of snapshots published.
    pub async fn refresh_containers(&self) -> Result<usize, RuntimeError> {
        let sampled = sampler::collect(self.runtime.as_ref()).await?;
        let snapshots: Vec<_> = sampled.into_iter().map(|(_, s)| s).collect();
        let count = snapshots.len();
        self.controller.update_containers(snapshots);
        debug!(containers = count, "container list refreshed");
        Ok(count)
    }

    /// Re-read every resource list and publish them as one `batch_updated`.
    /// Nothing is published if any read fails.
    pub async fn refresh_all(&self) -> Result<(), RuntimeError> {
        let sampled = sampler::collect(self.runtime.as_ref()).await?;
        let networks = self.runtime.list_networks().await?;
        let images = self.runtime.list_images().await?;
        let volumes = self.runtime.list_volumes().await?;

        self.controller.update_all(BatchUpdate {
            containers: Some(sampled.into_iter().map(|(_, s)| s).collect()),
            networks: Some(networks),
            images: Some(images),
            volumes: Some(volumes),
        });
        Ok(())
    }
}
