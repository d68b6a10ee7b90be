// Docker runtime via bollard

use super::{ContainerRuntime, EventStream, PruneReport, PruneTarget, RunSpec, RuntimeError};
use crate::models::{
    ContainerRecord, ContainerStatus, ImageInfo, NetworkInfo, RuntimeEvent, VolumeInfo, short_id,
};
use async_trait::async_trait;
use bollard::Docker;
use bollard::models::ContainerCreateBody;
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, EventsOptions, InspectContainerOptions, KillContainerOptions,
    ListContainersOptions, ListImagesOptions, ListNetworksOptions, ListVolumesOptions,
    PruneContainersOptions, PruneImagesOptions, PruneNetworksOptions, PruneVolumesOptions,
    RemoveContainerOptionsBuilder, RestartContainerOptions, StartContainerOptions, StatsOptions,
    StopContainerOptionsBuilder,
};
use bollard::models::ContainerStatsResponse;
use futures_util::StreamExt;
use std::time::Duration;
use tracing::{debug, instrument};

impl From<bollard::errors::Error> for RuntimeError {
    fn from(e: bollard::errors::Error) -> Self {
        match e {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => RuntimeError::NotFound(message),
            other => RuntimeError::Api(other.to_string()),
        }
    }
}

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> anyhow::Result<Self> {
        let docker = Docker::connect_with_unix_defaults()?;
        Ok(Self { docker })
    }

    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker.ping().await?;
        Ok(())
    }
}

fn trim_name(name: &str) -> String {
    name.trim_start_matches('/').to_string()
}

/// Seconds for the stop grace period, saturating at the API's i32.
fn stop_timeout_secs(timeout: Duration) -> i32 {
    i32::try_from(timeout.as_secs()).unwrap_or(i32::MAX)
}

/// A `sha256:` reference is a bare digest, not a tag worth reusing.
fn tagged_image(image: Option<String>) -> Option<String> {
    image.filter(|i| !i.is_empty() && !i.starts_with("sha256:"))
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    #[instrument(skip(self), fields(runtime = "docker", operation = "list_containers"))]
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerRecord>, RuntimeError> {
        let options = ListContainersOptions {
            all,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(options)).await?;

        Ok(containers
            .into_iter()
            .map(|c| {
                let id = c.id.unwrap_or_default();
                let name = c
                    .names
                    .as_ref()
                    .and_then(|n| n.first())
                    .map(|n| trim_name(n))
                    .unwrap_or_else(|| short_id(&id));
                let status = c
                    .state
                    .map(|s| ContainerStatus::from_docker(&s.to_string()))
                    .unwrap_or_default();
                ContainerRecord {
                    id,
                    name,
                    status,
                    image: tagged_image(c.image),
                    image_id: c.image_id.unwrap_or_default(),
                    labels: c.labels.unwrap_or_default(),
                    command: None,
                }
            })
            .collect())
    }

    #[instrument(skip(self), fields(runtime = "docker", operation = "get_container"))]
    async fn get_container(&self, name_or_id: &str) -> Result<ContainerRecord, RuntimeError> {
        let c = self
            .docker
            .inspect_container(name_or_id, None::<InspectContainerOptions>)
            .await?;

        let status = c
            .state
            .as_ref()
            .and_then(|s| s.status.as_ref())
            .map(|s| ContainerStatus::from_docker(&s.to_string()))
            .unwrap_or_default();
        let config = c.config.unwrap_or_default();
        Ok(ContainerRecord {
            id: c.id.unwrap_or_default(),
            name: c.name.as_deref().map(trim_name).unwrap_or_default(),
            status,
            image: tagged_image(config.image),
            image_id: c.image.unwrap_or_default(),
            labels: config.labels.unwrap_or_default(),
            command: config.cmd,
        })
    }

    #[instrument(skip(self, spec), fields(runtime = "docker", operation = "run_container", name = %spec.name))]
    async fn run_container(&self, spec: RunSpec) -> Result<String, RuntimeError> {
        let body = ContainerCreateBody {
            image: Some(spec.image),
            cmd: spec.command,
            labels: Some(spec.labels),
            ..Default::default()
        };
        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptionsBuilder::new().name(&spec.name).build()),
                body,
            )
            .await?;
        self.docker
            .start_container(&created.id, None::<StartContainerOptions>)
            .await?;
        debug!(id = %created.id, "container started");
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await?;
        Ok(())
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let options = StopContainerOptionsBuilder::new()
            .t(stop_timeout_secs(timeout))
            .build();
        self.docker.stop_container(id, Some(options)).await?;
        Ok(())
    }

    async fn restart_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .restart_container(id, None::<RestartContainerOptions>)
            .await?;
        Ok(())
    }

    async fn pause_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker.pause_container(id).await?;
        Ok(())
    }

    async fn unpause_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker.unpause_container(id).await?;
        Ok(())
    }

    async fn kill_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .kill_container(id, None::<KillContainerOptions>)
            .await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptionsBuilder::new().force(force).build();
        self.docker.remove_container(id, Some(options)).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(runtime = "docker", operation = "prune"))]
    async fn prune(&self, target: PruneTarget) -> Result<PruneReport, RuntimeError> {
        let (deleted, space_reclaimed) = match target {
            PruneTarget::Containers => {
                let r = self
                    .docker
                    .prune_containers(None::<PruneContainersOptions>)
                    .await?;
                (
                    r.containers_deleted.unwrap_or_default(),
                    r.space_reclaimed.unwrap_or(0),
                )
            }
            PruneTarget::Images => {
                let r = self.docker.prune_images(None::<PruneImagesOptions>).await?;
                let deleted = r
                    .images_deleted
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|i| i.deleted.or(i.untagged))
                    .collect();
                (deleted, r.space_reclaimed.unwrap_or(0))
            }
            PruneTarget::Volumes => {
                let r = self
                    .docker
                    .prune_volumes(None::<PruneVolumesOptions>)
                    .await?;
                (
                    r.volumes_deleted.unwrap_or_default(),
                    r.space_reclaimed.unwrap_or(0),
                )
            }
            PruneTarget::Networks => {
                let r = self
                    .docker
                    .prune_networks(None::<PruneNetworksOptions>)
                    .await?;
                (r.networks_deleted.unwrap_or_default(), 0)
            }
        };
        Ok(PruneReport {
            target,
            deleted,
            space_reclaimed,
        })
    }

    async fn stats_once(&self, id: &str) -> Result<ContainerStatsResponse, RuntimeError> {
        let options = StatsOptions {
            stream: false,
            ..Default::default()
        };
        let mut stream = self.docker.stats(id, Some(options));
        match stream.next().await {
            Some(Ok(s)) => Ok(s),
            Some(Err(e)) => Err(e.into()),
            None => Err(RuntimeError::Api(format!("empty stats response for {}", id))),
        }
    }

    async fn list_networks(&self) -> Result<Vec<NetworkInfo>, RuntimeError> {
        let networks = self
            .docker
            .list_networks(None::<ListNetworksOptions>)
            .await?;
        Ok(networks
            .into_iter()
            .map(|n| NetworkInfo {
                id: n.id.unwrap_or_default(),
                name: n.name.unwrap_or_default(),
                driver: n.driver.unwrap_or_default(),
                scope: n.scope.unwrap_or_default(),
            })
            .collect())
    }

    async fn list_images(&self) -> Result<Vec<ImageInfo>, RuntimeError> {
        let images = self.docker.list_images(None::<ListImagesOptions>).await?;
        Ok(images
            .into_iter()
            .map(|i| ImageInfo {
                short_id: short_id(&i.id),
                id: i.id,
                tags: i.repo_tags,
                size_bytes: i.size,
            })
            .collect())
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeInfo>, RuntimeError> {
        let response = self.docker.list_volumes(None::<ListVolumesOptions>).await?;
        Ok(response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|v| VolumeInfo {
                name: v.name,
                driver: v.driver,
                mountpoint: v.mountpoint,
            })
            .collect())
    }

    fn events(&self) -> EventStream {
        self.docker
            .events(None::<EventsOptions>)
            .map(|result| {
                result.map_err(RuntimeError::from).map(|e| {
                    let actor = e.actor.unwrap_or_default();
                    RuntimeEvent {
                        kind: e.typ.map(|t| t.to_string()).unwrap_or_default(),
                        action: e.action.unwrap_or_default(),
                        actor_id: actor.id.unwrap_or_default(),
                        attributes: actor.attributes.unwrap_or_default(),
                        time: e.time.unwrap_or(0),
                    }
                })
            })
            .boxed()
    }
}
