// Read-only lookups over the cached lists

use super::{DataController, Resource};
use crate::models::{ContainerSnapshot, ContainerStatus, ImageInfo, NetworkInfo, ResourceKind, VolumeInfo};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ControllerStats {
    pub containers: usize,
    pub networks: usize,
    pub images: usize,
    pub volumes: usize,
    pub observers: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCounts {
    pub total_containers: usize,
    pub running_containers: usize,
    pub stopped_containers: usize,
    pub paused_containers: usize,
    pub total_networks: usize,
    pub total_images: usize,
    pub total_volumes: usize,
}

/// Usage over running containers; all zero when none are running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetrics {
    pub avg_cpu: f64,
    pub avg_ram: f64,
    pub max_cpu: f64,
    pub max_ram: f64,
    pub running_containers: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResults {
    pub containers: Vec<ContainerSnapshot>,
    pub networks: Vec<NetworkInfo>,
    pub images: Vec<ImageInfo>,
    pub volumes: Vec<VolumeInfo>,
}

/// Every cache at one moment.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceSnapshot {
    pub containers: Vec<ContainerSnapshot>,
    pub networks: Vec<NetworkInfo>,
    pub images: Vec<ImageInfo>,
    pub volumes: Vec<VolumeInfo>,
    pub timestamp: DateTime<Utc>,
    pub stats: ControllerStats,
}

impl DataController {
    /// Match on exact name, exact id, or id prefix.
    pub fn find_container(&self, id_or_name: &str) -> Option<ContainerSnapshot> {
        if id_or_name.is_empty() {
            return None;
        }
        let cached = ContainerSnapshot::cache(self).read();
        cached
            .iter()
            .find(|c| c.name == id_or_name || c.id == id_or_name)
            .or_else(|| cached.iter().find(|c| c.id.starts_with(id_or_name)))
            .cloned()
    }

    pub fn find_containers_by_status(&self, status: ContainerStatus) -> Vec<ContainerSnapshot> {
        self.filter_containers(|c| c.status == status)
    }

    pub fn filter_containers(&self, predicate: impl Fn(&ContainerSnapshot) -> bool) -> Vec<ContainerSnapshot> {
        ContainerSnapshot::cache(self)
            .read()
            .iter()
            .filter(|c| predicate(c))
            .cloned()
            .collect()
    }

    pub fn find_network_by_name(&self, name: &str) -> Option<NetworkInfo> {
        NetworkInfo::cache(self)
            .read()
            .iter()
            .find(|n| n.name == name)
            .cloned()
    }

    pub fn find_image_by_tag(&self, tag: &str) -> Option<ImageInfo> {
        ImageInfo::cache(self)
            .read()
            .iter()
            .find(|i| i.tags.iter().any(|t| t == tag))
            .cloned()
    }

    pub fn find_volume_by_name(&self, name: &str) -> Option<VolumeInfo> {
        VolumeInfo::cache(self)
            .read()
            .iter()
            .find(|v| v.name == name)
            .cloned()
    }

    /// Case-insensitive substring search over the serialized fields of the
    /// selected kinds (all kinds when `kinds` is empty).
    pub fn search(&self, query: &str, kinds: &[ResourceKind]) -> SearchResults {
        let needle = query.trim().to_lowercase();
        let mut results = SearchResults::default();
        if needle.is_empty() {
            return results;
        }
        let wanted = |kind: ResourceKind| kinds.is_empty() || kinds.contains(&kind);

        if wanted(ResourceKind::Containers) {
            results.containers = self.search_in::<ContainerSnapshot>(&needle);
        }
        if wanted(ResourceKind::Networks) {
            results.networks = self.search_in::<NetworkInfo>(&needle);
        }
        if wanted(ResourceKind::Images) {
            results.images = self.search_in::<ImageInfo>(&needle);
        }
        if wanted(ResourceKind::Volumes) {
            results.volumes = self.search_in::<VolumeInfo>(&needle);
        }
        results
    }

    fn search_in<R: Resource>(&self, needle: &str) -> Vec<R> {
        R::cache(self)
            .read()
            .iter()
            .filter(|item| {
                serde_json::to_value(item)
                    .map(|v| value_contains(&v, needle))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    pub fn resource_counts(&self) -> ResourceCounts {
        let containers = ContainerSnapshot::cache(self).read();
        let count = |status: ContainerStatus| containers.iter().filter(|c| c.status == status).count();
        ResourceCounts {
            total_containers: containers.len(),
            running_containers: count(ContainerStatus::Running),
            stopped_containers: count(ContainerStatus::Exited),
            paused_containers: count(ContainerStatus::Paused),
            total_networks: NetworkInfo::cache(self).len(),
            total_images: ImageInfo::cache(self).len(),
            total_volumes: VolumeInfo::cache(self).len(),
        }
    }

    pub fn metrics(&self) -> ResourceMetrics {
        let containers = ContainerSnapshot::cache(self).read();
        let running: Vec<&ContainerSnapshot> = containers
            .iter()
            .filter(|c| c.status == ContainerStatus::Running)
            .collect();
        if running.is_empty() {
            return ResourceMetrics::default();
        }

        let n = running.len() as f64;
        ResourceMetrics {
            avg_cpu: running.iter().map(|c| c.cpu_percent).sum::<f64>() / n,
            avg_ram: running.iter().map(|c| c.ram_percent).sum::<f64>() / n,
            max_cpu: running.iter().map(|c| c.cpu_percent).fold(0.0, f64::max),
            max_ram: running.iter().map(|c| c.ram_percent).fold(0.0, f64::max),
            running_containers: running.len(),
        }
    }

    pub fn snapshot_all(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            containers: self.get(),
            networks: self.get(),
            images: self.get(),
            volumes: self.get(),
            timestamp: Utc::now(),
            stats: self.stats(),
        }
    }
}

fn value_contains(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s.to_lowercase().contains(needle),
        Value::Number(n) => n.to_string().contains(needle),
        Value::Array(items) => items.iter().any(|v| value_contains(v, needle)),
        Value::Object(map) => map.values().any(|v| value_contains(v, needle)),
        Value::Bool(_) | Value::Null => false,
    }
}
