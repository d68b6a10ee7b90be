// Docker container models

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Label marking a container as a clone created by the auto-scaler.
pub const LABEL_IS_CLONE: &str = "dmm.is_clone";
/// Label holding the name of the container a clone was made from.
pub const LABEL_PARENT: &str = "dmm.parent_container";
/// Label identifying the application that created the container.
pub const LABEL_CREATED_BY: &str = "dmm.created_by";

/// Length of the abbreviated container id shown to users.
pub const SHORT_ID_LEN: usize = 12;

/// Container status; serializes to lowercase JSON (e.g. "running").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Exited,
    Dead,
    Error,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ContainerStatus {
    /// Parse from Docker API state string (e.g. "running", "exited").
    pub fn from_docker(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "created" => ContainerStatus::Created,
            "running" => ContainerStatus::Running,
            "paused" => ContainerStatus::Paused,
            "exited" => ContainerStatus::Exited,
            "dead" => ContainerStatus::Dead,
            _ => ContainerStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Paused => "paused",
            ContainerStatus::Exited => "exited",
            ContainerStatus::Dead => "dead",
            ContainerStatus::Unknown => "unknown",
            ContainerStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One point-in-time sample of a container. Superseded wholesale by the next
/// sampling pass, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSnapshot {
    pub id: String,
    pub short_id: String,
    pub name: String,
    pub status: ContainerStatus,
    pub cpu_percent: f64,
    pub ram_percent: f64,
}

impl ContainerSnapshot {
    /// Snapshot with zeroed usage for a container whose stats were not read.
    pub fn idle(record: &ContainerRecord) -> Self {
        Self {
            id: record.id.clone(),
            short_id: short_id(&record.id),
            name: record.name.clone(),
            status: record.status,
            cpu_percent: 0.0,
            ram_percent: 0.0,
        }
    }

    /// Placeholder row for a handle that could not be read at all.
    pub fn unreadable() -> Self {
        Self {
            id: "unknown".into(),
            short_id: "unknown".into(),
            name: "unknown".into(),
            status: ContainerStatus::Error,
            cpu_percent: 0.0,
            ram_percent: 0.0,
        }
    }
}

/// A container as reported by the runtime's list/inspect calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    pub status: ContainerStatus,
    /// Image reference the container was created from, when it is a tag
    /// rather than a bare digest.
    pub image: Option<String>,
    pub image_id: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Only filled by inspect; listings leave it empty.
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

impl ContainerRecord {
    pub fn clone_labels(&self) -> Option<CloneLabels> {
        CloneLabels::from_labels(&self.labels)
    }

    pub fn is_clone(&self) -> bool {
        self.clone_labels().is_some()
    }

    /// True when this record is a clone whose parent is `parent_name`.
    pub fn is_clone_of(&self, parent_name: &str) -> bool {
        self.clone_labels()
            .is_some_and(|l| l.parent_name == parent_name)
    }

    /// Image to start a copy of this container from: the tag when known,
    /// otherwise the image id.
    pub fn clone_image(&self) -> Option<String> {
        self.image
            .clone()
            .filter(|i| !i.is_empty())
            .or_else(|| Some(self.image_id.clone()).filter(|i| !i.is_empty()))
    }
}

/// Ownership metadata carried by clone containers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneLabels {
    pub parent_name: String,
    pub created_by: String,
}

impl CloneLabels {
    pub fn new(parent_name: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self {
            parent_name: parent_name.into(),
            created_by: created_by.into(),
        }
    }

    /// Decode from container labels. A clone must carry both the flag and a
    /// non-empty parent name.
    pub fn from_labels(labels: &HashMap<String, String>) -> Option<Self> {
        if labels.get(LABEL_IS_CLONE).map(String::as_str) != Some("true") {
            return None;
        }
        let parent = labels.get(LABEL_PARENT).filter(|p| !p.is_empty())?;
        Some(Self {
            parent_name: parent.clone(),
            created_by: labels.get(LABEL_CREATED_BY).cloned().unwrap_or_default(),
        })
    }

    pub fn to_labels(&self) -> HashMap<String, String> {
        HashMap::from([
            (LABEL_IS_CLONE.to_string(), "true".to_string()),
            (LABEL_PARENT.to_string(), self.parent_name.clone()),
            (LABEL_CREATED_BY.to_string(), self.created_by.clone()),
        ])
    }
}

pub fn short_id(id: &str) -> String {
    let id = id.strip_prefix("sha256:").unwrap_or(id);
    id.chars().take(SHORT_ID_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_docker_strings() {
        assert_eq!(ContainerStatus::from_docker("Running"), ContainerStatus::Running);
        assert_eq!(ContainerStatus::from_docker("dead"), ContainerStatus::Dead);
        assert_eq!(ContainerStatus::from_docker("restarting"), ContainerStatus::Unknown);
    }

    #[test]
    fn clone_labels_require_flag_and_parent() {
        let labels = CloneLabels::new("web", "docker-monitor-manager").to_labels();
        let decoded = CloneLabels::from_labels(&labels).unwrap();
        assert_eq!(decoded.parent_name, "web");

        let mut no_parent = labels.clone();
        no_parent.insert(LABEL_PARENT.into(), String::new());
        assert!(CloneLabels::from_labels(&no_parent).is_none());

        let mut not_flagged = labels;
        not_flagged.insert(LABEL_IS_CLONE.into(), "false".into());
        assert!(CloneLabels::from_labels(&not_flagged).is_none());
    }

    #[test]
    fn clone_image_prefers_tag() {
        let mut record = ContainerRecord {
            image: Some("nginx:latest".into()),
            image_id: "sha256:abc".into(),
            ..Default::default()
        };
        assert_eq!(record.clone_image().as_deref(), Some("nginx:latest"));
        record.image = None;
        assert_eq!(record.clone_image().as_deref(), Some("sha256:abc"));
    }

    #[test]
    fn short_id_strips_digest_prefix() {
        assert_eq!(short_id("sha256:0123456789abcdef"), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
    }
}
