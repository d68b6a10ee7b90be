// Observer side of the data controller: notification types and the
// registration set.

use super::DataController;
use crate::models::{ContainerSnapshot, ImageInfo, NetworkInfo, ResourceKind, RuntimeEvent, VolumeInfo};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Kind of change carried by a notification; serializes to the wire names
/// (e.g. "containers_updated").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ContainersUpdated,
    NetworksUpdated,
    ImagesUpdated,
    VolumesUpdated,
    BatchUpdated,
    ContainerAction,
    NetworkAction,
    ImageAction,
    VolumeAction,
    DockerEvent,
    BulkActions,
}

impl EventType {
    pub fn updated(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Containers => EventType::ContainersUpdated,
            ResourceKind::Networks => EventType::NetworksUpdated,
            ResourceKind::Images => EventType::ImagesUpdated,
            ResourceKind::Volumes => EventType::VolumesUpdated,
        }
    }

    pub fn action(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Containers => EventType::ContainerAction,
            ResourceKind::Networks => EventType::NetworkAction,
            ResourceKind::Images => EventType::ImageAction,
            ResourceKind::Volumes => EventType::VolumeAction,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ContainersUpdated => "containers_updated",
            EventType::NetworksUpdated => "networks_updated",
            EventType::ImagesUpdated => "images_updated",
            EventType::VolumesUpdated => "volumes_updated",
            EventType::BatchUpdated => "batch_updated",
            EventType::ContainerAction => "container_action",
            EventType::NetworkAction => "network_action",
            EventType::ImageAction => "image_action",
            EventType::VolumeAction => "volume_action",
            EventType::DockerEvent => "docker_event",
            EventType::BulkActions => "bulk_actions",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one user-requested action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionNotice {
    pub kind: ResourceKind,
    pub action: String,
    pub target: String,
    pub success: bool,
    pub error: Option<String>,
}

impl ActionNotice {
    pub fn ok(kind: ResourceKind, action: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind,
            action: action.into(),
            target: target.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(
        kind: ResourceKind,
        action: impl Into<String>,
        target: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            action: action.into(),
            target: target.into(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Lists published together by a batch update; `None` means "not part of
/// this batch".
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchPayload {
    pub containers: Option<Arc<Vec<ContainerSnapshot>>>,
    pub networks: Option<Arc<Vec<NetworkInfo>>>,
    pub images: Option<Arc<Vec<ImageInfo>>>,
    pub volumes: Option<Arc<Vec<VolumeInfo>>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Containers(Arc<Vec<ContainerSnapshot>>),
    Networks(Arc<Vec<NetworkInfo>>),
    Images(Arc<Vec<ImageInfo>>),
    Volumes(Arc<Vec<VolumeInfo>>),
    Batch(BatchPayload),
    Action(ActionNotice),
    Event(RuntimeEvent),
    BulkActions {
        actions: Vec<ActionNotice>,
        count: usize,
    },
}

impl Payload {
    /// Number of records carried; 1 for single-item payloads.
    pub fn len(&self) -> usize {
        match self {
            Payload::Containers(c) => c.len(),
            Payload::Networks(n) => n.len(),
            Payload::Images(i) => i.len(),
            Payload::Volumes(v) => v.len(),
            Payload::Batch(b) => {
                b.containers.as_ref().map_or(0, |c| c.len())
                    + b.networks.as_ref().map_or(0, |n| n.len())
                    + b.images.as_ref().map_or(0, |i| i.len())
                    + b.volumes.as_ref().map_or(0, |v| v.len())
            }
            Payload::Action(_) | Payload::Event(_) => 1,
            Payload::BulkActions { count, .. } => *count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One published change.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub event_type: EventType,
    pub data: Payload,
}

impl Notification {
    pub fn new(event_type: EventType, data: Payload) -> Self {
        Self { event_type, data }
    }

    pub fn containers(&self) -> Option<&[ContainerSnapshot]> {
        match &self.data {
            Payload::Containers(c) => Some(c),
            Payload::Batch(b) => b.containers.as_deref().map(Vec::as_slice),
            _ => None,
        }
    }

    pub fn action(&self) -> Option<&ActionNotice> {
        match &self.data {
            Payload::Action(a) => Some(a),
            _ => None,
        }
    }
}

/// Listener for controller changes.
///
/// Called synchronously on the publishing thread, so implementations must
/// return quickly. Returning an error (or panicking) gets the observer
/// detached. Writing the resource being published from inside `update` is
/// logged and ignored; hand that work to a task instead.
pub trait Observer: Send + Sync {
    fn update(&self, subject: &DataController, notification: &Notification) -> anyhow::Result<()>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> Observer for F
where
    F: Fn(&DataController, &Notification) -> anyhow::Result<()> + Send + Sync,
{
    fn update(&self, subject: &DataController, notification: &Notification) -> anyhow::Result<()> {
        self(subject, notification)
    }

    fn name(&self) -> &str {
        "closure"
    }
}

fn same_observer(a: &Arc<dyn Observer>, b: &Arc<dyn Observer>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Registered observers in attach order; each observer at most once.
#[derive(Default)]
pub(crate) struct ObserverSet {
    observers: Mutex<Vec<Arc<dyn Observer>>>,
}

impl ObserverSet {
    pub(crate) fn attach(&self, observer: Arc<dyn Observer>) -> bool {
        let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        if observers.iter().any(|o| same_observer(o, &observer)) {
            return false;
        }
        debug!(observer = observer.name(), "observer attached");
        observers.push(observer);
        true
    }

    pub(crate) fn detach(&self, observer: &Arc<dyn Observer>) -> bool {
        let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|o| !same_observer(o, observer));
        let removed = observers.len() != before;
        if removed {
            debug!(observer = observer.name(), "observer detached");
        }
        removed
    }

    /// Copy of the current registrations, so delivery runs without the lock.
    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn Observer>> {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
