// Data controller: the cached resource lists and the observers watching them.
//
// Constructed once at startup and handed out as Arc<DataController>.

mod observer;
mod query;

pub use observer::{ActionNotice, BatchPayload, EventType, Notification, Observer, Payload};
pub use query::{ControllerStats, ResourceCounts, ResourceMetrics, ResourceSnapshot, SearchResults};

use crate::models::{ContainerSnapshot, ImageInfo, NetworkInfo, ResourceKind, RuntimeEvent, VolumeInfo};
use observer::ObserverSet;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, ThreadId};
use tracing::{debug, error};

/// Cached list for one resource type.
///
/// `publish` serializes writers so each swap is followed by its notification
/// before the next swap of the same type; `items` is what readers take.
/// `publisher` is the thread currently holding `publish`.
pub struct ResourceCache<T> {
    publish: Mutex<()>,
    publisher: Mutex<Option<ThreadId>>,
    items: RwLock<Arc<Vec<T>>>,
}

impl<T> Default for ResourceCache<T> {
    fn default() -> Self {
        Self {
            publish: Mutex::new(()),
            publisher: Mutex::new(None),
            items: RwLock::new(Arc::new(Vec::new())),
        }
    }
}

struct PublishGuard<'a> {
    _lock: MutexGuard<'a, ()>,
    publisher: &'a Mutex<Option<ThreadId>>,
}

impl Drop for PublishGuard<'_> {
    fn drop(&mut self) {
        *self.publisher.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl<T> ResourceCache<T> {
    /// None when the calling thread already publishes this type, i.e. an
    /// observer writing back into the cache it is being notified about.
    fn lock_publish(&self) -> Option<PublishGuard<'_>> {
        let me = thread::current().id();
        if *self.publisher.lock().unwrap_or_else(PoisonError::into_inner) == Some(me) {
            return None;
        }
        let lock = self.publish.lock().unwrap_or_else(PoisonError::into_inner);
        *self.publisher.lock().unwrap_or_else(PoisonError::into_inner) = Some(me);
        Some(PublishGuard {
            _lock: lock,
            publisher: &self.publisher,
        })
    }

    fn read(&self) -> Arc<Vec<T>> {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store(&self, items: Arc<Vec<T>>) {
        *self.items.write().unwrap_or_else(PoisonError::into_inner) = items;
    }

    fn len(&self) -> usize {
        self.items.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// A record type the controller caches.
pub trait Resource: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: ResourceKind;

    fn cache(controller: &DataController) -> &ResourceCache<Self>;

    fn payload(items: Arc<Vec<Self>>) -> Payload;
}

impl Resource for ContainerSnapshot {
    const KIND: ResourceKind = ResourceKind::Containers;

    fn cache(controller: &DataController) -> &ResourceCache<Self> {
        &controller.containers
    }

    fn payload(items: Arc<Vec<Self>>) -> Payload {
        Payload::Containers(items)
    }
}

impl Resource for NetworkInfo {
    const KIND: ResourceKind = ResourceKind::Networks;

    fn cache(controller: &DataController) -> &ResourceCache<Self> {
        &controller.networks
    }

    fn payload(items: Arc<Vec<Self>>) -> Payload {
        Payload::Networks(items)
    }
}

impl Resource for ImageInfo {
    const KIND: ResourceKind = ResourceKind::Images;

    fn cache(controller: &DataController) -> &ResourceCache<Self> {
        &controller.images
    }

    fn payload(items: Arc<Vec<Self>>) -> Payload {
        Payload::Images(items)
    }
}

impl Resource for VolumeInfo {
    const KIND: ResourceKind = ResourceKind::Volumes;

    fn cache(controller: &DataController) -> &ResourceCache<Self> {
        &controller.volumes
    }

    fn payload(items: Arc<Vec<Self>>) -> Payload {
        Payload::Volumes(items)
    }
}

/// Lists to publish together; fields left `None` are not touched.
#[derive(Debug, Clone, Default)]
pub struct BatchUpdate {
    pub containers: Option<Vec<ContainerSnapshot>>,
    pub networks: Option<Vec<NetworkInfo>>,
    pub images: Option<Vec<ImageInfo>>,
    pub volumes: Option<Vec<VolumeInfo>>,
}

impl BatchUpdate {
    pub fn is_empty(&self) -> bool {
        self.containers.is_none()
            && self.networks.is_none()
            && self.images.is_none()
            && self.volumes.is_none()
    }
}

#[derive(Default)]
pub struct DataController {
    containers: ResourceCache<ContainerSnapshot>,
    networks: ResourceCache<NetworkInfo>,
    images: ResourceCache<ImageInfo>,
    volumes: ResourceCache<VolumeInfo>,
    observers: ObserverSet,
}

impl DataController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register an observer. Returns false if it was already registered.
    pub fn attach(&self, observer: Arc<dyn Observer>) -> bool {
        self.observers.attach(observer)
    }

    pub fn detach(&self, observer: &Arc<dyn Observer>) -> bool {
        self.observers.detach(observer)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Replace the cached list for `R` and notify with `<resource>_updated`.
    ///
    /// Writing `R` from an observer while `R` is being published is refused.
    pub fn update<R: Resource>(&self, items: Vec<R>) {
        self.publish(items);
    }

    fn publish<R: Resource>(&self, items: Vec<R>) -> bool {
        let cache = R::cache(self);
        let Some(_publishing) = cache.lock_publish() else {
            error!(resource = %R::KIND, "refusing cache update from inside its own notification");
            return false;
        };
        let items = Arc::new(items);
        cache.store(items.clone());
        debug!(resource = %R::KIND, count = items.len(), "resource cache updated");
        self.notify(Notification::new(EventType::updated(R::KIND), R::payload(items)));
        true
    }

    /// Owned copy of the cached list for `R`.
    pub fn get<R: Resource>(&self) -> Vec<R> {
        R::cache(self).read().as_ref().clone()
    }

    pub fn update_containers(&self, containers: Vec<ContainerSnapshot>) {
        self.update(containers)
    }

    pub fn update_networks(&self, networks: Vec<NetworkInfo>) {
        self.update(networks)
    }

    pub fn update_images(&self, images: Vec<ImageInfo>) {
        self.update(images)
    }

    pub fn update_volumes(&self, volumes: Vec<VolumeInfo>) {
        self.update(volumes)
    }

    pub fn get_containers(&self) -> Vec<ContainerSnapshot> {
        self.get()
    }

    pub fn get_networks(&self) -> Vec<NetworkInfo> {
        self.get()
    }

    pub fn get_images(&self) -> Vec<ImageInfo> {
        self.get()
    }

    pub fn get_volumes(&self) -> Vec<VolumeInfo> {
        self.get()
    }

    /// Update from an untyped value. Anything other than an array of valid
    /// records is logged and ignored. Returns whether the cache changed.
    pub fn update_raw(&self, kind: ResourceKind, value: serde_json::Value) -> bool {
        match kind {
            ResourceKind::Containers => self.update_from_value::<ContainerSnapshot>(value),
            ResourceKind::Networks => self.update_from_value::<NetworkInfo>(value),
            ResourceKind::Images => self.update_from_value::<ImageInfo>(value),
            ResourceKind::Volumes => self.update_from_value::<VolumeInfo>(value),
        }
    }

    fn update_from_value<R: Resource>(&self, value: serde_json::Value) -> bool {
        if value.is_null() {
            error!(resource = %R::KIND, "refusing to update cache with null");
            return false;
        }
        if !value.is_array() {
            error!(resource = %R::KIND, "refusing to update cache with a non-list value");
            return false;
        }
        match serde_json::from_value::<Vec<R>>(value) {
            Ok(items) => self.publish(items),
            Err(e) => {
                error!(resource = %R::KIND, error = %e, "refusing to update cache with malformed records");
                false
            }
        }
    }

    /// Replace several lists and send a single `batch_updated`.
    pub fn update_all(&self, batch: BatchUpdate) {
        if batch.is_empty() {
            return;
        }

        // Fixed lock order across types.
        let c = batch.containers.as_ref().map(|_| self.containers.lock_publish());
        let n = batch.networks.as_ref().map(|_| self.networks.lock_publish());
        let i = batch.images.as_ref().map(|_| self.images.lock_publish());
        let v = batch.volumes.as_ref().map(|_| self.volumes.lock_publish());
        if refused(&c) || refused(&n) || refused(&i) || refused(&v) {
            error!("refusing batch update from inside a notification of the same resource");
            return;
        }

        let payload = BatchPayload {
            containers: batch.containers.map(Arc::new),
            networks: batch.networks.map(Arc::new),
            images: batch.images.map(Arc::new),
            volumes: batch.volumes.map(Arc::new),
        };
        if let Some(c) = &payload.containers {
            self.containers.store(c.clone());
        }
        if let Some(n) = &payload.networks {
            self.networks.store(n.clone());
        }
        if let Some(i) = &payload.images {
            self.images.store(i.clone());
        }
        if let Some(v) = &payload.volumes {
            self.volumes.store(v.clone());
        }
        debug!(records = Payload::Batch(payload.clone()).len(), "batch update applied");
        self.notify(Notification::new(EventType::BatchUpdated, Payload::Batch(payload)));
    }

    /// Publish `<resource>_action` for a finished action.
    pub fn notify_action(&self, notice: ActionNotice) {
        self.notify(Notification::new(
            EventType::action(notice.kind),
            Payload::Action(notice),
        ));
    }

    pub fn notify_container_action(&self, action: &str, target: &str, success: bool, error: Option<String>) {
        self.notify_action(action_notice(ResourceKind::Containers, action, target, success, error));
    }

    pub fn notify_network_action(&self, action: &str, target: &str, success: bool, error: Option<String>) {
        self.notify_action(action_notice(ResourceKind::Networks, action, target, success, error));
    }

    pub fn notify_image_action(&self, action: &str, target: &str, success: bool, error: Option<String>) {
        self.notify_action(action_notice(ResourceKind::Images, action, target, success, error));
    }

    pub fn notify_volume_action(&self, action: &str, target: &str, success: bool, error: Option<String>) {
        self.notify_action(action_notice(ResourceKind::Volumes, action, target, success, error));
    }

    pub fn notify_docker_event(&self, event: RuntimeEvent) {
        self.notify(Notification::new(EventType::DockerEvent, Payload::Event(event)));
    }

    pub fn bulk_notify_actions(&self, actions: Vec<ActionNotice>) {
        if actions.is_empty() {
            return;
        }
        let count = actions.len();
        self.notify(Notification::new(
            EventType::BulkActions,
            Payload::BulkActions { actions, count },
        ));
    }

    /// Empty every cache without notifying.
    pub fn clear_all(&self) {
        let c = self.containers.lock_publish();
        let n = self.networks.lock_publish();
        let i = self.images.lock_publish();
        let v = self.volumes.lock_publish();
        if c.is_none() || n.is_none() || i.is_none() || v.is_none() {
            error!("refusing to clear caches from inside a notification");
            return;
        }
        self.containers.store(Arc::default());
        self.networks.store(Arc::default());
        self.images.store(Arc::default());
        self.volumes.store(Arc::default());
        debug!("all resource caches cleared");
    }

    pub fn stats(&self) -> ControllerStats {
        ControllerStats {
            containers: self.containers.len(),
            networks: self.networks.len(),
            images: self.images.len(),
            volumes: self.volumes.len(),
            observers: self.observer_count(),
        }
    }

    /// Deliver to every observer in registration order on the calling thread.
    /// Observers that fail are detached once the pass is over.
    pub fn notify(&self, notification: Notification) {
        let observers = self.observers.snapshot();
        let mut failed = Vec::new();

        for observer in observers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| observer.update(self, &notification)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(
                        observer = observer.name(),
                        event = %notification.event_type,
                        error = %e,
                        "observer failed; detaching"
                    );
                    failed.push(observer);
                }
                Err(panic) => {
                    error!(
                        observer = observer.name(),
                        event = %notification.event_type,
                        panic = %panic_message(panic.as_ref()),
                        "observer panicked; detaching"
                    );
                    failed.push(observer);
                }
            }
        }

        for observer in &failed {
            self.observers.detach(observer);
        }
    }
}

/// A lock was wanted for this type but re-entry was detected.
fn refused(slot: &Option<Option<PublishGuard<'_>>>) -> bool {
    matches!(slot, Some(None))
}

fn action_notice(
    kind: ResourceKind,
    action: &str,
    target: &str,
    success: bool,
    error: Option<String>,
) -> ActionNotice {
    ActionNotice {
        kind,
        action: action.to_string(),
        target: target.to_string(),
        success,
        error,
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
