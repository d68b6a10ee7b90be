// Shared test helpers: an in-memory container runtime

#![allow(dead_code)]

use async_trait::async_trait;
use bollard::models::{
    ContainerCpuStats, ContainerCpuUsage, ContainerMemoryStats, ContainerStatsResponse,
};
use dockwatch::models::{
    CloneLabels, ContainerRecord, ContainerStatus, ImageInfo, NetworkInfo, RuntimeEvent,
    VolumeInfo,
};
use dockwatch::runtime::{
    ContainerRuntime, EventStream, PruneReport, PruneTarget, RunSpec, RuntimeError,
};
use futures_util::StreamExt;
use futures_util::stream;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub fn record(name: &str, status: ContainerStatus) -> ContainerRecord {
    ContainerRecord {
        id: format!("{name}-0123456789abcdef"),
        name: name.into(),
        status,
        image: Some(format!("{name}:latest")),
        image_id: format!("sha256:{name}"),
        labels: HashMap::new(),
        command: None,
    }
}

pub fn clone_of(parent: &str, n: usize) -> ContainerRecord {
    let mut r = record(&format!("{parent}-clone-{n}"), ContainerStatus::Running);
    r.labels = CloneLabels::new(parent, "docker-monitor-manager").to_labels();
    r
}

/// Stats that sample to exactly `cpu`% and `ram`%.
pub fn stats(cpu: f64, ram: f64) -> ContainerStatsResponse {
    let cpu_block = |total: u64, system: u64| ContainerCpuStats {
        cpu_usage: Some(ContainerCpuUsage {
            total_usage: Some(total),
            ..Default::default()
        }),
        system_cpu_usage: Some(system),
        online_cpus: Some(1),
        throttling_data: None,
    };
    ContainerStatsResponse {
        cpu_stats: Some(cpu_block(1_000_000 + (cpu * 10_000.0) as u64, 2_000_000)),
        precpu_stats: Some(cpu_block(1_000_000, 1_000_000)),
        memory_stats: Some(ContainerMemoryStats {
            usage: Some((ram * 10.0) as u64),
            limit: Some(1000),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn container_event(action: &str, name: &str) -> RuntimeEvent {
    RuntimeEvent {
        kind: "container".into(),
        action: action.into(),
        actor_id: format!("{name}-0123456789abcdef"),
        attributes: HashMap::from([("name".to_string(), name.to_string())]),
        time: 0,
    }
}

enum EventSource {
    Items(Vec<Result<RuntimeEvent, RuntimeError>>),
    Channel(mpsc::UnboundedReceiver<Result<RuntimeEvent, RuntimeError>>),
}

#[derive(Default)]
struct State {
    containers: Vec<ContainerRecord>,
    stats: HashMap<String, ContainerStatsResponse>,
    failures: HashMap<String, RuntimeError>,
    calls: Vec<String>,
    runs: Vec<RunSpec>,
    networks: Vec<NetworkInfo>,
    images: Vec<ImageInfo>,
    volumes: Vec<VolumeInfo>,
    event_sources: VecDeque<EventSource>,
    subscriptions: usize,
    latency: Duration,
}

type Hook = Box<dyn Fn() + Send + Sync>;

/// Counts one call as in flight until dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Records every call. Operations listed in `fail` return the scripted error
/// until cleared.
#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<State>,
    on_run: Mutex<Option<Hook>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_containers(containers: Vec<ContainerRecord>) -> Self {
        let mock = Self::new();
        mock.state.lock().unwrap().containers = containers;
        mock
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn set_stats(&self, id: &str, s: ContainerStatsResponse) {
        self.state.lock().unwrap().stats.insert(id.to_string(), s);
    }

    pub fn set_containers(&self, containers: Vec<ContainerRecord>) {
        self.state.lock().unwrap().containers = containers;
    }

    pub fn set_networks(&self, networks: Vec<NetworkInfo>) {
        self.state.lock().unwrap().networks = networks;
    }

    /// Make `op` (e.g. "stats", "list", "pause") fail with `err`.
    pub fn fail(&self, op: &str, err: RuntimeError) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(op.to_string(), err);
    }

    pub fn clear_failure(&self, op: &str) {
        self.state.lock().unwrap().failures.remove(op);
    }

    /// Next `events()` call yields these items and then ends.
    pub fn push_event_stream(&self, items: Vec<Result<RuntimeEvent, RuntimeError>>) {
        self.state
            .lock()
            .unwrap()
            .event_sources
            .push_back(EventSource::Items(items));
    }

    /// Next `events()` call yields whatever is sent on the returned sender.
    pub fn event_channel(&self) -> mpsc::UnboundedSender<Result<RuntimeEvent, RuntimeError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .lock()
            .unwrap()
            .event_sources
            .push_back(EventSource::Channel(rx));
        tx
    }

    /// Called after every successful `run_container`.
    pub fn on_run(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_run.lock().unwrap() = Some(Box::new(hook));
    }

    /// Every async call sleeps this long before answering.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().unwrap().latency = latency;
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Most async calls ever running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls whose operation name is `op`.
    pub fn calls_to(&self, op: &str) -> Vec<String> {
        let prefix = format!("{op}:");
        self.calls()
            .into_iter()
            .filter(|c| c == op || c.starts_with(&prefix))
            .collect()
    }

    pub fn runs(&self) -> Vec<RunSpec> {
        self.state.lock().unwrap().runs.clone()
    }

    pub fn containers(&self) -> Vec<ContainerRecord> {
        self.state.lock().unwrap().containers.clone()
    }

    pub fn subscriptions(&self) -> usize {
        self.state.lock().unwrap().subscriptions
    }

    async fn begin(&self, op: &str, arg: &str) -> Result<InFlight<'_>, RuntimeError> {
        let latency = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(if arg.is_empty() {
                op.to_string()
            } else {
                format!("{op}:{arg}")
            });
            if let Some(err) = state.failures.get(op) {
                return Err(err.clone());
            }
            state.latency
        };
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let flight = InFlight(&self.in_flight);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        Ok(flight)
    }

    fn find(&self, name_or_id: &str) -> Result<ContainerRecord, RuntimeError> {
        self.state
            .lock()
            .unwrap()
            .containers
            .iter()
            .find(|c| c.id == name_or_id || c.name == name_or_id)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(format!("No such container: {name_or_id}")))
    }

    fn set_status(&self, id: &str, status: ContainerStatus) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        match state.containers.iter_mut().find(|c| c.id == id) {
            Some(c) => {
                c.status = status;
                Ok(())
            }
            None => Err(RuntimeError::NotFound(format!("No such container: {id}"))),
        }
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerRecord>, RuntimeError> {
        let _flight = self.begin("list", "").await?;
        let containers = self.containers();
        Ok(if all {
            containers
        } else {
            containers
                .into_iter()
                .filter(|c| c.status == ContainerStatus::Running)
                .collect()
        })
    }

    async fn get_container(&self, name_or_id: &str) -> Result<ContainerRecord, RuntimeError> {
        let _flight = self.begin("inspect", name_or_id).await?;
        let mut found = self.find(name_or_id)?;
        if found.command.is_none() {
            found.command = Some(vec!["serve".into()]);
        }
        Ok(found)
    }

    async fn run_container(&self, spec: RunSpec) -> Result<String, RuntimeError> {
        let _flight = self.begin("run", &spec.name).await?;
        let id = format!("{}-0123456789abcdef", spec.name);
        {
            let mut state = self.state.lock().unwrap();
            state.containers.push(ContainerRecord {
                id: id.clone(),
                name: spec.name.clone(),
                status: ContainerStatus::Running,
                image: Some(spec.image.clone()),
                image_id: String::new(),
                labels: spec.labels.clone(),
                command: spec.command.clone(),
            });
            state.runs.push(spec);
        }
        if let Some(hook) = self.on_run.lock().unwrap().as_ref() {
            hook();
        }
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        let _flight = self.begin("start", id).await?;
        self.set_status(id, ContainerStatus::Running)
    }

    async fn stop_container(&self, id: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        let _flight = self.begin("stop", id).await?;
        self.set_status(id, ContainerStatus::Exited)
    }

    async fn restart_container(&self, id: &str) -> Result<(), RuntimeError> {
        let _flight = self.begin("restart", id).await?;
        self.set_status(id, ContainerStatus::Running)
    }

    async fn pause_container(&self, id: &str) -> Result<(), RuntimeError> {
        let _flight = self.begin("pause", id).await?;
        self.set_status(id, ContainerStatus::Paused)
    }

    async fn unpause_container(&self, id: &str) -> Result<(), RuntimeError> {
        let _flight = self.begin("unpause", id).await?;
        self.set_status(id, ContainerStatus::Running)
    }

    async fn kill_container(&self, id: &str) -> Result<(), RuntimeError> {
        let _flight = self.begin("kill", id).await?;
        self.set_status(id, ContainerStatus::Exited)
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        let _flight = self.begin("remove", &format!("{id}:force={force}")).await?;
        let mut state = self.state.lock().unwrap();
        let before = state.containers.len();
        state.containers.retain(|c| c.id != id);
        if state.containers.len() == before {
            return Err(RuntimeError::NotFound(format!("No such container: {id}")));
        }
        Ok(())
    }

    async fn prune(&self, target: PruneTarget) -> Result<PruneReport, RuntimeError> {
        let _flight = self.begin("prune", target.resource_kind().as_str()).await?;
        Ok(PruneReport {
            target,
            deleted: vec!["gone".into()],
            space_reclaimed: 42,
        })
    }

    async fn stats_once(&self, id: &str) -> Result<ContainerStatsResponse, RuntimeError> {
        let _flight = self.begin("stats", id).await?;
        self.find(id)?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .stats
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_networks(&self) -> Result<Vec<NetworkInfo>, RuntimeError> {
        let _flight = self.begin("networks", "").await?;
        Ok(self.state.lock().unwrap().networks.clone())
    }

    async fn list_images(&self) -> Result<Vec<ImageInfo>, RuntimeError> {
        let _flight = self.begin("images", "").await?;
        Ok(self.state.lock().unwrap().images.clone())
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeInfo>, RuntimeError> {
        let _flight = self.begin("volumes", "").await?;
        Ok(self.state.lock().unwrap().volumes.clone())
    }

    fn events(&self) -> EventStream {
        let mut state = self.state.lock().unwrap();
        state.subscriptions += 1;
        state.calls.push("events".into());
        match state.event_sources.pop_front() {
            Some(EventSource::Items(items)) => stream::iter(items).boxed(),
            Some(EventSource::Channel(rx)) => {
                stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|e| (e, rx)) })
                    .boxed()
            }
            None => stream::pending().boxed(),
        }
    }
}
