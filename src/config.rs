use crate::events::EventListenerConfig;
use crate::limits::Limits;
use crate::tasks::TaskRunnerConfig;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub scaling: ScalingConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
    #[serde(default)]
    pub publishing: PublishingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScalingConfig {
    /// CPU% above which a container counts as overloaded.
    pub cpu_limit: f64,
    /// RAM% above which a container counts as overloaded.
    pub ram_limit: f64,
    /// Clones per container before the container is paused and its clones removed.
    pub clone_num: usize,
    pub poll_interval_secs: u64,
    #[serde(default = "default_true")]
    pub auto_scale_enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub debounce_ms: u64,
    /// Delay before refreshing after a create/start event.
    pub settle_delay_ms: u64,
    pub restart_delay_secs: u64,
    /// Consecutive event-stream failures before the listener gives up.
    pub max_restarts: u32,
    /// Containers whose name starts with this are treated as app-owned.
    pub app_name_prefix: String,
    /// Value of the created-by label on containers this app creates.
    pub created_by_label: String,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            settle_delay_ms: 100,
            restart_delay_secs: 5,
            max_restarts: 5,
            app_name_prefix: "dmm-".into(),
            created_by_label: "docker-monitor-manager".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    pub workers: usize,
    /// Tasks admitted but not yet finished; further submissions are refused.
    pub max_pending: usize,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            workers: 16,
            max_pending: 128,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublishingConfig {
    /// Notifications kept for broadcast subscribers (slow subscribers lag).
    pub broadcast_capacity: usize,
}

impl Default for PublishingConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 64,
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("reading config file {}: {}", path, e))?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.scaling.cpu_limit > 0.0,
            "scaling.cpu_limit must be > 0, got {}",
            self.scaling.cpu_limit
        );
        anyhow::ensure!(
            self.scaling.ram_limit > 0.0,
            "scaling.ram_limit must be > 0, got {}",
            self.scaling.ram_limit
        );
        anyhow::ensure!(
            self.scaling.clone_num >= 1,
            "scaling.clone_num must be >= 1, got {}",
            self.scaling.clone_num
        );
        anyhow::ensure!(
            self.scaling.poll_interval_secs > 0,
            "scaling.poll_interval_secs must be > 0, got {}",
            self.scaling.poll_interval_secs
        );
        anyhow::ensure!(
            self.events.max_restarts > 0,
            "events.max_restarts must be > 0, got {}",
            self.events.max_restarts
        );
        anyhow::ensure!(
            !self.events.created_by_label.is_empty(),
            "events.created_by_label must be non-empty"
        );
        anyhow::ensure!(
            self.tasks.workers > 0,
            "tasks.workers must be > 0, got {}",
            self.tasks.workers
        );
        anyhow::ensure!(
            self.tasks.max_pending > 0,
            "tasks.max_pending must be > 0, got {}",
            self.tasks.max_pending
        );
        anyhow::ensure!(
            self.publishing.broadcast_capacity > 0,
            "publishing.broadcast_capacity must be > 0, got {}",
            self.publishing.broadcast_capacity
        );
        Ok(())
    }

    /// Initial value of the runtime-tunable limits.
    pub fn limits(&self) -> Limits {
        Limits {
            cpu_limit: self.scaling.cpu_limit,
            ram_limit: self.scaling.ram_limit,
            clone_num: self.scaling.clone_num,
            poll_interval: Duration::from_secs(self.scaling.poll_interval_secs),
            auto_scale_enabled: self.scaling.auto_scale_enabled,
        }
    }

    pub fn listener(&self) -> EventListenerConfig {
        EventListenerConfig {
            debounce: Duration::from_millis(self.events.debounce_ms),
            settle_delay: Duration::from_millis(self.events.settle_delay_ms),
            restart_delay: Duration::from_secs(self.events.restart_delay_secs),
            max_restarts: self.events.max_restarts,
            app_name_prefix: self.events.app_name_prefix.clone(),
            created_by: self.events.created_by_label.clone(),
        }
    }

    pub fn task_runner(&self) -> TaskRunnerConfig {
        TaskRunnerConfig {
            workers: self.tasks.workers,
            max_pending: self.tasks.max_pending,
        }
    }
}
