// Runtime event listener: turns lifecycle events for app-owned containers
// into debounced container refreshes.

use crate::controller::DataController;
use crate::models::{LABEL_CREATED_BY, RuntimeEvent};
use crate::refresh::Refresher;
use crate::runtime::{RuntimeError, SharedRuntime};
use crate::tasks::{TaskCallbacks, TaskError, TaskRunner};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Container actions that change what the container list shows.
pub const RELEVANT_ACTIONS: [&str; 9] = [
    "create", "start", "stop", "die", "destroy", "pause", "unpause", "kill", "restart",
];

/// Allows one trigger per window, measured from the last accepted trigger.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    pub fn should_fire(&mut self) -> bool {
        self.should_fire_at(Instant::now())
    }

    pub fn should_fire_at(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.window => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventListenerConfig {
    pub debounce: Duration,
    /// Wait before refreshing after create/start so the container exists
    /// when it is inspected.
    pub settle_delay: Duration,
    pub restart_delay: Duration,
    /// Consecutive stream failures tolerated before giving up.
    pub max_restarts: u32,
    pub app_name_prefix: String,
    pub created_by: String,
}

impl Default for EventListenerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            settle_delay: Duration::from_millis(100),
            restart_delay: Duration::from_secs(5),
            max_restarts: 5,
            app_name_prefix: "dmm-".into(),
            created_by: "docker-monitor-manager".into(),
        }
    }
}

/// Why the listener stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerExit {
    Shutdown,
    /// The stream kept failing; operator attention needed.
    GaveUp,
}

pub struct EventListener {
    runtime: SharedRuntime,
    controller: Arc<DataController>,
    tasks: TaskRunner,
    refresher: Refresher,
    config: EventListenerConfig,
}

impl EventListener {
    pub fn new(
        runtime: SharedRuntime,
        controller: Arc<DataController>,
        tasks: TaskRunner,
        config: EventListenerConfig,
    ) -> Self {
        let refresher = Refresher::new(runtime.clone(), controller.clone());
        Self {
            runtime,
            controller,
            tasks,
            refresher,
            config,
        }
    }

    pub fn spawn(self, shutdown: oneshot::Receiver<()>) -> JoinHandle<ListenerExit> {
        tokio::spawn(self.run(shutdown).instrument(info_span!("event_listener")))
    }

    pub async fn run(self, mut shutdown: oneshot::Receiver<()>) -> ListenerExit {
        let mut debouncer = Debouncer::new(self.config.debounce);
        let mut failures: u32 = 0;

        loop {
            let mut stream = self.runtime.events();
            info!("subscribed to runtime events");

            let failure = loop {
                tokio::select! {
                    _ = &mut shutdown => {
                        info!("event listener shutting down");
                        return ListenerExit::Shutdown;
                    }
                    next = stream.next() => match next {
                        Some(Ok(event)) => {
                            failures = 0;
                            self.handle(event, &mut debouncer);
                        }
                        Some(Err(e)) => break e,
                        None => break RuntimeError::StreamClosed,
                    }
                }
            };

            failures += 1;
            if failures > self.config.max_restarts {
                error!(
                    critical = true,
                    restarts = self.config.max_restarts,
                    error = %failure,
                    "event listener stopped after repeated stream failures; live updates are off until the Docker daemon is reachable and the application is restarted"
                );
                return ListenerExit::GaveUp;
            }

            warn!(
                error = %failure,
                attempt = failures,
                max_restarts = self.config.max_restarts,
                delay_secs = self.config.restart_delay.as_secs_f64(),
                "event stream failed; restarting"
            );
            tokio::select! {
                _ = &mut shutdown => {
                    info!("event listener shutting down");
                    return ListenerExit::Shutdown;
                }
                _ = tokio::time::sleep(self.config.restart_delay) => {}
            }
        }
    }

    pub fn is_relevant(&self, event: &RuntimeEvent) -> bool {
        event.is_container() && RELEVANT_ACTIONS.contains(&event.action.as_str())
    }

    /// Created by this application (label) or named with its prefix.
    pub fn is_app_owned(&self, event: &RuntimeEvent) -> bool {
        event
            .attributes
            .get(LABEL_CREATED_BY)
            .is_some_and(|v| *v == self.config.created_by)
            || event.actor_name().starts_with(&self.config.app_name_prefix)
    }

    /// Returns whether a refresh was submitted.
    fn handle(&self, event: RuntimeEvent, debouncer: &mut Debouncer) -> bool {
        if !self.is_relevant(&event) {
            return false;
        }
        if !self.is_app_owned(&event) {
            debug!(action = %event.action, container = %event.actor_name(), "external container event ignored");
            return false;
        }

        let action = event.action.clone();
        info!(action = %action, container = %event.actor_name(), "container event");
        self.controller.notify_docker_event(event);

        if !debouncer.should_fire() {
            debug!(action = %action, "refresh skipped by debounce");
            return false;
        }

        let settle = match action.as_str() {
            "create" | "start" => self.config.settle_delay,
            _ => Duration::ZERO,
        };
        let refresher = self.refresher.clone();
        let on_error_action = action.clone();
        self.tasks.try_submit(
            async move {
                if !settle.is_zero() {
                    tokio::time::sleep(settle).await;
                }
                refresher.refresh_containers().await?;
                anyhow::Ok(())
            },
            TaskCallbacks::new().on_error(move |e: TaskError| {
                let not_found = matches!(
                    &e,
                    TaskError::Failed(inner)
                        if inner.downcast_ref::<RuntimeError>().is_some_and(RuntimeError::is_not_found)
                );
                if not_found {
                    debug!(action = %on_error_action, error = %e, "container vanished during event refresh");
                } else {
                    error!(action = %on_error_action, error = %e, "event refresh failed");
                }
            }),
        )
    }
}
