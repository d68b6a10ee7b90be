// User-requested container actions and prunes, run on the task runner

use crate::controller::{ActionNotice, DataController};
use crate::models::{ContainerStatus, ResourceKind};
use crate::refresh::Refresher;
use crate::runtime::{ContainerRuntime, PruneTarget, RuntimeError, SharedRuntime};
use crate::tasks::{TaskCallbacks, TaskError, TaskRunner};
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Grace period for stop, and for the stop that precedes a remove.
pub const ACTION_STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerAction {
    Start,
    Stop,
    Restart,
    Pause,
    Unpause,
    Kill,
    Remove,
}

type Handler = for<'a> fn(&'a dyn ContainerRuntime, &'a str) -> BoxFuture<'a, Result<(), RuntimeError>>;

fn start<'a>(rt: &'a dyn ContainerRuntime, id: &'a str) -> BoxFuture<'a, Result<(), RuntimeError>> {
    rt.start_container(id)
}

fn stop<'a>(rt: &'a dyn ContainerRuntime, id: &'a str) -> BoxFuture<'a, Result<(), RuntimeError>> {
    rt.stop_container(id, ACTION_STOP_TIMEOUT)
}

fn restart<'a>(rt: &'a dyn ContainerRuntime, id: &'a str) -> BoxFuture<'a, Result<(), RuntimeError>> {
    rt.restart_container(id)
}

fn pause<'a>(rt: &'a dyn ContainerRuntime, id: &'a str) -> BoxFuture<'a, Result<(), RuntimeError>> {
    rt.pause_container(id)
}

fn unpause<'a>(rt: &'a dyn ContainerRuntime, id: &'a str) -> BoxFuture<'a, Result<(), RuntimeError>> {
    rt.unpause_container(id)
}

fn kill<'a>(rt: &'a dyn ContainerRuntime, id: &'a str) -> BoxFuture<'a, Result<(), RuntimeError>> {
    rt.kill_container(id)
}

fn remove<'a>(rt: &'a dyn ContainerRuntime, id: &'a str) -> BoxFuture<'a, Result<(), RuntimeError>> {
    Box::pin(async move {
        match rt.stop_container(id, ACTION_STOP_TIMEOUT).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Err(e),
            Err(e) => debug!(container = %id, error = %e, "stop before remove failed; forcing"),
        }
        rt.remove_container(id, true).await
    })
}

impl ContainerAction {
    pub const ALL: [ContainerAction; 7] = [
        ContainerAction::Start,
        ContainerAction::Stop,
        ContainerAction::Restart,
        ContainerAction::Pause,
        ContainerAction::Unpause,
        ContainerAction::Kill,
        ContainerAction::Remove,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerAction::Start => "start",
            ContainerAction::Stop => "stop",
            ContainerAction::Restart => "restart",
            ContainerAction::Pause => "pause",
            ContainerAction::Unpause => "unpause",
            ContainerAction::Kill => "kill",
            ContainerAction::Remove => "remove",
        }
    }

    fn handler(self) -> Handler {
        match self {
            ContainerAction::Start => start,
            ContainerAction::Stop => stop,
            ContainerAction::Restart => restart,
            ContainerAction::Pause => pause,
            ContainerAction::Unpause => unpause,
            ContainerAction::Kill => kill,
            ContainerAction::Remove => remove,
        }
    }

    /// Whether an apply-to-all pass touches a container in `status`.
    pub fn applies_to(&self, status: ContainerStatus) -> bool {
        match self {
            ContainerAction::Pause | ContainerAction::Stop | ContainerAction::Kill => {
                status == ContainerStatus::Running
            }
            ContainerAction::Unpause => status == ContainerStatus::Paused,
            ContainerAction::Start => {
                matches!(status, ContainerStatus::Exited | ContainerStatus::Created)
            }
            ContainerAction::Restart | ContainerAction::Remove => true,
        }
    }

    /// Resolve `target` (name or id) and apply the action to it.
    pub async fn apply(&self, runtime: &dyn ContainerRuntime, target: &str) -> Result<(), ActionError> {
        let container = runtime.get_container(target).await?;
        (self.handler())(runtime, &container.id).await?;
        Ok(())
    }
}

impl std::fmt::Display for ContainerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerAction {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        ContainerAction::ALL
            .into_iter()
            .find(|a| a.as_str() == wanted)
            .ok_or_else(|| ActionError::UnknownAction(s.to_string()))
    }
}

fn prune_label(target: PruneTarget) -> &'static str {
    target.resource_kind().as_str()
}

/// Runs manual actions in the background and reports the outcome through the
/// data controller.
#[derive(Clone)]
pub struct ActionManager {
    runtime: SharedRuntime,
    controller: Arc<DataController>,
    tasks: TaskRunner,
    refresher: Refresher,
}

impl ActionManager {
    pub fn new(runtime: SharedRuntime, controller: Arc<DataController>, tasks: TaskRunner) -> Self {
        let refresher = Refresher::new(runtime.clone(), controller.clone());
        Self {
            runtime,
            controller,
            tasks,
            refresher,
        }
    }

    /// Parse `action` and submit it. Unknown names are rejected before
    /// anything is submitted.
    pub fn request_named(&self, action: &str, target: &str) -> Result<bool, ActionError> {
        let action = action.parse::<ContainerAction>()?;
        Ok(self.request(action, target))
    }

    /// Apply `action` to one container. Publishes `container_action`, then
    /// refreshes the container list on success. Returns whether the task was
    /// accepted.
    pub fn request(&self, action: ContainerAction, target: &str) -> bool {
        info!(action = %action, container = %target, "container action requested");
        let runtime = self.runtime.clone();
        let controller = self.controller.clone();
        let refresher = self.refresher.clone();
        let name = target.to_string();

        let task = async move {
            match action.apply(runtime.as_ref(), &name).await {
                Ok(()) => {
                    controller.notify_container_action(action.as_str(), &name, true, None);
                    refresher.refresh_containers().await?;
                }
                Err(e) => {
                    error!(action = %action, container = %name, error = %e, "container action failed");
                    controller.notify_container_action(action.as_str(), &name, false, Some(e.to_string()));
                }
            }
            anyhow::Ok(())
        };

        self.tasks
            .try_submit(task, self.rejection_callbacks(ResourceKind::Containers, action.as_str(), target))
    }

    /// Apply `action` to every container it makes sense for. Publishes one
    /// `bulk_actions` notification, then refreshes.
    pub fn request_all(&self, action: ContainerAction) -> bool {
        info!(action = %action, "action requested on all containers");
        let runtime = self.runtime.clone();
        let controller = self.controller.clone();
        let refresher = self.refresher.clone();

        let task = async move {
            let containers = runtime.list_containers(true).await?;
            let mut notices = Vec::new();
            for container in containers.iter().filter(|c| action.applies_to(c.status)) {
                let notice = match (action.handler())(runtime.as_ref(), &container.id).await {
                    Ok(()) => ActionNotice::ok(ResourceKind::Containers, action.as_str(), &container.name),
                    Err(e) => {
                        warn!(action = %action, container = %container.name, error = %e, "action failed on container");
                        ActionNotice::failed(ResourceKind::Containers, action.as_str(), &container.name, e.to_string())
                    }
                };
                notices.push(notice);
            }
            info!(action = %action, containers = notices.len(), "global action finished");
            controller.bulk_notify_actions(notices);
            refresher.refresh_containers().await?;
            anyhow::Ok(())
        };

        self.tasks
            .try_submit(task, self.rejection_callbacks(ResourceKind::Containers, action.as_str(), "all"))
    }

    /// Prune unused resources of one kind. Publishes `<resource>_action` with
    /// action "prune", then republishes every list in one batch.
    pub fn prune(&self, target: PruneTarget) -> bool {
        info!(target = prune_label(target), "prune requested");
        let runtime = self.runtime.clone();
        let controller = self.controller.clone();
        let refresher = self.refresher.clone();
        let kind = target.resource_kind();

        let task = async move {
            match runtime.prune(target).await {
                Ok(report) => {
                    info!(
                        target = prune_label(target),
                        deleted = report.deleted.len(),
                        space_reclaimed = report.space_reclaimed,
                        "prune finished"
                    );
                    controller.notify_action(ActionNotice::ok(kind, "prune", prune_label(target)));
                }
                Err(e) => {
                    error!(target = prune_label(target), error = %e, "prune failed");
                    controller.notify_action(ActionNotice::failed(kind, "prune", prune_label(target), e.to_string()));
                    return anyhow::Ok(());
                }
            }
            refresher.refresh_all().await?;
            anyhow::Ok(())
        };

        self.tasks
            .try_submit(task, self.rejection_callbacks(kind, "prune", prune_label(target)))
    }

    /// A busy runner becomes a failed action notice; anything else is logged.
    fn rejection_callbacks(&self, kind: ResourceKind, action: &str, target: &str) -> TaskCallbacks<()> {
        let controller = self.controller.clone();
        let action = action.to_string();
        let target = target.to_string();
        TaskCallbacks::new().on_error(move |e: TaskError| {
            if e.is_queue_full() {
                controller.notify_action(ActionNotice::failed(kind, action, target, e.to_string()));
            } else {
                error!(action = %action, target = %target, error = %e, "action task failed");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_actions_case_insensitively() {
        assert_eq!("Pause".parse::<ContainerAction>().unwrap(), ContainerAction::Pause);
        assert_eq!(" remove ".parse::<ContainerAction>().unwrap(), ContainerAction::Remove);
        for action in ContainerAction::ALL {
            assert_eq!(action.as_str().parse::<ContainerAction>().unwrap(), action);
        }
    }

    #[test]
    fn unknown_action_is_a_typed_error() {
        let err = "explode".parse::<ContainerAction>().unwrap_err();
        assert!(matches!(err, ActionError::UnknownAction(ref s) if s == "explode"));
    }

    #[test]
    fn global_guards_follow_status() {
        assert!(ContainerAction::Pause.applies_to(ContainerStatus::Running));
        assert!(!ContainerAction::Pause.applies_to(ContainerStatus::Paused));
        assert!(ContainerAction::Unpause.applies_to(ContainerStatus::Paused));
        assert!(!ContainerAction::Stop.applies_to(ContainerStatus::Exited));
        assert!(ContainerAction::Restart.applies_to(ContainerStatus::Exited));
        assert!(ContainerAction::Remove.applies_to(ContainerStatus::Dead));
    }
}
