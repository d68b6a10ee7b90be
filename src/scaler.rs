// Clone-based auto-scaler.
// Decides per parent container whether to add a clone, or, once the clone budget
// is used up, to pause the parent and clear its clones.

use crate::limits::{Limits, SharedLimits};
use crate::models::{CloneLabels, ContainerRecord, ContainerSnapshot, ContainerStatus};
use crate::runtime::{RunSpec, SharedRuntime};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Grace period given to a clone before it is killed on removal.
pub const CLONE_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// What to do with one container this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Not eligible, or within limits.
    Leave,
    /// Overloaded, but scaling is switched off.
    Disabled,
    /// Overloaded and below the clone budget: add exactly one clone.
    Clone,
    /// Clone budget reached: pause the parent and remove its clones.
    PauseAndPrune,
}

/// Pure decision for one container given how many clones it already has.
pub fn decide(
    record: &ContainerRecord,
    snapshot: &ContainerSnapshot,
    clone_count: usize,
    limits: &Limits,
) -> ScaleDecision {
    // Clones never scale further.
    if snapshot.status != ContainerStatus::Running || record.is_clone() {
        return ScaleDecision::Leave;
    }
    if clone_count >= limits.clone_num {
        return ScaleDecision::PauseAndPrune;
    }
    if !limits.is_overloaded(snapshot.cpu_percent, snapshot.ram_percent) {
        return ScaleDecision::Leave;
    }
    if !limits.auto_scale_enabled {
        return ScaleDecision::Disabled;
    }
    ScaleDecision::Clone
}

/// Counters for one scaling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScaleReport {
    pub clones_created: usize,
    pub clone_failures: usize,
    pub parents_paused: usize,
    pub clones_removed: usize,
    pub skipped_stale: usize,
}

pub struct AutoScaler {
    runtime: SharedRuntime,
    limits: Arc<SharedLimits>,
    created_by: String,
}

impl AutoScaler {
    pub fn new(runtime: SharedRuntime, limits: Arc<SharedLimits>, created_by: impl Into<String>) -> Self {
        Self {
            runtime,
            limits,
            created_by: created_by.into(),
        }
    }

    /// Evaluate every sampled container against the limits captured at the
    /// start of the pass. An action is dropped if the limits changed before it
    /// runs.
    pub async fn run_cycle(&self, sampled: &[(ContainerRecord, ContainerSnapshot)]) -> ScaleReport {
        let (limits, observed_version) = self.limits.snapshot();
        let mut report = ScaleReport::default();

        for (record, snapshot) in sampled {
            let clones: Vec<&ContainerRecord> = sampled
                .iter()
                .map(|(r, _)| r)
                .filter(|r| r.is_clone_of(&record.name))
                .collect();

            let decision = decide(record, snapshot, clones.len(), &limits);
            match decision {
                ScaleDecision::Leave => continue,
                ScaleDecision::Disabled => {
                    info!(
                        container = %record.name,
                        cpu = snapshot.cpu_percent,
                        ram = snapshot.ram_percent,
                        "container overloaded but auto-scaling is disabled"
                    );
                    continue;
                }
                ScaleDecision::Clone | ScaleDecision::PauseAndPrune => {}
            }

            if self.limits.version() != observed_version {
                debug!(container = %record.name, "limits changed during the pass; skipping action");
                report.skipped_stale += 1;
                continue;
            }

            match decision {
                ScaleDecision::Clone => {
                    info!(
                        container = %record.name,
                        cpu = snapshot.cpu_percent,
                        ram = snapshot.ram_percent,
                        clones = clones.len(),
                        "container overloaded; creating clone"
                    );
                    if self.create_clone(record).await {
                        report.clones_created += 1;
                    } else {
                        report.clone_failures += 1;
                    }
                }
                ScaleDecision::PauseAndPrune => {
                    info!(
                        container = %record.name,
                        clones = clones.len(),
                        max = limits.clone_num,
                        "clone limit reached; pausing original and removing clones"
                    );
                    if self.pause_parent(record).await {
                        report.parents_paused += 1;
                    }
                    for clone in clones {
                        if self.remove_clone(clone).await {
                            report.clones_removed += 1;
                        }
                    }
                }
                ScaleDecision::Leave | ScaleDecision::Disabled => {}
            }
        }

        report
    }

    async fn create_clone(&self, parent: &ContainerRecord) -> bool {
        // Listings carry no command; inspect for the full config.
        let source = match self.runtime.get_container(&parent.id).await {
            Ok(full) => full,
            Err(e) => {
                debug!(container = %parent.name, error = %e, "inspect failed; cloning from listing");
                parent.clone()
            }
        };

        let Some(image) = source.clone_image().or_else(|| parent.clone_image()) else {
            error!(container = %parent.name, "cannot clone: no image reference");
            return false;
        };

        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let spec = RunSpec {
            image,
            command: source.command,
            name: format!("{}-clone-{}", parent.name, &suffix[..8]),
            labels: CloneLabels::new(&parent.name, &self.created_by).to_labels(),
        };
        let name = spec.name.clone();

        match self.runtime.run_container(spec).await {
            Ok(id) => {
                info!(clone = %name, id = %id, parent = %parent.name, "created clone container");
                true
            }
            Err(e) => {
                error!(parent = %parent.name, error = %e, "failed to create clone");
                false
            }
        }
    }

    async fn pause_parent(&self, parent: &ContainerRecord) -> bool {
        match self.runtime.pause_container(&parent.id).await {
            Ok(()) => {
                info!(container = %parent.name, "paused original container");
                true
            }
            Err(e) => {
                error!(container = %parent.name, error = %e, "failed to pause original container");
                false
            }
        }
    }

    /// Stop then remove. A clone that is already gone counts as done.
    async fn remove_clone(&self, clone: &ContainerRecord) -> bool {
        let force = match self
            .runtime
            .stop_container(&clone.id, CLONE_STOP_TIMEOUT)
            .await
        {
            Ok(()) => false,
            Err(e) if e.is_not_found() => {
                debug!(clone = %clone.name, "clone already removed");
                return true;
            }
            Err(e) => {
                warn!(clone = %clone.name, error = %e, "failed to stop clone; forcing removal");
                true
            }
        };

        match self.runtime.remove_container(&clone.id, force).await {
            Ok(()) => {
                info!(clone = %clone.name, "deleted clone container");
                true
            }
            Err(e) if e.is_not_found() => {
                debug!(clone = %clone.name, "clone already removed");
                true
            }
            Err(e) => {
                error!(clone = %clone.name, error = %e, "failed to delete clone container");
                false
            }
        }
    }
}
