// Polling worker: sample every container, run the auto-scaler, publish the
// snapshot list, sleep, repeat.

use crate::controller::{DataController, panic_message};
use crate::limits::SharedLimits;
use crate::runtime::{ContainerRuntime, RuntimeError, SharedRuntime};
use crate::sampler;
use crate::scaler::{AutoScaler, ScaleReport};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::Instrument;

/// Shared handles and shutdown for the worker.
pub struct WorkerDeps {
    pub runtime: SharedRuntime,
    pub controller: Arc<DataController>,
    pub limits: Arc<SharedLimits>,
    pub shutdown_rx: tokio::sync::oneshot::Receiver<()>,
}

pub struct WorkerConfig {
    /// Value written to the created-by label of every clone.
    pub created_by: String,
}

/// One polling cycle. The snapshot list is published even when the scaler
/// did nothing.
pub async fn poll_once(
    runtime: &dyn ContainerRuntime,
    scaler: &AutoScaler,
    controller: &DataController,
) -> Result<ScaleReport, RuntimeError> {
    let sampled = sampler::collect(runtime).await?;
    let report = scaler.run_cycle(&sampled).await;
    controller.update_containers(sampled.into_iter().map(|(_, s)| s).collect());
    Ok(report)
}

/// Runs until `shutdown_rx` fires. A cycle that has started always finishes;
/// the poll interval is re-read from the shared limits after every cycle.
pub fn spawn(deps: WorkerDeps, config: WorkerConfig) -> tokio::task::JoinHandle<()> {
    let WorkerDeps {
        runtime,
        controller,
        limits,
        mut shutdown_rx,
    } = deps;
    let scaler = AutoScaler::new(runtime.clone(), limits.clone(), config.created_by);

    let worker_span = tracing::info_span!("worker");
    tokio::spawn(
        async move {
            let mut cycles: u64 = 0;
            loop {
                let cycle = poll_once(runtime.as_ref(), &scaler, &controller);
                match AssertUnwindSafe(cycle).catch_unwind().await {
                    Ok(Ok(report)) => {
                        cycles += 1;
                        if report != ScaleReport::default() {
                            tracing::info!(
                                cycle = cycles,
                                clones_created = report.clones_created,
                                clone_failures = report.clone_failures,
                                parents_paused = report.parents_paused,
                                clones_removed = report.clones_removed,
                                skipped_stale = report.skipped_stale,
                                "scaling actions taken"
                            );
                        }
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(
                            error = %e,
                            operation = "poll_containers",
                            "polling cycle failed"
                        );
                    }
                    Err(panic) => {
                        tracing::error!(
                            panic = %panic_message(panic.as_ref()),
                            operation = "poll_containers",
                            "polling cycle panicked"
                        );
                    }
                }

                let (current, _) = limits.snapshot();
                tokio::select! {
                    _ = tokio::time::sleep(current.poll_interval) => {}
                    _ = &mut shutdown_rx => {
                        tracing::debug!("Worker shutting down");
                        break;
                    }
                }
            }
        }
        .instrument(worker_span),
    )
}
