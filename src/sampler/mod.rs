// Per-container status sampling

mod stats;

use crate::models::{ContainerRecord, ContainerSnapshot, ContainerStatus};
use crate::runtime::ContainerRuntime;
use tracing::debug;

/// Sample one container.
///
/// Returns `None` when the container disappeared between listing and
/// sampling; callers drop those rows. Every other failure degrades to a
/// snapshot with zeroed usage.
pub async fn sample(
    runtime: &dyn ContainerRuntime,
    record: Option<&ContainerRecord>,
) -> Option<ContainerSnapshot> {
    let Some(record) = record.filter(|r| !r.id.is_empty()) else {
        debug!(operation = "sample", "sample called without a usable container handle");
        return Some(ContainerSnapshot::unreadable());
    };

    // Live stats block for about a second; skip them for anything not running.
    if record.status != ContainerStatus::Running {
        return Some(ContainerSnapshot::idle(record));
    }

    match runtime.stats_once(&record.id).await {
        Ok(s) => {
            let mut snapshot = ContainerSnapshot::idle(record);
            snapshot.cpu_percent = stats::cpu_percent(&s);
            snapshot.ram_percent = stats::ram_percent(&s);
            Some(snapshot)
        }
        Err(e) if e.is_not_found() => {
            debug!(container = %record.name, "container not found while sampling (likely removed)");
            None
        }
        Err(e) => {
            debug!(container = %record.name, error = %e, "stats read failed; reporting zero usage");
            Some(ContainerSnapshot::idle(record))
        }
    }
}

/// Sample every record in order, keeping each record next to its snapshot and
/// dropping the ones that vanished.
pub async fn sample_all(
    runtime: &dyn ContainerRuntime,
    records: Vec<ContainerRecord>,
) -> Vec<(ContainerRecord, ContainerSnapshot)> {
    let mut out = Vec::with_capacity(records.len());
    for record in records {
        if let Some(snapshot) = sample(runtime, Some(&record)).await {
            out.push((record, snapshot));
        }
    }
    out
}

/// List every container (running and stopped) and sample each one.
pub async fn collect(
    runtime: &dyn ContainerRuntime,
) -> Result<Vec<(ContainerRecord, ContainerSnapshot)>, crate::runtime::RuntimeError> {
    let records = runtime.list_containers(true).await?;
    Ok(sample_all(runtime, records).await)
}
