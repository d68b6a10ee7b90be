// Turn a raw Docker stats response into cpu% / ram%.

use bollard::models::ContainerStatsResponse;

/// CPU usage across all online CPUs, in percent of one CPU.
///
/// Zero whenever either delta is not positive: a single-sample read can carry
/// an empty or stale `precpu_stats` block.
pub(crate) fn cpu_percent(s: &ContainerStatsResponse) -> f64 {
    let (Some(cpu_stats), Some(precpu_stats)) = (s.cpu_stats.as_ref(), s.precpu_stats.as_ref())
    else {
        return 0.0;
    };

    let total = |u: Option<&bollard::models::ContainerCpuUsage>| {
        u.and_then(|u| u.total_usage).unwrap_or(0) as i128
    };
    let cpu_delta = total(cpu_stats.cpu_usage.as_ref()) - total(precpu_stats.cpu_usage.as_ref());
    let system_delta = cpu_stats.system_cpu_usage.unwrap_or(0) as i128
        - precpu_stats.system_cpu_usage.unwrap_or(0) as i128;

    if cpu_delta <= 0 || system_delta <= 0 {
        return 0.0;
    }

    let online = cpu_stats
        .online_cpus
        .filter(|n| *n > 0)
        .map(u64::from)
        .or_else(|| {
            cpu_stats
                .cpu_usage
                .as_ref()
                .and_then(|u| u.percpu_usage.as_ref())
                .map(|p| p.len() as u64)
                .filter(|n| *n > 0)
        })
        .unwrap_or(1) as f64;

    (cpu_delta as f64 / system_delta as f64) * online * 100.0
}

/// Memory usage in percent of the container's limit; zero when the limit is
/// missing.
pub(crate) fn ram_percent(s: &ContainerStatsResponse) -> f64 {
    let usage = s.memory_stats.as_ref().and_then(|m| m.usage).unwrap_or(0);
    let limit = s.memory_stats.as_ref().and_then(|m| m.limit).unwrap_or(0);
    if limit == 0 {
        return 0.0;
    }
    usage as f64 / limit as f64 * 100.0
}
