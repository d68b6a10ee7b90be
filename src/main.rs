use anyhow::Result;
use dockwatch::controller::{DataController, EventType};
use dockwatch::events::EventListener;
use dockwatch::limits::SharedLimits;
use dockwatch::observers::{BroadcastObserver, LogObserver};
use dockwatch::refresh::Refresher;
use dockwatch::runtime::{DockerRuntime, LockedRuntime};
use dockwatch::tasks::TaskRunner;
use dockwatch::{config, worker};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

/// Logs usage totals whenever a new container list is published.
fn spawn_metrics_logger(
    controller: Arc<DataController>,
    observer: &BroadcastObserver,
) -> tokio::task::JoinHandle<()> {
    let mut rx = observer.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(n) if n.event_type == EventType::ContainersUpdated => {
                    let m = controller.metrics();
                    tracing::info!(
                        running = m.running_containers,
                        avg_cpu = m.avg_cpu,
                        max_cpu = m.max_cpu,
                        avg_ram = m.avg_ram,
                        max_ram = m.max_ram,
                        "container usage"
                    );
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "metrics logger lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "dockwatch starting");

    let docker = DockerRuntime::connect()?;
    docker
        .ping()
        .await
        .map_err(|e| anyhow::anyhow!("docker daemon unreachable: {}", e))?;
    let runtime = LockedRuntime::shared(Arc::new(docker));

    let controller = DataController::shared();
    controller.attach(Arc::new(LogObserver));
    let broadcast = Arc::new(BroadcastObserver::new(
        app_config.publishing.broadcast_capacity,
    ));
    controller.attach(broadcast.clone());
    let metrics_handle = spawn_metrics_logger(controller.clone(), &broadcast);

    let tasks = TaskRunner::new(app_config.task_runner());
    let limits = Arc::new(SharedLimits::new(app_config.limits()));

    if let Err(e) = Refresher::new(runtime.clone(), controller.clone())
        .refresh_all()
        .await
    {
        tracing::warn!(error = %e, operation = "initial_refresh", "initial resource refresh failed");
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let (listener_shutdown_tx, listener_shutdown_rx) = tokio::sync::oneshot::channel();

    let worker_handle = worker::spawn(
        worker::WorkerDeps {
            runtime: runtime.clone(),
            controller: controller.clone(),
            limits: limits.clone(),
            shutdown_rx,
        },
        worker::WorkerConfig {
            created_by: app_config.events.created_by_label.clone(),
        },
    );
    let listener_handle = EventListener::new(
        runtime.clone(),
        controller.clone(),
        tasks.clone(),
        app_config.listener(),
    )
    .spawn(listener_shutdown_rx);

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    tracing::info!("Received shutdown signal");
    tasks.close();
    let _ = shutdown_tx.send(());
    let _ = listener_shutdown_tx.send(());
    let _ = worker_handle.await;
    match listener_handle.await {
        Ok(exit) => tracing::debug!(?exit, "event listener stopped"),
        Err(e) => tracing::warn!(error = %e, "event listener task failed"),
    }
    metrics_handle.abort();

    Ok(())
}
