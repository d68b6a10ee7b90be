// Bounded task runner: a fixed pool of worker tasks behind a counting
// admission gate.

use crate::controller::panic_message;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, TryAcquireError, mpsc};
use tracing::{Instrument, debug, error, info_span, warn};

#[derive(Debug, Error)]
pub enum TaskError {
    /// Admission refused: `max_pending` tasks are already outstanding.
    #[error("task queue full; the system is busy")]
    QueueFull,
    #[error("task runner is closed")]
    Closed,
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub fn is_queue_full(&self) -> bool {
        matches!(self, TaskError::QueueFull)
    }
}

pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Target context for completion callbacks (for example a UI event loop).
pub trait Dispatcher: Send + Sync {
    /// Schedule `callback` on the target context, or hand it back if that
    /// context is gone.
    fn dispatch(&self, callback: Callback) -> Result<(), Callback>;
}

/// Dispatcher that queues callbacks on a channel; the consumer drains the
/// receiver and runs them.
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<Callback>,
}

impl ChannelDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Callback>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Dispatcher for ChannelDispatcher {
    fn dispatch(&self, callback: Callback) -> Result<(), Callback> {
        self.tx.send(callback).map_err(|e| e.0)
    }
}

/// Completion and failure handlers for one submitted task.
pub struct TaskCallbacks<T> {
    on_done: Option<Box<dyn FnOnce(T) + Send>>,
    on_error: Option<Box<dyn FnOnce(TaskError) + Send>>,
}

impl<T> Default for TaskCallbacks<T> {
    fn default() -> Self {
        Self {
            on_done: None,
            on_error: None,
        }
    }
}

impl<T> TaskCallbacks<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_done(mut self, f: impl FnOnce(T) + Send + 'static) -> Self {
        self.on_done = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnOnce(TaskError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskRunnerConfig {
    pub workers: usize,
    pub max_pending: usize,
}

impl Default for TaskRunnerConfig {
    fn default() -> Self {
        Self {
            workers: 16,
            max_pending: 128,
        }
    }
}

type Job = BoxFuture<'static, ()>;

struct Inner {
    tx: mpsc::UnboundedSender<Job>,
    permits: Arc<Semaphore>,
    max_pending: usize,
    dispatcher: Option<Arc<dyn Dispatcher>>,
}

/// Cheap to clone; every clone feeds the same pool.
#[derive(Clone)]
pub struct TaskRunner {
    inner: Arc<Inner>,
}

impl TaskRunner {
    /// Spawn the worker pool on the current tokio runtime.
    pub fn new(config: TaskRunnerConfig) -> Self {
        Self::build(config, None)
    }

    pub fn with_dispatcher(config: TaskRunnerConfig, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self::build(config, Some(dispatcher))
    }

    fn build(config: TaskRunnerConfig, dispatcher: Option<Arc<dyn Dispatcher>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));

        for worker in 0..config.workers.max(1) {
            let rx = rx.clone();
            tokio::spawn(
                async move {
                    loop {
                        let job = rx.lock().await.recv().await;
                        match job {
                            Some(job) => job.await,
                            None => break,
                        }
                    }
                    debug!("task worker exiting");
                }
                .instrument(info_span!("task_worker", worker)),
            );
        }

        Self {
            inner: Arc::new(Inner {
                tx,
                permits: Arc::new(Semaphore::new(config.max_pending)),
                max_pending: config.max_pending,
                dispatcher,
            }),
        }
    }

    /// Tasks admitted and not yet finished.
    pub fn pending(&self) -> usize {
        self.inner
            .max_pending
            .saturating_sub(self.inner.permits.available_permits())
    }

    pub fn max_pending(&self) -> usize {
        self.inner.max_pending
    }

    /// Stop admitting work. Tasks already accepted still run.
    pub fn close(&self) {
        self.inner.permits.close();
    }

    /// Submit without waiting. When the gate is full the task is dropped and
    /// `on_error` receives [`TaskError::QueueFull`]. Returns whether the task
    /// was accepted.
    pub fn try_submit<T, F>(&self, task: F, callbacks: TaskCallbacks<T>) -> bool
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        match self.inner.permits.clone().try_acquire_owned() {
            Ok(permit) => self.enqueue(permit, task, callbacks),
            Err(TryAcquireError::NoPermits) => {
                warn!(max_pending = self.inner.max_pending, "task queue full; rejecting task");
                deliver(self.inner.dispatcher.as_ref(), callbacks, Err(TaskError::QueueFull));
                false
            }
            Err(TryAcquireError::Closed) => {
                deliver(self.inner.dispatcher.as_ref(), callbacks, Err(TaskError::Closed));
                false
            }
        }
    }

    /// Submit, waiting for capacity if the gate is full.
    pub async fn submit<T, F>(&self, task: F, callbacks: TaskCallbacks<T>) -> bool
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        match self.inner.permits.clone().acquire_owned().await {
            Ok(permit) => self.enqueue(permit, task, callbacks),
            Err(_) => {
                deliver(self.inner.dispatcher.as_ref(), callbacks, Err(TaskError::Closed));
                false
            }
        }
    }

    fn enqueue<T, F>(&self, permit: OwnedSemaphorePermit, task: F, callbacks: TaskCallbacks<T>) -> bool
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let dispatcher = self.inner.dispatcher.clone();
        let job = async move {
            let outcome = AssertUnwindSafe(task).catch_unwind().await;
            // Released before callbacks run, so a callback may resubmit.
            drop(permit);
            let result = match outcome {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(TaskError::Failed(e)),
                Err(panic) => Err(TaskError::Panicked(panic_message(panic.as_ref()))),
            };
            deliver(dispatcher.as_ref(), callbacks, result);
        };

        // The permit travels inside the job, so a failed send releases it.
        if self.inner.tx.send(Box::pin(job)).is_err() {
            error!("task workers are gone; dropping task");
            return false;
        }
        true
    }
}

/// Hand the matching callback to the dispatcher, or run it here if there is
/// none or it refuses.
fn deliver<T>(
    dispatcher: Option<&Arc<dyn Dispatcher>>,
    callbacks: TaskCallbacks<T>,
    result: Result<T, TaskError>,
) where
    T: Send + 'static,
{
    let callback: Callback = match result {
        Ok(value) => match callbacks.on_done {
            Some(f) => Box::new(move || f(value)),
            None => return,
        },
        Err(e) => match callbacks.on_error {
            Some(f) => Box::new(move || f(e)),
            None => {
                warn!(error = %e, "task failed with no error handler");
                return;
            }
        },
    };

    let callback = match dispatcher {
        Some(d) => match panic::catch_unwind(AssertUnwindSafe(|| d.dispatch(callback))) {
            Ok(Ok(())) => return,
            Ok(Err(callback)) => {
                debug!("dispatcher unavailable; running callback inline");
                callback
            }
            Err(panic) => {
                error!(panic = %panic_message(panic.as_ref()), "dispatcher panicked; callback dropped");
                return;
            }
        },
        None => callback,
    };

    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(callback)) {
        error!(panic = %panic_message(panic.as_ref()), "task callback panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[tokio::test]
    async fn dispatcher_receives_callbacks() {
        let (dispatcher, mut rx) = ChannelDispatcher::new();
        let runner = TaskRunner::with_dispatcher(TaskRunnerConfig::default(), Arc::new(dispatcher));
        let seen = Arc::new(StdMutex::new(None));

        let sink = seen.clone();
        assert!(runner.try_submit(
            async { Ok(7) },
            TaskCallbacks::new().on_done(move |v| *sink.lock().unwrap() = Some(v)),
        ));

        let callback = rx.recv().await.unwrap();
        assert!(seen.lock().unwrap().is_none());
        callback();
        assert_eq!(*seen.lock().unwrap(), Some(7));
    }

    #[tokio::test]
    async fn closed_dispatcher_runs_inline() {
        let (dispatcher, rx) = ChannelDispatcher::new();
        drop(rx);
        let runner = TaskRunner::with_dispatcher(TaskRunnerConfig::default(), Arc::new(dispatcher));
        let (tx, done) = tokio::sync::oneshot::channel();

        runner.try_submit(
            async { Ok("ok") },
            TaskCallbacks::new().on_done(move |v| {
                let _ = tx.send(v);
            }),
        );
        assert_eq!(done.await.unwrap(), "ok");
    }

    struct PanickingDispatcher;

    impl Dispatcher for PanickingDispatcher {
        fn dispatch(&self, _callback: Callback) -> Result<(), Callback> {
            panic!("dispatcher exploded");
        }
    }

    #[tokio::test]
    async fn panicking_dispatcher_keeps_the_worker_alive() {
        let config = TaskRunnerConfig {
            workers: 1,
            max_pending: 4,
        };
        let runner = TaskRunner::with_dispatcher(config, Arc::new(PanickingDispatcher));

        assert!(runner.try_submit(async { Ok(1) }, TaskCallbacks::new().on_done(|_| {})));

        let (tx, ran) = tokio::sync::oneshot::channel();
        assert!(runner.try_submit(
            async move {
                let _ = tx.send(());
                Ok(())
            },
            TaskCallbacks::new(),
        ));
        tokio::time::timeout(std::time::Duration::from_secs(5), ran)
            .await
            .expect("the single worker is still running jobs")
            .unwrap();
    }

    #[tokio::test]
    async fn closed_runner_rejects() {
        let runner = TaskRunner::new(TaskRunnerConfig::default());
        runner.close();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let accepted = runner.try_submit(
            async { Ok(()) },
            TaskCallbacks::new().on_error(move |e| {
                let _ = tx.send(matches!(e, TaskError::Closed));
            }),
        );
        assert!(!accepted);
        assert!(rx.await.unwrap());
        assert_eq!(runner.pending(), 0);
    }
}
