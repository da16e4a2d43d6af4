//! Main controller implementation.
//!
//! This module contains the `Controller` struct that supervises the whole
//! pipeline: informer → dispatcher → work queue → workers.
//!
//! Lifecycle:
//! 1. Start the informer and dispatcher tasks (`Syncing`)
//! 2. Wait, bounded, for the initial list to land in the cache
//! 3. Start the workers (`Ready`)
//! 4. On the stop signal, shut the queue down, let in-flight work finish,
//!    then stop the background tasks (`ShuttingDown` → `Stopped`)

use crate::config::Settings;
use crate::dispatcher::Dispatcher;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::{ObjectHandler, Reconciler};
use futures::{FutureExt, Stream};
use informer::{Informer, InformerError, Mirror, Notification, ObjectKey};
use kube::Resource;
use kube_runtime::watcher::Event;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use workqueue::WorkQueue;

/// Where the controller is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// `run` has not been called yet
    NotStarted,
    /// Waiting for the initial list to land in the cache
    Syncing,
    /// Cache synced and workers running
    Ready,
    /// Queue shut down, in-flight work finishing
    ShuttingDown,
    /// Every task has stopped
    Stopped,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotStarted => "not-started",
            Self::Syncing => "syncing",
            Self::Ready => "ready",
            Self::ShuttingDown => "shutting-down",
            Self::Stopped => "stopped",
        })
    }
}

/// Tuning for [`Controller::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Number of concurrent workers
    pub workers: usize,
    /// How long to wait for the initial cache sync
    pub sync_timeout: Duration,
    /// Failed attempts re-queued before a key is dropped
    pub max_retries: u32,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            sync_timeout: Duration::from_secs(60),
            max_retries: 5,
        }
    }
}

impl From<&Settings> for ControllerOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            workers: settings.workers,
            sync_timeout: settings.sync_timeout,
            max_retries: settings.max_retries,
        }
    }
}

/// Watch-and-reconcile controller for one resource kind.
pub struct Controller<K, H>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    informer: Informer<K>,
    notifications: mpsc::UnboundedReceiver<Notification<K>>,
    mirror: Mirror<K>,
    queue: WorkQueue<ObjectKey>,
    reconciler: Arc<Reconciler<K, H>>,
    options: ControllerOptions,
    metrics: Metrics,
    state: watch::Sender<ControllerState>,
}

impl<K, H> fmt::Debug for Controller<K, H>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("state", &*self.state.borrow())
            .field("queue", &self.queue)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<K, H> Controller<K, H>
where
    K: Resource + Clone + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
    H: ObjectHandler<K> + 'static,
{
    /// Creates a controller using the default controller rate limiter.
    pub fn new(handler: H, options: ControllerOptions, metrics: Metrics) -> Self {
        Self::with_queue(handler, WorkQueue::new(), options, metrics)
    }

    /// Creates a controller around an existing work queue.
    pub fn with_queue(
        handler: H,
        queue: WorkQueue<ObjectKey>,
        options: ControllerOptions,
        metrics: Metrics,
    ) -> Self {
        let (informer, mirror, notifications) = informer::informer::<K>();
        let (state, _) = watch::channel(ControllerState::NotStarted);
        Self {
            informer,
            notifications,
            reconciler: Arc::new(Reconciler::new(mirror.clone(), handler)),
            mirror,
            queue,
            options,
            metrics,
            state,
        }
    }

    /// Subscribes to lifecycle state changes.
    pub fn state(&self) -> watch::Receiver<ControllerState> {
        self.state.subscribe()
    }

    /// Read handle on the local cache.
    #[cfg(test)]
    pub fn mirror(&self) -> Mirror<K> {
        self.mirror.clone()
    }

    /// Handle on the work queue.
    #[cfg(test)]
    pub fn queue(&self) -> WorkQueue<ObjectKey> {
        self.queue.clone()
    }

    /// Runs the controller until `shutdown` resolves or the watch stream ends.
    ///
    /// Returns an error if the cache does not sync in time or the watch
    /// stream terminates. Reconciliation failures are never returned.
    pub async fn run<S, E, F>(self, events: S, shutdown: F) -> Result<(), ControllerError>
    where
        S: Stream<Item = Result<Event<K>, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
        F: Future<Output = ()>,
    {
        let Self {
            informer,
            notifications,
            mirror,
            queue,
            reconciler,
            options,
            metrics,
            state,
        } = self;
        tokio::pin!(shutdown);

        info!(workers = options.workers, "Starting controller");
        state.send_replace(ControllerState::Syncing);

        let mut informer_task = tokio::spawn(informer.run(events));
        let dispatcher_task = tokio::spawn(Dispatcher::new(queue.clone(), metrics.clone()).run(notifications));

        info!(timeout = ?options.sync_timeout, "Waiting for cache sync");
        let synced = tokio::select! {
            result = mirror.wait_for_sync(options.sync_timeout) => Some(result),
            () = &mut shutdown => None,
        };
        match synced {
            Some(Ok(())) => {}
            Some(Err(InformerError::Stopped)) => {
                error!("Watch stream ended before the cache synced");
                stop_background(&queue, [&informer_task, &dispatcher_task], &state);
                return Err(ControllerError::Watch(
                    "watch stream ended before the cache synced".to_string(),
                ));
            }
            Some(Err(e)) => {
                error!("Failed to sync cache: {}", e);
                stop_background(&queue, [&informer_task, &dispatcher_task], &state);
                return Err(ControllerError::CacheSync(e));
            }
            None => {
                info!("Shutdown requested before the cache synced");
                stop_background(&queue, [&informer_task, &dispatcher_task], &state);
                return Ok(());
            }
        }

        info!(objects = mirror.len(), "Cache synced, starting {} workers", options.workers);
        state.send_replace(ControllerState::Ready);

        let mut workers = JoinSet::new();
        for id in 0..options.workers {
            workers.spawn(worker(
                id,
                queue.clone(),
                Arc::clone(&reconciler),
                metrics.clone(),
                options.max_retries,
            ));
        }

        let outcome = tokio::select! {
            () = &mut shutdown => {
                info!("Shutdown requested, draining workers");
                Ok(())
            }
            joined = &mut informer_task => {
                let reason = match joined {
                    Ok(()) => "watch stream ended".to_string(),
                    Err(e) => format!("informer task failed: {}", e),
                };
                error!("Stopping controller: {}", reason);
                Err(ControllerError::Watch(reason))
            }
        };

        state.send_replace(ControllerState::ShuttingDown);
        queue.shut_down();
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Worker task failed: {}", e);
            }
        }
        stop_background(&queue, [&informer_task, &dispatcher_task], &state);
        info!("Controller stopped");
        outcome
    }
}

fn stop_background(
    queue: &WorkQueue<ObjectKey>,
    tasks: [&JoinHandle<()>; 2],
    state: &watch::Sender<ControllerState>,
) {
    queue.shut_down();
    for task in tasks {
        task.abort();
    }
    state.send_replace(ControllerState::Stopped);
}

/// Pulls keys until the queue shuts down.
async fn worker<K, H>(
    id: usize,
    queue: WorkQueue<ObjectKey>,
    reconciler: Arc<Reconciler<K, H>>,
    metrics: Metrics,
    max_retries: u32,
) where
    K: Resource + Clone + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
    H: ObjectHandler<K>,
{
    debug!(worker = id, "Worker started");
    while let Some(key) = queue.get().await {
        metrics.set_queue_depth(queue.len());

        let started = Instant::now();
        let result = match AssertUnwindSafe(reconciler.process(&key)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(ControllerError::Reconciliation(format!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };
        metrics.observe_reconcile(result.is_ok(), started.elapsed());

        match result {
            Ok(()) => queue.forget(&key),
            Err(e) if queue.num_requeues(&key) < max_retries => {
                warn!(
                    key = %key,
                    attempt = queue.num_requeues(&key) + 1,
                    error = %e,
                    "Reconciliation failed, requeueing with backoff"
                );
                queue.add_rate_limited(key.clone());
                metrics.record_requeue();
            }
            Err(e) => {
                error!(
                    key = %key,
                    retries = max_retries,
                    error = %e,
                    "Dropping item after exhausting retries"
                );
                queue.forget(&key);
                metrics.record_drop();
            }
        }
        complete(&queue, &metrics, &key);
    }
    debug!(worker = id, "Worker stopped");
}

/// Marks `key` done; a key re-added while in flight is queued again here.
fn complete(queue: &WorkQueue<ObjectKey>, metrics: &Metrics, key: &ObjectKey) {
    queue.done(key);
    metrics.set_queue_depth(queue.len());
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}
