//! The work queue itself.
//!
//! State is split across three collections, all guarded by one mutex:
//! - `queue`: keys waiting to be handed out, in FIFO order
//! - `dirty`: keys that need processing (queued, or re-added while in flight)
//! - `processing`: keys handed out by `get` and not yet marked `done`
//!
//! A key is in `queue` only if it is in `dirty` and not in `processing`.

use crate::lock;
use crate::rate_limiter::{RateLimiter, default_controller_rate_limiter};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tracing::{debug, trace};

/// Deduplicating, single-flight, rate-limited work queue.
///
/// Cloning is cheap and yields another handle to the same queue.
pub struct WorkQueue<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    /// Woken when a key becomes available or the queue shuts down
    item_ready: Notify,
    /// Woken when the in-flight set empties or the queue shuts down
    drained: Notify,
    /// Flips to `true` once on shutdown; cancels pending delayed adds
    shutdown: watch::Sender<bool>,
    rate_limiter: Box<dyn RateLimiter<T>>,
}

struct State<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    shutting_down: bool,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for WorkQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("WorkQueue")
            .field("queued", &state.queue.len())
            .field("processing", &state.processing.len())
            .field("shutting_down", &state.shutting_down)
            .finish()
    }
}

impl<T> Default for WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    /// Creates a queue using [`default_controller_rate_limiter`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_rate_limiter(default_controller_rate_limiter())
    }

    /// Creates a queue with a custom rate limiter for `add_rate_limited`.
    #[must_use]
    pub fn with_rate_limiter<R>(rate_limiter: R) -> Self
    where
        R: RateLimiter<T> + 'static,
    {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    shutting_down: false,
                }),
                item_ready: Notify::new(),
                drained: Notify::new(),
                shutdown,
                rate_limiter: Box::new(rate_limiter),
            }),
        }
    }

    /// Marks `item` as needing processing.
    ///
    /// A key that is already queued is not queued twice. A key that is
    /// currently being processed is remembered and re-queued on `done`.
    /// Ignored once the queue is shutting down.
    pub fn add(&self, item: T) {
        let mut state = lock(&self.inner.state);
        if state.shutting_down {
            return;
        }
        if state.dirty.contains(&item) {
            trace!("item already pending, collapsing add");
            return;
        }
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            trace!("item in flight, deferring re-delivery until done");
            return;
        }
        state.queue.push_back(item);
        drop(state);
        self.inner.item_ready.notify_one();
    }

    /// Waits for the next item.
    ///
    /// Returns `None` once the queue is shutting down, even if items are
    /// still queued. The returned item must be passed to [`done`](Self::done)
    /// when processing finishes.
    pub async fn get(&self) -> Option<T> {
        loop {
            // Register interest before inspecting state so a concurrent
            // add or shutdown cannot slip between the check and the wait.
            let notified = self.inner.item_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = lock(&self.inner.state);
                if state.shutting_down {
                    return None;
                }
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    let more_queued = !state.queue.is_empty();
                    drop(state);
                    if more_queued {
                        self.inner.item_ready.notify_one();
                    }
                    return Some(item);
                }
            }

            notified.await;
        }
    }

    /// Marks `item` as finished. If it was re-added while in flight it is
    /// queued again now.
    pub fn done(&self, item: &T) {
        let mut state = lock(&self.inner.state);
        state.processing.remove(item);
        let requeue = !state.shutting_down && state.dirty.contains(item);
        if requeue {
            state.queue.push_back(item.clone());
        }
        let idle = state.processing.is_empty();
        drop(state);

        if requeue {
            self.inner.item_ready.notify_one();
        }
        if idle {
            self.inner.drained.notify_waiters();
        }
    }

    /// Adds `item` after `delay`. Must be called from within a tokio runtime.
    ///
    /// Pending delayed adds are dropped when the queue shuts down.
    pub fn add_after(&self, item: T, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(item);
            return;
        }

        let queue = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => queue.add(item),
                _ = async { shutdown.wait_for(|stopped| *stopped).await.is_ok() } => {
                    trace!("queue shut down, dropping delayed item");
                }
            }
        });
    }

    /// Re-adds `item` once the rate limiter says it may be retried.
    pub fn add_rate_limited(&self, item: T) {
        let delay = self.inner.rate_limiter.when(&item);
        debug!(delay_ms = delay.as_millis(), "re-queueing item with backoff");
        self.add_after(item, delay);
    }

    /// Clears the rate limiter's failure history for `item`.
    pub fn forget(&self, item: &T) {
        self.inner.rate_limiter.forget(item);
    }

    /// Number of rate-limited re-queues of `item` since it was last forgotten.
    #[must_use]
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.inner.rate_limiter.num_requeues(item)
    }

    /// Number of items waiting to be handed out.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.inner.state).queue.len()
    }

    /// True when no item is waiting to be handed out.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once [`shut_down`](Self::shut_down) has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        lock(&self.inner.state).shutting_down
    }

    /// Stops handing out items and wakes every blocked `get` with `None`.
    ///
    /// Items already handed out may still be marked `done`.
    pub fn shut_down(&self) {
        {
            let mut state = lock(&self.inner.state);
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
        }
        debug!("work queue shutting down");
        self.inner.shutdown.send_replace(true);
        self.inner.item_ready.notify_waiters();
        self.inner.drained.notify_waiters();
    }

    /// Shuts down and waits until every in-flight item has been marked `done`.
    pub async fn shut_down_with_drain(&self) {
        self.shut_down();
        loop {
            let drained = self.inner.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            if lock(&self.inner.state).processing.is_empty() {
                return;
            }
            drained.await;
        }
    }
}
