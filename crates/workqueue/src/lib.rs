//! Controller Work Queue
//!
//! A deduplicating, single-flight, rate-limited queue of work item keys for
//! Kubernetes controllers.
//!
//! # Example
//!
//! ```no_run
//! use workqueue::WorkQueue;
//!
//! # async fn example() {
//! let queue: WorkQueue<String> = WorkQueue::new();
//! queue.add("default/nginx".to_string());
//!
//! while let Some(key) = queue.get().await {
//!     match handle(&key).await {
//!         Ok(()) => queue.forget(&key),
//!         Err(_) => queue.add_rate_limited(key.clone()),
//!     }
//!     queue.done(&key);
//! }
//! # }
//! # async fn handle(_key: &str) -> Result<(), ()> { Ok(()) }
//! ```
//!
//! # Guarantees
//!
//! - **Deduplication**: repeated `add` calls for a queued key collapse into one entry
//! - **Single-flight**: a key handed out by `get` is not handed out again until `done`
//! - **Rate-limited retry**: `add_rate_limited` delays re-delivery using a [`RateLimiter`]
//! - **Shutdown**: `shut_down` wakes every blocked `get` with `None`

pub mod backoff;
pub mod queue;
pub mod rate_limiter;

pub use backoff::ExponentialBackoff;
pub use queue::WorkQueue;
pub use rate_limiter::{
    BucketRateLimiter, ItemExponentialFailureRateLimiter, MaxOfRateLimiter, RateLimiter,
    default_controller_rate_limiter,
};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex, recovering the guard if a previous holder panicked.
///
/// Queue state is only mutated in short, non-panicking critical sections, so
/// the data behind a poisoned lock is still consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
