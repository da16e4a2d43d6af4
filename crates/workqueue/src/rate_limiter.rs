//! Rate limiters deciding how long a failed item waits before re-delivery.

use crate::backoff::ExponentialBackoff;
use crate::lock;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Decides the re-delivery delay for items handed to
/// [`WorkQueue::add_rate_limited`](crate::WorkQueue::add_rate_limited).
pub trait RateLimiter<T>: Send + Sync {
    /// Returns how long `item` should wait before it is re-queued, and
    /// records the attempt.
    fn when(&self, item: &T) -> Duration;

    /// Stops tracking `item`; its next failure starts from the base delay.
    fn forget(&self, item: &T);

    /// Number of times `item` has been rate-limited since it was last forgotten.
    fn num_requeues(&self, item: &T) -> u32;
}

/// Per-item exponential backoff: `base * 2^failures`, capped.
pub struct ItemExponentialFailureRateLimiter<T> {
    backoff: ExponentialBackoff,
    failures: Mutex<HashMap<T, u32>>,
}

impl<T> ItemExponentialFailureRateLimiter<T> {
    /// Creates a limiter with the given base and maximum delay.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self::with_backoff(ExponentialBackoff::new(base, max))
    }

    /// Creates a limiter from an existing backoff calculator.
    #[must_use]
    pub fn with_backoff(backoff: ExponentialBackoff) -> Self {
        Self {
            backoff,
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> fmt::Debug for ItemExponentialFailureRateLimiter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemExponentialFailureRateLimiter")
            .field("backoff", &self.backoff)
            .field("tracked_items", &lock(&self.failures).len())
            .finish()
    }
}

impl<T> RateLimiter<T> for ItemExponentialFailureRateLimiter<T>
where
    T: Clone + Eq + Hash + Send + Sync,
{
    fn when(&self, item: &T) -> Duration {
        let mut failures = lock(&self.failures);
        let count = failures.entry(item.clone()).or_insert(0);
        let delay = self.backoff.delay_for(*count);
        *count = count.saturating_add(1);
        delay
    }

    fn forget(&self, item: &T) {
        lock(&self.failures).remove(item);
    }

    fn num_requeues(&self, item: &T) -> u32 {
        lock(&self.failures).get(item).copied().unwrap_or(0)
    }
}

/// Overall token bucket shared by all items.
///
/// Tokens refill at `qps` per second up to `burst`. Each call to `when`
/// reserves one token; if none is available the returned delay is the time
/// until the reservation is covered.
#[derive(Debug)]
pub struct BucketRateLimiter {
    qps: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl BucketRateLimiter {
    /// Creates a full bucket. `burst` is at least 1.
    ///
    /// A non-positive `qps` never refills, so once the burst is spent every
    /// reservation waits [`Duration::MAX`].
    #[must_use]
    pub fn new(qps: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            qps: qps.max(f64::MIN_POSITIVE),
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }
}

impl<T> RateLimiter<T> for BucketRateLimiter {
    fn when(&self, _item: &T) -> Duration {
        let mut bucket = lock(&self.bucket);
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.qps).min(self.burst);
        bucket.last_refill = now;
        bucket.tokens -= 1.0;

        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(-bucket.tokens / self.qps).unwrap_or(Duration::MAX)
        }
    }

    fn forget(&self, _item: &T) {}

    fn num_requeues(&self, _item: &T) -> u32 {
        0
    }
}

/// Combines several limiters; the longest delay wins.
pub struct MaxOfRateLimiter<T> {
    limiters: Vec<Box<dyn RateLimiter<T>>>,
}

impl<T> MaxOfRateLimiter<T> {
    /// Creates a combined limiter.
    #[must_use]
    pub fn new(limiters: Vec<Box<dyn RateLimiter<T>>>) -> Self {
        Self { limiters }
    }
}

impl<T> fmt::Debug for MaxOfRateLimiter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaxOfRateLimiter")
            .field("limiters", &self.limiters.len())
            .finish()
    }
}

impl<T> RateLimiter<T> for MaxOfRateLimiter<T> {
    fn when(&self, item: &T) -> Duration {
        self.limiters
            .iter()
            .map(|limiter| limiter.when(item))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn forget(&self, item: &T) {
        for limiter in &self.limiters {
            limiter.forget(item);
        }
    }

    fn num_requeues(&self, item: &T) -> u32 {
        self.limiters
            .iter()
            .map(|limiter| limiter.num_requeues(item))
            .max()
            .unwrap_or(0)
    }
}

/// The standard controller limiter: per-item exponential backoff
/// (5ms .. 1000s) combined with an overall 10 qps / 100 burst bucket.
#[must_use]
pub fn default_controller_rate_limiter<T>() -> MaxOfRateLimiter<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    MaxOfRateLimiter::new(vec![
        Box::new(ItemExponentialFailureRateLimiter::with_backoff(
            ExponentialBackoff::default(),
        )),
        Box::new(BucketRateLimiter::new(10.0, 100)),
    ])
}
