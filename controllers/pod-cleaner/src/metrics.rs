//! Prometheus metrics for the controller.

use crate::error::ControllerError;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::fmt;
use std::time::Duration;

/// Controller metrics, registered in their own registry.
///
/// Cloning shares the underlying collectors.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    notifications: IntCounterVec,
    reconciles: IntCounterVec,
    requeues: IntCounter,
    dropped: IntCounter,
    queue_depth: IntGauge,
    reconcile_duration: Histogram,
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("queue_depth", &self.queue_depth.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Creates and registers every collector.
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();

        let notifications = IntCounterVec::new(
            Opts::new(
                "pod_cleaner_notifications_total",
                "Change notifications received from the local cache",
            ),
            &["kind"],
        )?;
        let reconciles = IntCounterVec::new(
            Opts::new("pod_cleaner_reconcile_total", "Reconcile attempts by result"),
            &["result"],
        )?;
        let requeues = IntCounter::new(
            "pod_cleaner_requeues_total",
            "Keys re-queued with backoff after a failed reconcile",
        )?;
        let dropped = IntCounter::new(
            "pod_cleaner_items_dropped_total",
            "Keys dropped after exhausting their retries",
        )?;
        let queue_depth = IntGauge::new("pod_cleaner_queue_depth", "Keys waiting in the work queue")?;
        let reconcile_duration = Histogram::with_opts(HistogramOpts::new(
            "pod_cleaner_reconcile_duration_seconds",
            "Time spent reconciling one key",
        ))?;

        registry.register(Box::new(notifications.clone()))?;
        registry.register(Box::new(reconciles.clone()))?;
        registry.register(Box::new(requeues.clone()))?;
        registry.register(Box::new(dropped.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;

        Ok(Self {
            registry,
            notifications,
            reconciles,
            requeues,
            dropped,
            queue_depth,
            reconcile_duration,
        })
    }

    /// Counts one cache notification of `kind`.
    pub fn record_notification(&self, kind: &str) {
        self.notifications.with_label_values(&[kind]).inc();
    }

    /// Records one reconcile attempt and how long it took.
    pub fn observe_reconcile(&self, success: bool, elapsed: Duration) {
        let result = if success { "success" } else { "error" };
        self.reconciles.with_label_values(&[result]).inc();
        self.reconcile_duration.observe(elapsed.as_secs_f64());
    }

    /// Counts one rate-limited requeue.
    pub fn record_requeue(&self) {
        self.requeues.inc();
    }

    /// Counts one key dropped after its last retry.
    pub fn record_drop(&self) {
        self.dropped.inc();
    }

    /// Sets the number of keys waiting in the queue.
    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    /// Renders every metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String, ControllerError> {
        let mut buffer = String::new();
        TextEncoder::new().encode_utf8(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }

    #[cfg(test)]
    pub fn notifications(&self, kind: &str) -> u64 {
        self.notifications.with_label_values(&[kind]).get()
    }

    #[cfg(test)]
    pub fn reconciles(&self, result: &str) -> u64 {
        self.reconciles.with_label_values(&[result]).get()
    }

    #[cfg(test)]
    pub fn requeues(&self) -> u64 {
        self.requeues.get()
    }

    #[cfg(test)]
    pub fn dropped(&self) -> u64 {
        self.dropped.get()
    }

    #[cfg(test)]
    pub fn queue_depth(&self) -> i64 {
        self.queue_depth.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_are_independent_per_instance() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();

        a.record_notification("add");
        a.record_notification("add");

        assert_eq!(a.notifications("add"), 2);
        assert_eq!(b.notifications("add"), 0);
    }

    #[test]
    fn test_encode_includes_recorded_values() {
        let metrics = Metrics::new().unwrap();
        metrics.record_notification("delete");
        metrics.observe_reconcile(false, Duration::from_millis(20));
        metrics.record_requeue();
        metrics.set_queue_depth(3);

        let text = metrics.encode().unwrap();
        assert!(text.contains("pod_cleaner_notifications_total{kind=\"delete\"} 1"));
        assert!(text.contains("pod_cleaner_reconcile_total{result=\"error\"} 1"));
        assert!(text.contains("pod_cleaner_requeues_total 1"));
        assert!(text.contains("pod_cleaner_queue_depth 3"));
        assert!(text.contains("pod_cleaner_reconcile_duration_seconds_count 1"));
    }
}
