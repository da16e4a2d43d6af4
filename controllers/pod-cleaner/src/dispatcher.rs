//! Change dispatcher.
//!
//! Turns cache notifications into work queue keys. Every notification
//! enqueues its object's key; whether anything needs doing is decided later
//! by the reconciler against the then-current cache.

use crate::metrics::Metrics;
use informer::{Notification, ObjectKey};
use kube::Resource;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use workqueue::WorkQueue;

/// Key for a newly seen object.
pub fn on_add<K: Resource>(obj: &K) -> Option<ObjectKey> {
    ObjectKey::from_resource(obj)
}

/// Key for an updated object. The new snapshot names the key.
pub fn on_update<K: Resource>(_old: &K, new: &K) -> Option<ObjectKey> {
    ObjectKey::from_resource(new)
}

/// Key for a deleted object.
pub fn on_delete<K: Resource>(obj: &K) -> Option<ObjectKey> {
    ObjectKey::from_resource(obj)
}

/// Routes a notification to its handler.
pub fn work_item_for<K: Resource>(notification: &Notification<K>) -> Option<ObjectKey> {
    match notification {
        Notification::Added(obj) => on_add(obj.as_ref()),
        Notification::Updated { old, new } => on_update(old.as_ref(), new.as_ref()),
        Notification::Deleted(obj) => on_delete(obj.as_ref()),
    }
}

/// Feeds cache notifications into the work queue.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    queue: WorkQueue<ObjectKey>,
    metrics: Metrics,
}

impl Dispatcher {
    /// Creates a dispatcher feeding `queue`.
    pub fn new(queue: WorkQueue<ObjectKey>, metrics: Metrics) -> Self {
        Self { queue, metrics }
    }

    /// Drains `notifications` until the informer drops its sender.
    pub async fn run<K: Resource>(self, mut notifications: mpsc::UnboundedReceiver<Notification<K>>) {
        info!("Starting change dispatcher");
        while let Some(notification) = notifications.recv().await {
            self.dispatch(&notification);
        }
        debug!("Notification channel closed, dispatcher stopping");
    }

    /// Enqueues the key for one notification.
    pub fn dispatch<K: Resource>(&self, notification: &Notification<K>) {
        let kind = notification.kind();
        self.metrics.record_notification(kind.as_str());

        let Some(key) = work_item_for(notification) else {
            warn!(kind = kind.as_str(), "Notification for object without a name, ignoring");
            return;
        };
        debug!(key = %key, kind = kind.as_str(), "Enqueueing");
        self.queue.add(key);
        self.metrics.set_queue_depth(self.queue.len());
    }
}
