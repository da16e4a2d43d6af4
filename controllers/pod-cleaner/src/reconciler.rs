//! Reconciliation logic.
//!
//! Workers hand a key to [`Reconciler::process`], which re-reads the current
//! object from the local cache and passes it to an [`ObjectHandler`]. The key
//! carries no payload, so the handler always sees the latest cached state.

use crate::error::ControllerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use informer::{Mirror, ObjectKey};
use k8s_openapi::api::core::v1::Pod;
use kube::Resource;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Business logic applied to one object identity.
///
/// Implementations must be idempotent: the same key may be processed many
/// times, and the same snapshot may be seen more than once.
#[async_trait]
pub trait ObjectHandler<K>: Send + Sync
where
    K: Send + Sync,
{
    /// Called with the current cached snapshot of `key`.
    ///
    /// An error is treated as transient and the key is retried with backoff.
    async fn on_present(&self, key: &ObjectKey, obj: &K) -> Result<(), ControllerError>;

    /// Called when `key` is no longer in the cache.
    async fn on_absent(&self, key: &ObjectKey) -> Result<(), ControllerError>;
}

/// Reconciles keys against the local cache.
pub struct Reconciler<K, H>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    mirror: Mirror<K>,
    handler: H,
}

impl<K, H> fmt::Debug for Reconciler<K, H>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("mirror", &self.mirror)
            .finish_non_exhaustive()
    }
}

impl<K, H> Reconciler<K, H>
where
    K: Resource + Clone + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
    H: ObjectHandler<K>,
{
    /// Creates a reconciler reading from `mirror`.
    pub fn new(mirror: Mirror<K>, handler: H) -> Self {
        Self { mirror, handler }
    }

    /// Processes one key.
    ///
    /// A key missing from the cache was deleted after its notification was
    /// queued; that is not an error.
    pub async fn process(&self, key: &ObjectKey) -> Result<(), ControllerError> {
        match self.mirror.get_by_key(key) {
            None => {
                info!(key = %key, "Object does not exist anymore");
                self.handler.on_absent(key).await
            }
            Some(obj) => {
                debug!(key = %key, "Reconciling object");
                self.handler.on_present(key, obj.as_ref()).await
            }
        }
    }
}

/// What [`PodObserver`] last recorded for a pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodObservation {
    /// `metadata.resourceVersion` of the observed snapshot
    pub resource_version: Option<String>,
    /// `status.phase`
    pub phase: Option<String>,
    /// `spec.nodeName`, unset until scheduled
    pub node: Option<String>,
    /// When this snapshot was first recorded
    pub observed_at: DateTime<Utc>,
}

/// Base pod handler: records the latest observed state of each pod.
///
/// No cleanup decisions are made; this is where a cleanup policy would hook in.
#[derive(Clone, Debug, Default)]
pub struct PodObserver {
    ledger: Arc<Mutex<HashMap<ObjectKey, PodObservation>>>,
}

impl PodObserver {
    /// Creates an observer with an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last observation recorded for `key`.
    #[cfg(test)]
    pub fn observation(&self, key: &ObjectKey) -> Option<PodObservation> {
        self.ledger().get(key).cloned()
    }

    /// Number of pods currently tracked.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.ledger().len()
    }

    fn ledger(&self) -> MutexGuard<'_, HashMap<ObjectKey, PodObservation>> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ObjectHandler<Pod> for PodObserver {
    async fn on_present(&self, key: &ObjectKey, pod: &Pod) -> Result<(), ControllerError> {
        let resource_version = pod.metadata.resource_version.clone();
        let mut ledger = self.ledger();

        if ledger
            .get(key)
            .is_some_and(|seen| seen.resource_version == resource_version)
        {
            debug!(key = %key, "Pod unchanged since last observation");
            return Ok(());
        }

        let observation = PodObservation {
            resource_version,
            phase: pod.status.as_ref().and_then(|status| status.phase.clone()),
            node: pod.spec.as_ref().and_then(|spec| spec.node_name.clone()),
            observed_at: Utc::now(),
        };
        info!(
            key = %key,
            phase = observation.phase.as_deref().unwrap_or("<unknown>"),
            node = observation.node.as_deref().unwrap_or("<unscheduled>"),
            resource_version = observation.resource_version.as_deref().unwrap_or("<none>"),
            "Observed Pod"
        );
        ledger.insert(key.clone(), observation);
        Ok(())
    }

    async fn on_absent(&self, key: &ObjectKey) -> Result<(), ControllerError> {
        if self.ledger().remove(key).is_some() {
            debug!(key = %key, "Forgot deleted Pod");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{RecordingHandler, create_test_pod, synced_mirror};

    #[tokio::test]
    async fn test_process_present_pod_records_observation() {
        let pod = create_test_pod("ns", "a", "1");
        let (_informer, mirror) = synced_mirror(vec![pod]);
        let observer = PodObserver::new();
        let reconciler = Reconciler::new(mirror, observer.clone());
        let key = ObjectKey::namespaced("ns", "a");

        reconciler.process(&key).await.unwrap();

        let observation = observer.observation(&key).unwrap();
        assert_eq!(observation.resource_version.as_deref(), Some("1"));
        assert_eq!(observation.phase.as_deref(), Some("Running"));
        assert_eq!(observation.node.as_deref(), Some("node-1"));
    }

    #[tokio::test]
    async fn test_process_is_idempotent_for_same_snapshot() {
        let (_informer, mirror) = synced_mirror(vec![create_test_pod("ns", "a", "7")]);
        let observer = PodObserver::new();
        let reconciler = Reconciler::new(mirror, observer.clone());
        let key = ObjectKey::namespaced("ns", "a");

        reconciler.process(&key).await.unwrap();
        let first = observer.observation(&key);
        reconciler.process(&key).await.unwrap();

        assert_eq!(observer.observation(&key), first);
        assert_eq!(observer.len(), 1);
    }

    #[tokio::test]
    async fn test_process_missing_key_is_not_an_error() {
        let (_informer, mirror) = synced_mirror(vec![]);
        let handler = RecordingHandler::new();
        let reconciler = Reconciler::new(mirror, handler.clone());
        let key = ObjectKey::namespaced("ns", "b");

        reconciler.process(&key).await.unwrap();

        assert_eq!(handler.absent_calls(&key), 1);
        assert_eq!(handler.present_calls(&key), 0);
    }

    #[tokio::test]
    async fn test_absent_pod_is_removed_from_ledger() {
        let observer = PodObserver::new();
        let key = ObjectKey::namespaced("ns", "a");
        observer
            .on_present(&key, &create_test_pod("ns", "a", "1"))
            .await
            .unwrap();
        assert_eq!(observer.len(), 1);

        observer.on_absent(&key).await.unwrap();
        assert_eq!(observer.len(), 0);
        // Deletion is terminal; a repeat is a no-op
        observer.on_absent(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_error_is_propagated() {
        let (_informer, mirror) = synced_mirror(vec![create_test_pod("ns", "c", "1")]);
        let handler = RecordingHandler::new().failing(1);
        let reconciler = Reconciler::new(mirror, handler.clone());
        let key = ObjectKey::namespaced("ns", "c");

        assert!(matches!(
            reconciler.process(&key).await,
            Err(ControllerError::Reconciliation(_))
        ));
        assert!(reconciler.process(&key).await.is_ok());
    }
}
