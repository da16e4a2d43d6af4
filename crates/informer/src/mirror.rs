//! Local mirror of a watched collection.
//!
//! [`Informer`] is the writing half. It owns the reflector writer and is
//! driven by a single task consuming the watch stream. [`Mirror`] is the
//! cheap, cloneable reading half handed to workers.
//!
//! Every applied event produces one [`Notification`] on an unbounded channel.
//! Notifications are sent only after the cache reflects the change, so a
//! reader reacting to a notification never sees older state than it.

use crate::error::InformerError;
use crate::key::ObjectKey;
use futures::{Stream, StreamExt};
use kube::Resource;
use kube_runtime::reflector::store::{Store, Writer};
use kube_runtime::watcher::Event;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

/// Change applied to the mirror.
#[derive(Debug)]
pub enum Notification<K> {
    /// An object appeared that was not cached before
    Added(Arc<K>),
    /// A cached object was replaced by a newer snapshot
    Updated {
        /// Snapshot that was cached before
        old: Arc<K>,
        /// Snapshot now cached
        new: Arc<K>,
    },
    /// An object was removed (or reported deleted without ever being cached)
    Deleted(Arc<K>),
}

/// Kind of a [`Notification`], for logging and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// See [`Notification::Added`]
    Add,
    /// See [`Notification::Updated`]
    Update,
    /// See [`Notification::Deleted`]
    Delete,
}

impl NotificationKind {
    /// Lowercase label (`add`, `update`, `delete`)
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl<K> Notification<K> {
    /// The object the notification is about (the new snapshot for updates).
    pub fn object(&self) -> &Arc<K> {
        match self {
            Self::Added(obj) | Self::Deleted(obj) => obj,
            Self::Updated { new, .. } => new,
        }
    }

    /// The notification's kind.
    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::Added(_) => NotificationKind::Add,
            Self::Updated { .. } => NotificationKind::Update,
            Self::Deleted(_) => NotificationKind::Delete,
        }
    }
}

/// Creates a connected informer, mirror and notification receiver.
pub fn informer<K>() -> (Informer<K>, Mirror<K>, mpsc::UnboundedReceiver<Notification<K>>)
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    let writer = Writer::new(K::DynamicType::default());
    let store = writer.as_reader();
    let (synced_tx, synced_rx) = watch::channel(false);
    let (notify_tx, notify_rx) = mpsc::unbounded_channel();
    let kind = K::kind(&K::DynamicType::default()).into_owned();

    let informer = Informer {
        writer,
        store: store.clone(),
        synced: synced_tx,
        notifications: notify_tx,
        relist: None,
        kind,
    };
    let mirror = Mirror {
        store,
        synced: synced_rx,
    };
    (informer, mirror, notify_rx)
}

/// Writing half: applies watch events to the cache and emits notifications.
pub struct Informer<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    writer: Writer<K>,
    store: Store<K>,
    synced: watch::Sender<bool>,
    notifications: mpsc::UnboundedSender<Notification<K>>,
    /// Objects listed since the last `Init`; `Some` while a relist is in progress
    relist: Option<Vec<Arc<K>>>,
    kind: String,
}

impl<K> fmt::Debug for Informer<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Informer")
            .field("kind", &self.kind)
            .field("synced", &*self.synced.borrow())
            .field("relisting", &self.relist.is_some())
            .finish_non_exhaustive()
    }
}

impl<K> Informer<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    /// Consumes the watch stream until it ends.
    ///
    /// Stream errors are logged and skipped: the watcher re-establishes the
    /// watch (relisting if needed) while the cache keeps serving its last
    /// known state.
    pub async fn run<S, E>(mut self, stream: S)
    where
        S: Stream<Item = Result<Event<K>, E>>,
        E: fmt::Display,
    {
        info!(kind = %self.kind, "starting informer");
        let mut stream = Box::pin(stream);
        while let Some(result) = stream.next().await {
            match result {
                Ok(event) => self.apply(event),
                Err(e) => warn!(
                    kind = %self.kind,
                    error = %e,
                    "watch stream error, serving cached state until the watch recovers"
                ),
            }
        }
        warn!(kind = %self.kind, "watch stream ended");
    }

    /// Applies one watch event to the cache, then emits its notifications.
    pub fn apply(&mut self, event: Event<K>) {
        match event {
            Event::Apply(obj) => self.apply_object(obj),
            Event::Delete(obj) => self.delete_object(obj),
            Event::Init => {
                debug!(kind = %self.kind, "list started");
                self.writer.apply_watcher_event(&Event::Init);
                self.relist = Some(Vec::new());
            }
            Event::InitApply(obj) => {
                if ObjectKey::from_resource(&obj).is_none() {
                    warn!(kind = %self.kind, "skipping listed object without a name");
                    return;
                }
                let event = Event::InitApply(obj);
                self.writer.apply_watcher_event(&event);
                if let Event::InitApply(obj) = event {
                    self.relist.get_or_insert_with(Vec::new).push(Arc::new(obj));
                }
            }
            Event::InitDone => self.finish_relist(),
        }
    }

    fn apply_object(&mut self, obj: K) {
        let Some(key) = ObjectKey::from_resource(&obj) else {
            warn!(kind = %self.kind, "skipping applied object without a name");
            return;
        };
        let old = self.store.get(&key.to_object_ref());

        let event = Event::Apply(obj);
        self.writer.apply_watcher_event(&event);
        let Event::Apply(obj) = event else { return };

        let new = Arc::new(obj);
        trace!(kind = %self.kind, %key, "applied");
        self.emit(match old {
            Some(old) => Notification::Updated { old, new },
            None => Notification::Added(new),
        });
    }

    fn delete_object(&mut self, obj: K) {
        let Some(key) = ObjectKey::from_resource(&obj) else {
            warn!(kind = %self.kind, "skipping deleted object without a name");
            return;
        };

        let event = Event::Delete(obj);
        self.writer.apply_watcher_event(&event);
        let Event::Delete(obj) = event else { return };

        trace!(kind = %self.kind, %key, "deleted");
        self.emit(Notification::Deleted(Arc::new(obj)));
    }

    /// Swaps in the listed objects and reports the difference against the
    /// previous cache: listed objects are added or updated, cached objects
    /// missing from the list are deleted.
    fn finish_relist(&mut self) {
        let mut previous: HashMap<ObjectKey, Arc<K>> = self
            .store
            .state()
            .into_iter()
            .filter_map(|obj| Some((ObjectKey::from_resource(obj.as_ref())?, obj)))
            .collect();

        self.writer.apply_watcher_event(&Event::InitDone);
        let listed = self.relist.take().unwrap_or_default();
        let listed_count = listed.len();

        for new in listed {
            let Some(key) = ObjectKey::from_resource(new.as_ref()) else {
                continue;
            };
            self.emit(match previous.remove(&key) {
                Some(old) => Notification::Updated { old, new },
                None => Notification::Added(new),
            });
        }
        let vanished = previous.len();
        for (_, old) in previous {
            self.emit(Notification::Deleted(old));
        }

        let first_sync = self.synced.send_if_modified(|synced| !std::mem::replace(synced, true));
        if first_sync {
            info!(kind = %self.kind, objects = listed_count, "cache synced");
        } else {
            info!(kind = %self.kind, objects = listed_count, vanished, "relist complete");
        }
    }

    fn emit(&self, notification: Notification<K>) {
        if self.notifications.send(notification).is_err() {
            trace!(kind = %self.kind, "notification receiver dropped");
        }
    }
}

/// Reading half of the local mirror.
pub struct Mirror<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    store: Store<K>,
    synced: watch::Receiver<bool>,
}

impl<K> Clone for Mirror<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            synced: self.synced.clone(),
        }
    }
}

impl<K> fmt::Debug for Mirror<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mirror")
            .field("objects", &self.store.state().len())
            .field("synced", &*self.synced.borrow())
            .finish()
    }
}

impl<K> Mirror<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    /// True once the initial list has been applied.
    #[must_use]
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Waits until the initial list has been applied, at most `timeout`.
    pub async fn wait_for_sync(&self, timeout: Duration) -> Result<(), InformerError> {
        let mut synced = self.synced.clone();
        let wait = async move { synced.wait_for(|synced| *synced).await.is_ok() };
        match tokio::time::timeout(timeout, wait).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(InformerError::Stopped),
            Err(_) => Err(InformerError::SyncTimeout(timeout)),
        }
    }

    /// Current cached snapshot for `key`.
    #[must_use]
    pub fn get_by_key(&self, key: &ObjectKey) -> Option<Arc<K>> {
        self.store.get(&key.to_object_ref())
    }

    /// Keys of every cached object.
    #[must_use]
    pub fn keys(&self) -> Vec<ObjectKey> {
        self.store
            .state()
            .iter()
            .filter_map(|obj| ObjectKey::from_resource(obj.as_ref()))
            .collect()
    }

    /// Number of cached objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.state().len()
    }

    /// True when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
