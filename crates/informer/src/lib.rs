//! Kubernetes Informer
//!
//! Keeps an eventually-consistent, in-memory mirror of a resource collection
//! by consuming an initial list followed by an incremental watch, and emits a
//! [`Notification`] for every change it applies.
//!
//! # Example
//!
//! ```no_run
//! use informer::{ObjectKey, informer};
//! use k8s_openapi::api::core::v1::Pod;
//! use kube::{Api, Client};
//! use kube_runtime::{WatchStreamExt, watcher};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::try_default().await?;
//! let pods: Api<Pod> = Api::all(client);
//!
//! let (informer, mirror, mut notifications) = informer::<Pod>();
//! let events = watcher(pods, watcher::Config::default()).default_backoff();
//! tokio::spawn(informer.run(events));
//!
//! mirror.wait_for_sync(Duration::from_secs(60)).await?;
//! while let Some(notification) = notifications.recv().await {
//!     if let Some(key) = ObjectKey::from_resource(notification.object().as_ref()) {
//!         let current = mirror.get_by_key(&key);
//!         println!("{key}: cached = {}", current.is_some());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod key;
pub mod mirror;

pub use error::InformerError;
pub use key::ObjectKey;
pub use mirror::{Informer, Mirror, Notification, NotificationKind, informer};
