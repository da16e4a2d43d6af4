//! Pod watch stream.
//!
//! Builds the list-then-watch stream consumed by the informer. Transient
//! failures are retried by the watcher's default backoff; the informer only
//! ever sees the resulting events and errors.

use crate::config::Settings;
use futures::Stream;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use kube_runtime::{WatchStreamExt, watcher};
use tracing::info;

/// Pod API scoped to `namespace`, or to all namespaces when `None`.
pub fn pod_api(client: Client, namespace: Option<&str>) -> Api<Pod> {
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// List/watch options derived from the settings' selectors.
pub fn watcher_config(settings: &Settings) -> watcher::Config {
    let mut config = watcher::Config::default();
    if let Some(labels) = settings.label_selector.as_deref() {
        config = config.labels(labels);
    }
    if let Some(fields) = settings.field_selector.as_deref() {
        config = config.fields(fields);
    }
    config
}

/// Starts watching pods.
pub fn pod_events(
    api: Api<Pod>,
    config: watcher::Config,
) -> impl Stream<Item = Result<watcher::Event<Pod>, watcher::Error>> + Send + 'static {
    info!("Starting Pod watcher");
    watcher(api, config).default_backoff()
}
