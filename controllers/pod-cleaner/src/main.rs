//! Pod Cleaner Controller
//!
//! Watches pods and reconciles every change through a deduplicating,
//! rate-limited work queue:
//! - informer: keeps a local cache of pods from a list + watch stream
//! - dispatcher: turns cache notifications into pod keys
//! - workers: re-read each key from the cache and hand it to the pod handler
//!
//! The handler only observes today; it is the hook for a cleanup policy.

mod config;
mod controller;
mod dispatcher;
mod error;
mod metrics;
mod probes;
mod reconciler;
mod shutdown;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::{PolicyConfig, Settings};
use crate::controller::{Controller, ControllerOptions};
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::PodObserver;
use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube's rustls-tls needs a process-wide crypto provider
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        debug!("rustls crypto provider already installed");
    }

    let shutdown = shutdown::signal();

    info!("Starting Pod Cleaner Controller");

    let settings = Settings::from_env()?;
    info!("Configuration:");
    info!("  Policy file: {}", settings.config_path.display());
    info!("  Namespace: {}", settings.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Label selector: {}", settings.label_selector.as_deref().unwrap_or("<none>"));
    info!("  Field selector: {}", settings.field_selector.as_deref().unwrap_or("<none>"));
    info!("  Workers: {}", settings.workers);
    info!("  Cache sync timeout: {:?}", settings.sync_timeout);
    info!("  Max retries: {}", settings.max_retries);
    info!("  Probe address: {}", settings.probe_addr);

    let policy = PolicyConfig::load(&settings.config_path)?;
    for kind in policy.resource.unsupported_enabled() {
        warn!("Resource kind '{}' is enabled but not supported yet, ignoring", kind);
    }
    if !policy.resource.pod {
        info!("Pod watching is disabled in the policy, nothing to do");
        return Ok(());
    }

    let client = Client::try_default().await?;
    let api = watcher::pod_api(client, settings.namespace.as_deref());
    let events = watcher::pod_events(api, watcher::watcher_config(&settings));

    let metrics = Metrics::new()?;
    let controller: Controller<Pod, PodObserver> = Controller::new(
        PodObserver::new(),
        ControllerOptions::from(&settings),
        metrics.clone(),
    );

    let listener = probes::bind(settings.probe_addr).await?;
    let probe_server = tokio::spawn(probes::serve(
        listener,
        probes::router(metrics, controller.state()),
    ));

    let result = controller.run(events, shutdown).await;
    probe_server.abort();
    result
}
