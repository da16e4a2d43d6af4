//! Controller-specific error types.
//!
//! This module defines error types specific to the Pod Cleaner Controller
//! that are not covered by upstream library errors.

use informer::InformerError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the Pod Cleaner Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error (client construction, authentication)
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Policy file could not be read
    #[error("Failed to read policy config {path}: {source}")]
    ConfigRead {
        /// Path that was read
        path: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Policy file is not valid YAML for the policy model
    #[error("Failed to parse policy config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Local cache never completed its initial list
    #[error("Cache sync failed: {0}")]
    CacheSync(#[from] InformerError),

    /// Reconciliation failed
    #[error("Reconciliation failed: {0}")]
    Reconciliation(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Metric registration or encoding failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Probe/metrics HTTP server failed
    #[error("Probe server error: {0}")]
    Server(#[source] std::io::Error),
}
