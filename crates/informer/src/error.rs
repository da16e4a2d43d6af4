//! Informer errors

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when using the informer
#[derive(Debug, Error)]
pub enum InformerError {
    /// The initial list was not applied within the allowed time
    #[error("timed out after {0:?} waiting for cache to sync")]
    SyncTimeout(Duration),

    /// The informer was dropped before the initial list completed
    #[error("informer stopped before cache synced")]
    Stopped,

    /// A string could not be parsed as an object key
    #[error("invalid object key: {0:?}")]
    InvalidKey(String),
}
