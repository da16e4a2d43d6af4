//! Process termination signals.

use std::future::Future;
use tracing::{error, info};

/// Installs the SIGTERM and SIGINT handlers and returns a future resolving
/// when either arrives.
///
/// Handlers are registered before this returns, so a signal delivered while
/// the caller is still starting up is not lost. Must be called from within a
/// tokio runtime.
pub fn signal() -> impl Future<Output = ()> {
    #[cfg(unix)]
    let handlers = {
        use tokio::signal::unix::{SignalKind, signal};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => Some((sigterm, sigint)),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers, falling back to Ctrl-C: {}", e);
                None
            }
        }
    };

    async move {
        #[cfg(unix)]
        if let Some((mut sigterm, mut sigint)) = handlers {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
            return;
        }

        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C"),
            Err(e) => {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
}
