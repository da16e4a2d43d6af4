//! Metrics and health probe endpoints.
//!
//! - `/metrics`: Prometheus text format
//! - `/healthz`: liveness, always 200 while the process serves requests
//! - `/readyz`: 200 once the cache has synced and workers are running

use crate::controller::ControllerState;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Clone, Debug)]
struct ProbeState {
    metrics: Metrics,
    controller: watch::Receiver<ControllerState>,
}

/// Builds the probe router.
pub fn router(metrics: Metrics, controller: watch::Receiver<ControllerState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(ProbeState {
            metrics,
            controller,
        })
        .layer(TraceLayer::new_for_http())
}

/// Binds the probe listener. Failing to bind is a startup error.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ControllerError> {
    let listener = TcpListener::bind(addr).await.map_err(ControllerError::Server)?;
    info!("Probe server listening on {}", addr);
    Ok(listener)
}

/// Serves `router` until the task is aborted.
pub async fn serve(listener: TcpListener, router: Router) {
    if let Err(e) = axum::serve(listener, router).await {
        error!("Probe server stopped: {}", e);
    }
}

async fn metrics_handler(State(state): State<ProbeState>) -> Response {
    match state.metrics.encode() {
        Ok(body) => (
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<ProbeState>) -> (StatusCode, String) {
    let current = *state.controller.borrow();
    if current == ControllerState::Ready {
        (StatusCode::OK, "ready".to_string())
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, current.to_string())
    }
}
