//! Status HTTP server
//!
//! Read-only operational endpoint: `GET /status` returns the janitor's
//! [`StatusSnapshot`] as JSON.

use axum::{extract::State, routing::get, Json, Router};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::janitor::HeartbeatJanitor;
use crate::metrics::StatusSnapshot;

/// Errors that can occur when running the status server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to address {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Status server failed: {0}")]
    Serve(#[source] std::io::Error),
}

/// Handler for GET /status
async fn get_status(State(janitor): State<Arc<HeartbeatJanitor>>) -> Json<StatusSnapshot> {
    Json(janitor.snapshot())
}

/// Creates the axum Router with the status endpoint
pub fn create_status_router(janitor: Arc<HeartbeatJanitor>) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .with_state(janitor)
}

/// Serve the status endpoint on `bind` until `shutdown` resolves
pub async fn run_status_server<F>(
    janitor: Arc<HeartbeatJanitor>,
    bind: &str,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|source| ServerError::Bind {
            addr: bind.to_string(),
            source,
        })?;
    info!(addr = %bind, "Status server listening");

    axum::serve(listener, create_status_router(janitor))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(ServerError::Serve)
}
