//! # Service discovery endpoint.
//!
//! Children learn the bind address through `DISCOVERY` and query the live
//! [`ServiceRegistry`] over HTTP:
//!
//! ```text
//! GET /          → {"db.0": "localhost:5000", "web.0": "localhost:5001"}
//! GET /{target}  → 200 "localhost:5000"  (first instance whose name starts with target)
//!                → 404                    (no match)
//! ```
//!
//! Bind and serve failures are logged; they never stop the runner.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::registry::ServiceRegistry;

/// Builds the discovery router over `registry`.
pub fn router(registry: Arc<ServiceRegistry>) -> Router {
    Router::new()
        .route("/", get(list))
        .route("/{target}", get(resolve))
        .with_state(registry)
}

/// GET / - Every registered instance and its address.
async fn list(State(registry): State<Arc<ServiceRegistry>>) -> Json<BTreeMap<String, String>> {
    Json(
        registry
            .snapshot()
            .into_iter()
            .map(|(name, port)| (name, format!("localhost:{port}")))
            .collect(),
    )
}

/// GET /{target} - Address of the first instance matching `target`.
async fn resolve(
    State(registry): State<Arc<ServiceRegistry>>,
    Path(target): Path<String>,
) -> Result<String, (StatusCode, String)> {
    registry
        .lookup(&target)
        .map(|port| format!("localhost:{port}"))
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("no instance matches '{target}'")))
}

/// Serves the discovery API on `addr` until `ctx` is cancelled.
pub(crate) async fn serve(addr: String, registry: Arc<ServiceRegistry>, ctx: CancellationToken) {
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "service discovery bind failed");
            return;
        }
    };
    tracing::info!(addr = %addr, "service discovery listening");

    if let Err(e) = axum::serve(listener, router(registry))
        .with_graceful_shutdown(async move { ctx.cancelled().await })
        .await
    {
        tracing::error!(addr = %addr, error = %e, "service discovery stopped");
    }
}
