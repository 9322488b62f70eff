//! Admin control endpoint.
//!
//! - `POST /execute` runs a cycle now, queued behind one already in flight
//! - `GET /status` returns the report of the last finished cycle
//! - `GET /health` liveness probe

use crate::client::{ConfigurationClient, CycleOptions, CycleReport};
use crate::fetch::DocumentFetcher;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use globalconf_types::Outcome;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

#[derive(Debug, Error)]
pub enum AdminError {
    /// The requested cycle ran and did not succeed.
    #[error("configuration cycle failed: {}", .0.outcome)]
    CycleFailed(Box<CycleReport>),

    /// The endpoint could not be served.
    #[error("admin endpoint I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        match self {
            AdminError::CycleFailed(report) => {
                let status = match report.outcome {
                    Outcome::DownloadFailed => StatusCode::BAD_GATEWAY,
                    Outcome::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
                    _ => StatusCode::UNPROCESSABLE_ENTITY,
                };
                let body = Json(json!({
                    "error": report.error.clone().unwrap_or_else(|| report.outcome.to_string()),
                    "outcome": report.outcome,
                    "exit_code": report.exit_code(),
                    "cycle_id": report.cycle_id,
                }));
                (status, body).into_response()
            }
            AdminError::Io(e) => {
                let body = Json(json!({ "error": e.to_string() }));
                (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
            }
        }
    }
}

/// Builds the admin router for `client`.
pub fn router<F>(client: Arc<ConfigurationClient<F>>) -> Router
where
    F: DocumentFetcher + 'static,
{
    Router::new()
        .route("/execute", post(execute::<F>))
        .route("/status", get(status::<F>))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(client))
}

/// Serves `router` on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AdminError> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "admin endpoint listening");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn execute<F: DocumentFetcher + 'static>(
    Extension(client): Extension<Arc<ConfigurationClient<F>>>,
) -> Result<Json<CycleReport>, AdminError> {
    let report = client.run_cycle(&CycleOptions::daemon()).await;
    if report.outcome.is_success() {
        Ok(Json(report))
    } else {
        Err(AdminError::CycleFailed(Box::new(report)))
    }
}

async fn status<F: DocumentFetcher + 'static>(
    Extension(client): Extension<Arc<ConfigurationClient<F>>>,
) -> Json<Option<CycleReport>> {
    Json(client.last_report())
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
