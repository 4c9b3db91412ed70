use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::stats::StatsSnapshot;

/// Latest view of the detection loop, published once per cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStatus {
    pub motion_present: bool,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
}

struct AppState {
    status: watch::Receiver<PipelineStatus>,
    source: String,
    started_at: DateTime<Local>,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    source: String,
    started_at: DateTime<Local>,
    #[serde(flatten)]
    status: PipelineStatus,
}

/// GET /status
async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        source: state.source.clone(),
        started_at: state.started_at,
        status: state.status.borrow().clone(),
    })
}

/// GET /health
async fn health() -> &'static str {
    "ok"
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the status endpoint until `stop` flips.
pub async fn serve(
    bind: &str,
    status: watch::Receiver<PipelineStatus>,
    source: String,
    mut stop: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let state = Arc::new(AppState {
        status,
        source,
        started_at: Local::now(),
    });
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "status endpoint listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            // A dropped sender also ends the server.
            let _ = stop.wait_for(|stopped| *stopped).await;
        })
        .await
}
