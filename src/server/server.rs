use anyhow::{Context, Result};
use axum::{
    extract::State,
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::job_routes::job_routes;
use super::metrics::metrics_handler;
use super::state::ServerState;
use super::websocket::handler::ws_handler;
use super::log_requests;

#[derive(Serialize)]
struct WorkerPoolHealth {
    running: bool,
    workers: usize,
    queue_size: usize,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime: String,
    version: String,
    ws_connections: usize,
    connected_users: usize,
    worker_pool: WorkerPoolHealth,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn health(State(state): State<ServerState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        uptime: format_uptime(state.start_time.elapsed()),
        version: format!("{}-{}", env!("CARGO_PKG_VERSION"), env!("GIT_HASH")),
        ws_connections: state.hub.total_connections(),
        connected_users: state.hub.room_count(),
        worker_pool: WorkerPoolHealth {
            running: state.worker_pool.is_running(),
            workers: state.worker_pool.worker_count(),
            queue_size: state.worker_pool.queue_size(),
        },
    })
}

pub fn make_app(state: ServerState) -> Router {
    let v1_routes = Router::new()
        .nest("/jobs", job_routes())
        .route("/ws", get(ws_handler));

    Router::new()
        .route("/health", get(health))
        .nest("/v1", v1_routes)
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .with_state(state)
}

/// Serve the application on an already bound listener until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    state: ServerState,
    shutdown: CancellationToken,
) -> Result<()> {
    let app = make_app(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("HTTP server failed")
}

pub async fn run_server(state: ServerState, shutdown: CancellationToken) -> Result<()> {
    let port = state.config.port;
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind HTTP port {}", port))?;
    info!("Ready to serve at port {}!", port);
    serve(listener, state, shutdown).await
}

/// Prometheus scrape endpoint, kept off the public port.
pub async fn run_metrics_server(port: u16, shutdown: CancellationToken) -> Result<()> {
    let app = Router::new().route("/metrics", get(metrics_handler));
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", port))?;
    info!("Metrics available at port {}!", port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("Metrics server failed")
}
