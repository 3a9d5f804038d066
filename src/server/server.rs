use anyhow::{Context, Result};
use std::time::{Duration, Instant};

use axum::{extract::State, middleware, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::info;

use super::{jobs_routes, log_requests, state::ServerState, ServerConfig};
use crate::background_jobs::SchedulerHandle;

#[derive(Serialize)]
struct ServerStats {
    pub status: &'static str,
    pub uptime: String,
    pub hash: String,
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
    Json(ServerStats {
        status: "ok",
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
    })
}

pub fn make_app(config: ServerConfig, scheduler_handle: SchedulerHandle) -> Router {
    let state = ServerState {
        config,
        start_time: Instant::now(),
        scheduler_handle,
        hash: env!("GIT_HASH").to_string(),
    };

    Router::new()
        .route("/health", get(health))
        .nest("/v1/jobs", jobs_routes())
        .layer(
            ServiceBuilder::new()
                .layer(CatchPanicLayer::new())
                .layer(middleware::from_fn_with_state(state.clone(), log_requests)),
        )
        .with_state(state)
}

/// Serves the admin API until `shutdown_token` is cancelled.
pub async fn run_server(
    config: ServerConfig,
    scheduler_handle: SchedulerHandle,
    shutdown_token: CancellationToken,
) -> Result<()> {
    let port = config.port;
    let app = make_app(config, scheduler_handle);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    info!("Admin API listening on port {}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown_token.cancelled().await })
        .await
        .context("HTTP server failed")?;

    info!("Admin API stopped");
    Ok(())
}
