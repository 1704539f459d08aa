use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::info;

use super::invoke_routes::make_invoke_routes;
use super::{log_requests, metrics, state::*, ServerConfig};
use crate::mcp::handler::mcp_handler;

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub version: String,
    pub healthy: bool,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    Json(ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        version: state.version.clone(),
        healthy: state.service.is_ready(),
    })
}

async fn health(State(service): State<GuardedMcpService>) -> impl IntoResponse {
    let healthy = service.is_ready();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(serde_json::json!({ "healthy": healthy })))
}

pub fn make_app(state: ServerState) -> Router {
    let mcp_routes: Router = Router::new()
        .route("/mcp", post(mcp_handler))
        .with_state(state.clone());

    let mut app: Router = Router::new()
        .route("/", get(home))
        .route("/health", get(health))
        .with_state(state.clone())
        .nest("/v1", make_invoke_routes(state.clone()).merge(mcp_routes));

    if state.config.metrics_enabled {
        app = app.route("/metrics", get(metrics::metrics_handler));
    }

    app.layer(middleware::from_fn_with_state(state, log_requests))
}

/// Serve until `shutdown` resolves. Binds `127.0.0.1:<port>`; port 0 picks a
/// free one, reported through `on_bound`.
pub async fn run_server<F>(
    config: ServerConfig,
    service: GuardedMcpService,
    version: String,
    on_bound: impl FnOnce(SocketAddr),
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if config.metrics_enabled {
        metrics::init_metrics();
    }

    let port = config.port;
    let state = ServerState {
        config,
        start_time: Instant::now(),
        service,
        version,
    };
    let app = make_app(state);

    let listener = TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    let addr = listener.local_addr()?;
    info!("Listening on {}", addr);
    on_bound(addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")
}
