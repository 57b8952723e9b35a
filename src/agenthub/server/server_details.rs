//! Liveness and uptime endpoints.

use crate::agenthub::server::AppState;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/alive", get(alive))
        .route("/health", get(health))
        .route("/server_info", get(server_info))
}

async fn alive() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Debug, Serialize)]
struct ServerInfo {
    /// Seconds since the server started.
    uptime: f64,
    /// Seconds since the last client activity.
    idle_time: f64,
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfo> {
    Json(ServerInfo {
        uptime: state.health.uptime().as_secs_f64(),
        idle_time: state.health.idle_time().as_secs_f64(),
    })
}
