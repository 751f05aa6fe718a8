//! Health check and statistics endpoints.

use std::collections::HashMap;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub endpoint: String,
    pub auth_mode: String,
    pub connections: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_connections: usize,
    pub unique_users: usize,
    pub by_mode: HashMap<String, usize>,
    pub filters: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let controller = &state.controller;

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        endpoint: controller.endpoint().to_string(),
        auth_mode: controller.config().auth.mode.as_str().to_string(),
        connections: controller.registry().len(),
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let conn_stats = state.controller.registry().stats();

    Json(StatsResponse {
        total_connections: conn_stats.total_connections,
        unique_users: conn_stats.unique_users,
        by_mode: conn_stats.by_mode,
        filters: state.controller.filters().len(),
    })
}
