//! Connection administration endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::connection_manager::ConnectionInfo;
use crate::error::{GatewayError, Result};
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct ConnectionListResponse {
    pub connections: Vec<ConnectionInfo>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct TerminateResponse {
    pub terminated: usize,
}

/// GET /admin/connections - Every registered connection
pub async fn list_connections(State(state): State<AppState>) -> Json<ConnectionListResponse> {
    let connections = state.controller.registry().list();
    let total = connections.len();

    Json(ConnectionListResponse { connections, total })
}

/// POST /admin/connections/terminate - Force-close every connection
pub async fn terminate_connections(State(state): State<AppState>) -> Json<TerminateResponse> {
    let terminated = state.controller.terminate();
    tracing::info!(terminated, "Connections terminated via admin API");

    Json(TerminateResponse { terminated })
}

/// GET /admin/connections/{id} - One registered connection
pub async fn get_connection(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ConnectionInfo>> {
    let handle = state
        .controller
        .registry()
        .get_connection(id)
        .ok_or(GatewayError::ConnectionNotFound(id))?;

    Ok(Json(ConnectionInfo::from(handle.as_ref())))
}

/// DELETE /admin/connections/{id} - Force-close one connection
pub async fn terminate_connection(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TerminateResponse>> {
    if !state.controller.registry().terminate(id) {
        return Err(GatewayError::ConnectionNotFound(id));
    }
    tracing::info!(connection_id = %id, "Connection terminated via admin API");

    Ok(Json(TerminateResponse { terminated: 1 }))
}
