//! Connection statistics and info structures

use serde::Serialize;
use std::collections::HashMap;

use super::types::ConnectionHandle;

/// Connection statistics
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub unique_users: usize,
    /// Connection count per authentication mode
    pub by_mode: HashMap<String, usize>,
}

/// Summary of one live connection
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: uuid::Uuid,
    pub endpoint: String,
    pub mode: String,
    pub user_id: Option<String>,
    pub remote_addr: Option<String>,
    pub connected_at: chrono::DateTime<chrono::Utc>,
    pub last_activity: chrono::DateTime<chrono::Utc>,
}

impl From<&ConnectionHandle> for ConnectionInfo {
    fn from(handle: &ConnectionHandle) -> Self {
        Self {
            id: handle.id,
            endpoint: handle.endpoint.clone(),
            mode: handle.mode.as_str().to_string(),
            user_id: handle.user_id().map(str::to_string),
            remote_addr: handle.remote_addr.map(|a| a.to_string()),
            connected_at: handle.connected_at,
            last_activity: handle.last_activity(),
        }
    }
}
