use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::metrics::ConnectionMetrics;

use super::stats::{ConnectionInfo, ConnectionStats};
use super::types::ConnectionHandle;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    Duplicate(Uuid),

    #[error("connection {0} was terminated before registration")]
    Terminated(Uuid),
}

/// Live connections accepted by one controller.
///
/// A handle is present from a successful handoff until its connection closes,
/// whichever side closes it.
pub struct ConnectionRegistry {
    /// connection_id -> ConnectionHandle
    connections: DashMap<Uuid, Arc<ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Track `handle` until the returned guard is dropped.
    ///
    /// The guard is the close observer: the connection task holds it and
    /// dropping it removes the entry.
    pub fn register(
        self: &Arc<Self>,
        handle: Arc<ConnectionHandle>,
    ) -> Result<RegistrationGuard, RegistryError> {
        let conn_id = handle.id;
        if handle.is_terminated() {
            return Err(RegistryError::Terminated(conn_id));
        }

        match self.connections.entry(conn_id) {
            Entry::Occupied(_) => return Err(RegistryError::Duplicate(conn_id)),
            Entry::Vacant(slot) => {
                slot.insert(handle.clone());
            }
        }
        ConnectionMetrics::record_registered();

        tracing::info!(
            connection_id = %conn_id,
            endpoint = %handle.endpoint,
            user_id = handle.user_id().unwrap_or("-"),
            "Connection registered"
        );

        Ok(RegistrationGuard {
            registry: Arc::clone(self),
            id: conn_id,
        })
    }

    /// Remove a connection. Unknown or already removed ids are ignored.
    pub fn unregister(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        let (_, handle) = self.connections.remove(&connection_id)?;
        ConnectionMetrics::record_unregistered();
        tracing::info!(connection_id = %connection_id, "Connection unregistered");
        Some(handle)
    }

    /// Force-close a single connection. Returns false if it is unknown or was
    /// already terminated.
    pub fn terminate(&self, connection_id: Uuid) -> bool {
        let Some(handle) = self.unregister(connection_id) else {
            return false;
        };
        let flipped = handle.terminate();
        if flipped {
            ConnectionMetrics::record_terminated();
        }
        flipped
    }

    /// Force-close every connection registered at the time of the call.
    ///
    /// Works on a snapshot: connections registered while this runs are left
    /// alone, and each snapshotted one is terminated exactly once. Returns the
    /// number of connections terminated by this call.
    pub fn terminate_all(&self) -> usize {
        let snapshot = self.get_all_connections();
        let mut terminated = 0;

        for handle in snapshot {
            let flipped = handle.terminate();
            let removed = self
                .connections
                .remove_if(&handle.id, |_, current| Arc::ptr_eq(current, &handle))
                .is_some();
            if removed {
                ConnectionMetrics::record_unregistered();
            }
            if flipped {
                terminated += 1;
                ConnectionMetrics::record_terminated();
                tracing::debug!(connection_id = %handle.id, "Connection terminated");
            }
        }

        if terminated > 0 {
            tracing::info!(terminated, "Terminated connections");
        }
        terminated
    }

    /// Get connection by ID
    pub fn get_connection(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&connection_id).map(|h| h.clone())
    }

    /// Get all connections
    pub fn get_all_connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    pub fn contains(&self, connection_id: Uuid) -> bool {
        self.connections.contains_key(&connection_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Get statistics
    pub fn stats(&self) -> ConnectionStats {
        let mut users = HashSet::new();
        let mut by_mode: HashMap<String, usize> = HashMap::new();

        for entry in self.connections.iter() {
            let handle = entry.value();
            if let Some(user) = handle.user_id() {
                users.insert(user.to_string());
            }
            *by_mode.entry(handle.mode.as_str().to_string()).or_default() += 1;
        }

        ConnectionStats {
            total_connections: self.connections.len(),
            unique_users: users.len(),
            by_mode,
        }
    }

    pub fn list(&self) -> Vec<ConnectionInfo> {
        self.connections
            .iter()
            .map(|entry| ConnectionInfo::from(entry.value().as_ref()))
            .collect()
    }

    /// Find connections that have been inactive for longer than the timeout
    pub fn find_stale_connections(&self, timeout_secs: u64) -> Vec<Arc<ConnectionHandle>> {
        let now = Utc::now();
        let timeout = chrono::Duration::seconds(timeout_secs as i64);

        self.connections
            .iter()
            .filter(|entry| now.signed_duration_since(entry.value().last_activity()) > timeout)
            .map(|entry| entry.value().clone())
            .collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a connection registered; removes it when dropped.
#[must_use = "dropping the guard unregisters the connection"]
pub struct RegistrationGuard {
    registry: Arc<ConnectionRegistry>,
    id: Uuid,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}
