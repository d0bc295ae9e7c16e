use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth::Claims;
use crate::error::HubError;
use crate::websocket::OutboundMessage;

use super::types::{ConnectionHandle, ConnectionStats};

/// Tracks the lifecycle of every WebSocket connection.
///
/// Connections start unauthenticated and are indexed by user id once
/// authenticated, so a user's other sessions can be found in O(1) and
/// the room-leave cascade can tell a user's last connection from the rest.
pub struct ConnectionRegistry {
    /// connection_id -> ConnectionHandle
    connections: DashMap<Uuid, Arc<ConnectionHandle>>,
    /// user_id -> Set<connection_id> (supports multiple devices)
    user_index: DashMap<String, HashSet<Uuid>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            user_index: DashMap::new(),
        }
    }

    /// Register a new unauthenticated connection
    pub fn register(
        &self,
        remote_addr: SocketAddr,
        sender: mpsc::Sender<OutboundMessage>,
    ) -> Arc<ConnectionHandle> {
        let handle = Arc::new(ConnectionHandle::new(remote_addr, sender));
        self.connections.insert(handle.id, handle.clone());

        tracing::info!(
            connection_id = %handle.id,
            remote_addr = %remote_addr,
            "Connection registered"
        );

        handle
    }

    /// Mark a connection as authenticated and index it under its user
    pub fn authenticate(
        &self,
        connection_id: Uuid,
        claims: &Claims,
    ) -> Result<Arc<ConnectionHandle>, HubError> {
        let handle = self
            .connections
            .get(&connection_id)
            .map(|h| h.clone())
            .ok_or_else(|| HubError::NotFound(format!("Unknown connection: {}", connection_id)))?;

        handle.set_identity(claims.sub.clone());

        self.user_index
            .entry(claims.sub.clone())
            .or_default()
            .insert(connection_id);

        tracing::info!(
            connection_id = %connection_id,
            user_id = %claims.sub,
            "Connection authenticated"
        );

        Ok(handle)
    }

    /// Refresh a connection's keepalive timestamp
    pub fn touch(&self, connection_id: Uuid) {
        if let Some(handle) = self.connections.get(&connection_id) {
            handle.touch();
        }
    }

    /// Remove a connection. The caller is responsible for cascading room
    /// departures before discarding the returned handle.
    pub fn remove(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        let (_, handle) = self.connections.remove(&connection_id)?;

        if let Some(user_id) = handle.user_id() {
            if let Some(mut user_conns) = self.user_index.get_mut(&user_id) {
                user_conns.remove(&connection_id);
                if user_conns.is_empty() {
                    drop(user_conns);
                    self.user_index.remove(&user_id);
                }
            }
        }

        tracing::info!(connection_id = %connection_id, "Connection unregistered");

        Some(handle)
    }

    /// Atomically take every connection idle longer than `max_idle`.
    /// The caller cascades room departures for each returned handle.
    pub fn sweep(&self, max_idle: Duration) -> Vec<Arc<ConnectionHandle>> {
        let now = Utc::now();
        let max_idle = chrono::Duration::from_std(max_idle).unwrap_or(chrono::Duration::MAX);

        let stale: Vec<Uuid> = self
            .connections
            .iter()
            .filter(|entry| now.signed_duration_since(entry.value().last_ping()) > max_idle)
            .map(|entry| *entry.key())
            .collect();

        stale
            .into_iter()
            .filter_map(|id| {
                tracing::info!(connection_id = %id, "Removing stale connection due to timeout");
                self.remove(id)
            })
            .collect()
    }

    pub fn get(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&connection_id).map(|h| h.clone())
    }

    /// All live connections of a user
    pub fn connections_for_user(&self, user_id: &str) -> Vec<Arc<ConnectionHandle>> {
        self.user_index
            .get(user_id)
            .map(|conn_ids| {
                conn_ids
                    .iter()
                    .filter_map(|id| self.connections.get(id).map(|h| h.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn user_connection_count(&self, user_id: &str) -> usize {
        self.user_index.get(user_id).map(|c| c.len()).unwrap_or(0)
    }

    /// All connections (for heartbeat fan-out)
    pub fn all_connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    pub fn stats(&self) -> ConnectionStats {
        let authenticated = self
            .connections
            .iter()
            .filter(|e| e.value().is_authenticated())
            .count();

        ConnectionStats {
            total_connections: self.connections.len(),
            authenticated_connections: authenticated,
            unique_users: self.user_index.len(),
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    fn test_claims(user: &str) -> Claims {
        Claims {
            sub: user.to_string(),
            exp: Utc::now().timestamp() + 3600,
            iat: Utc::now().timestamp(),
            name: None,
            extra: Default::default(),
        }
    }

    fn register_one(registry: &ConnectionRegistry) -> Arc<ConnectionHandle> {
        let (tx, _rx) = mpsc::channel(8);
        registry.register(test_addr(), tx)
    }

    #[test]
    fn test_register_starts_unauthenticated() {
        let registry = ConnectionRegistry::new();
        let handle = register_one(&registry);

        assert!(!handle.is_authenticated());
        assert!(handle.user_id().is_none());
        assert_eq!(registry.stats().total_connections, 1);
        assert_eq!(registry.stats().authenticated_connections, 0);
    }

    #[test]
    fn test_authenticate_indexes_user() {
        let registry = ConnectionRegistry::new();
        let handle = register_one(&registry);

        registry
            .authenticate(handle.id, &test_claims("alice"))
            .unwrap();

        assert!(handle.is_authenticated());
        assert_eq!(handle.user_id().as_deref(), Some("alice"));
        assert_eq!(registry.user_connection_count("alice"), 1);
    }

    #[test]
    fn test_authenticate_unknown_connection() {
        let registry = ConnectionRegistry::new();
        let result = registry.authenticate(Uuid::new_v4(), &test_claims("alice"));
        assert!(matches!(result, Err(HubError::NotFound(_))));
    }

    #[test]
    fn test_remove_clears_user_index() {
        let registry = ConnectionRegistry::new();
        let first = register_one(&registry);
        let second = register_one(&registry);
        registry.authenticate(first.id, &test_claims("alice")).unwrap();
        registry.authenticate(second.id, &test_claims("alice")).unwrap();

        registry.remove(first.id);
        assert_eq!(registry.user_connection_count("alice"), 1);

        registry.remove(second.id);
        assert_eq!(registry.user_connection_count("alice"), 0);
        assert_eq!(registry.stats().total_connections, 0);
    }

    #[test]
    fn test_sweep_removes_only_idle() {
        let registry = ConnectionRegistry::new();
        let active = register_one(&registry);
        let idle = register_one(&registry);

        std::thread::sleep(std::time::Duration::from_millis(1100));
        active.touch();

        let swept = registry.sweep(Duration::from_secs(1));
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].id, idle.id);
        assert!(registry.get(active.id).is_some());
        assert!(registry.get(idle.id).is_none());
    }
}
