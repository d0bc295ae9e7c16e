//! Connection handle and related types

use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::websocket::{OutboundMessage, ServerMessage};

/// Handle for a single WebSocket connection.
///
/// Created unauthenticated; `authenticate` stamps the user identity once
/// the token has been verified. `last_ping` is kept as an AtomicI64 (Unix
/// seconds) so keepalive touches never take a lock.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub remote_addr: SocketAddr,
    pub sender: mpsc::Sender<OutboundMessage>,
    pub connected_at: DateTime<Utc>,
    authenticated: AtomicBool,
    user_id: RwLock<Option<String>>,
    last_ping: AtomicI64,
}

impl ConnectionHandle {
    pub fn new(remote_addr: SocketAddr, sender: mpsc::Sender<OutboundMessage>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            remote_addr,
            sender,
            connected_at: now,
            authenticated: AtomicBool::new(false),
            user_id: RwLock::new(None),
            last_ping: AtomicI64::new(now.timestamp()),
        }
    }

    pub fn touch(&self) {
        self.last_ping
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_ping(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_ping.load(Ordering::Relaxed), 0)
            .unwrap_or_else(Utc::now)
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    /// The authenticated user id, if any.
    pub fn user_id(&self) -> Option<String> {
        self.user_id.read().expect("user_id lock poisoned").clone()
    }

    pub(super) fn set_identity(&self, user_id: String) {
        *self.user_id.write().expect("user_id lock poisoned") = Some(user_id);
        self.authenticated.store(true, Ordering::Release);
    }

    /// Send a ServerMessage (serialized when written to the WebSocket)
    pub async fn send(
        &self,
        message: ServerMessage,
    ) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        self.sender.send(OutboundMessage::Raw(message)).await
    }

    /// Send a pre-serialized message (for room fan-out)
    pub async fn send_preserialized(
        &self,
        message: OutboundMessage,
    ) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        self.sender.send(message).await
    }
}

/// Connection statistics for the operational endpoints
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub authenticated_connections: usize,
    pub unique_users: usize,
}
