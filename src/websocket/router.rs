use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use smallvec::SmallVec;
use uuid::Uuid;

use crate::auth::JwtVerifier;
use crate::bus::{FanoutBus, RelayEnvelope};
use crate::config::WebSocketConfig;
use crate::connection_manager::{ConnectionHandle, ConnectionRegistry};
use crate::error::HubError;
use crate::metrics::{ConnectionMetrics, RateLimitMetrics, RelayMetrics, WsMessageMetrics};
use crate::perf::PerformanceMonitor;
use crate::ratelimit::{RateLimitResult, RateLimiter};
use crate::rooms::RoomRegistry;

use super::message::{ClientMessage, OutboundMessage, ServerMessage};

/// Maximum number of concurrent relay sends
const MAX_CONCURRENT_SENDS: usize = 100;

/// Fan-outs at or above this many recipients serialize the frame once
const PRESERIALIZATION_THRESHOLD: usize = 4;

/// Routes inbound protocol events to their handlers.
///
/// The connection handle is the explicit first argument everywhere; the
/// dispatch table is the exhaustive match over `ClientMessage`, with
/// authentication, membership, rate-limit and payload guards applied per
/// event before any state mutation. Every event is timed and checked
/// against its latency threshold. The router also owns the disconnect
/// cascade and the stale-connection sweep.
pub struct EventRouter {
    connections: Arc<ConnectionRegistry>,
    rooms: Arc<RoomRegistry>,
    limiter: Arc<RateLimiter>,
    verifier: Arc<JwtVerifier>,
    monitor: Arc<PerformanceMonitor>,
    bus: Arc<dyn FanoutBus>,
    config: WebSocketConfig,
}

impl EventRouter {
    pub fn new(
        connections: Arc<ConnectionRegistry>,
        rooms: Arc<RoomRegistry>,
        limiter: Arc<RateLimiter>,
        verifier: Arc<JwtVerifier>,
        monitor: Arc<PerformanceMonitor>,
        bus: Arc<dyn FanoutBus>,
        config: WebSocketConfig,
    ) -> Self {
        Self {
            connections,
            rooms,
            limiter,
            verifier,
            monitor,
            bus,
            config,
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.rooms
    }

    /// Handle one inbound event. Taxonomy errors are terminal for this
    /// event only: they are reported to the originating connection and
    /// never close it or touch other participants.
    #[tracing::instrument(
        name = "hub.event",
        skip(self, msg),
        fields(connection_id = %conn.id, event = msg.operation_name())
    )]
    pub async fn dispatch(&self, conn: &Arc<ConnectionHandle>, msg: ClientMessage) {
        conn.touch();

        let operation = msg.operation_name();
        WsMessageMetrics::record_event(operation);

        let result = self.monitor.time(operation, self.handle_event(conn, msg)).await;

        if let Err(err) = result {
            tracing::warn!(
                connection_id = %conn.id,
                code = err.code(),
                error = %err,
                "Event rejected"
            );
            let reply = match &err {
                HubError::Auth(_) => ServerMessage::AuthError {
                    message: err.client_message(),
                },
                other => ServerMessage::error(other.code(), other.client_message()),
            };
            let _ = conn.send(reply).await;
        }
    }

    async fn handle_event(
        &self,
        conn: &Arc<ConnectionHandle>,
        msg: ClientMessage,
    ) -> Result<(), HubError> {
        match msg {
            ClientMessage::Authenticate { token } => self.handle_authenticate(conn, &token).await,
            ClientMessage::Ping => self.handle_ping(conn).await,
            ClientMessage::JoinRoom { room_id } => self.handle_join_room(conn, &room_id).await,
            ClientMessage::LeaveRoom { room_id } => self.handle_leave_room(conn, &room_id).await,
            ClientMessage::BroadcastMessage { room_id, message } => {
                self.handle_broadcast_message(conn, &room_id, message).await
            }
            ClientMessage::CollaborationOperation { room_id, operation } => {
                self.handle_collaboration_operation(conn, &room_id, operation)
                    .await
            }
            ClientMessage::CursorUpdate { room_id, position } => {
                self.handle_cursor_update(conn, &room_id, position).await
            }
        }
    }

    /// Verify the token and bind the connection to its user.
    pub async fn handle_authenticate(
        &self,
        conn: &Arc<ConnectionHandle>,
        token: &str,
    ) -> Result<(), HubError> {
        let claims = self.verifier.verify(token)?;

        if let Some(existing) = conn.user_id() {
            if existing != claims.sub {
                return Err(HubError::Auth(
                    "Connection already authenticated as a different user".to_string(),
                ));
            }
            // Idempotent re-authentication
            let _ = conn
                .send(ServerMessage::Authenticated { user_id: existing })
                .await;
            return Ok(());
        }

        self.connections.authenticate(conn.id, &claims)?;
        let _ = conn
            .send(ServerMessage::Authenticated {
                user_id: claims.sub,
            })
            .await;
        Ok(())
    }

    async fn handle_ping(&self, conn: &Arc<ConnectionHandle>) -> Result<(), HubError> {
        let _ = conn
            .send(ServerMessage::Pong {
                timestamp: Utc::now().timestamp_millis(),
            })
            .await;
        Ok(())
    }

    async fn handle_join_room(
        &self,
        conn: &Arc<ConnectionHandle>,
        room_id: &str,
    ) -> Result<(), HubError> {
        let user_id = self.require_user(conn)?;
        self.validate_room_id(room_id)?;
        self.admit(self.limiter.check_join(&user_id), "join")?;

        let already_member = self.rooms.is_member(room_id, &user_id);
        let participant_count = self.rooms.join(room_id, &user_id);

        let _ = conn
            .send(ServerMessage::RoomJoined {
                room_id: room_id.to_string(),
                participant_count,
            })
            .await;

        // A re-join is acked but not re-announced
        if !already_member {
            self.fan_out(
                room_id,
                &user_id,
                ServerMessage::UserJoined {
                    user_id: user_id.clone(),
                    room_id: room_id.to_string(),
                    participant_count,
                },
                "user_joined",
            )
            .await;
        }

        tracing::info!(
            connection_id = %conn.id,
            user_id = %user_id,
            room_id = %room_id,
            participants = participant_count,
            "User joined room"
        );

        Ok(())
    }

    async fn handle_leave_room(
        &self,
        conn: &Arc<ConnectionHandle>,
        room_id: &str,
    ) -> Result<(), HubError> {
        let user_id = self.require_user(conn)?;

        let remaining = self
            .rooms
            .leave(room_id, &user_id)
            .ok_or_else(|| HubError::NotFound(format!("Not in room: {}", room_id)))?;

        let _ = conn
            .send(ServerMessage::RoomLeft {
                room_id: room_id.to_string(),
            })
            .await;

        if remaining > 0 {
            self.fan_out(
                room_id,
                &user_id,
                ServerMessage::UserLeft {
                    user_id: user_id.clone(),
                    room_id: room_id.to_string(),
                    participant_count: remaining,
                },
                "user_left",
            )
            .await;
        }

        tracing::info!(
            connection_id = %conn.id,
            user_id = %user_id,
            room_id = %room_id,
            remaining = remaining,
            "User left room"
        );

        Ok(())
    }

    async fn handle_broadcast_message(
        &self,
        conn: &Arc<ConnectionHandle>,
        room_id: &str,
        message: String,
    ) -> Result<(), HubError> {
        let user_id = self.authorize_relay(conn, room_id)?;

        if message.len() > self.config.max_payload_bytes {
            return Err(HubError::InvalidPayload(format!(
                "Message exceeds {} bytes",
                self.config.max_payload_bytes
            )));
        }

        let timestamp = Utc::now().timestamp_millis();
        self.fan_out(
            room_id,
            &user_id,
            ServerMessage::RoomMessage {
                user_id: user_id.clone(),
                room_id: room_id.to_string(),
                message: message.clone(),
                timestamp,
            },
            "broadcast_message",
        )
        .await;

        self.publish_to_bus(room_id, &user_id, "broadcast_message", timestamp, || {
            serde_json::json!({ "message": message })
        })
        .await;

        Ok(())
    }

    async fn handle_collaboration_operation(
        &self,
        conn: &Arc<ConnectionHandle>,
        room_id: &str,
        operation: serde_json::Value,
    ) -> Result<(), HubError> {
        let user_id = self.authorize_relay(conn, room_id)?;

        let operation_id = Uuid::new_v4();
        let timestamp = Utc::now().timestamp_millis();

        self.fan_out(
            room_id,
            &user_id,
            ServerMessage::CollaborationUpdate {
                user_id: user_id.clone(),
                room_id: room_id.to_string(),
                operation: operation.clone(),
                timestamp,
                operation_id,
            },
            "collaboration_operation",
        )
        .await;

        self.publish_to_bus(room_id, &user_id, "collaboration_operation", timestamp, || {
            serde_json::json!({ "operation": operation, "operation_id": operation_id })
        })
        .await;

        // The sender gets a narrow ack, never the relayed payload
        let _ = conn
            .send(ServerMessage::OperationConfirmed {
                room_id: room_id.to_string(),
                operation_id,
            })
            .await;

        Ok(())
    }

    async fn handle_cursor_update(
        &self,
        conn: &Arc<ConnectionHandle>,
        room_id: &str,
        position: serde_json::Value,
    ) -> Result<(), HubError> {
        let user_id = self.authorize_relay(conn, room_id)?;

        let timestamp = Utc::now().timestamp_millis();
        self.fan_out(
            room_id,
            &user_id,
            ServerMessage::CursorMoved {
                user_id: user_id.clone(),
                room_id: room_id.to_string(),
                position,
                timestamp,
            },
            "cursor_update",
        )
        .await;

        Ok(())
    }

    /// Remove a connection and cascade room departures when it was the
    /// user's last session.
    pub async fn disconnect(&self, connection_id: Uuid) {
        let Some(handle) = self.connections.remove(connection_id) else {
            return;
        };
        self.cascade_departure(&handle).await;
    }

    /// Reap connections idle past the configured timeout and cascade
    /// departures for each, covering clients that vanished without a
    /// clean disconnect. Returns the number of reaped connections.
    pub async fn sweep_idle(&self) -> usize {
        let max_idle = Duration::from_secs(self.config.connection_timeout);
        let swept = self.connections.sweep(max_idle);
        let count = swept.len();

        for handle in swept {
            self.cascade_departure(&handle).await;
        }

        if count > 0 {
            ConnectionMetrics::record_reaped(count as u64);
        }

        count
    }

    async fn cascade_departure(&self, handle: &Arc<ConnectionHandle>) {
        let Some(user_id) = handle.user_id() else {
            return;
        };

        // Membership is per-user: only the user's last connection leaves rooms
        if self.connections.user_connection_count(&user_id) > 0 {
            return;
        }

        for (room_id, remaining) in self.rooms.leave_all(&user_id) {
            if remaining > 0 {
                self.fan_out(
                    &room_id,
                    &user_id,
                    ServerMessage::UserLeft {
                        user_id: user_id.clone(),
                        room_id: room_id.clone(),
                        participant_count: remaining,
                    },
                    "user_left",
                )
                .await;
            }
        }
    }

    /// Shared guard chain for the relay events: authentication, current
    /// membership, then the relay rate limit. Runs before any mutation,
    /// so a denial has zero side effects.
    fn authorize_relay(
        &self,
        conn: &Arc<ConnectionHandle>,
        room_id: &str,
    ) -> Result<String, HubError> {
        let user_id = self.require_user(conn)?;

        if !self.rooms.is_member(room_id, &user_id) {
            return Err(HubError::NotAuthorized(format!(
                "Not a member of room: {}",
                room_id
            )));
        }

        self.admit(self.limiter.check_relay(&user_id), "relay")?;
        Ok(user_id)
    }

    fn require_user(&self, conn: &Arc<ConnectionHandle>) -> Result<String, HubError> {
        conn.user_id().ok_or(HubError::AuthRequired)
    }

    fn admit(&self, result: RateLimitResult, scope: &str) -> Result<(), HubError> {
        match result {
            RateLimitResult::Allowed { .. } => {
                RateLimitMetrics::record_allowed(scope);
                Ok(())
            }
            RateLimitResult::Denied { retry_after, .. } => {
                RateLimitMetrics::record_denied(scope);
                Err(HubError::RateLimited { retry_after })
            }
        }
    }

    fn validate_room_id(&self, room_id: &str) -> Result<(), HubError> {
        if room_id.is_empty() || room_id.len() > self.config.max_room_id_length {
            return Err(HubError::InvalidPayload(format!(
                "Room id must be 1..={} characters",
                self.config.max_room_id_length
            )));
        }

        // Only allow alphanumeric, dash, underscore, and dot
        if !room_id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(HubError::InvalidPayload(
                "Room id contains invalid characters".to_string(),
            ));
        }

        Ok(())
    }

    /// Deliver a message to every connection of every OTHER participant
    /// in the room. The sender never sees their own relay, on any of
    /// their sessions. Best-effort, at-most-once: a full or closed
    /// recipient queue counts as a failed delivery and nothing retries.
    async fn fan_out(
        &self,
        room_id: &str,
        sender_user_id: &str,
        message: ServerMessage,
        kind: &str,
    ) -> (usize, usize) {
        let mut recipients: SmallVec<[Arc<ConnectionHandle>; 8]> = SmallVec::new();
        for participant in self.rooms.participants_of(room_id) {
            if participant == sender_user_id {
                continue;
            }
            recipients.extend(self.connections.connections_for_user(&participant));
        }

        RelayMetrics::record_relay(kind);

        if recipients.is_empty() {
            return (0, 0);
        }

        let (delivered, failed) = self.send_to_connections(&recipients, &message).await;

        RelayMetrics::record_delivered(delivered as u64);
        RelayMetrics::record_failed(failed as u64);

        tracing::debug!(
            room_id = %room_id,
            kind = kind,
            delivered = delivered,
            failed = failed,
            "Relayed to room"
        );

        (delivered, failed)
    }

    /// Send one message to a list of connections concurrently with
    /// bounded parallelism, pre-serializing once for larger fan-outs.
    async fn send_to_connections(
        &self,
        connections: &[Arc<ConnectionHandle>],
        message: &ServerMessage,
    ) -> (usize, usize) {
        if connections.is_empty() {
            return (0, 0);
        }

        // Small fan-outs send sequentially without pre-serialization
        if connections.len() <= 3 {
            let mut delivered = 0;
            let mut failed = 0;
            for conn in connections {
                match conn.send(message.clone()).await {
                    Ok(_) => delivered += 1,
                    Err(_) => failed += 1,
                }
            }
            return (delivered, failed);
        }

        let outbound = if connections.len() >= PRESERIALIZATION_THRESHOLD {
            match OutboundMessage::preserialized(message) {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to pre-serialize relay, falling back");
                    OutboundMessage::Raw(message.clone())
                }
            }
        } else {
            OutboundMessage::Raw(message.clone())
        };

        let mut futures = FuturesUnordered::new();
        let mut delivered = 0;
        let mut failed = 0;
        let mut pending = 0;

        for conn in connections {
            let conn = conn.clone();
            let msg = outbound.clone();
            futures.push(async move { conn.send_preserialized(msg).await.is_ok() });
            pending += 1;

            while pending >= MAX_CONCURRENT_SENDS {
                match futures.next().await {
                    Some(true) => delivered += 1,
                    Some(false) => failed += 1,
                    None => break,
                }
                pending -= 1;
            }
        }

        while let Some(ok) = futures.next().await {
            if ok {
                delivered += 1;
            } else {
                failed += 1;
            }
        }

        (delivered, failed)
    }

    async fn publish_to_bus<F>(
        &self,
        room_id: &str,
        sender_user_id: &str,
        kind: &str,
        timestamp: i64,
        payload: F,
    ) where
        F: FnOnce() -> serde_json::Value,
    {
        if !self.bus.is_enabled() {
            return;
        }

        let envelope = RelayEnvelope {
            room_id: room_id.to_string(),
            sender_user_id: sender_user_id.to_string(),
            kind: kind.to_string(),
            payload: payload(),
            timestamp,
        };

        if let Err(e) = self.bus.publish(envelope).await {
            tracing::warn!(room_id = %room_id, error = %e, "Fan-out bus publish failed");
        }
    }
}
