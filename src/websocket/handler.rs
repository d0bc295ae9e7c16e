use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::connection_manager::ConnectionHandle;
use crate::metrics::{ConnectionMetrics, RateLimitMetrics};
use crate::server::AppState;

use super::message::{ClientMessage, OutboundMessage, ServerMessage};

const CHANNEL_BUFFER_SIZE: usize = 32;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Optional inline credential; authenticates immediately on connect
    pub token: Option<String>,
}

/// WebSocket upgrade handler
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query),
    fields(remote_addr = %addr, has_inline_token = query.token.is_some())
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<WsQuery>,
) -> Response {
    // Connection attempts are the coarsest rate limit scope, per IP
    let decision = state.rate_limiter.check_connect(addr.ip());
    if !decision.is_allowed() {
        RateLimitMetrics::record_denied("connect");
        tracing::warn!(remote_addr = %addr, "Connection attempt rate limited");
        return (StatusCode::TOO_MANY_REQUESTS, "Too many connection attempts").into_response();
    }
    RateLimitMetrics::record_allowed("connect");

    ws.on_upgrade(move |socket| handle_socket(socket, state, addr, query.token))
}

/// Handle an established WebSocket connection
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state, inline_token),
    fields(remote_addr = %addr)
)]
async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    addr: SocketAddr,
    inline_token: Option<String>,
) {
    let connection_start = std::time::Instant::now();

    // Create channel for sending messages to this connection
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(CHANNEL_BUFFER_SIZE);

    let handle = state.connections.register(addr, tx);
    let connection_id = handle.id;

    ConnectionMetrics::record_opened();

    let _ = handle.send(ServerMessage::connected()).await;

    // Inline credentials drive the same authenticate path as the event
    if let Some(token) = inline_token {
        state
            .router
            .dispatch(&handle, ClientMessage::Authenticate { token })
            .await;
    }

    tracing::info!(
        connection_id = %connection_id,
        remote_addr = %addr,
        "WebSocket connection established"
    );

    // Split socket into sender and receiver
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task for sending messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            // Pre-serialized messages avoid the serialization cost here
            let text = match msg.to_json() {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize message");
                    continue;
                }
            };

            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Task for receiving messages from WebSocket
    let state_clone = state.clone();
    let handle_clone = handle.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if !process_message(msg, &state_clone, &handle_clone).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
        }
        _ = recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
        }
    }

    // Remove the connection and cascade room departures
    state.router.disconnect(connection_id).await;

    let duration = connection_start.elapsed().as_secs_f64();
    ConnectionMetrics::record_closed(duration);

    tracing::info!(
        connection_id = %connection_id,
        duration_secs = duration,
        "WebSocket connection closed"
    );
}

/// Process a received WebSocket message
/// Returns false if the connection should be closed
async fn process_message(
    msg: Message,
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
) -> bool {
    match msg {
        Message::Text(text) => {
            handle.touch();

            // Oversize frames are rejected wholesale, never partially relayed
            let max_bytes = state.settings.websocket.max_payload_bytes;
            if text.len() > max_bytes {
                tracing::warn!(
                    connection_id = %handle.id,
                    size = text.len(),
                    max = max_bytes,
                    "Oversize frame rejected"
                );
                let _ = handle
                    .send(ServerMessage::error(
                        "INVALID_PAYLOAD",
                        format!("Frame exceeds {} bytes", max_bytes),
                    ))
                    .await;
                return true;
            }

            let client_msg: ClientMessage = match serde_json::from_str(&text) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse client message");
                    let _ = handle
                        .send(ServerMessage::error("INVALID_PAYLOAD", e.to_string()))
                        .await;
                    return true;
                }
            };

            state.router.dispatch(handle, client_msg).await;
            true
        }
        Message::Binary(_) => {
            // Binary messages not supported
            let _ = handle
                .send(ServerMessage::error(
                    "INVALID_PAYLOAD",
                    "Binary messages are not supported",
                ))
                .await;
            true
        }
        Message::Ping(_) => {
            handle.touch();
            // Axum answers transport pings itself, we only refresh liveness
            true
        }
        Message::Pong(_) => {
            handle.touch();
            true
        }
        Message::Close(_) => {
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            false
        }
    }
}
