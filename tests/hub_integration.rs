//! Cross-component integration tests
//!
//! These tests drive the event router against real registries, the real
//! JWT verifier and the real rate limiter, without any network I/O.

use std::sync::Arc;

use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use tokio::sync::mpsc;

use muse_collab_hub::auth::Claims;
use muse_collab_hub::config::{
    JwtConfig, PerformanceConfig, RateLimitConfig, ServerConfig, Settings, WebSocketConfig,
};
use muse_collab_hub::connection_manager::ConnectionHandle;
use muse_collab_hub::server::AppState;
use muse_collab_hub::websocket::{ClientMessage, OutboundMessage, ServerMessage};

const TEST_SECRET: &str = "integration-test-secret";

fn test_settings() -> Settings {
    Settings {
        server: ServerConfig::default(),
        jwt: JwtConfig {
            secret: TEST_SECRET.to_string(),
            issuer: None,
            audience: None,
        },
        websocket: WebSocketConfig::default(),
        ratelimit: RateLimitConfig::default(),
        performance: PerformanceConfig::default(),
        bus: Default::default(),
    }
}

fn make_token(user: &str) -> String {
    let claims = Claims {
        sub: user.to_string(),
        exp: chrono::Utc::now().timestamp() + 3600,
        iat: chrono::Utc::now().timestamp(),
        name: None,
        extra: Default::default(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .unwrap()
}

struct Client {
    handle: Arc<ConnectionHandle>,
    rx: mpsc::Receiver<OutboundMessage>,
}

impl Client {
    fn connect(state: &AppState) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let handle = state.connections.register("127.0.0.1:7000".parse().unwrap(), tx);
        Self { handle, rx }
    }

    async fn authenticate(&mut self, state: &AppState, user: &str) {
        state
            .router
            .dispatch(
                &self.handle,
                ClientMessage::Authenticate {
                    token: make_token(user),
                },
            )
            .await;
        let replies = self.drain();
        assert!(
            matches!(
                replies.as_slice(),
                [ServerMessage::Authenticated { user_id }] if user_id == user
            ),
            "expected authenticated ack, got {:?}",
            replies
        );
    }

    async fn send(&self, state: &AppState, msg: ClientMessage) {
        state.router.dispatch(&self.handle, msg).await;
    }

    fn drain(&mut self) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            let parsed = match msg {
                OutboundMessage::Raw(m) => m,
                OutboundMessage::Preserialized(text) => serde_json::from_str(&text).unwrap(),
            };
            out.push(parsed);
        }
        out
    }
}

#[tokio::test]
async fn test_end_to_end_collaboration_scenario() {
    let state = AppState::new(test_settings());

    // A authenticates and joins song-42 alone
    let mut a = Client::connect(&state);
    a.authenticate(&state, "user-a").await;
    a.send(
        &state,
        ClientMessage::JoinRoom {
            room_id: "song-42".to_string(),
        },
    )
    .await;
    let a_replies = a.drain();
    assert!(matches!(
        a_replies.as_slice(),
        [ServerMessage::RoomJoined { room_id, participant_count }]
            if room_id == "song-42" && *participant_count == 1
    ));

    // B authenticates and joins; both sides observe count=2
    let mut b = Client::connect(&state);
    b.authenticate(&state, "user-b").await;
    b.send(
        &state,
        ClientMessage::JoinRoom {
            room_id: "song-42".to_string(),
        },
    )
    .await;

    let b_replies = b.drain();
    assert!(matches!(
        b_replies.as_slice(),
        [ServerMessage::RoomJoined { participant_count, .. }] if *participant_count == 2
    ));
    let a_replies = a.drain();
    assert!(matches!(
        a_replies.as_slice(),
        [ServerMessage::UserJoined { user_id, participant_count, .. }]
            if user_id == "user-b" && *participant_count == 2
    ));

    // B sends an operation: A gets the update, B gets the confirmation
    b.send(
        &state,
        ClientMessage::CollaborationOperation {
            room_id: "song-42".to_string(),
            operation: json!({"op": "insert"}),
        },
    )
    .await;

    let a_replies = a.drain();
    let operation_id = match a_replies.as_slice() {
        [ServerMessage::CollaborationUpdate {
            user_id,
            room_id,
            operation,
            operation_id,
            ..
        }] => {
            assert_eq!(user_id, "user-b");
            assert_eq!(room_id, "song-42");
            assert_eq!(operation["op"], json!("insert"));
            *operation_id
        }
        other => panic!("expected collaboration_update, got {:?}", other),
    };

    let b_replies = b.drain();
    assert!(matches!(
        b_replies.as_slice(),
        [ServerMessage::OperationConfirmed { operation_id: confirmed, .. }]
            if *confirmed == operation_id
    ));

    // A disconnects: B sees the departure, the room persists with B
    state.router.disconnect(a.handle.id).await;
    let b_replies = b.drain();
    assert!(matches!(
        b_replies.as_slice(),
        [ServerMessage::UserLeft { user_id, participant_count, .. }]
            if user_id == "user-a" && *participant_count == 1
    ));
    assert_eq!(
        state.rooms.participants_of("song-42"),
        vec!["user-b".to_string()]
    );

    // B leaves: the room is deleted
    b.send(
        &state,
        ClientMessage::LeaveRoom {
            room_id: "song-42".to_string(),
        },
    )
    .await;
    let b_replies = b.drain();
    assert!(matches!(
        b_replies.as_slice(),
        [ServerMessage::RoomLeft { room_id }] if room_id == "song-42"
    ));
    assert_eq!(state.rooms.stats().total_rooms, 0);
}

#[tokio::test]
async fn test_invalid_token_yields_auth_error_without_state_change() {
    let state = AppState::new(test_settings());
    let mut client = Client::connect(&state);

    client
        .send(
            &state,
            ClientMessage::Authenticate {
                token: "not-a-jwt".to_string(),
            },
        )
        .await;

    let replies = client.drain();
    assert!(matches!(
        replies.as_slice(),
        [ServerMessage::AuthError { .. }]
    ));
    assert!(!client.handle.is_authenticated());
    assert_eq!(state.connections.stats().authenticated_connections, 0);
}

#[tokio::test]
async fn test_ping_pong_refreshes_liveness() {
    let state = AppState::new(test_settings());
    let mut client = Client::connect(&state);

    // Ping works before authentication
    client.send(&state, ClientMessage::Ping).await;
    let replies = client.drain();
    assert!(matches!(replies.as_slice(), [ServerMessage::Pong { .. }]));
}

#[tokio::test]
async fn test_relay_rate_limit_window() {
    let mut settings = test_settings();
    settings.ratelimit = RateLimitConfig {
        relays_per_window: 3,
        relay_window_seconds: 60,
        ..RateLimitConfig::default()
    };
    let state = AppState::new(settings);

    let mut a = Client::connect(&state);
    a.authenticate(&state, "user-a").await;
    let mut b = Client::connect(&state);
    b.authenticate(&state, "user-b").await;

    for client in [&a, &b] {
        client
            .send(
                &state,
                ClientMessage::JoinRoom {
                    room_id: "song-42".to_string(),
                },
            )
            .await;
    }
    a.drain();
    b.drain();

    for i in 0..3 {
        a.send(
            &state,
            ClientMessage::BroadcastMessage {
                room_id: "song-42".to_string(),
                message: format!("msg-{}", i),
            },
        )
        .await;
    }
    assert_eq!(b.drain().len(), 3);

    // Fourth message inside the window is denied and not relayed
    a.send(
        &state,
        ClientMessage::BroadcastMessage {
            room_id: "song-42".to_string(),
            message: "one too many".to_string(),
        },
    )
    .await;

    let a_replies = a.drain();
    assert!(matches!(
        a_replies.as_slice(),
        [ServerMessage::Error { code, .. }] if code == "RATE_LIMITED"
    ));
    assert!(b.drain().is_empty());
}

#[tokio::test]
async fn test_oversize_message_rejected_whole() {
    let mut settings = test_settings();
    settings.websocket.max_payload_bytes = 128;
    let state = AppState::new(settings);

    let mut a = Client::connect(&state);
    a.authenticate(&state, "user-a").await;
    let mut b = Client::connect(&state);
    b.authenticate(&state, "user-b").await;

    for client in [&a, &b] {
        client
            .send(
                &state,
                ClientMessage::JoinRoom {
                    room_id: "song-42".to_string(),
                },
            )
            .await;
    }
    a.drain();
    b.drain();

    a.send(
        &state,
        ClientMessage::BroadcastMessage {
            room_id: "song-42".to_string(),
            message: "x".repeat(256),
        },
    )
    .await;

    let a_replies = a.drain();
    assert!(matches!(
        a_replies.as_slice(),
        [ServerMessage::Error { code, .. }] if code == "INVALID_PAYLOAD"
    ));
    assert!(b.drain().is_empty());
}

#[tokio::test]
async fn test_cursor_updates_relay_to_others_only() {
    let state = AppState::new(test_settings());

    let mut a = Client::connect(&state);
    a.authenticate(&state, "user-a").await;
    let mut b = Client::connect(&state);
    b.authenticate(&state, "user-b").await;

    for client in [&a, &b] {
        client
            .send(
                &state,
                ClientMessage::JoinRoom {
                    room_id: "song-42".to_string(),
                },
            )
            .await;
    }
    a.drain();
    b.drain();

    a.send(
        &state,
        ClientMessage::CursorUpdate {
            room_id: "song-42".to_string(),
            position: json!({"bar": 12, "beat": 3}),
        },
    )
    .await;

    let b_replies = b.drain();
    assert!(matches!(
        b_replies.as_slice(),
        [ServerMessage::CursorMoved { user_id, position, .. }]
            if user_id == "user-a" && position["bar"] == json!(12)
    ));
    // Cursor relays carry no sender ack
    assert!(a.drain().is_empty());
}

#[tokio::test]
async fn test_performance_snapshot_covers_dispatched_events() {
    let state = AppState::new(test_settings());

    let mut client = Client::connect(&state);
    client.authenticate(&state, "user-a").await;
    client
        .send(
            &state,
            ClientMessage::JoinRoom {
                room_id: "song-42".to_string(),
            },
        )
        .await;
    client.send(&state, ClientMessage::Ping).await;
    client.drain();

    let snapshot = state.monitor.snapshot();
    assert!(snapshot.contains_key("authenticate"));
    assert!(snapshot.contains_key("join_room"));
    assert!(snapshot.contains_key("ping"));

    let join = &snapshot["join_room"];
    assert_eq!(join.count, 1);
    assert_eq!(join.success_rate, 1.0);
}
