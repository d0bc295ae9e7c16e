//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;
use std::collections::HashMap;

use crate::connection_manager::ConnectionStats;
use crate::perf::OperationReport;
use crate::ratelimit::RateLimiterStats;
use crate::rooms::RoomStats;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub connections: ConnectionHealthResponse,
    pub rooms: RoomHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct ConnectionHealthResponse {
    pub total: usize,
    pub authenticated: usize,
    pub unique_users: usize,
}

#[derive(Debug, Serialize)]
pub struct RoomHealthResponse {
    pub total: usize,
    pub memberships: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub connections: ConnectionStats,
    pub rooms: RoomStats,
    pub ratelimit: RateLimiterStats,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = state.start_time.elapsed().as_secs();
    let conn_stats = state.connections.stats();
    let room_stats = state.rooms.stats();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        connections: ConnectionHealthResponse {
            total: conn_stats.total_connections,
            authenticated: conn_stats.authenticated_connections,
            unique_users: conn_stats.unique_users,
        },
        rooms: RoomHealthResponse {
            total: room_stats.total_rooms,
            memberships: room_stats.total_memberships,
        },
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        connections: state.connections.stats(),
        rooms: state.rooms.stats(),
        ratelimit: state.rate_limiter.stats(),
    })
}

/// Windowed latency aggregates per operation, for the external health
/// and alerting surface.
pub async fn performance(
    State(state): State<AppState>,
) -> Json<HashMap<String, OperationReport>> {
    Json(state.monitor.snapshot())
}
