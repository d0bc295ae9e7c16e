//! Prometheus metrics for the collaboration hub.
//!
//! Covers connection lifecycle, room counts, relay delivery, rate limit
//! decisions, heartbeat rounds and per-operation latency/SLA violations.
//! The registry is process-global (lazy_static) and scraped via `/metrics`.

mod helpers;

pub use helpers::{
    encode_metrics, ConnectionMetrics, HeartbeatMetrics, PerfMetrics, RateLimitMetrics,
    RelayMetrics, WsMessageMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "muse_hub";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Total number of active WebSocket connections
    pub static ref CONNECTIONS_TOTAL: IntGauge = register_int_gauge!(
        format!("{}_connections_total", METRIC_PREFIX),
        "Total number of active WebSocket connections"
    ).unwrap();

    /// Number of unique connected users
    pub static ref USERS_CONNECTED: IntGauge = register_int_gauge!(
        format!("{}_users_connected", METRIC_PREFIX),
        "Number of unique connected users"
    ).unwrap();

    /// Number of active rooms
    pub static ref ROOMS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_rooms_active", METRIC_PREFIX),
        "Number of rooms with at least one participant"
    ).unwrap();

    /// Connections opened since start
    pub static ref WS_CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_opened_total", METRIC_PREFIX),
        "WebSocket connections opened since start"
    ).unwrap();

    /// Connections closed since start
    pub static ref WS_CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_closed_total", METRIC_PREFIX),
        "WebSocket connections closed since start"
    ).unwrap();

    /// Connection lifetime distribution
    pub static ref WS_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_ws_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection duration in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 1800.0, 7200.0]
    ).unwrap();

    /// Connections reaped by the stale sweep
    pub static ref STALE_CONNECTIONS_REAPED: IntCounter = register_int_counter!(
        format!("{}_stale_connections_reaped_total", METRIC_PREFIX),
        "Connections removed by the idle sweep"
    ).unwrap();

    // ============================================================================
    // Message Metrics
    // ============================================================================

    /// Inbound WebSocket events by type
    pub static ref WS_MESSAGES_RECEIVED: IntCounterVec = register_int_counter_vec!(
        format!("{}_ws_messages_received_total", METRIC_PREFIX),
        "Inbound WebSocket events by type",
        &["event"]
    ).unwrap();

    /// Relays fanned out by kind (message/operation/cursor)
    pub static ref RELAYS_SENT_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_relays_sent_total", METRIC_PREFIX),
        "Room relays fanned out by kind",
        &["kind"]
    ).unwrap();

    /// Per-recipient deliveries that succeeded
    pub static ref RELAY_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_relay_delivered_total", METRIC_PREFIX),
        "Successful per-recipient relay deliveries"
    ).unwrap();

    /// Per-recipient deliveries that failed
    pub static ref RELAY_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_relay_failed_total", METRIC_PREFIX),
        "Failed per-recipient relay deliveries"
    ).unwrap();

    // ============================================================================
    // Rate Limit Metrics
    // ============================================================================

    /// Allowed events by rate limit scope
    pub static ref RATELIMIT_ALLOWED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_ratelimit_allowed_total", METRIC_PREFIX),
        "Rate limiter grants by scope",
        &["scope"]
    ).unwrap();

    /// Denied events by rate limit scope
    pub static ref RATELIMIT_DENIED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_ratelimit_denied_total", METRIC_PREFIX),
        "Rate limiter denials by scope",
        &["scope"]
    ).unwrap();

    // ============================================================================
    // Performance Metrics
    // ============================================================================

    /// Hub operation latency by operation name
    pub static ref OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        format!("{}_operation_duration_seconds", METRIC_PREFIX),
        "Hub operation latency",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    ).unwrap();

    /// SLA threshold violations by operation name
    pub static ref SLA_VIOLATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_sla_violations_total", METRIC_PREFIX),
        "Operations that exceeded their latency threshold",
        &["operation"]
    ).unwrap();

    // ============================================================================
    // Heartbeat Metrics
    // ============================================================================

    /// Heartbeat round duration
    pub static ref HEARTBEAT_DURATION_MS: Histogram = register_histogram!(
        format!("{}_heartbeat_duration_ms", METRIC_PREFIX),
        "Heartbeat round duration in milliseconds",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0]
    ).unwrap();
}
