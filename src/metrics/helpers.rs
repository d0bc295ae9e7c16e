//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    CONNECTIONS_TOTAL, HEARTBEAT_DURATION_MS, OPERATION_DURATION_SECONDS, RATELIMIT_ALLOWED_TOTAL,
    RATELIMIT_DENIED_TOTAL, RELAYS_SENT_TOTAL, RELAY_DELIVERED_TOTAL, RELAY_FAILED_TOTAL,
    ROOMS_ACTIVE, SLA_VIOLATIONS_TOTAL, STALE_CONNECTIONS_REAPED, USERS_CONNECTED,
    WS_CONNECTIONS_CLOSED, WS_CONNECTIONS_OPENED, WS_CONNECTION_DURATION, WS_MESSAGES_RECEIVED,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for connection lifecycle metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened() {
        WS_CONNECTIONS_OPENED.inc();
    }

    pub fn record_closed(duration_secs: f64) {
        WS_CONNECTIONS_CLOSED.inc();
        WS_CONNECTION_DURATION.observe(duration_secs);
    }

    pub fn record_reaped(count: u64) {
        STALE_CONNECTIONS_REAPED.inc_by(count);
    }

    pub fn set_gauges(connections: usize, users: usize, rooms: usize) {
        CONNECTIONS_TOTAL.set(connections as i64);
        USERS_CONNECTED.set(users as i64);
        ROOMS_ACTIVE.set(rooms as i64);
    }
}

/// Helper struct for inbound WebSocket event metrics
pub struct WsMessageMetrics;

impl WsMessageMetrics {
    pub fn record_event(event: &str) {
        WS_MESSAGES_RECEIVED.with_label_values(&[event]).inc();
    }
}

/// Helper struct for relay fan-out metrics
pub struct RelayMetrics;

impl RelayMetrics {
    pub fn record_relay(kind: &str) {
        RELAYS_SENT_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn record_delivered(count: u64) {
        RELAY_DELIVERED_TOTAL.inc_by(count);
    }

    pub fn record_failed(count: u64) {
        RELAY_FAILED_TOTAL.inc_by(count);
    }
}

/// Helper struct for recording rate limit metrics
pub struct RateLimitMetrics;

impl RateLimitMetrics {
    pub fn record_allowed(scope: &str) {
        RATELIMIT_ALLOWED_TOTAL.with_label_values(&[scope]).inc();
    }

    pub fn record_denied(scope: &str) {
        RATELIMIT_DENIED_TOTAL.with_label_values(&[scope]).inc();
    }
}

/// Helper struct for operation latency metrics
pub struct PerfMetrics;

impl PerfMetrics {
    pub fn observe_duration(operation: &str, duration: Duration) {
        OPERATION_DURATION_SECONDS
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    pub fn record_violation(operation: &str) {
        SLA_VIOLATIONS_TOTAL.with_label_values(&[operation]).inc();
    }
}

/// Helper struct for heartbeat metrics
pub struct HeartbeatMetrics;

impl HeartbeatMetrics {
    pub fn record_duration_ms(duration_ms: u64) {
        HEARTBEAT_DURATION_MS.observe(duration_ms as f64);
    }
}
