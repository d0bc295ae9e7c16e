use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::config::WebSocketConfig;
use crate::connection_manager::ConnectionRegistry;
use crate::metrics::HeartbeatMetrics;
use crate::ratelimit::RateLimiter;
use crate::websocket::{EventRouter, ServerMessage};

/// Timeout for individual heartbeat send operations
const HEARTBEAT_SEND_TIMEOUT_MS: u64 = 5000;

/// Maximum concurrent heartbeat sends to avoid overwhelming the system
const MAX_CONCURRENT_HEARTBEATS: usize = 1000;

/// Background task for heartbeat and connection cleanup.
///
/// Two timers: the heartbeat tick keeps transports alive and surfaces
/// dead peers, the cleanup tick reaps idle connections through the
/// router so room departures cascade, and garbage-collects idle rate
/// limit buckets.
pub struct HeartbeatTask {
    config: WebSocketConfig,
    connections: Arc<ConnectionRegistry>,
    router: Arc<EventRouter>,
    rate_limiter: Arc<RateLimiter>,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub fn new(
        config: WebSocketConfig,
        connections: Arc<ConnectionRegistry>,
        router: Arc<EventRouter>,
        rate_limiter: Arc<RateLimiter>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            connections,
            router,
            rate_limiter,
            shutdown,
        }
    }

    /// Run the heartbeat and cleanup tasks
    pub async fn run(mut self) {
        let heartbeat_interval = Duration::from_secs(self.config.heartbeat_interval);
        let cleanup_interval = Duration::from_secs(self.config.cleanup_interval);

        let mut heartbeat_timer = tokio::time::interval(heartbeat_interval);
        let mut cleanup_timer = tokio::time::interval(cleanup_interval);

        // Skip immediate first tick
        heartbeat_timer.tick().await;
        cleanup_timer.tick().await;

        tracing::info!(
            heartbeat_interval_secs = self.config.heartbeat_interval,
            cleanup_interval_secs = self.config.cleanup_interval,
            connection_timeout_secs = self.config.connection_timeout,
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = heartbeat_timer.tick() => {
                    self.send_heartbeats().await;
                }
                _ = cleanup_timer.tick() => {
                    self.cleanup().await;
                }
            }
        }

        tracing::info!("Heartbeat task stopped");
    }

    /// Send heartbeat to all connections in parallel with batching
    async fn send_heartbeats(&self) {
        let connections = self.connections.all_connections();
        let total_count = connections.len();

        if total_count == 0 {
            return;
        }

        let start = Instant::now();
        let sent = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));

        // Process in batches to avoid overwhelming the system
        for batch in connections.chunks(MAX_CONCURRENT_HEARTBEATS) {
            let futures: Vec<_> = batch
                .iter()
                .map(|handle| {
                    let sent = sent.clone();
                    let failed = failed.clone();
                    let handle = handle.clone();

                    async move {
                        let send_timeout = Duration::from_millis(HEARTBEAT_SEND_TIMEOUT_MS);
                        match timeout(send_timeout, handle.send(ServerMessage::Heartbeat)).await {
                            Ok(Ok(_)) => {
                                sent.fetch_add(1, Ordering::Relaxed);
                            }
                            _ => {
                                failed.fetch_add(1, Ordering::Relaxed);
                                tracing::debug!(
                                    connection_id = %handle.id,
                                    "Failed to send heartbeat, connection may be dead"
                                );
                            }
                        }
                    }
                })
                .collect();

            // Execute batch in parallel
            join_all(futures).await;
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        HeartbeatMetrics::record_duration_ms(elapsed_ms);

        tracing::debug!(
            total = total_count,
            sent = sent.load(Ordering::Relaxed),
            failed = failed.load(Ordering::Relaxed),
            elapsed_ms = elapsed_ms,
            "Heartbeat round completed"
        );

        // Warn if heartbeat round is taking too long
        if elapsed_ms > (self.config.heartbeat_interval * 1000 / 2) {
            tracing::warn!(
                elapsed_ms = elapsed_ms,
                heartbeat_interval_ms = self.config.heartbeat_interval * 1000,
                connections = total_count,
                "Heartbeat round took more than 50% of interval"
            );
        }
    }

    /// Reap idle connections and idle rate limit buckets
    async fn cleanup(&self) {
        let reaped = self.router.sweep_idle().await;
        if reaped > 0 {
            tracing::info!(
                reaped = reaped,
                timeout_secs = self.config.connection_timeout,
                "Cleaned up stale connections"
            );
        }

        self.rate_limiter.cleanup_stale();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::JwtVerifier;
    use crate::bus::create_fanout_bus;
    use crate::config::{JwtConfig, PerformanceConfig, RateLimitConfig};
    use crate::perf::PerformanceMonitor;
    use crate::rooms::RoomRegistry;
    use crate::websocket::OutboundMessage;
    use tokio::sync::mpsc;

    fn build_task(
        config: WebSocketConfig,
        connections: Arc<ConnectionRegistry>,
        shutdown: broadcast::Receiver<()>,
    ) -> HeartbeatTask {
        let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));
        let router = Arc::new(EventRouter::new(
            connections.clone(),
            Arc::new(RoomRegistry::new()),
            rate_limiter.clone(),
            Arc::new(JwtVerifier::new(&JwtConfig {
                secret: "heartbeat-test-secret".to_string(),
                issuer: None,
                audience: None,
            })),
            Arc::new(PerformanceMonitor::new(&PerformanceConfig::default())),
            create_fanout_bus(&Default::default()),
            config.clone(),
        ));
        HeartbeatTask::new(config, connections, router, rate_limiter, shutdown)
    }

    #[tokio::test]
    async fn test_heartbeat_task_shutdown() {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = build_task(
            WebSocketConfig::default(),
            Arc::new(ConnectionRegistry::new()),
            shutdown_rx,
        );

        let handle = tokio::spawn(async move {
            task.run().await;
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("Task should complete")
            .expect("Task should not panic");
    }

    #[tokio::test]
    async fn test_heartbeat_sends_to_connections() {
        let config = WebSocketConfig {
            heartbeat_interval: 1,
            connection_timeout: 60,
            cleanup_interval: 60,
            ..Default::default()
        };
        let connections = Arc::new(ConnectionRegistry::new());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let (tx, mut rx) = mpsc::channel::<OutboundMessage>(10);
        let _handle = connections.register("127.0.0.1:5000".parse().unwrap(), tx);

        let task = build_task(config, connections, shutdown_rx);
        let task_handle = tokio::spawn(async move {
            task.run().await;
        });

        let msg = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("Should receive heartbeat")
            .expect("Channel should not be closed");

        assert!(matches!(msg, OutboundMessage::Raw(ServerMessage::Heartbeat)));

        shutdown_tx.send(()).unwrap();
        let _ = task_handle.await;
    }
}
