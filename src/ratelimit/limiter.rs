//! Per-key rate limiter built on sliding windows

use std::net::IpAddr;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

use crate::config::RateLimitConfig;

use super::sliding_window::{SlidingWindow, WindowDecision};

/// Result of a rate limit check
#[derive(Debug, Clone)]
pub enum RateLimitResult {
    /// Request is allowed
    Allowed { remaining: u32, limit: u32 },
    /// Request is denied due to rate limiting
    Denied { retry_after: u64, limit: u32 },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed { .. })
    }

    pub fn retry_after(&self) -> u64 {
        match self {
            RateLimitResult::Allowed { .. } => 0,
            RateLimitResult::Denied { retry_after, .. } => *retry_after,
        }
    }
}

/// Sliding-window rate limiter keyed by composite (event-type, subject).
///
/// Limits differ in strictness per event type: connection attempts per IP
/// are the coarsest, room joins per user moderate, relayed collaboration
/// events per user the most frequent over a short window.
pub struct RateLimiter {
    buckets: DashMap<String, SlidingWindow>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            config,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check admission for `key` against `limit` events per `window`.
    pub fn allow(&self, key: &str, limit: u32, window: Duration) -> RateLimitResult {
        if !self.config.enabled {
            return RateLimitResult::Allowed {
                remaining: u32::MAX,
                limit: 0,
            };
        }

        let bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(SlidingWindow::new);

        let decision = bucket.check(
            SlidingWindow::now_millis(),
            limit,
            window.as_millis() as i64,
        );

        match decision {
            WindowDecision::Granted { remaining } => RateLimitResult::Allowed { remaining, limit },
            WindowDecision::Denied { retry_after_secs } => RateLimitResult::Denied {
                retry_after: retry_after_secs,
                limit,
            },
        }
    }

    /// Connection attempts per IP (coarsest scope)
    pub fn check_connect(&self, ip: IpAddr) -> RateLimitResult {
        self.allow(
            &format!("connect:{}", ip),
            self.config.connects_per_minute,
            Duration::from_secs(60),
        )
    }

    /// Room joins per user
    pub fn check_join(&self, user_id: &str) -> RateLimitResult {
        self.allow(
            &format!("join:{}", user_id),
            self.config.joins_per_minute,
            Duration::from_secs(60),
        )
    }

    /// Relayed events (chat/operation/cursor) per user, short window
    pub fn check_relay(&self, user_id: &str) -> RateLimitResult {
        self.allow(
            &format!("relay:{}", user_id),
            self.config.relays_per_window,
            Duration::from_secs(self.config.relay_window_seconds),
        )
    }

    /// Drop buckets whose newest grant is older than the configured TTL.
    /// Returns the number of buckets removed.
    pub fn cleanup_stale(&self) -> usize {
        let ttl_ms = (self.config.bucket_ttl_seconds * 1000) as i64;
        let now = SlidingWindow::now_millis();
        let mut removed = 0;

        self.buckets.retain(|_, bucket| {
            let stale = match bucket.last_grant() {
                Some(newest) => now - newest >= ttl_ms,
                None => true,
            };
            if stale {
                removed += 1;
            }
            !stale
        });

        if removed > 0 {
            tracing::debug!(
                removed = removed,
                buckets = self.buckets.len(),
                "Cleaned up stale rate limit buckets"
            );
        }

        removed
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            enabled: self.config.enabled,
            buckets: self.buckets.len(),
            connects_per_minute: self.config.connects_per_minute,
            joins_per_minute: self.config.joins_per_minute,
            relays_per_window: self.config.relays_per_window,
            relay_window_seconds: self.config.relay_window_seconds,
        }
    }
}

/// Statistics about the rate limiter
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub enabled: bool,
    pub buckets: usize,
    pub connects_per_minute: u32,
    pub joins_per_minute: u32,
    pub relays_per_window: u32,
    pub relay_window_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn test_config() -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            connects_per_minute: 5,
            joins_per_minute: 3,
            relays_per_window: 4,
            relay_window_seconds: 10,
            bucket_ttl_seconds: 300,
        }
    }

    #[test]
    fn test_disabled_always_allows() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: false,
            ..test_config()
        });

        for _ in 0..100 {
            assert!(limiter.check_join("alice").is_allowed());
        }
    }

    #[test]
    fn test_connect_limit_per_ip() {
        let limiter = RateLimiter::new(test_config());
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1));

        for _ in 0..5 {
            assert!(limiter.check_connect(ip).is_allowed());
        }
        let denied = limiter.check_connect(ip);
        assert!(!denied.is_allowed());
        assert!(denied.retry_after() >= 1);

        // A different IP has its own window
        let other = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2));
        assert!(limiter.check_connect(other).is_allowed());
    }

    #[test]
    fn test_event_types_do_not_share_buckets() {
        let limiter = RateLimiter::new(test_config());

        for _ in 0..3 {
            assert!(limiter.check_join("alice").is_allowed());
        }
        assert!(!limiter.check_join("alice").is_allowed());

        // Join exhaustion must not consume alice's relay budget
        assert!(limiter.check_relay("alice").is_allowed());
    }

    #[test]
    fn test_window_admits_after_elapse() {
        let limiter = RateLimiter::new(test_config());

        // 2-per-second window via the raw entry point
        for _ in 0..2 {
            assert!(limiter
                .allow("relay:alice", 2, Duration::from_millis(200))
                .is_allowed());
        }
        assert!(!limiter
            .allow("relay:alice", 2, Duration::from_millis(200))
            .is_allowed());

        std::thread::sleep(Duration::from_millis(250));
        assert!(limiter
            .allow("relay:alice", 2, Duration::from_millis(200))
            .is_allowed());
    }

    #[test]
    fn test_cleanup_stale_buckets() {
        let limiter = RateLimiter::new(RateLimitConfig {
            bucket_ttl_seconds: 0, // Immediate expiry for testing
            ..test_config()
        });

        limiter.check_join("alice");
        limiter.check_relay("bob");
        assert_eq!(limiter.stats().buckets, 2);

        let removed = limiter.cleanup_stale();
        assert_eq!(removed, 2);
        assert_eq!(limiter.stats().buckets, 0);
    }
}
