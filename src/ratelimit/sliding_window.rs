//! Sliding-window admission control primitive

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::SystemTime;

/// One window of grant timestamps for a single key.
///
/// Timestamps (Unix milliseconds) are recorded only for granted calls;
/// expired entries are purged on every check, so a bucket never grows
/// beyond `limit` entries. A denied call records nothing.
#[derive(Debug, Default)]
pub struct SlidingWindow {
    grants: Mutex<VecDeque<i64>>,
}

/// Outcome of one admission check
#[derive(Debug, Clone, Copy)]
pub enum WindowDecision {
    Granted { remaining: u32 },
    Denied { retry_after_secs: u64 },
}

impl SlidingWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current time in milliseconds
    pub fn now_millis() -> i64 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }

    /// Check the window at `now` with the given limit and window length.
    pub fn check(&self, now: i64, limit: u32, window_ms: i64) -> WindowDecision {
        let mut grants = self.grants.lock().expect("rate limit bucket poisoned");

        let cutoff = now - window_ms;
        while grants.front().is_some_and(|&ts| ts <= cutoff) {
            grants.pop_front();
        }

        if grants.len() >= limit as usize {
            // Oldest grant decides when a slot frees up
            let retry_after_ms = grants
                .front()
                .map(|&oldest| (oldest + window_ms - now).max(0))
                .unwrap_or(0);
            return WindowDecision::Denied {
                retry_after_secs: (retry_after_ms as u64).div_ceil(1000).max(1),
            };
        }

        grants.push_back(now);
        WindowDecision::Granted {
            remaining: limit - grants.len() as u32,
        }
    }

    /// Timestamp of the newest grant, for TTL collection of idle buckets.
    pub fn last_grant(&self) -> Option<i64> {
        self.grants
            .lock()
            .expect("rate limit bucket poisoned")
            .back()
            .copied()
    }

    pub fn is_empty(&self) -> bool {
        self.grants
            .lock()
            .expect("rate limit bucket poisoned")
            .is_empty()
    }
}
