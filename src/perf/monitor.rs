use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::config::PerformanceConfig;
use crate::metrics::PerfMetrics;

/// One timed operation
#[derive(Debug, Clone)]
struct OperationSample {
    duration: Duration,
    success: bool,
    recorded_at: DateTime<Utc>,
}

/// Aggregate over one operation's recent samples
#[derive(Debug, Clone, Serialize)]
pub struct OperationReport {
    pub avg_ms: f64,
    pub max_ms: u64,
    pub success_rate: f64,
    pub count: usize,
    pub threshold_ms: u64,
    pub within_threshold: bool,
    pub violations: usize,
}

/// Times hub operations, keeps a bounded sample history per operation and
/// flags SLA threshold breaches.
///
/// Ring buffers are capped at `sample_capacity` per operation so memory
/// stays bounded regardless of traffic. Threshold breaches are non-fatal:
/// they log a warning and bump a counter, nothing else.
pub struct PerformanceMonitor {
    samples: DashMap<&'static str, Mutex<VecDeque<OperationSample>>>,
    thresholds: HashMap<String, Duration>,
    default_threshold: Duration,
    capacity: usize,
    snapshot_window: Duration,
}

impl PerformanceMonitor {
    pub fn new(config: &PerformanceConfig) -> Self {
        let thresholds = config
            .thresholds_ms
            .iter()
            .map(|(op, ms)| (op.clone(), Duration::from_millis(*ms)))
            .collect();

        Self {
            samples: DashMap::new(),
            thresholds,
            default_threshold: Duration::from_millis(config.default_threshold_ms),
            capacity: config.sample_capacity.max(1),
            snapshot_window: Duration::from_secs(config.snapshot_window_seconds),
        }
    }

    pub fn threshold_for(&self, operation: &str) -> Duration {
        self.thresholds
            .get(operation)
            .copied()
            .unwrap_or(self.default_threshold)
    }

    /// Record one sample into the operation's ring buffer.
    pub fn record(&self, operation: &'static str, duration: Duration, success: bool) {
        let buffer = self
            .samples
            .entry(operation)
            .or_insert_with(|| Mutex::new(VecDeque::with_capacity(16)));

        let mut samples = buffer.lock().expect("sample buffer poisoned");
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(OperationSample {
            duration,
            success,
            recorded_at: Utc::now(),
        });
        drop(samples);

        PerfMetrics::observe_duration(operation, duration);
    }

    /// Compare a duration against the operation's threshold. A breach logs
    /// a warning and bumps the violation counter; it never fails the event.
    /// Returns whether the duration was within the threshold.
    pub fn threshold_check(&self, operation: &'static str, duration: Duration) -> bool {
        let threshold = self.threshold_for(operation);
        if duration <= threshold {
            return true;
        }

        PerfMetrics::record_violation(operation);
        tracing::warn!(
            operation = operation,
            duration_ms = duration.as_millis() as u64,
            threshold_ms = threshold.as_millis() as u64,
            "Operation exceeded latency threshold"
        );
        false
    }

    /// Time a fallible async operation, recording its duration and outcome
    /// and running the threshold check.
    pub async fn time<T, E, Fut>(&self, operation: &'static str, fut: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let result = fut.await;
        let duration = started.elapsed();

        self.record(operation, duration, result.is_ok());
        self.threshold_check(operation, duration);

        result
    }

    /// Aggregate samples recorded inside the configured snapshot window.
    pub fn snapshot(&self) -> HashMap<String, OperationReport> {
        self.snapshot_within(self.snapshot_window)
    }

    /// Aggregate samples recorded inside the given trailing window.
    pub fn snapshot_within(&self, window: Duration) -> HashMap<String, OperationReport> {
        let cutoff = chrono::Duration::from_std(window)
            .ok()
            .and_then(|w| Utc::now().checked_sub_signed(w))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut report = HashMap::new();

        for entry in self.samples.iter() {
            let operation = *entry.key();
            let threshold = self.threshold_for(operation);
            let samples = entry.value().lock().expect("sample buffer poisoned");

            let recent: Vec<&OperationSample> = samples
                .iter()
                .filter(|s| s.recorded_at >= cutoff)
                .collect();
            if recent.is_empty() {
                continue;
            }

            let count = recent.len();
            let total_ms: u128 = recent.iter().map(|s| s.duration.as_millis()).sum();
            let max_ms = recent
                .iter()
                .map(|s| s.duration.as_millis() as u64)
                .max()
                .unwrap_or(0);
            let successes = recent.iter().filter(|s| s.success).count();
            let violations = recent.iter().filter(|s| s.duration > threshold).count();

            report.insert(
                operation.to_string(),
                OperationReport {
                    avg_ms: total_ms as f64 / count as f64,
                    max_ms,
                    success_rate: successes as f64 / count as f64,
                    count,
                    threshold_ms: threshold.as_millis() as u64,
                    within_threshold: violations == 0,
                    violations,
                },
            );
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> PerformanceConfig {
        PerformanceConfig {
            sample_capacity: 4,
            snapshot_window_seconds: 300,
            default_threshold_ms: 100,
            thresholds_ms: HashMap::from([("collaboration_operation".to_string(), 50)]),
        }
    }

    #[test]
    fn test_thresholds_with_fallback() {
        let monitor = PerformanceMonitor::new(&test_config());
        assert_eq!(
            monitor.threshold_for("collaboration_operation"),
            Duration::from_millis(50)
        );
        assert_eq!(monitor.threshold_for("join_room"), Duration::from_millis(100));
    }

    #[test]
    fn test_threshold_check_flags_breach() {
        let monitor = PerformanceMonitor::new(&test_config());
        assert!(monitor.threshold_check("join_room", Duration::from_millis(20)));
        assert!(!monitor.threshold_check("join_room", Duration::from_millis(150)));
    }

    #[test]
    fn test_snapshot_aggregates() {
        let monitor = PerformanceMonitor::new(&test_config());
        monitor.record("join_room", Duration::from_millis(10), true);
        monitor.record("join_room", Duration::from_millis(30), true);
        monitor.record("join_room", Duration::from_millis(200), false);

        let snapshot = monitor.snapshot();
        let report = snapshot.get("join_room").expect("join_room report");

        assert_eq!(report.count, 3);
        assert_eq!(report.avg_ms, 80.0);
        assert_eq!(report.max_ms, 200);
        assert!((report.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.violations, 1);
        assert!(!report.within_threshold);
    }

    #[test]
    fn test_ring_buffer_is_bounded() {
        let monitor = PerformanceMonitor::new(&test_config());
        for i in 0..10 {
            monitor.record("ping", Duration::from_millis(i), true);
        }

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.get("ping").unwrap().count, 4);
        // Oldest samples were evicted, so the max reflects recent ones only
        assert_eq!(snapshot.get("ping").unwrap().max_ms, 9);
    }

    #[tokio::test]
    async fn test_time_records_outcome() {
        let monitor = PerformanceMonitor::new(&test_config());

        let ok: Result<u32, ()> = monitor.time("ping", async { Ok(7) }).await;
        assert_eq!(ok, Ok(7));

        let err: Result<(), &str> = monitor.time("ping", async { Err("boom") }).await;
        assert!(err.is_err());

        let snapshot = monitor.snapshot();
        let report = snapshot.get("ping").unwrap();
        assert_eq!(report.count, 2);
        assert!((report.success_rate - 0.5).abs() < 1e-9);
    }
}
