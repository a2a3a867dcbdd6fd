//! Dispatch metrics collector (spec.md §4.10 `Hub::getMetrics`). Grounded on
//! the teacher's `metrics::PoolMetricsCollector`: per-platform atomic
//! counters plus a bounded sample buffer for duration aggregates, with the
//! same counts also pushed through the `metrics` crate's global recorder
//! so an operator-attached Prometheus exporter sees them too
//! (SPEC_FULL.md §3 "Metrics").

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

const MAX_SAMPLES_PER_PLATFORM: usize = 2000;

#[derive(Debug, Default)]
struct PlatformCounters {
    sent: AtomicU64,
    failed: AtomicU64,
    durations_ms: RwLock<Vec<u64>>,
}

impl PlatformCounters {
    fn record(&self, success: bool, duration_ms: u64) {
        if success {
            self.sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        let mut durations = self.durations_ms.write();
        if durations.len() >= MAX_SAMPLES_PER_PLATFORM {
            durations.remove(0);
        }
        durations.push(duration_ms);
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlatformMetrics {
    pub sent: u64,
    pub failed: u64,
    pub avg_duration_ms: f64,
    pub max_duration_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct DispatchMetricsSnapshot {
    pub total_sent: u64,
    pub total_failed: u64,
    pub success_rate: f64,
    pub per_platform: HashMap<String, PlatformMetrics>,
    pub avg_duration_ms: f64,
    pub max_duration_ms: u64,
}

/// Owned by `Hub`, shared with `WorkerPool` via `Arc`. `record` is called
/// once per terminal `DeliveryResult`.
pub struct DispatchMetrics {
    per_platform: DashMap<String, Arc<PlatformCounters>>,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self {
            per_platform: DashMap::new(),
        }
    }

    pub fn record(&self, platform: &str, success: bool, duration_ms: u64) {
        let counters = self
            .per_platform
            .entry(platform.to_string())
            .or_insert_with(|| Arc::new(PlatformCounters::default()))
            .clone();
        counters.record(success, duration_ms);

        metrics::counter!("notifyhub_dispatch_total", "platform" => platform.to_string(), "success" => success.to_string())
            .increment(1);
        metrics::histogram!("notifyhub_dispatch_duration_ms", "platform" => platform.to_string())
            .record(duration_ms as f64);
    }

    pub fn snapshot(&self) -> DispatchMetricsSnapshot {
        let mut total_sent = 0u64;
        let mut total_failed = 0u64;
        let mut all_durations: Vec<u64> = Vec::new();
        let mut per_platform = HashMap::new();

        for entry in self.per_platform.iter() {
            let counters = entry.value();
            let sent = counters.sent.load(Ordering::Relaxed);
            let failed = counters.failed.load(Ordering::Relaxed);
            let durations = counters.durations_ms.read().clone();

            total_sent += sent;
            total_failed += failed;
            all_durations.extend_from_slice(&durations);

            let avg = if durations.is_empty() {
                0.0
            } else {
                durations.iter().sum::<u64>() as f64 / durations.len() as f64
            };
            let max = durations.iter().copied().max().unwrap_or(0);

            per_platform.insert(
                entry.key().clone(),
                PlatformMetrics {
                    sent,
                    failed,
                    avg_duration_ms: avg,
                    max_duration_ms: max,
                },
            );
        }

        let total = total_sent + total_failed;
        let success_rate = if total == 0 { 1.0 } else { total_sent as f64 / total as f64 };
        let avg_duration_ms = if all_durations.is_empty() {
            0.0
        } else {
            all_durations.iter().sum::<u64>() as f64 / all_durations.len() as f64
        };
        let max_duration_ms = all_durations.iter().copied().max().unwrap_or(0);

        DispatchMetricsSnapshot {
            total_sent,
            total_failed,
            success_rate,
            per_platform,
            avg_duration_ms,
            max_duration_ms,
        }
    }
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_across_platforms() {
        let metrics = DispatchMetrics::new();
        metrics.record("email", true, 10);
        metrics.record("email", true, 20);
        metrics.record("webhook", false, 5);

        let snap = metrics.snapshot();
        assert_eq!(snap.total_sent, 2);
        assert_eq!(snap.total_failed, 1);
        assert!((snap.success_rate - (2.0 / 3.0)).abs() < 1e-9);
        assert_eq!(snap.per_platform["email"].sent, 2);
        assert_eq!(snap.per_platform["email"].max_duration_ms, 20);
        assert_eq!(snap.per_platform["webhook"].failed, 1);
    }

    #[test]
    fn empty_collector_reports_full_success_rate() {
        let metrics = DispatchMetrics::new();
        assert_eq!(metrics.snapshot().success_rate, 1.0);
    }
}
