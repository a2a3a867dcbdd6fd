//! Aggregate health reporting (spec.md §4.10 `Hub::getHealth`). Grounded on
//! the teacher's `health::HealthService`: a rolling success-rate window
//! decides overall status, folded together with queue health, per-platform
//! health, and any unacknowledged critical warnings
//! (SPEC_FULL.md §4 "Warning/health service").

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::warning::{WarningSeverity, WarningService};
use nh_queue::QueueHealth;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub queue_healthy: bool,
    pub per_platform: HashMap<String, Result<(), String>>,
    pub success_rate: f64,
    pub uptime: Duration,
    pub queue_size: u64,
}

#[derive(Debug, Clone)]
pub struct HealthServiceConfig {
    pub healthy_threshold: f64,
    pub degraded_threshold: f64,
    pub rolling_window: Duration,
}

impl Default for HealthServiceConfig {
    fn default() -> Self {
        Self {
            healthy_threshold: 0.90,
            degraded_threshold: 0.70,
            rolling_window: Duration::from_secs(30 * 60),
        }
    }
}

struct RollingCounter {
    window: Duration,
    events: RwLock<Vec<(Instant, bool)>>,
}

impl RollingCounter {
    fn new(window: Duration) -> Self {
        Self {
            window,
            events: RwLock::new(Vec::new()),
        }
    }

    fn record(&self, success: bool) {
        let now = Instant::now();
        let mut events = self.events.write();
        events.push((now, success));
        let window = self.window;
        events.retain(|(t, _)| now.duration_since(*t) <= window);
    }

    fn success_rate(&self) -> f64 {
        let now = Instant::now();
        let window = self.window;
        let events = self.events.read();
        let recent: Vec<_> = events.iter().filter(|(t, _)| now.duration_since(*t) <= window).collect();
        if recent.is_empty() {
            return 1.0;
        }
        let successes = recent.iter().filter(|(_, s)| *s).count();
        successes as f64 / recent.len() as f64
    }
}

/// Owned by `Hub`; fed by `WorkerPool` on every terminal `DeliveryResult`.
pub struct HealthService {
    config: HealthServiceConfig,
    counter: RollingCounter,
    started_at: Instant,
    warnings: std::sync::Arc<WarningService>,
}

impl HealthService {
    pub fn new(config: HealthServiceConfig, warnings: std::sync::Arc<WarningService>) -> Self {
        Self {
            counter: RollingCounter::new(config.rolling_window),
            config,
            started_at: Instant::now(),
            warnings,
        }
    }

    pub fn record_outcome(&self, success: bool) {
        self.counter.record(success);
    }

    pub fn report(
        &self,
        queue_health: QueueHealth,
        queue_size: u64,
        per_platform: HashMap<String, Result<(), String>>,
    ) -> HealthReport {
        let success_rate = self.counter.success_rate();
        let has_critical_warning = self.warnings.count_by_severity(WarningSeverity::Critical) > 0;
        let any_platform_unhealthy = per_platform.values().any(|r| r.is_err());

        let status = if !queue_health.healthy || has_critical_warning {
            HealthStatus::Unhealthy
        } else if success_rate < self.config.degraded_threshold {
            HealthStatus::Unhealthy
        } else if success_rate < self.config.healthy_threshold || any_platform_unhealthy {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthReport {
            status,
            queue_healthy: queue_health.healthy,
            per_platform,
            success_rate,
            uptime: self.started_at.elapsed(),
            queue_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_with_no_events_and_clean_queue() {
        let service = HealthService::new(HealthServiceConfig::default(), std::sync::Arc::new(WarningService::default()));
        let report = service.report(QueueHealth::healthy(), 0, HashMap::new());
        assert_eq!(report.status, HealthStatus::Healthy);
    }

    #[test]
    fn degrades_below_healthy_threshold() {
        let service = HealthService::new(HealthServiceConfig::default(), std::sync::Arc::new(WarningService::default()));
        for _ in 0..8 {
            service.record_outcome(true);
        }
        for _ in 0..2 {
            service.record_outcome(false);
        }
        let report = service.report(QueueHealth::healthy(), 0, HashMap::new());
        assert_eq!(report.status, HealthStatus::Degraded);
    }

    #[test]
    fn unhealthy_when_queue_is_unhealthy() {
        let service = HealthService::new(HealthServiceConfig::default(), std::sync::Arc::new(WarningService::default()));
        let report = service.report(QueueHealth::unhealthy("closed"), 0, HashMap::new());
        assert_eq!(report.status, HealthStatus::Unhealthy);
    }
}
