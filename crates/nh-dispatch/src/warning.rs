//! In-memory, categorized, severity-leveled warning log
//! (SPEC_FULL.md §4 "Warning/health service"). Grounded on the teacher's
//! `warning::WarningService`: systemic errors from the queue or registry
//! are recorded here rather than raised, then folded into
//! `HealthService`'s aggregate report (spec.md §7 "Systemic errors...are
//! logged and surfaced to Health; they do not poison other messages").

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningCategory {
    Queue,
    RateLimit,
    Platform,
    Config,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WarningSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone)]
pub struct Warning {
    pub id: String,
    pub category: WarningCategory,
    pub severity: WarningSeverity,
    pub message: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub acknowledged: bool,
}

impl Warning {
    fn new(category: WarningCategory, severity: WarningSeverity, message: String, source: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            category,
            severity,
            message,
            source,
            created_at: Utc::now(),
            acknowledged: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WarningServiceConfig {
    pub max_warning_age_hours: i64,
    pub max_warnings: usize,
}

impl Default for WarningServiceConfig {
    fn default() -> Self {
        Self {
            max_warning_age_hours: 24,
            max_warnings: 1000,
        }
    }
}

/// In-memory warning store, one per `Hub`. Never blocks a dispatch: callers
/// record-and-continue.
pub struct WarningService {
    warnings: RwLock<HashMap<String, Warning>>,
    config: WarningServiceConfig,
}

impl WarningService {
    pub fn new(config: WarningServiceConfig) -> Self {
        Self {
            warnings: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn record(
        &self,
        category: WarningCategory,
        severity: WarningSeverity,
        message: impl Into<String>,
        source: impl Into<String>,
    ) -> String {
        let warning = Warning::new(category, severity, message.into(), source.into());
        let id = warning.id.clone();
        let mut warnings = self.warnings.write();
        if warnings.len() >= self.config.max_warnings {
            if let Some(oldest) = warnings.values().min_by_key(|w| w.created_at).map(|w| w.id.clone()) {
                warnings.remove(&oldest);
            }
        }
        info!(category = ?warning.category, severity = ?warning.severity, %source, "warning recorded");
        warnings.insert(id.clone(), warning);
        id
    }

    pub fn acknowledge(&self, id: &str) -> bool {
        if let Some(w) = self.warnings.write().get_mut(id) {
            w.acknowledged = true;
            true
        } else {
            false
        }
    }

    pub fn active(&self) -> Vec<Warning> {
        let cutoff = Utc::now() - chrono::Duration::hours(self.config.max_warning_age_hours);
        self.warnings
            .read()
            .values()
            .filter(|w| !w.acknowledged && w.created_at >= cutoff)
            .cloned()
            .collect()
    }

    pub fn cleanup(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::hours(self.config.max_warning_age_hours);
        let mut warnings = self.warnings.write();
        let before = warnings.len();
        warnings.retain(|_, w| w.created_at >= cutoff);
        before - warnings.len()
    }

    pub fn count_by_severity(&self, severity: WarningSeverity) -> usize {
        self.warnings.read().values().filter(|w| !w.acknowledged && w.severity == severity).count()
    }
}

impl Default for WarningService {
    fn default() -> Self {
        Self::new(WarningServiceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_lists_active_warnings() {
        let service = WarningService::default();
        service.record(WarningCategory::Queue, WarningSeverity::Warning, "queue slow", "nh-queue");
        assert_eq!(service.active().len(), 1);
        assert_eq!(service.count_by_severity(WarningSeverity::Warning), 1);
    }

    #[test]
    fn acknowledged_warnings_drop_from_active() {
        let service = WarningService::default();
        let id = service.record(WarningCategory::Platform, WarningSeverity::Critical, "adapter down", "webhook");
        assert!(service.acknowledge(&id));
        assert_eq!(service.active().len(), 0);
    }

    #[test]
    fn evicts_oldest_once_over_capacity() {
        let service = WarningService::new(WarningServiceConfig {
            max_warning_age_hours: 24,
            max_warnings: 2,
        });
        service.record(WarningCategory::Internal, WarningSeverity::Info, "a", "x");
        service.record(WarningCategory::Internal, WarningSeverity::Info, "b", "x");
        service.record(WarningCategory::Internal, WarningSeverity::Info, "c", "x");
        assert_eq!(service.active().len(), 2);
    }
}
