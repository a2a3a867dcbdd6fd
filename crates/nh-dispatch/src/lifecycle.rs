//! Background maintenance tasks (SPEC_FULL.md §4 "Handle GC" /
//! "Warning cleanup"). Grounded on the teacher's `LifecycleManager`: a
//! handful of ticking background tasks coordinated by one shutdown
//! broadcast channel, minus the config-sync/standby tasks that don't apply
//! here (those were teacher-specific HA features, not part of this
//! dispatcher).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::handle::HandleRegistry;
use crate::warning::WarningService;

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub warning_cleanup_interval: Duration,
    pub handle_gc_interval: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            warning_cleanup_interval: Duration::from_secs(300),
            handle_gc_interval: Duration::from_secs(60),
        }
    }
}

/// Owns the background tasks' shutdown signal; dropping or calling
/// `shutdown` stops every task started by `start`.
pub struct LifecycleManager {
    shutdown_tx: broadcast::Sender<()>,
}

impl LifecycleManager {
    /// Starts the warning-cleanup and handle-GC tickers, returning a handle
    /// that stops them on `shutdown`.
    pub fn start(warnings: Arc<WarningService>, handles: Arc<HandleRegistry>, config: LifecycleConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        {
            let warnings = warnings.clone();
            let mut shutdown_rx = shutdown_tx.subscribe();
            let interval = config.warning_cleanup_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let removed = warnings.cleanup();
                            if removed > 0 {
                                debug!(removed, "cleaned up expired warnings");
                            }
                        }
                        _ = shutdown_rx.recv() => {
                            info!("warning cleanup task shutting down");
                            break;
                        }
                    }
                }
            });
        }

        {
            let handles = handles.clone();
            let mut shutdown_rx = shutdown_tx.subscribe();
            let interval = config.handle_gc_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let removed = handles.gc();
                            if removed > 0 {
                                debug!(removed, "garbage collected terminal handles");
                            }
                        }
                        _ = shutdown_rx.recv() => {
                            info!("handle gc task shutting down");
                            break;
                        }
                    }
                }
            });
        }

        Self { shutdown_tx }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::HandleRegistryConfig;
    use crate::warning::{WarningCategory, WarningServiceConfig, WarningSeverity};

    #[tokio::test]
    async fn warning_cleanup_runs_on_its_tick() {
        let warnings = Arc::new(WarningService::new(WarningServiceConfig {
            max_warning_age_hours: 0,
            max_warnings: 1000,
        }));
        warnings.record(WarningCategory::Internal, WarningSeverity::Info, "stale", "test");
        let handles = Arc::new(HandleRegistry::new(HandleRegistryConfig::default()));

        let lifecycle = LifecycleManager::start(
            Arc::clone(&warnings),
            handles,
            LifecycleConfig {
                warning_cleanup_interval: Duration::from_millis(20),
                handle_gc_interval: Duration::from_secs(3600),
            },
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        lifecycle.shutdown();
        assert_eq!(warnings.active().len(), 0);
    }
}
