//! NotifyHub dispatch pipeline: routing, retrying, rate-limited/
//! circuit-broken sending, async handles, and the warning/health/metrics
//! services that observe it. `nh-hub` composes these into the public
//! `Hub` façade; nothing here is reachable directly by an end user.

pub mod handle;
pub mod health;
pub mod lifecycle;
pub mod metrics;
pub mod pool;
pub mod retry;
pub mod router;
pub mod warning;

pub use handle::{Handle, HandleRegistry, HandleRegistryConfig};
pub use health::{HealthReport, HealthService, HealthServiceConfig, HealthStatus};
pub use lifecycle::{LifecycleConfig, LifecycleManager};
pub use metrics::{DispatchMetrics, DispatchMetricsSnapshot, PlatformMetrics};
pub use pool::{PoolState, WorkerPool, WorkerPoolConfig};
pub use retry::{Backoff, Jitter, RetryPolicy};
pub use router::{RouteOutcome, RoutedTarget, Router};
pub use warning::{Warning, WarningCategory, WarningService, WarningServiceConfig, WarningSeverity};
