//! `nh-hub` wires every NotifyHub crate together into the `Hub` façade
//! (spec.md §4.10): the one type an embedding application constructs,
//! starts, sends through, and stops.

mod error;
mod hub;
mod options;
mod platforms;
mod scheduler;

pub use error::HubError;
pub use hub::Hub;
pub use nh_dispatch::{DispatchMetricsSnapshot, HealthReport, HealthStatus};
pub use options::{async_options, scheduled_options, sync_options, with_max_retries};
pub use scheduler::Scheduler;
