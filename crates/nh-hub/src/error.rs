//! Hub-level errors: everything that can go wrong while assembling a `Hub`
//! from configuration, before any dispatch work begins. Dispatch-time
//! failures are always per-target `DeliveryResult`s, never a `HubError`
//! (spec.md §1 "per-target failures; overall call returns partial results").

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("configuration error: {0}")]
    Config(#[from] nh_config::ConfigError),

    #[error("secrets provider error: {0}")]
    Secrets(#[from] nh_secrets::SecretsError),

    #[error("queue backend error: {0}")]
    Queue(#[from] nh_queue::QueueError),

    #[error("platform adapter error: {0}")]
    Platform(#[from] nh_common::NotifyError),

    #[error("unknown queue backend kind: {0}")]
    UnknownQueueKind(String),
}
