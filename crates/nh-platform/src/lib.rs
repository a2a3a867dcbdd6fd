//! The Sender contract (spec.md §4.5/§6) and the registry that maps a
//! platform name to a constructed adapter. Adapters are pluggable senders
//! with a narrow interface; their wire formats are a collaborator concern,
//! not specified here (spec.md §1) — this crate ships reference adapters
//! (webhook, email, sms, mock) that demonstrate the contract without
//! pretending to be the platform's real API.

pub mod circuit_breaker;
pub mod email;
pub mod feishu;
pub mod mock;
pub mod sms;
pub mod webhook;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use nh_common::{DeliveryResult, Message, NotifyError, Target, TargetType};

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use email::EmailSender;
pub use feishu::FeishuSender;
pub use mock::MockSender;
pub use sms::SmsSender;
pub use webhook::WebhookSender;

/// What a Sender supports, queried by the Router and the HTTP surface
/// (spec.md §4.5).
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub supported_target_types: Vec<TargetType>,
    pub supported_formats: Vec<nh_common::MessageFormat>,
    pub max_message_size: usize,
    pub supports_scheduling: bool,
    pub supports_attachments: bool,
    pub supports_mentions: bool,
    pub supports_rich_content: bool,
    /// Suggested default rate limit for this platform; `PlatformRegistry`
    /// uses it to seed `nh_ratelimit::PlatformRateLimiters` when the
    /// operator hasn't configured an override.
    pub default_rate_limit: Option<nh_ratelimit::RateLimiterConfig>,
    /// Settings keys that must be present in `PlatformConfig::settings`
    /// (or resolvable through the secrets provider) for this adapter to be
    /// constructible. An adapter missing one of these is never registered
    /// (spec.md §4.5).
    pub required_settings: Vec<&'static str>,
}

impl Capabilities {
    pub fn supports_target_type(&self, target_type: TargetType) -> bool {
        self.supported_target_types.contains(&target_type)
    }
}

/// The contract every platform adapter implements (spec.md §6). A Sender
/// must not fail the whole call for a per-target error: `send` always
/// returns one `DeliveryResult` per input target, in the same order.
#[async_trait]
pub trait Sender: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, message: &Message, targets: &[Target]) -> Vec<DeliveryResult>;

    fn validate_target(&self, target: &Target) -> Result<(), NotifyError>;

    fn capabilities(&self) -> Capabilities;

    async fn is_healthy(&self) -> Result<(), NotifyError>;

    async fn close(&self) -> Result<(), NotifyError>;
}

/// Maps platform name to constructed Sender. Populated once at Hub
/// construction and read-mostly thereafter: registration takes a write
/// lock internally (`DashMap`), lookups are lock-free per shard
/// (spec.md §5 "PlatformRegistry is read-mostly").
pub struct PlatformRegistry {
    senders: DashMap<String, Arc<dyn Sender>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self {
            senders: DashMap::new(),
        }
    }

    pub fn register(&self, sender: Arc<dyn Sender>) {
        self.senders.insert(sender.name().to_string(), sender);
    }

    pub fn get(&self, platform: &str) -> Option<Arc<dyn Sender>> {
        self.senders.get(platform).map(|e| Arc::clone(e.value()))
    }

    pub fn contains(&self, platform: &str) -> bool {
        self.senders.contains_key(platform)
    }

    pub fn platform_names(&self) -> Vec<String> {
        self.senders.iter().map(|e| e.key().clone()).collect()
    }

    /// The first registered adapter whose capabilities claim the given
    /// target type — used by the Router's final fallback for
    /// user/group/channel targets (spec.md §4.6 step 3).
    pub fn first_supporting(&self, target_type: TargetType) -> Option<String> {
        self.senders
            .iter()
            .find(|e| e.value().capabilities().supports_target_type(target_type))
            .map(|e| e.key().clone())
    }

    /// Aggregate health across every registered adapter, for `Hub::getHealth`.
    pub async fn health_report(&self) -> HashMap<String, Result<(), String>> {
        let mut out = HashMap::new();
        for entry in self.senders.iter() {
            let name = entry.key().clone();
            let result = entry.value().is_healthy().await.map_err(|e| e.to_string());
            out.insert(name, result);
        }
        out
    }

    pub async fn close_all(&self) {
        for entry in self.senders.iter() {
            let _ = entry.value().close().await;
        }
    }
}

impl Default for PlatformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockSender;

    #[tokio::test]
    async fn registry_looks_up_by_name() {
        let registry = PlatformRegistry::new();
        registry.register(Arc::new(MockSender::new("email")));
        assert!(registry.contains("email"));
        assert!(registry.get("webhook").is_none());
        assert_eq!(registry.get("email").unwrap().name(), "email");
    }

    #[tokio::test]
    async fn first_supporting_finds_chat_adapter() {
        let registry = PlatformRegistry::new();
        registry.register(Arc::new(
            MockSender::new("feishu").with_target_types(vec![TargetType::Group, TargetType::User]),
        ));
        assert_eq!(
            registry.first_supporting(TargetType::Group),
            Some("feishu".to_string())
        );
        assert_eq!(registry.first_supporting(TargetType::Sms), None);
    }
}
