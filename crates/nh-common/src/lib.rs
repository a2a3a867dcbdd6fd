//! Core data model shared by every NotifyHub crate: messages, targets,
//! dispatch results, routing rules, the queue wire format, async handles,
//! and the typed error model. Downstream crates (`nh-queue`, `nh-platform`,
//! `nh-dispatch`, `nh-hub`) depend on this crate and nothing upstream of it.

pub mod error;
pub mod idgen;
pub mod logging;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use error::{ErrorCategory, ErrorCode, NotifyError};
pub use idgen::IdGen;

pub type Result<T> = std::result::Result<T, NotifyError>;

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_BODY_LEN: usize = 5000;
pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 5;
pub const DEFAULT_PRIORITY: u8 = 3;
pub const MAX_TARGETS: usize = 100;
pub const MAX_TARGET_VALUE_LEN: usize = 255;

/// Message body rendering hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    Text,
    Markdown,
    Html,
    Card,
}

impl Default for MessageFormat {
    fn default() -> Self {
        MessageFormat::Text
    }
}

/// Opaque platform-specific payload carried alongside a `format: card` message.
///
/// The union has one arm per shape we actually ship an adapter for, plus a
/// pass-through arm so a caller can hand a sender-specific payload straight
/// through without this crate understanding it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CardData {
    Opaque { bytes: serde_json::Value },
}

/// The unit of work handed to the dispatcher (spec.md §3 Message).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub format: MessageFormat,
    #[serde(default = "default_priority")]
    pub priority: u8,
    pub targets: Vec<Target>,
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub template: Option<String>,
    /// Milliseconds. Message is not eligible for dispatch until `createdAt + delay`.
    #[serde(default)]
    pub delay_ms: Option<i64>,
    #[serde(default)]
    pub card_data: Option<CardData>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

impl Message {
    /// Builds a new message with a freshly generated id and `createdAt == updatedAt == now`.
    pub fn new(title: impl Into<String>, body: impl Into<String>, targets: Vec<Target>) -> Self {
        let now = Utc::now();
        Self {
            id: IdGen::global().next_id(),
            title: title.into(),
            body: body.into(),
            format: MessageFormat::Text,
            priority: DEFAULT_PRIORITY,
            targets,
            variables: HashMap::new(),
            metadata: HashMap::new(),
            template: None,
            delay_ms: None,
            card_data: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The timestamp at or after which this message is eligible for dispatch,
    /// given an optional `scheduledAt` override supplied via `SendOptions`.
    ///
    /// `scheduledAt` wins when present; otherwise `delay` is additive to
    /// `createdAt`; with neither, the message is eligible immediately.
    pub fn eligible_at(&self, scheduled_at: Option<DateTime<Utc>>) -> DateTime<Utc> {
        if let Some(at) = scheduled_at {
            return at;
        }
        match self.delay_ms {
            Some(ms) => self.created_at + chrono::Duration::milliseconds(ms),
            None => self.created_at,
        }
    }

    /// Validates every invariant in spec.md §3. Does not mutate `self`.
    pub fn validate(&self) -> Result<()> {
        if self.title.is_empty() && self.body.is_empty() {
            return Err(NotifyError::validation(
                "title and body must not both be empty",
            ));
        }
        if self.title.chars().count() > MAX_TITLE_LEN {
            return Err(NotifyError::validation(format!(
                "title exceeds {MAX_TITLE_LEN} characters"
            )));
        }
        if self.body.chars().count() > MAX_BODY_LEN {
            return Err(NotifyError::validation(format!(
                "body exceeds {MAX_BODY_LEN} characters"
            )));
        }
        if self.title.contains('\0') || self.body.contains('\0') {
            return Err(NotifyError::validation("title/body must not contain NUL"));
        }
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&self.priority) {
            return Err(NotifyError::validation(format!(
                "priority must be in [{MIN_PRIORITY},{MAX_PRIORITY}]"
            )));
        }
        if self.targets.is_empty() || self.targets.len() > MAX_TARGETS {
            return Err(NotifyError::validation(format!(
                "targets length must be in [1,{MAX_TARGETS}]"
            )));
        }
        for target in &self.targets {
            target.validate()?;
        }
        Ok(())
    }
}

/// Where a target type routes by default when no rule claims it (spec.md §4.6 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Email,
    User,
    Group,
    Channel,
    Sms,
    Webhook,
    Phone,
}

impl TargetType {
    /// The platform name implied by this target type, used as the Router's
    /// final fallback when no routing rule resolved a platform.
    pub fn default_platform(self) -> Option<&'static str> {
        match self {
            TargetType::Email => Some("email"),
            TargetType::Webhook => Some("webhook"),
            TargetType::Phone | TargetType::Sms => Some("sms"),
            // user/group/channel fall back to "first registered chat adapter
            // supporting that type" -- resolved by the registry, not statically.
            TargetType::User | TargetType::Group | TargetType::Channel => None,
        }
    }
}

/// A deliverable address (spec.md §3 Target).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    #[serde(rename = "type")]
    pub target_type: TargetType,
    pub value: String,
    /// Empty means "resolved by Router".
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Target {
    pub fn new(target_type: TargetType, value: impl Into<String>) -> Self {
        Self {
            target_type,
            value: value.into(),
            platform: String::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.value.is_empty() {
            return Err(NotifyError::invalid_target("target value must not be empty"));
        }
        if self.value.len() > MAX_TARGET_VALUE_LEN {
            return Err(NotifyError::invalid_target(format!(
                "target value exceeds {MAX_TARGET_VALUE_LEN} bytes"
            )));
        }
        match self.target_type {
            TargetType::Email => {
                if !looks_like_email(&self.value) {
                    return Err(NotifyError::invalid_target(format!(
                        "'{}' is not a valid email address",
                        self.value
                    )));
                }
            }
            TargetType::Webhook => {
                if !(self.value.starts_with("http://") || self.value.starts_with("https://")) {
                    return Err(NotifyError::invalid_target(format!(
                        "'{}' is not an http(s) URL",
                        self.value
                    )));
                }
            }
            TargetType::Phone | TargetType::Sms => {
                if !looks_like_e164(&self.value) {
                    return Err(NotifyError::invalid_target(format!(
                        "'{}' is not E.164",
                        self.value
                    )));
                }
            }
            TargetType::User | TargetType::Group | TargetType::Channel => {}
        }
        Ok(())
    }
}

fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

fn looks_like_e164(value: &str) -> bool {
    let mut chars = value.chars();
    matches!(chars.next(), Some('+'))
        && chars.clone().all(|c| c.is_ascii_digit())
        && (1..=15).contains(&chars.count())
}

/// Per-(message, target) dispatch status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sending,
    Sent,
    Failed,
    Retrying,
}

/// Outcome of one (message, target) attempt (spec.md §3 Result).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResult {
    pub message_id: String,
    pub target: Target,
    pub platform: String,
    pub status: DeliveryStatus,
    pub success: bool,
    #[serde(default)]
    pub error: Option<NotifyErrorPayload>,
    pub sent_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub attempts: u32,
    /// Opaque platform response (ids, raw body), passed through uninterpreted.
    #[serde(default)]
    pub response: Option<serde_json::Value>,
}

impl DeliveryResult {
    pub fn success(message_id: impl Into<String>, target: Target, platform: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            target,
            platform: platform.into(),
            status: DeliveryStatus::Sent,
            success: true,
            error: None,
            sent_at: Some(Utc::now()),
            duration_ms: 0,
            attempts: 1,
            response: None,
        }
    }

    pub fn failure(
        message_id: impl Into<String>,
        target: Target,
        platform: impl Into<String>,
        err: &NotifyError,
        attempts: u32,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            target,
            platform: platform.into(),
            status: DeliveryStatus::Failed,
            success: false,
            error: Some(NotifyErrorPayload::from(err)),
            sent_at: None,
            duration_ms: 0,
            attempts,
            response: None,
        }
    }
}

/// Serializable projection of `NotifyError`, since the error type itself
/// carries no `Deserialize` (errors are constructed, not parsed).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyErrorPayload {
    pub code: &'static str,
    pub category: String,
    pub message: String,
    pub platform: Option<String>,
    /// Whether the worker pool should retry this target, carried along so a
    /// retry decision never requires re-parsing `category`/`code` strings.
    pub retryable: bool,
}

impl From<&NotifyError> for NotifyErrorPayload {
    fn from(err: &NotifyError) -> Self {
        Self {
            code: err.code_str(),
            category: err.category.to_string(),
            message: err.message.clone(),
            platform: err.platform.clone(),
            retryable: err.is_retryable(),
        }
    }
}

/// Bundle of per-target results returned by `Hub::send`/`sendAsync`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendingResults {
    pub results: Vec<DeliveryResult>,
}

impl SendingResults {
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }
}

/// A condition predicate evaluated against a `Message` by the Router.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RuleCondition {
    PriorityIn { priorities: Vec<u8> },
    MetadataEquals { key: String, value: String },
    FormatIn { formats: Vec<MessageFormat> },
    TargetTypeIn { types: Vec<TargetType> },
}

/// A mutation or routing decision applied when a rule's conditions match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RuleAction {
    RouteTo { platforms: Vec<String> },
    Transform { field: String, value: String },
    Drop,
}

/// Condition-action statement that binds targets to platforms (spec.md §3 RoutingRule).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRule {
    pub name: String,
    /// Higher priority evaluates first; ties break by declaration index.
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    pub actions: Vec<RuleAction>,
}

fn default_true() -> bool {
    true
}

impl RoutingRule {
    pub fn matches(&self, message: &Message) -> bool {
        self.enabled
            && self.conditions.iter().all(|c| condition_matches(c, message))
    }
}

fn condition_matches(condition: &RuleCondition, message: &Message) -> bool {
    match condition {
        RuleCondition::PriorityIn { priorities } => priorities.contains(&message.priority),
        RuleCondition::MetadataEquals { key, value } => {
            message.metadata.get(key).map(|v| v == value).unwrap_or(false)
        }
        RuleCondition::FormatIn { formats } => formats.contains(&message.format),
        RuleCondition::TargetTypeIn { types } => message
            .targets
            .iter()
            .any(|t| types.contains(&t.target_type)),
    }
}

/// Wire form of a message inside the queue (spec.md §3 QueueMessage).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub id: String,
    /// Serialized `Message`, opaque to the queue backend.
    pub data: Vec<u8>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
    /// Backend-assigned id (e.g. a Redis Streams entry id), absent for in-memory.
    #[serde(default)]
    pub stream_id: Option<String>,
    /// Earliest time this message may be redelivered; enforced by RetryPolicy.
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl QueueMessage {
    pub fn new(message: &Message) -> Result<Self> {
        let data = serde_json::to_vec(message)
            .map_err(|e| NotifyError::internal(format!("failed to serialize message: {e}")))?;
        Ok(Self {
            id: message.id.clone(),
            data,
            headers: HashMap::new(),
            created_at: Utc::now(),
            attempts: 0,
            stream_id: None,
            next_attempt_at: None,
        })
    }

    pub fn decode_message(&self) -> Result<Message> {
        serde_json::from_slice(&self.data)
            .map_err(|e| NotifyError::internal(format!("failed to decode queued message: {e}")))
    }
}

/// Lifecycle state of an async `Handle` (spec.md §3/§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl HandleStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            HandleStatus::Success | HandleStatus::Failed | HandleStatus::Cancelled
        )
    }
}

/// Per-send tunables (spec.md §4.10 Hub options).
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub retry: Option<bool>,
    pub max_retries: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub r#async: bool,
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email_target() -> Target {
        Target::new(TargetType::Email, "a@x.com")
    }

    #[test]
    fn message_requires_title_or_body() {
        let msg = Message::new("", "", vec![email_target()]);
        assert!(msg.validate().is_err());
    }

    #[test]
    fn message_allows_either_field_alone() {
        let msg = Message::new("hello", "", vec![email_target()]);
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn message_rejects_too_many_targets() {
        let targets: Vec<Target> = (0..101).map(|i| Target::new(TargetType::Email, format!("{i}@x.com"))).collect();
        let msg = Message::new("t", "b", targets);
        assert!(msg.validate().is_err());
    }

    #[test]
    fn message_rejects_nul_bytes() {
        let msg = Message::new("t\0itle", "b", vec![email_target()]);
        assert!(msg.validate().is_err());
    }

    #[test]
    fn target_email_must_look_like_email() {
        let t = Target::new(TargetType::Email, "not-an-email");
        assert!(t.validate().is_err());
    }

    #[test]
    fn target_webhook_requires_http_scheme() {
        let t = Target::new(TargetType::Webhook, "ftp://example.com");
        assert!(t.validate().is_err());
        let t = Target::new(TargetType::Webhook, "https://example.com/hook");
        assert!(t.validate().is_ok());
    }

    #[test]
    fn eligible_at_prefers_scheduled_override() {
        let mut msg = Message::new("t", "b", vec![email_target()]);
        msg.delay_ms = Some(60_000);
        let scheduled = msg.created_at + chrono::Duration::hours(2);
        assert_eq!(msg.eligible_at(Some(scheduled)), scheduled);
        assert_eq!(
            msg.eligible_at(None),
            msg.created_at + chrono::Duration::milliseconds(60_000)
        );
    }

    #[test]
    fn routing_rule_matches_on_conjunction() {
        let rule = RoutingRule {
            name: "critical-to-webhook".into(),
            priority: 10,
            enabled: true,
            conditions: vec![RuleCondition::PriorityIn { priorities: vec![5] }],
            actions: vec![RuleAction::RouteTo {
                platforms: vec!["webhook".into()],
            }],
        };
        let mut msg = Message::new("t", "b", vec![email_target()]);
        msg.priority = 5;
        assert!(rule.matches(&msg));
        msg.priority = 1;
        assert!(!rule.matches(&msg));
    }

    #[test]
    fn queue_message_roundtrips_message() {
        let msg = Message::new("t", "b", vec![email_target()]);
        let qm = QueueMessage::new(&msg).unwrap();
        let decoded = qm.decode_message().unwrap();
        assert_eq!(decoded.id, msg.id);
    }
}
