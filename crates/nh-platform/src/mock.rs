//! Deterministic in-memory Sender used by dispatch-pipeline tests
//! (spec.md §8 end-to-end scenarios). Behaviour is scripted per target
//! value so a test can make target "b@x.com" fail with a specific error
//! while "a@x.com" succeeds, or make a sender sleep to exercise
//! cancellation (spec.md §8 scenario 5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use nh_common::{DeliveryResult, ErrorCode, Message, MessageFormat, NotifyError, Target, TargetType};

use crate::{Capabilities, Sender};

#[derive(Clone)]
pub enum MockOutcome {
    Success,
    Failure(ErrorCode),
    /// Fails the first `n` times this target is sent, then succeeds.
    FailThenSucceed(usize),
}

pub struct MockSender {
    name: String,
    target_types: Vec<TargetType>,
    /// Per-target scripted outcome; defaults to `Success` when absent.
    scripts: Mutex<HashMap<String, MockOutcome>>,
    /// Attempts already observed per target, used by `FailThenSucceed`.
    attempts: Mutex<HashMap<String, usize>>,
    /// Artificial per-send latency, used to exercise cancellation windows.
    delay: Mutex<Option<Duration>>,
    call_count: AtomicUsize,
}

impl MockSender {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target_types: vec![
                TargetType::Email,
                TargetType::Webhook,
                TargetType::Sms,
                TargetType::Phone,
                TargetType::User,
                TargetType::Group,
                TargetType::Channel,
            ],
            scripts: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
            delay: Mutex::new(None),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn with_target_types(mut self, types: Vec<TargetType>) -> Self {
        self.target_types = types;
        self
    }

    pub fn script(&self, target_value: impl Into<String>, outcome: MockOutcome) {
        self.scripts.lock().insert(target_value.into(), outcome);
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Mutex::new(Some(delay));
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sender for MockSender {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &Message, targets: &[Target]) -> Vec<DeliveryResult> {
        let delay = *self.delay.lock();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }

        let mut out = Vec::with_capacity(targets.len());
        for target in targets {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            let outcome = self
                .scripts
                .lock()
                .get(&target.value)
                .cloned()
                .unwrap_or(MockOutcome::Success);

            let result = match outcome {
                MockOutcome::Success => {
                    DeliveryResult::success(message.id.clone(), target.clone(), self.name.clone())
                }
                MockOutcome::Failure(code) => {
                    let err = NotifyError::new(code, format!("mock sender scripted failure for {}", target.value))
                        .with_platform(self.name.clone());
                    DeliveryResult::failure(message.id.clone(), target.clone(), self.name.clone(), &err, 1)
                }
                MockOutcome::FailThenSucceed(n) => {
                    let mut attempts = self.attempts.lock();
                    let count = attempts.entry(target.value.clone()).or_insert(0);
                    *count += 1;
                    if *count <= n {
                        let err = NotifyError::new(
                            ErrorCode::ServerError,
                            format!("mock sender transient failure {} of {n}", *count),
                        )
                        .with_platform(self.name.clone());
                        DeliveryResult::failure(message.id.clone(), target.clone(), self.name.clone(), &err, *count as u32)
                    } else {
                        DeliveryResult::success(message.id.clone(), target.clone(), self.name.clone())
                    }
                }
            };
            out.push(result);
        }
        out
    }

    fn validate_target(&self, target: &Target) -> Result<(), NotifyError> {
        target.validate()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supported_target_types: self.target_types.clone(),
            supported_formats: vec![
                MessageFormat::Text,
                MessageFormat::Markdown,
                MessageFormat::Html,
                MessageFormat::Card,
            ],
            max_message_size: 1_000_000,
            supports_scheduling: true,
            supports_attachments: false,
            supports_mentions: false,
            supports_rich_content: true,
            default_rate_limit: None,
            required_settings: vec![],
        }
    }

    async fn is_healthy(&self) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Convenience constructor so callers don't need `Arc::new` at every call site.
pub fn mock_sender(name: impl Into<String>) -> Arc<MockSender> {
    Arc::new(MockSender::new(name))
}
