//! Generic SMS provider Sender (spec.md §1 "SMS providers"). Shaped after a
//! Twilio-style REST API: one POST per target with basic auth and
//! form-encoded body. The wire format is illustrative, not a specified
//! contract (spec.md §1 "Their wire formats are NOT specified here").

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;

use nh_common::{DeliveryResult, ErrorCode, Message, MessageFormat, NotifyError, Target, TargetType};

use crate::circuit_breaker::CircuitBreaker;
use crate::Capabilities;
use std::sync::Arc;
use std::time::Duration;

pub struct SmsSender {
    name: String,
    api_base: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
    client: Client,
    breaker: Arc<CircuitBreaker>,
}

impl SmsSender {
    pub fn new(
        name: impl Into<String>,
        api_base: impl Into<String>,
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        from_number: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            api_base: api_base.into(),
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            from_number: from_number.into(),
            client: Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("reqwest client builds with static config"),
            breaker: Arc::new(CircuitBreaker::default()),
        }
    }

    async fn send_one(&self, message: &Message, target: &Target) -> DeliveryResult {
        let started = Instant::now();
        if !self.breaker.allow_request() {
            let err = NotifyError::new(ErrorCode::ServerError, "circuit breaker open")
                .with_platform(self.name.clone());
            return with_duration(message, target, &self.name, err, started);
        }

        let url = format!("{}/Accounts/{}/Messages.json", self.api_base, self.account_sid);
        let body_text = if message.title.is_empty() {
            message.body.clone()
        } else {
            format!("{}: {}", message.title, message.body)
        };
        let form = [
            ("To", target.value.as_str()),
            ("From", self.from_number.as_str()),
            ("Body", body_text.as_str()),
        ];

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                self.breaker.record_success();
                let body: serde_json::Value = resp.json().await.unwrap_or_default();
                let mut result =
                    DeliveryResult::success(message.id.clone(), target.clone(), self.name.clone());
                result.duration_ms = started.elapsed().as_millis() as u64;
                result.response = Some(body);
                result
            }
            Ok(resp) => {
                self.breaker.record_failure();
                let status = resp.status().as_u16();
                let text = resp.text().await.unwrap_or_default();
                let err = NotifyError::from_http_status(status, &self.name, text);
                with_duration(message, target, &self.name, err, started)
            }
            Err(e) => {
                self.breaker.record_failure();
                let code = if e.is_timeout() {
                    ErrorCode::Timeout
                } else if e.is_connect() {
                    ErrorCode::ConnectionFailed
                } else {
                    ErrorCode::SendingFailed
                };
                let err = NotifyError::new(code, e.to_string()).with_platform(self.name.clone());
                with_duration(message, target, &self.name, err, started)
            }
        }
    }
}

fn with_duration(
    message: &Message,
    target: &Target,
    platform: &str,
    err: NotifyError,
    started: Instant,
) -> DeliveryResult {
    let mut result = DeliveryResult::failure(message.id.clone(), target.clone(), platform.to_string(), &err, 1);
    result.duration_ms = started.elapsed().as_millis() as u64;
    result
}

#[async_trait]
impl crate::Sender for SmsSender {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &Message, targets: &[Target]) -> Vec<DeliveryResult> {
        let mut out = Vec::with_capacity(targets.len());
        for target in targets {
            out.push(self.send_one(message, target).await);
        }
        out
    }

    fn validate_target(&self, target: &Target) -> Result<(), NotifyError> {
        target.validate()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supported_target_types: vec![TargetType::Sms, TargetType::Phone],
            supported_formats: vec![MessageFormat::Text],
            max_message_size: 1600,
            supports_scheduling: false,
            supports_attachments: false,
            supports_mentions: false,
            supports_rich_content: false,
            default_rate_limit: Some(nh_ratelimit::RateLimiterConfig::new(1.0, 1)),
            required_settings: vec!["api_base", "account_sid", "auth_token", "from_number"],
        }
    }

    async fn is_healthy(&self) -> Result<(), NotifyError> {
        match self.breaker.state() {
            crate::circuit_breaker::CircuitState::Open => {
                Err(NotifyError::new(ErrorCode::ServerError, "sms circuit breaker open")
                    .with_platform(self.name.clone()))
            }
            _ => Ok(()),
        }
    }

    async fn close(&self) -> Result<(), NotifyError> {
        Ok(())
    }
}
