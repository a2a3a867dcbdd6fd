//! SMTP email Sender (spec.md §1 "email/SMTP"). Built on `lettre`'s async
//! SMTP transport; reply codes are classified through
//! `NotifyError::from_smtp_code` (spec.md §4.3).

use std::time::Instant;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message as LettreMessage, Tokio1Executor};

use nh_common::{DeliveryResult, ErrorCode, Message, MessageFormat, NotifyError, Target, TargetType};

use crate::Capabilities;

pub struct EmailSender {
    name: String,
    from_address: String,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailSender {
    pub fn new(
        name: impl Into<String>,
        smtp_host: &str,
        smtp_port: u16,
        username: &str,
        password: &str,
        from_address: impl Into<String>,
    ) -> Result<Self, NotifyError> {
        let creds = Credentials::new(username.to_string(), password.to_string());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)
            .map_err(|e| NotifyError::new(ErrorCode::InvalidConfig, e.to_string()))?
            .port(smtp_port)
            .credentials(creds)
            .build();
        Ok(Self {
            name: name.into(),
            from_address: from_address.into(),
            transport,
        })
    }

    fn build_mail(&self, message: &Message, target: &Target) -> Result<LettreMessage, NotifyError> {
        let content_type = match message.format {
            MessageFormat::Html | MessageFormat::Card => ContentType::TEXT_HTML,
            _ => ContentType::TEXT_PLAIN,
        };
        let subject = if message.title.is_empty() { "(no subject)" } else { &message.title };
        LettreMessage::builder()
            .from(self.from_address.parse().map_err(|e| {
                NotifyError::new(ErrorCode::InvalidConfig, format!("invalid from address: {e}"))
                    .with_platform(self.name.clone())
            })?)
            .to(target.value.parse().map_err(|e| {
                NotifyError::invalid_target(format!("'{}' is not a valid email address: {e}", target.value))
            })?)
            .subject(subject)
            .header(content_type)
            .body(message.body.clone())
            .map_err(|e| NotifyError::internal(format!("failed to build email: {e}")))
    }
}

#[async_trait]
impl crate::Sender for EmailSender {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &Message, targets: &[Target]) -> Vec<DeliveryResult> {
        let mut out = Vec::with_capacity(targets.len());
        for target in targets {
            let started = Instant::now();
            let result = match self.build_mail(message, target) {
                Ok(mail) => match self.transport.send(mail).await {
                    Ok(_) => {
                        let mut r = DeliveryResult::success(message.id.clone(), target.clone(), self.name.clone());
                        r.duration_ms = started.elapsed().as_millis() as u64;
                        r
                    }
                    Err(e) => {
                        let err = classify_smtp_error(&e, &self.name);
                        let mut r = DeliveryResult::failure(message.id.clone(), target.clone(), self.name.clone(), &err, 1);
                        r.duration_ms = started.elapsed().as_millis() as u64;
                        r
                    }
                },
                Err(err) => {
                    let mut r = DeliveryResult::failure(message.id.clone(), target.clone(), self.name.clone(), &err, 1);
                    r.duration_ms = started.elapsed().as_millis() as u64;
                    r
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
            supported_target_types: vec![TargetType::Email],
            supported_formats: vec![MessageFormat::Text, MessageFormat::Html],
            max_message_size: 10_000_000,
            supports_scheduling: false,
            supports_attachments: false,
            supports_mentions: false,
            supports_rich_content: true,
            default_rate_limit: Some(nh_ratelimit::RateLimiterConfig::new(5.0, 5)),
            required_settings: vec!["smtp_host", "smtp_port", "smtp_user", "smtp_password", "from_address"],
        }
    }

    async fn is_healthy(&self) -> Result<(), NotifyError> {
        match self.transport.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(NotifyError::new(ErrorCode::ConnectionFailed, "SMTP connection test failed")
                .with_platform(self.name.clone())),
            Err(e) => Err(NotifyError::new(ErrorCode::ConnectionFailed, e.to_string()).with_platform(self.name.clone())),
        }
    }

    async fn close(&self) -> Result<(), NotifyError> {
        Ok(())
    }
}

fn classify_smtp_error(err: &lettre::transport::smtp::Error, platform: &str) -> NotifyError {
    let code = if err.is_timeout() {
        ErrorCode::Timeout
    } else if err.is_transient() {
        ErrorCode::ServerError
    } else if err.is_permanent() {
        ErrorCode::InvalidTarget
    } else {
        ErrorCode::SendingFailed
    };
    NotifyError::new(code, err.to_string()).with_platform(platform.to_string())
}
