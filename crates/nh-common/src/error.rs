//! Typed error model shared across the dispatch pipeline.
//!
//! A single `NotifyError` carries enough structure that both the retry
//! controller and the HTTP transport surface can classify it without
//! re-parsing strings: a category, a stable code, retryability, and an
//! HTTP-status equivalent. Mirrors the teacher's `FlowCatalystError` /
//! `RouterError` split, collapsed into one type since every crate here
//! shares the same classification rules (spec.md §4.3).

use std::fmt;

/// Broad error category. Drives the default retryability and HTTP mapping;
/// individual codes can still override both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Config,
    Network,
    Auth,
    RateLimit,
    Validation,
    Sending,
    Queue,
    Internal,
}

impl ErrorCategory {
    fn default_retryable(self) -> bool {
        match self {
            ErrorCategory::Network | ErrorCategory::RateLimit | ErrorCategory::Internal => true,
            ErrorCategory::Auth
            | ErrorCategory::Config
            | ErrorCategory::Validation => false,
            // sending/queue are bounded-retryable; the policy decides based on attempts.
            ErrorCategory::Sending | ErrorCategory::Queue => true,
        }
    }

    fn default_http_status(self) -> u16 {
        match self {
            ErrorCategory::Validation => 400,
            ErrorCategory::Auth => 401,
            ErrorCategory::RateLimit => 429,
            ErrorCategory::Config => 400,
            ErrorCategory::Network | ErrorCategory::Sending | ErrorCategory::Queue => 502,
            ErrorCategory::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Config => "config",
            ErrorCategory::Network => "network",
            ErrorCategory::Auth => "auth",
            ErrorCategory::RateLimit => "ratelimit",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Sending => "sending",
            ErrorCategory::Queue => "queue",
            ErrorCategory::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Stable error code. Used for machine matching (tests, API responses);
/// `NotifyError::code_str` gives the wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidMessage,
    InvalidTarget,
    NoViablePlatform,
    Unauthorized,
    Forbidden,
    RateLimited,
    Timeout,
    ConnectionFailed,
    ServerError,
    NotFound,
    InvalidConfig,
    SendingFailed,
    QueueUnavailable,
    Cancelled,
    Shutdown,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidMessage => "invalidMessage",
            ErrorCode::InvalidTarget => "invalidTarget",
            ErrorCode::NoViablePlatform => "noViablePlatform",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::RateLimited => "rateLimited",
            ErrorCode::Timeout => "timeout",
            ErrorCode::ConnectionFailed => "connectionFailed",
            ErrorCode::ServerError => "serverError",
            ErrorCode::NotFound => "notFound",
            ErrorCode::InvalidConfig => "invalidConfig",
            ErrorCode::SendingFailed => "sendingFailed",
            ErrorCode::QueueUnavailable => "queueUnavailable",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::Shutdown => "shutdown",
            ErrorCode::Internal => "internal",
        }
    }

    fn category(self) -> ErrorCategory {
        match self {
            ErrorCode::InvalidMessage | ErrorCode::InvalidTarget => ErrorCategory::Validation,
            ErrorCode::NoViablePlatform => ErrorCategory::Config,
            ErrorCode::Unauthorized | ErrorCode::Forbidden => ErrorCategory::Auth,
            ErrorCode::RateLimited => ErrorCategory::RateLimit,
            ErrorCode::Timeout | ErrorCode::ConnectionFailed | ErrorCode::ServerError => {
                ErrorCategory::Network
            }
            ErrorCode::NotFound | ErrorCode::InvalidConfig => ErrorCategory::Config,
            ErrorCode::SendingFailed => ErrorCategory::Sending,
            ErrorCode::QueueUnavailable => ErrorCategory::Queue,
            ErrorCode::Cancelled | ErrorCode::Shutdown | ErrorCode::Internal => {
                ErrorCategory::Internal
            }
        }
    }

    /// Overrides for codes whose retryability doesn't match their category default.
    fn retryable_override(self) -> Option<bool> {
        match self {
            ErrorCode::NotFound => Some(false),
            ErrorCode::Cancelled | ErrorCode::Shutdown => Some(false),
            _ => None,
        }
    }

    fn http_status_override(self) -> Option<u16> {
        match self {
            ErrorCode::NotFound => Some(404),
            ErrorCode::Forbidden => Some(403),
            ErrorCode::Unauthorized => Some(401),
            _ => None,
        }
    }
}

/// A typed, classified dispatch error (spec.md §4.3).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{category} error [{code}]: {message}")]
pub struct NotifyError {
    pub code: ErrorCode,
    pub category: ErrorCategory,
    pub message: String,
    pub platform: Option<String>,
    pub context: Vec<(String, String)>,
}

impl NotifyError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            category: code.category(),
            message: message.into(),
            platform: None,
            context: Vec::new(),
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.push((key.into(), value.into()));
        self
    }

    /// Whether this error class is retryable at all (ignoring attempt budget).
    pub fn is_retryable(&self) -> bool {
        self.code
            .retryable_override()
            .unwrap_or_else(|| self.category.default_retryable())
    }

    /// HTTP status equivalent for the optional transport surface (§6).
    pub fn http_status(&self) -> u16 {
        self.code
            .http_status_override()
            .unwrap_or_else(|| self.category.default_http_status())
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    // --- Mapping helpers (spec.md §4.3) ---

    /// Classify a raw HTTP status code from a Sender call.
    pub fn from_http_status(status: u16, platform: &str, body: impl Into<String>) -> Self {
        let body = body.into();
        let code = match status {
            400 => ErrorCode::InvalidConfig,
            401 => ErrorCode::Unauthorized,
            403 => ErrorCode::Forbidden,
            404 => ErrorCode::NotFound,
            429 => ErrorCode::RateLimited,
            s if s >= 500 => ErrorCode::ServerError,
            s if (400..500).contains(&s) => ErrorCode::InvalidConfig,
            _ => ErrorCode::SendingFailed,
        };
        Self::new(code, format!("HTTP {status}: {body}")).with_platform(platform)
    }

    /// Classify an SMTP reply code from an email Sender.
    pub fn from_smtp_code(code: u16, platform: &str, message: impl Into<String>) -> Self {
        let err_code = match code {
            421 | 450 | 451 | 452 => ErrorCode::ServerError,
            430 | 534 | 535 => ErrorCode::Unauthorized,
            550 | 551 | 553 => ErrorCode::InvalidTarget,
            552 | 554 => ErrorCode::SendingFailed,
            _ if code >= 500 => ErrorCode::InvalidConfig,
            _ => ErrorCode::SendingFailed,
        };
        Self::new(err_code, message).with_platform(platform)
    }

    /// Classify a generic I/O failure (connection-refused, reset, unreachable, timeout).
    pub fn from_io_error(err: &std::io::Error, platform: &str) -> Self {
        use std::io::ErrorKind::*;
        let code = match err.kind() {
            TimedOut => ErrorCode::Timeout,
            ConnectionRefused | ConnectionReset | ConnectionAborted | NotConnected
            | AddrNotAvailable => ErrorCode::ConnectionFailed,
            _ => ErrorCode::SendingFailed,
        };
        Self::new(code, err.to_string()).with_platform(platform)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidMessage, message)
    }

    pub fn invalid_target(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidTarget, message)
    }

    pub fn no_viable_platform(target_value: &str) -> Self {
        Self::new(
            ErrorCode::NoViablePlatform,
            format!("no platform can deliver to target '{target_value}'"),
        )
    }

    pub fn shutdown() -> Self {
        Self::new(ErrorCode::Shutdown, "dispatcher is shutting down")
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "dispatch cancelled")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_categories_match_spec_table() {
        assert!(NotifyError::from_http_status(500, "webhook", "boom").is_retryable());
        assert!(NotifyError::from_http_status(429, "webhook", "slow down").is_retryable());
        assert!(!NotifyError::from_http_status(401, "webhook", "nope").is_retryable());
        assert!(!NotifyError::validation("empty body").is_retryable());
        assert!(!NotifyError::new(ErrorCode::NotFound, "missing").is_retryable());
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(NotifyError::validation("x").http_status(), 400);
        assert_eq!(NotifyError::new(ErrorCode::Unauthorized, "x").http_status(), 401);
        assert_eq!(NotifyError::new(ErrorCode::RateLimited, "x").http_status(), 429);
    }

    #[test]
    fn smtp_classification() {
        let e = NotifyError::from_smtp_code(550, "email", "mailbox unavailable");
        assert_eq!(e.code, ErrorCode::InvalidTarget);
        assert!(!e.is_retryable());

        let e = NotifyError::from_smtp_code(451, "email", "try again later");
        assert_eq!(e.code, ErrorCode::ServerError);
        assert!(e.is_retryable());
    }
}
