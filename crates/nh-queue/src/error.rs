use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("message not found: {0}")]
    NotFound(String),

    #[error("queue is closed")]
    Closed,

    #[error("redis error: {0}")]
    Redis(String),

    #[error("configuration error: {0}")]
    Config(String),
}

#[cfg(feature = "redis-streams")]
impl From<redis::RedisError> for QueueError {
    fn from(e: redis::RedisError) -> Self {
        QueueError::Redis(e.to_string())
    }
}

impl From<&QueueError> for nh_common::NotifyError {
    fn from(e: &QueueError) -> Self {
        use nh_common::{ErrorCode, NotifyError};
        match e {
            QueueError::NotFound(msg) => NotifyError::new(ErrorCode::NotFound, msg.clone()),
            QueueError::Closed => NotifyError::new(ErrorCode::QueueUnavailable, "queue is closed"),
            QueueError::Config(msg) => NotifyError::new(ErrorCode::InvalidConfig, msg.clone()),
            _ => NotifyError::new(ErrorCode::QueueUnavailable, e.to_string()),
        }
    }
}
