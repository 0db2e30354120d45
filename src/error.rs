// Allow module inception for error types - this is a common Rust pattern
#![allow(clippy::module_name_repetitions)]

use crate::outcome::ErrorInfo;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Rate limit exceeded for context '{0}'")]
    RateLimited(String),

    #[error("Query timeout after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Query cancelled")]
    Cancelled,

    #[error("Command error: {0}")]
    Command(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

pub type QueryResult<T> = Result<T, QueryError>;

impl From<&QueryError> for ErrorInfo {
    fn from(err: &QueryError) -> Self {
        match err {
            QueryError::RateLimited(_) => ErrorInfo::rate_limited(),
            QueryError::Timeout(after) => ErrorInfo::timeout(*after),
            QueryError::Cancelled => ErrorInfo::cancelled(),
            other => ErrorInfo::new(other.to_string()),
        }
    }
}
