use std::time::Duration;

use thiserror::Error;

/// Errors returned by the rate limiter's `wait`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("Wait for {domain} was cancelled")]
    Cancelled { domain: String },

    #[error("Timed out after {waited:?} waiting for a request slot on {domain}")]
    Timeout { domain: String, waited: Duration },

    #[error("Request budget exhausted for {domain}")]
    DomainLimitExceeded { domain: String },
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("Crawler is shutting down")]
    ShuttingDown,

    #[error("Not allowed: {0}")]
    NotAllowed(String),

    #[error("Rate limit error: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Quality validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Transient failures are worth another attempt; policy and input errors are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::RateLimit(_) | AppError::Extraction(_) | AppError::Http(_) | AppError::Internal(_)
        )
    }
}

impl From<url::ParseError> for AppError {
    fn from(err: url::ParseError) -> Self {
        AppError::InvalidInput(format!("Invalid URL: {}", err))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_errors_are_transient() {
        let err: AppError = RateLimitError::DomainLimitExceeded {
            domain: "example.org".to_string(),
        }
        .into();
        assert!(err.is_transient());
        assert!(!AppError::NotAllowed("robots.txt".into()).is_transient());
        assert!(!AppError::QueueFull { capacity: 4 }.is_transient());
    }

    #[test]
    fn url_parse_errors_become_invalid_input() {
        let err: AppError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }
}
