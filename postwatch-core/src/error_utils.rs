use crate::error::*;
use std::time::Duration;
use tracing::{error, warn};

pub trait ErrorExt {
    fn log_error(&self) -> &Self;
    fn log_warn(&self) -> &Self;
    fn is_retryable(&self) -> bool;
    fn retry_after(&self) -> Option<Duration>;
    fn error_code(&self) -> String;
}

impl ErrorExt for CoreError {
    fn log_error(&self) -> &Self {
        error!("CoreError: {}", self);
        match self {
            CoreError::RedditApi(e) => {
                error!("Reddit API error details: {:?}", e);
            }
            CoreError::Repository(e) => {
                error!("Repository error details: {:?}", e);
            }
            CoreError::Config(e) => {
                error!("Configuration error details: {:?}", e);
            }
            _ => {}
        }
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("CoreError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        match self {
            CoreError::RedditApi(e) => e.is_retryable(),
            CoreError::Repository(e) => e.is_retryable(),
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CoreError::RedditApi(e) => e.retry_after(),
            _ => None,
        }
    }

    fn error_code(&self) -> String {
        match self {
            CoreError::RedditApi(_) => "REDDIT_API".to_string(),
            CoreError::Repository(_) => "REPOSITORY".to_string(),
            CoreError::Config(_) => "CONFIG".to_string(),
            CoreError::Io(_) => "IO".to_string(),
            CoreError::Serialization(_) => "SERIALIZATION".to_string(),
            CoreError::Network(_) => "NETWORK".to_string(),
            CoreError::Cancelled => "CANCELLED".to_string(),
            CoreError::Handler { .. } => "HANDLER".to_string(),
            CoreError::InvalidInput { .. } => "INVALID_INPUT".to_string(),
            CoreError::Internal { .. } => "INTERNAL".to_string(),
        }
    }
}

impl ErrorExt for RedditApiError {
    fn log_error(&self) -> &Self {
        error!("RedditApiError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("RedditApiError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            RedditApiError::RateLimitExceeded { .. } | RedditApiError::Transient { .. }
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            RedditApiError::RateLimitExceeded { retry_after } => {
                Some(Duration::from_secs(*retry_after))
            }
            _ => None,
        }
    }

    fn error_code(&self) -> String {
        match self {
            RedditApiError::RateLimitExceeded { .. } => "REDDIT_RATE_LIMIT".to_string(),
            RedditApiError::RequestFailed { .. } => "REDDIT_REQUEST_FAILED".to_string(),
            RedditApiError::Transient { .. } => "REDDIT_TRANSIENT".to_string(),
            RedditApiError::Transport { .. } => "REDDIT_TRANSPORT".to_string(),
            RedditApiError::RetriesExhausted { .. } => "REDDIT_RETRIES_EXHAUSTED".to_string(),
            RedditApiError::InvalidResponse { .. } => "REDDIT_INVALID_RESPONSE".to_string(),
            RedditApiError::MissingCredential { .. } => "REDDIT_MISSING_CREDENTIAL".to_string(),
        }
    }
}

impl ErrorExt for RepositoryError {
    fn log_error(&self) -> &Self {
        error!("RepositoryError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("RepositoryError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        matches!(self, RepositoryError::CheckpointFailed { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }

    fn error_code(&self) -> String {
        match self {
            RepositoryError::Storage { .. } => "REPO_STORAGE".to_string(),
            RepositoryError::CorruptRecord { .. } => "REPO_CORRUPT_RECORD".to_string(),
            RepositoryError::CheckpointFailed { .. } => "REPO_CHECKPOINT_FAILED".to_string(),
            RepositoryError::RecoveryFailed { .. } => "REPO_RECOVERY_FAILED".to_string(),
            RepositoryError::Closed => "REPO_CLOSED".to_string(),
            RepositoryError::Io(_) => "REPO_IO".to_string(),
        }
    }
}

impl ErrorExt for ConfigError {
    fn log_error(&self) -> &Self {
        error!("ConfigError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("ConfigError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }

    fn error_code(&self) -> String {
        match self {
            ConfigError::FileNotFound { .. } => "CONFIG_FILE_NOT_FOUND".to_string(),
            ConfigError::MissingField { .. } => "CONFIG_MISSING_FIELD".to_string(),
            ConfigError::InvalidValue { .. } => "CONFIG_INVALID_VALUE".to_string(),
            ConfigError::MissingEnvironmentVariable { .. } => "CONFIG_MISSING_ENV_VAR".to_string(),
            ConfigError::ValidationFailed { .. } => "CONFIG_VALIDATION_FAILED".to_string(),
            ConfigError::Parse(_) => "CONFIG_PARSE_ERROR".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_retryable() {
        let error = CoreError::RedditApi(RedditApiError::Transient {
            kind: TransientKind::Timeout,
            reason: "timed out".to_string(),
        });
        assert!(error.is_retryable());

        let error = CoreError::RedditApi(RedditApiError::RequestFailed { status_code: 500 });
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_rate_limit_retry_after() {
        let error = RedditApiError::RateLimitExceeded { retry_after: 42 };
        assert_eq!(error.retry_after(), Some(Duration::from_secs(42)));
        assert_eq!(error.error_code(), "REDDIT_RATE_LIMIT");
    }
}
