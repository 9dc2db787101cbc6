use postwatch_core::{
    ConfigError, CoreError, ErrorExt, RedditApiError, RepositoryError, TransientKind,
};
use std::time::Duration;

#[test]
fn test_error_codes() {
    let reddit_error = CoreError::RedditApi(RedditApiError::RequestFailed { status_code: 403 });
    assert_eq!(reddit_error.error_code(), "REDDIT_API");

    let repo_error = CoreError::Repository(RepositoryError::Closed);
    assert_eq!(repo_error.error_code(), "REPOSITORY");

    let config_error = CoreError::Config(ConfigError::MissingField {
        field: "feeds".to_string(),
    });
    assert_eq!(config_error.error_code(), "CONFIG");

    assert_eq!(CoreError::Cancelled.error_code(), "CANCELLED");
}

#[test]
fn test_retryable_errors() {
    let retryable_error =
        CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after: 60 });
    assert!(retryable_error.is_retryable());

    let transient = CoreError::RedditApi(RedditApiError::Transient {
        kind: TransientKind::ConnectionClosed,
        reason: "reset by peer".to_string(),
    });
    assert!(transient.is_retryable());

    let exhausted = CoreError::RedditApi(RedditApiError::RetriesExhausted {
        attempts: 10,
        last_error: "timeout".to_string(),
    });
    assert!(!exhausted.is_retryable());

    let non_retryable_error = CoreError::Config(ConfigError::MissingField {
        field: "feeds".to_string(),
    });
    assert!(!non_retryable_error.is_retryable());
}

#[test]
fn test_retry_after() {
    let rate_limit_error =
        CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after: 60 });
    assert_eq!(
        rate_limit_error.retry_after(),
        Some(Duration::from_secs(60))
    );

    assert_eq!(CoreError::Cancelled.retry_after(), None);
}

#[test]
fn test_error_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "missing primary log");
    let repo_error: RepositoryError = io_error.into();
    let core_error: CoreError = repo_error.into();
    assert!(matches!(
        core_error,
        CoreError::Repository(RepositoryError::Io(_))
    ));

    let reddit_error = RedditApiError::InvalidResponse {
        details: "no data".to_string(),
    };
    let core_error: CoreError = reddit_error.into();
    assert!(matches!(core_error, CoreError::RedditApi(_)));
}

#[test]
fn test_error_display() {
    let error = CoreError::RedditApi(RedditApiError::RequestFailed { status_code: 500 });
    assert_eq!(
        error.to_string(),
        "Reddit API error: Request failed with status 500"
    );

    let error = RepositoryError::Storage {
        table: "posts".to_string(),
        reason: "disk full".to_string(),
    };
    assert!(error.to_string().contains("posts"));
}

#[test]
fn test_error_logging() {
    let error = CoreError::Handler {
        message: "sink rejected item".to_string(),
    };
    let logged = error.log_error();
    assert_eq!(logged.error_code(), "HANDLER");
    error.log_warn();
}
