use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Reddit API error: {0}")]
    RedditApi(#[from] RedditApiError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Item handler failed: {message}")]
    Handler { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RedditApiError {
    #[error("Rate limit exceeded. Retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    #[error("Request failed with status {status_code}")]
    RequestFailed { status_code: u16 },

    #[error("Transient transport failure ({kind}): {reason}")]
    Transient { kind: TransientKind, reason: String },

    #[error("Transport failure: {reason}")]
    Transport { reason: String },

    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Invalid API response: {details}")]
    InvalidResponse { details: String },

    #[error("No credential available: {reason}")]
    MissingCredential { reason: String },
}

/// Transport failures worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    ConnectionClosed,
    Timeout,
    RequestCancelled,
    Unknown,
}

impl std::fmt::Display for TransientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TransientKind::ConnectionClosed => "connection closed",
            TransientKind::Timeout => "timeout",
            TransientKind::RequestCancelled => "request cancelled",
            TransientKind::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Storage fault in table {table}: {reason}")]
    Storage { table: String, reason: String },

    #[error("Corrupt record in table {table} at address {address}")]
    CorruptRecord { table: String, address: u64 },

    #[error("Checkpoint failed for table {table}: {reason}")]
    CheckpointFailed { table: String, reason: String },

    #[error("Recovery failed for table {table}: {reason}")]
    RecoveryFailed { table: String, reason: String },

    #[error("Repository is closed")]
    Closed,

    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Environment variable not set: {var_name}")]
    MissingEnvironmentVariable { var_name: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Configuration parsing error: {0}")]
    Parse(#[from] toml::de::Error),
}
