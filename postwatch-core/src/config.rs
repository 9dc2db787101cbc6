use crate::error::ConfigError;
use crate::types::FeedConfiguration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "postwatch.toml";
pub const CONFIG_PATH_ENV: &str = "POSTWATCH_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub feeds: Vec<FeedConfiguration>,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub publisher: Option<PublisherConfig>,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// First CLI argument, then `POSTWATCH_CONFIG`, then `postwatch.toml`.
    pub fn resolve_path(cli_arg: Option<String>) -> PathBuf {
        cli_arg
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feeds.is_empty() {
            return Err(ConfigError::ValidationFailed {
                reason: "at least one [[feeds]] entry is required".to_string(),
            });
        }
        for feed in &self.feeds {
            feed.validate()?;
        }
        self.client.validate()?;
        self.engine.validate()?;
        self.repository.validate()?;
        if let Some(publisher) = &self.publisher {
            publisher.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    /// Environment variable holding the bearer token.
    pub token_env: String,
    pub timeout_seconds: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://oauth.reddit.com".to_string(),
            user_agent: "postwatch/0.1".to_string(),
            token_env: "REDDIT_ACCESS_TOKEN".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "client.base_url".to_string(),
            });
        }
        if url::Url::parse(&self.base_url).is_err() {
            return Err(ConfigError::InvalidValue {
                field: "client.base_url".to_string(),
                value: self.base_url.clone(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub min_spacing_seconds: f64,
    pub low_yield_penalty_seconds: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_spacing_seconds: 1.5,
            low_yield_penalty_seconds: 15.0,
        }
    }
}

impl EngineConfig {
    pub fn min_spacing(&self) -> Duration {
        Duration::from_secs_f64(self.min_spacing_seconds.max(0.0))
    }

    pub fn low_yield_penalty(&self) -> Duration {
        Duration::from_secs_f64(self.low_yield_penalty_seconds.max(0.0))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("engine.min_spacing_seconds", self.min_spacing_seconds),
            ("engine.low_yield_penalty_seconds", self.low_yield_penalty_seconds),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryBackend {
    #[default]
    Memory,
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    pub backend: RepositoryBackend,
    /// Storage directory; required for the log backend.
    pub root: Option<PathBuf>,
    pub view_ttl_seconds: u64,
    pub heartbeat_interval_seconds: u64,
    pub checkpoint_interval_seconds: u64,
    pub session_pool_size: usize,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            backend: RepositoryBackend::Memory,
            root: None,
            view_ttl_seconds: 60,
            heartbeat_interval_seconds: 30,
            checkpoint_interval_seconds: 30,
            session_pool_size: 16,
        }
    }
}

impl RepositoryConfig {
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn log(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: RepositoryBackend::Log,
            root: Some(root.into()),
            ..Self::default()
        }
    }

    pub fn view_ttl(&self) -> Duration {
        Duration::from_secs(self.view_ttl_seconds)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds.max(1))
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_seconds.max(1))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == RepositoryBackend::Log && self.root.is_none() {
            return Err(ConfigError::MissingField {
                field: "repository.root".to_string(),
            });
        }
        if self.session_pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "repository.session_pool_size".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    #[serde(default = "default_publisher_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_topic")]
    pub topic: String,
}

fn default_publisher_enabled() -> bool {
    true
}

fn default_topic() -> String {
    "posts".to_string()
}

impl PublisherConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.url.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "publisher.url".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MonitorType, Sort};

    const SAMPLE: &str = r#"
[[feeds]]
name = "gaming"
sort = "new"
page_size = 100
monitor_type = "AfterStartOnly"

[[feeds]]
name = "rust"
sort = "top"

[client]
base_url = "https://oauth.reddit.com"
token_env = "MY_TOKEN"

[engine]
min_spacing_seconds = 2.0

[repository]
backend = "log"
root = "/var/lib/postwatch"
checkpoint_interval_seconds = 10

[publisher]
url = "http://localhost:8080/publish"
"#;

    #[test]
    fn test_parse_full_config() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.feeds.len(), 2);
        assert_eq!(config.feeds[0].monitor_type, MonitorType::SinceStart);
        assert_eq!(config.feeds[1].sort, Sort::Top);
        assert_eq!(config.feeds[1].page_size, 100);
        assert_eq!(config.client.token_env, "MY_TOKEN");
        assert_eq!(config.engine.min_spacing(), Duration::from_secs(2));
        assert_eq!(config.engine.low_yield_penalty(), Duration::from_secs(15));
        assert_eq!(config.repository.backend, RepositoryBackend::Log);
        assert_eq!(config.repository.session_pool_size, 16);

        let publisher = config.publisher.unwrap();
        assert!(publisher.enabled);
        assert_eq!(publisher.topic, "posts");
    }

    #[test]
    fn test_config_requires_feeds() {
        let result = AppConfig::from_toml_str("[client]\nbase_url = \"https://x.test\"\n");
        assert!(matches!(result, Err(ConfigError::ValidationFailed { .. })));
    }

    #[test]
    fn test_log_backend_requires_root() {
        let toml = "[[feeds]]\nname = \"rust\"\n[repository]\nbackend = \"log\"\n";
        let result = AppConfig::from_toml_str(toml);
        assert!(matches!(result, Err(ConfigError::MissingField { .. })));
    }

    #[test]
    fn test_unknown_sort_is_rejected() {
        let toml = "[[feeds]]\nname = \"rust\"\nsort = \"sideways\"\n";
        assert!(matches!(
            AppConfig::from_toml_str(toml),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = AppConfig::from_file("/definitely/not/here/postwatch.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_resolve_path_prefers_cli_argument() {
        let path = AppConfig::resolve_path(Some("custom.toml".to_string()));
        assert_eq!(path, PathBuf::from("custom.toml"));
    }
}
