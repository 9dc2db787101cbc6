use async_trait::async_trait;
use postwatch_core::RedditApiError;

/// Supplies the bearer token for each upstream request. Token acquisition
/// and refresh live behind this seam.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn current_token(&self) -> Result<String, RedditApiError>;
}

#[derive(Debug, Clone)]
pub struct StaticCredential {
    token: String,
}

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn current_token(&self) -> Result<String, RedditApiError> {
        if self.token.is_empty() {
            return Err(RedditApiError::MissingCredential {
                reason: "static token is empty".to_string(),
            });
        }
        Ok(self.token.clone())
    }
}

/// Reads the token from an environment variable on every call, so an
/// external refresher can rotate it.
#[derive(Debug, Clone)]
pub struct EnvCredential {
    var_name: String,
}

impl EnvCredential {
    pub fn new(var_name: impl Into<String>) -> Self {
        Self {
            var_name: var_name.into(),
        }
    }

    pub fn var_name(&self) -> &str {
        &self.var_name
    }
}

#[async_trait]
impl CredentialProvider for EnvCredential {
    async fn current_token(&self) -> Result<String, RedditApiError> {
        match std::env::var(&self.var_name) {
            Ok(token) if !token.trim().is_empty() => Ok(token),
            _ => Err(RedditApiError::MissingCredential {
                reason: format!("environment variable {} is not set", self.var_name),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_credential() {
        let credential = StaticCredential::new("abc");
        assert_eq!(credential.current_token().await.unwrap(), "abc");

        let empty = StaticCredential::new("");
        assert!(matches!(
            empty.current_token().await,
            Err(RedditApiError::MissingCredential { .. })
        ));
    }

    #[tokio::test]
    async fn test_env_credential_missing() {
        let credential = EnvCredential::new("POSTWATCH_TEST_TOKEN_THAT_IS_NEVER_SET");
        assert!(credential.current_token().await.is_err());
    }
}
