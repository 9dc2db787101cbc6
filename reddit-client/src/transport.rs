use async_trait::async_trait;
use postwatch_core::{CoreError, RedditApiError, TransientKind};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Status, lowercase headers and body of one HTTP exchange.
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("transient transport failure ({kind}): {reason}")]
    Transient { kind: TransientKind, reason: String },

    #[error("transport failure: {reason}")]
    Fatal { reason: String },
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient { .. })
    }
}

impl From<TransportError> for RedditApiError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Transient { kind, reason } => RedditApiError::Transient { kind, reason },
            TransportError::Fatal { reason } => RedditApiError::Transport { reason },
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        let reason = error.to_string();
        if error.is_builder() || error.is_redirect() {
            return TransportError::Fatal { reason };
        }
        let kind = if error.is_timeout() {
            TransientKind::Timeout
        } else if error.is_connect() {
            TransientKind::ConnectionClosed
        } else if error.is_request() || error.is_body() || error.is_decode() {
            TransientKind::RequestCancelled
        } else {
            TransientKind::Unknown
        };
        TransportError::Transient { kind, reason }
    }
}

/// HTTP seam used by the listing client and the publisher.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        query: &[(String, String)],
        bearer: Option<&str>,
    ) -> Result<RawResponse, TransportError>;

    async fn head(&self, url: &str, bearer: Option<&str>) -> Result<RawResponse, TransportError>;

    async fn post_json(&self, url: &str, body: String) -> Result<RawResponse, TransportError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http_client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, CoreError> {
        let http_client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { http_client })
    }

    async fn collect(response: reqwest::Response) -> Result<RawResponse, TransportError> {
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.text().await?;
        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        query: &[(String, String)],
        bearer: Option<&str>,
    ) -> Result<RawResponse, TransportError> {
        let mut request = self.http_client.get(url).query(query);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        debug!("GET {}", url);
        let response = request.send().await?;
        Self::collect(response).await
    }

    async fn head(&self, url: &str, bearer: Option<&str>) -> Result<RawResponse, TransportError> {
        let mut request = self.http_client.head(url);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        debug!("HEAD {}", url);
        let response = request.send().await?;
        Self::collect(response).await
    }

    async fn post_json(&self, url: &str, body: String) -> Result<RawResponse, TransportError> {
        debug!("POST {}", url);
        let response = self
            .http_client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        Self::collect(response).await
    }
}
