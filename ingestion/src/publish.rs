use async_trait::async_trait;
use postwatch_core::{CoreError, Item, Publisher, PublisherConfig, RedditApiError, TransientKind};
use reddit_client::{RetryPolicy, Transport, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use url::Url;

/// Posts each item as a one-element JSON array to a fixed URL, with the
/// topic carried in the `topic` query parameter.
///
/// Transient failures and non-2xx responses are retried with the shared
/// backoff. After a non-transient failure or an exhausted retry budget the
/// publisher is marked faulted and skips all further items.
pub struct HttpPublisher {
    transport: Arc<dyn Transport>,
    url: Url,
    enabled: bool,
    faulted: AtomicBool,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl HttpPublisher {
    pub fn new(transport: Arc<dyn Transport>, url: impl Into<String>) -> Result<Self, CoreError> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(CoreError::InvalidInput {
                message: "publisher url is empty".to_string(),
            });
        }
        let url = Url::parse(url.trim()).map_err(|e| CoreError::InvalidInput {
            message: format!("publisher url {:?} is invalid: {}", url, e),
        })?;
        Ok(Self {
            transport,
            url,
            enabled: true,
            faulted: AtomicBool::new(false),
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn from_config(
        config: &PublisherConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, CoreError> {
        let mut publisher = Self::new(transport, config.url.clone())?;
        publisher.enabled = config.enabled;
        Ok(publisher)
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Stops in-flight retries when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::SeqCst)
    }

    fn endpoint(&self, topic: &str) -> Url {
        let mut url = self.url.clone();
        if !topic.is_empty() {
            url.query_pairs_mut().append_pair("topic", topic);
        }
        url
    }

    async fn post(&self, url: &str, body: &str) -> Result<(), CoreError> {
        let response = self
            .transport
            .post_json(url, body.to_string())
            .await
            .map_err(|e: TransportError| CoreError::from(RedditApiError::from(e)))?;
        if !response.is_success() {
            return Err(RedditApiError::Transient {
                kind: TransientKind::Unknown,
                reason: format!("publish endpoint returned {}", response.status),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(&self, item: &Item, topic: &str) {
        if !self.enabled || self.is_faulted() {
            return;
        }

        let body = match serde_json::to_string(&[item]) {
            Ok(body) => body,
            Err(e) => {
                warn!(id = %item.id, "Could not serialize item for publishing: {}", e);
                return;
            }
        };

        let url = self.endpoint(topic);
        let (url, body) = (url.as_str(), body.as_str());
        let result = self
            .retry
            .execute("publish", &self.cancel, move || self.post(url, body))
            .await;

        match result {
            Ok(()) => debug!(id = %item.id, topic, "Item published"),
            Err(CoreError::Cancelled) => {}
            Err(e) => {
                self.faulted.store(true, Ordering::SeqCst);
                error!(id = %item.id, topic, "Publisher faulted, skipping further items: {}", e);
            }
        }
    }
}
