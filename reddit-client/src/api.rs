use crate::auth::{CredentialProvider, EnvCredential};
use crate::metrics::{ApiMetrics, MetricsCollector, RequestMetrics};
use crate::rate_limiter::{RateLimitConfig, RateLimiter};
use crate::retry::RetryPolicy;
use crate::transport::{RawResponse, ReqwestTransport, Transport};
use postwatch_core::{
    ClientConfig, CoreError, FeedConfiguration, Item, ListingPage, QuotaState, RedditApiError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const REDDIT_API_BASE: &str = "https://oauth.reddit.com";
pub const RATE_LIMIT_PROBE_PATH: &str = "/r/all";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_USED: &str = "x-ratelimit-used";
pub const HEADER_RESET: &str = "x-ratelimit-reset";
/// Wait applied to a 429 without a usable reset header.
pub const DEFAULT_RATE_LIMIT_WAIT_SECONDS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListing<T> {
    pub kind: String,
    pub data: RedditListingData<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingData<T> {
    #[serde(default = "Vec::new")]
    pub children: Vec<RedditListingChild<T>>,
    pub after: Option<String>,
    pub before: Option<String>,
    pub modhash: Option<String>,
    pub dist: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingChild<T> {
    pub kind: String,
    pub data: T,
}

/// A link (`t3`) as returned inside a listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkData {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub subreddit: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub author_fullname: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub ups: i64,
    #[serde(default)]
    pub downs: i64,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub num_comments: i64,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub upvote_ratio: f64,
    #[serde(default)]
    pub total_awards_received: i64,
}

impl From<LinkData> for Item {
    fn from(link: LinkData) -> Self {
        let id = if link.name.is_empty() {
            link.id
        } else {
            link.name
        };
        Self {
            id,
            feed: link.subreddit,
            author_id: link.author_fullname.unwrap_or_default(),
            author: link.author,
            ups: link.ups,
            downs: link.downs,
            score: link.score,
            num_comments: link.num_comments,
            created_utc: link.created_utc,
            upvote_ratio: link.upvote_ratio,
            title: link.title,
            body: link.selftext,
            total_awards: link.total_awards_received,
        }
    }
}

/// One page request against a feed listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingRequest {
    pub feed: String,
    pub path: String,
    pub after: Option<String>,
    pub page_size: u32,
    pub show: String,
}

impl ListingRequest {
    pub fn for_feed(feed: &FeedConfiguration, after: Option<String>) -> Self {
        Self {
            feed: feed.name.clone(),
            path: feed.listing_path(),
            after,
            page_size: feed.page_size,
            show: feed.show.clone(),
        }
    }

    pub fn query(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("show".to_string(), self.show.clone()),
            ("limit".to_string(), self.page_size.to_string()),
            ("raw_json".to_string(), "1".to_string()),
        ];
        if let Some(after) = self.after.as_deref().filter(|a| !a.is_empty()) {
            params.push(("after".to_string(), after.to_string()));
        }
        params
    }
}

/// Reads the advertised quota; missing or unparseable headers count as 0.
pub fn parse_quota(response: &RawResponse) -> QuotaState {
    QuotaState {
        remaining: response
            .header(HEADER_REMAINING)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .unwrap_or(0.0),
        used: response
            .header(HEADER_USED)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(0),
        reset_seconds: parse_reset(response).unwrap_or(0),
    }
}

fn parse_reset(response: &RawResponse) -> Option<u64> {
    response.header(HEADER_RESET).and_then(|v| {
        let v = v.trim();
        v.parse::<u64>()
            .ok()
            .or_else(|| v.parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u64))
    })
}

/// Normalizes a listing body. Empty or malformed bodies give no items;
/// malformed children are skipped.
pub fn parse_listing(body: &str, feed: &str) -> (Vec<Item>, Option<String>) {
    if body.trim().is_empty() {
        debug!("Empty listing body for {}", feed);
        return (Vec::new(), None);
    }

    let listing: RedditListing<serde_json::Value> = match serde_json::from_str(body) {
        Ok(listing) => listing,
        Err(e) => {
            warn!("Malformed listing body for {}: {}", feed, e);
            return (Vec::new(), None);
        }
    };

    let items = listing
        .data
        .children
        .into_iter()
        .enumerate()
        .filter_map(|(index, child)| {
            match serde_json::from_value::<LinkData>(child.data) {
                Ok(link) => {
                    let mut item = Item::from(link);
                    if item.feed.is_empty() {
                        item.feed = feed.to_string();
                    }
                    Some(item)
                }
                Err(e) => {
                    warn!("Skipping malformed {} record {} in {}: {}", child.kind, index, feed, e);
                    None
                }
            }
        })
        .collect();

    let after = listing.data.after.filter(|a| !a.is_empty());
    (items, after)
}

/// Paginated listing reads through a shared, lazily initialised rate limiter.
pub struct ListingClient {
    base_url: String,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    rate_limiter: Mutex<Option<Arc<RateLimiter>>>,
    default_limits: RateLimitConfig,
    retry: RetryPolicy,
    metrics: MetricsCollector,
}

impl std::fmt::Debug for ListingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListingClient")
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .finish()
    }
}

impl ListingClient {
    pub fn new(
        base_url: &str,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, CoreError> {
        let parsed = url::Url::parse(base_url).map_err(|e| CoreError::InvalidInput {
            message: format!("invalid base url {}: {}", base_url, e),
        })?;

        Ok(Self {
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            transport,
            credentials,
            rate_limiter: Mutex::new(None),
            default_limits: RateLimitConfig::reddit_oauth(),
            retry: RetryPolicy::default(),
            metrics: MetricsCollector::new(),
        })
    }

    /// Client over `reqwest` with the token read from `config.token_env`.
    pub fn from_config(config: &ClientConfig) -> Result<Self, CoreError> {
        let transport = ReqwestTransport::new(&config.user_agent, config.timeout())?;
        Self::new(
            &config.base_url,
            Arc::new(transport),
            Arc::new(EnvCredential::new(config.token_env.clone())),
        )
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Limits used when the probe yields nothing usable.
    pub fn with_default_limits(mut self, limits: RateLimitConfig) -> Self {
        self.default_limits = limits;
        self
    }

    pub async fn fetch(
        &self,
        request: &ListingRequest,
        cancel: &CancellationToken,
    ) -> Result<ListingPage, CoreError> {
        let url = format!("{}{}", self.base_url, request.path);
        let query = request.query();

        info!(
            "Executing request for {} [after {}]",
            request.path,
            request.after.as_deref().unwrap_or("")
        );

        let url = url.as_str();
        let query = query.as_slice();
        self.retry
            .execute(&request.path, cancel, move || {
                self.fetch_once(url, query, request, cancel)
            })
            .await
    }

    /// One logical attempt; 429 responses are waited out and retried here
    /// without touching the retry budget.
    async fn fetch_once(
        &self,
        url: &str,
        query: &[(String, String)],
        request: &ListingRequest,
        cancel: &CancellationToken,
    ) -> Result<ListingPage, CoreError> {
        loop {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }

            let limiter = self.current_limiter(cancel).await;
            let token = self.credentials.current_token().await?;
            let mut attempt = RequestMetrics::new(request.path.clone(), "GET");
            let start_time = Instant::now();

            let result = limiter
                .run(cancel, self.transport.get(url, query, Some(&token)))
                .await?;
            attempt.response_time = start_time.elapsed();

            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    attempt.transient_failure = e.is_transient();
                    attempt.error_type = Some(e.to_string());
                    self.metrics.record_request(attempt).await;
                    error!("Transport error for {}: {}", request.path, e);
                    return Err(RedditApiError::from(e).into());
                }
            };

            attempt.status_code = Some(response.status);

            if response.status == 429 {
                attempt.rate_limited = true;
                attempt.error_type = Some("rate_limited".to_string());
                self.metrics.record_request(attempt).await;

                let wait = parse_reset(&response).unwrap_or(DEFAULT_RATE_LIMIT_WAIT_SECONDS);
                warn!(
                    "Rate limited on {}, delaying {} seconds before retrying",
                    request.path, wait
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(CoreError::Cancelled),
                    _ = sleep(Duration::from_secs(wait)) => {}
                }
                // Next attempt re-probes the quota.
                *self.rate_limiter.lock().await = None;
                continue;
            }

            if !response.is_success() {
                attempt.error_type = Some("http_status".to_string());
                self.metrics.record_request(attempt).await;
                error!(
                    "Request failed with status {} for {}",
                    response.status, request.path
                );
                return Err(RedditApiError::RequestFailed {
                    status_code: response.status,
                }
                .into());
            }

            attempt.success = true;
            self.metrics.record_request(attempt).await;

            let quota = parse_quota(&response);
            let (items, after) = parse_listing(&response.body, &request.feed);
            info!(
                "Request response received {} posts returned for {}",
                items.len(),
                request.feed
            );
            return Ok(ListingPage {
                items,
                after,
                quota,
            });
        }
    }

    async fn current_limiter(&self, cancel: &CancellationToken) -> Arc<RateLimiter> {
        let mut guard = self.rate_limiter.lock().await;
        if let Some(limiter) = guard.as_ref() {
            return Arc::clone(limiter);
        }
        let limiter = Arc::new(RateLimiter::from_config(self.probe_limits(cancel).await));
        *guard = Some(Arc::clone(&limiter));
        limiter
    }

    /// HEAD probe of the quota headers; falls back to the default limits.
    async fn probe_limits(&self, cancel: &CancellationToken) -> RateLimitConfig {
        let url = format!("{}{}", self.base_url, RATE_LIMIT_PROBE_PATH);
        let token = self.credentials.current_token().await.ok();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            response = self.transport.head(&url, token.as_deref()) => response.ok(),
        };

        let probed = response.and_then(|response| {
            let remaining = response
                .header(HEADER_REMAINING)
                .and_then(|v| v.trim().parse::<f64>().ok())?;
            let reset = parse_reset(&response)?;
            Some(RateLimitConfig::new(remaining as u32, reset))
        });

        match probed {
            Some(limits) => {
                info!(
                    "Rate limiter initiated with {} remaining before {:?} reset",
                    limits.max_requests, limits.reset_period
                );
                limits
            }
            None => {
                info!("Rate limiter initiated with default values");
                self.default_limits.clone()
            }
        }
    }

    /// Limiter currently in use, if one has been initialised.
    pub async fn rate_limiter(&self) -> Option<Arc<RateLimiter>> {
        self.rate_limiter.lock().await.clone()
    }

    pub async fn get_metrics(&self) -> ApiMetrics {
        self.metrics.get_metrics().await
    }

    pub async fn reset_metrics(&self) {
        self.metrics.reset_metrics().await;
    }
}
