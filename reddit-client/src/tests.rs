use crate::api::{parse_listing, parse_quota, ListingClient, ListingRequest};
use crate::auth::StaticCredential;
use crate::rate_limiter::RateLimitConfig;
use crate::transport::{RawResponse, Transport, TransportError};
use async_trait::async_trait;
use postwatch_core::{
    CoreError, FeedConfiguration, MonitorType, RedditApiError, Sort, TransientKind,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Replays scripted GET results in order; HEAD probes return `probe`.
struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
    probe: Result<RawResponse, TransportError>,
    gets: Mutex<Vec<(String, Vec<(String, String)>, Option<String>)>>,
    heads: Mutex<usize>,
}

impl ScriptedTransport {
    fn new(responses: Vec<Result<RawResponse, TransportError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            probe: Ok(RawResponse::new(200)
                .with_header("x-ratelimit-remaining", "600.0")
                .with_header("x-ratelimit-reset", "600")),
            gets: Mutex::new(Vec::new()),
            heads: Mutex::new(0),
        }
    }

    fn with_probe(mut self, probe: Result<RawResponse, TransportError>) -> Self {
        self.probe = probe;
        self
    }

    fn get_count(&self) -> usize {
        self.gets.lock().unwrap().len()
    }

    fn head_count(&self) -> usize {
        *self.heads.lock().unwrap()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(
        &self,
        url: &str,
        query: &[(String, String)],
        bearer: Option<&str>,
    ) -> Result<RawResponse, TransportError> {
        self.gets.lock().unwrap().push((
            url.to_string(),
            query.to_vec(),
            bearer.map(str::to_string),
        ));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(RawResponse::new(200).with_body(listing_body(&[], None))))
    }

    async fn head(&self, _url: &str, _bearer: Option<&str>) -> Result<RawResponse, TransportError> {
        *self.heads.lock().unwrap() += 1;
        self.probe.clone()
    }

    async fn post_json(&self, _url: &str, _body: String) -> Result<RawResponse, TransportError> {
        Ok(RawResponse::new(200))
    }
}

fn listing_body(posts: &[(&str, i64)], after: Option<&str>) -> String {
    let children: Vec<_> = posts
        .iter()
        .map(|(id, ups)| {
            json!({
                "kind": "t3",
                "data": {
                    "id": id,
                    "name": format!("t3_{}", id),
                    "subreddit": "gaming",
                    "author": "someone",
                    "author_fullname": "t2_someone",
                    "title": format!("post {}", id),
                    "ups": ups,
                    "downs": 0,
                    "score": ups,
                    "num_comments": 3,
                    "created_utc": 1_700_000_000.0,
                    "upvote_ratio": 0.9
                }
            })
        })
        .collect();
    json!({
        "kind": "Listing",
        "data": { "after": after, "before": null, "dist": posts.len(), "children": children }
    })
    .to_string()
}

fn ok_page(posts: &[(&str, i64)], after: Option<&str>) -> Result<RawResponse, TransportError> {
    Ok(RawResponse::new(200)
        .with_header("x-ratelimit-remaining", "550.0")
        .with_header("x-ratelimit-used", "50")
        .with_header("x-ratelimit-reset", "300")
        .with_body(listing_body(posts, after)))
}

fn transient() -> Result<RawResponse, TransportError> {
    Err(TransportError::Transient {
        kind: TransientKind::ConnectionClosed,
        reason: "connection reset".to_string(),
    })
}

fn client(transport: Arc<ScriptedTransport>) -> ListingClient {
    ListingClient::new(
        "https://oauth.example.test",
        transport,
        Arc::new(StaticCredential::new("token-1")),
    )
    .unwrap()
}

fn gaming_request(after: Option<&str>) -> ListingRequest {
    let feed = FeedConfiguration::new("Gaming")
        .with_sort(Sort::New)
        .with_monitor_type(MonitorType::None);
    ListingRequest::for_feed(&feed, after.map(str::to_string))
}

#[tokio::test(start_paused = true)]
async fn test_fetch_builds_listing_request() {
    let transport = Arc::new(ScriptedTransport::new(vec![ok_page(
        &[("a", 10), ("b", 5)],
        Some("t3_b"),
    )]));
    let client = client(Arc::clone(&transport));
    let cancel = CancellationToken::new();

    let page = client.fetch(&gaming_request(None), &cancel).await.unwrap();

    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[0].id, "t3_a");
    assert_eq!(page.items[0].author_id, "t2_someone");
    assert_eq!(page.after.as_deref(), Some("t3_b"));
    assert_eq!(page.quota.remaining, 550.0);
    assert_eq!(page.quota.used, 50);
    assert_eq!(page.quota.reset_seconds, 300);

    let gets = transport.gets.lock().unwrap();
    let (url, query, bearer) = &gets[0];
    assert_eq!(url, "https://oauth.example.test/r/gaming/new.json");
    assert_eq!(bearer.as_deref(), Some("token-1"));
    assert!(query.contains(&("show".to_string(), "all".to_string())));
    assert!(query.contains(&("limit".to_string(), "100".to_string())));
    assert!(query.contains(&("raw_json".to_string(), "1".to_string())));
    assert!(!query.iter().any(|(k, _)| k == "after"));
}

#[tokio::test(start_paused = true)]
async fn test_after_cursor_is_forwarded() {
    let transport = Arc::new(ScriptedTransport::new(vec![ok_page(&[], None)]));
    let client = client(Arc::clone(&transport));
    let cancel = CancellationToken::new();

    client
        .fetch(&gaming_request(Some("t3_zzz")), &cancel)
        .await
        .unwrap();

    let gets = transport.gets.lock().unwrap();
    assert!(gets[0]
        .1
        .contains(&("after".to_string(), "t3_zzz".to_string())));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_response_waits_and_reprobes() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        Ok(RawResponse::new(429).with_header("x-ratelimit-reset", "5")),
        ok_page(&[("a", 1)], None),
    ]));
    let client = client(Arc::clone(&transport));
    let cancel = CancellationToken::new();

    let start = Instant::now();
    let page = client.fetch(&gaming_request(None), &cancel).await.unwrap();

    assert!(start.elapsed() >= Duration::from_secs(5));
    assert_eq!(page.items.len(), 1);
    assert_eq!(transport.get_count(), 2);
    assert_eq!(transport.head_count(), 2);

    let metrics = client.get_metrics().await;
    assert_eq!(metrics.rate_limited_requests, 1);
    assert_eq!(metrics.successful_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_responses_do_not_consume_retries() {
    let mut script: Vec<_> = (0..12)
        .map(|_| Ok(RawResponse::new(429).with_header("x-ratelimit-reset", "1")))
        .collect();
    script.push(ok_page(&[("a", 1)], None));
    let transport = Arc::new(ScriptedTransport::new(script));
    let client = client(Arc::clone(&transport));
    let cancel = CancellationToken::new();

    let page = client.fetch(&gaming_request(None), &cancel).await.unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(transport.get_count(), 13);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_without_reset_header_waits_default() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        Ok(RawResponse::new(429)),
        ok_page(&[], None),
    ]));
    let client = client(Arc::clone(&transport));
    let cancel = CancellationToken::new();

    let start = Instant::now();
    tokio_test::assert_ok!(client.fetch(&gaming_request(None), &cancel).await);
    assert!(start.elapsed() >= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        transient(),
        transient(),
        transient(),
        ok_page(&[("a", 1)], None),
    ]));
    let client = client(Arc::clone(&transport));
    let cancel = CancellationToken::new();

    let start = Instant::now();
    let page = client.fetch(&gaming_request(None), &cancel).await.unwrap();

    assert_eq!(page.items.len(), 1);
    assert_eq!(transport.get_count(), 4);
    // 2s + 4s + 6s of backoff
    assert!(start.elapsed() >= Duration::from_secs(12));
    assert_eq!(client.get_metrics().await.transient_failures, 3);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_exhaust_retries() {
    let script = (0..15).map(|_| transient()).collect();
    let transport = Arc::new(ScriptedTransport::new(script));
    let client = client(Arc::clone(&transport));
    let cancel = CancellationToken::new();

    let result = client.fetch(&gaming_request(None), &cancel).await;

    assert!(matches!(
        result,
        Err(CoreError::RedditApi(RedditApiError::RetriesExhausted { attempts: 10, .. }))
    ));
    assert_eq!(transport.get_count(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_transport_error_is_not_retried() {
    let transport = Arc::new(ScriptedTransport::new(vec![Err(TransportError::Fatal {
        reason: "bad request builder".to_string(),
    })]));
    let client = client(Arc::clone(&transport));
    let cancel = CancellationToken::new();

    let result = client.fetch(&gaming_request(None), &cancel).await;
    assert!(matches!(
        result,
        Err(CoreError::RedditApi(RedditApiError::Transport { .. }))
    ));
    assert_eq!(transport.get_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_http_error_status_propagates() {
    let transport = Arc::new(ScriptedTransport::new(vec![Ok(RawResponse::new(503))]));
    let client = client(Arc::clone(&transport));
    let cancel = CancellationToken::new();

    let result = client.fetch(&gaming_request(None), &cancel).await;
    assert!(matches!(
        result,
        Err(CoreError::RedditApi(RedditApiError::RequestFailed { status_code: 503 }))
    ));
    assert_eq!(transport.get_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_body_yields_empty_page() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        Ok(RawResponse::new(200).with_body("<html>oops</html>")),
        Ok(RawResponse::new(200)),
    ]));
    let client = client(Arc::clone(&transport));
    let cancel = CancellationToken::new();

    let page = client.fetch(&gaming_request(None), &cancel).await.unwrap();
    assert!(page.items.is_empty());
    assert!(page.after.is_none());

    let page = client.fetch(&gaming_request(None), &cancel).await.unwrap();
    assert!(page.items.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_fetch_returns_cancelled() {
    let transport = Arc::new(ScriptedTransport::new(vec![ok_page(&[("a", 1)], None)]));
    let client = client(Arc::clone(&transport));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = client.fetch(&gaming_request(None), &cancel).await;
    assert!(matches!(result, Err(CoreError::Cancelled)));
    assert_eq!(transport.get_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_probe_sets_limiter_from_headers() {
    let transport = Arc::new(
        ScriptedTransport::new(vec![ok_page(&[], None)]).with_probe(Ok(RawResponse::new(200)
            .with_header("x-ratelimit-remaining", "100.0")
            .with_header("x-ratelimit-reset", "200"))),
    );
    let client = client(Arc::clone(&transport));
    let cancel = CancellationToken::new();

    tokio_test::assert_ok!(client.fetch(&gaming_request(None), &cancel).await);

    let limiter = client.rate_limiter().await.unwrap();
    assert_eq!(limiter.max_requests(), 100);
    assert_eq!(limiter.minimum_delay(), Duration::from_millis(600));
}

#[tokio::test(start_paused = true)]
async fn test_probe_failure_falls_back_to_defaults() {
    let transport = Arc::new(
        ScriptedTransport::new(vec![ok_page(&[], None)]).with_probe(transient()),
    );
    let client = client(Arc::clone(&transport))
        .with_default_limits(RateLimitConfig::new(30, 60));
    let cancel = CancellationToken::new();

    client.fetch(&gaming_request(None), &cancel).await.unwrap();

    let limiter = client.rate_limiter().await.unwrap();
    assert_eq!(limiter.max_requests(), 30);
}

#[test]
fn test_malformed_child_is_skipped() {
    let body = json!({
        "kind": "Listing",
        "data": {
            "after": "t3_c",
            "children": [
                { "kind": "t3", "data": { "id": "a", "name": "t3_a", "ups": 4 } },
                { "kind": "t3", "data": { "ups": "not a number" } },
                { "kind": "t3", "data": { "id": "c", "ups": 1 } }
            ]
        }
    })
    .to_string();

    let (items, after) = parse_listing(&body, "gaming");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].id, "t3_a");
    // No fullname: plain id, feed taken from the request.
    assert_eq!(items[1].id, "c");
    assert_eq!(items[1].feed, "gaming");
    assert_eq!(after.as_deref(), Some("t3_c"));
}

#[test]
fn test_empty_after_means_exhausted() {
    let body = json!({ "kind": "Listing", "data": { "after": "", "children": [] } }).to_string();
    let (items, after) = parse_listing(&body, "gaming");
    assert!(items.is_empty());
    assert!(after.is_none());
}

#[test]
fn test_quota_parsing_defaults_to_zero() {
    let quota = parse_quota(&RawResponse::new(200));
    assert_eq!(quota.remaining, 0.0);
    assert_eq!(quota.used, 0);
    assert_eq!(quota.reset_seconds, 0);

    let quota = parse_quota(
        &RawResponse::new(200)
            .with_header("X-Ratelimit-Remaining", "12.5")
            .with_header("X-Ratelimit-Used", "junk")
            .with_header("X-Ratelimit-Reset", "42"),
    );
    assert_eq!(quota.remaining, 12.5);
    assert_eq!(quota.used, 0);
    assert_eq!(quota.reset_seconds, 42);
}

#[test]
fn test_default_sort_listing_path() {
    let feed = FeedConfiguration::new("Rust").with_sort(Sort::Default);
    let request = ListingRequest::for_feed(&feed, Some(String::new()));
    assert_eq!(request.path, "/r/rust.json");
    assert!(!request.query().iter().any(|(k, _)| k == "after"));
}
