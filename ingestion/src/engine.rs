//! Per-feed polling loops.
//!
//! Each feed runs as its own task: fetch a page, evaluate its items against
//! the loop's watched index, then sleep an adaptive delay before the next
//! page. Loops stop on cancellation, on a fetch or handler error, or when
//! the cursor runs out on a feed that is not monitored.

use crate::delay::DelayPolicy;
use crate::watch::{Observation, WatchedItems};
use async_trait::async_trait;
use postwatch_core::{
    CoreError, EngineConfig, ErrorExt, FeedConfiguration, Item, ListingPage, MonitorType, Sort,
};
use reddit_client::{ListingClient, ListingRequest};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Source of listing pages for a feed.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch_page(
        &self,
        feed: &FeedConfiguration,
        after: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<ListingPage, CoreError>;
}

#[async_trait]
impl ListingSource for ListingClient {
    async fn fetch_page(
        &self,
        feed: &FeedConfiguration,
        after: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<ListingPage, CoreError> {
        let request = ListingRequest::for_feed(feed, after);
        self.fetch(&request, cancel).await
    }
}

/// Receives every new or changed item, in page order.
#[async_trait]
pub trait ItemHandler: Send + Sync {
    async fn handle(&self, item: &Item, cancel: &CancellationToken) -> Result<(), CoreError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub min_spacing: Duration,
    pub low_yield_penalty: Duration,
    /// Used when a feed leaves `show` empty.
    pub show: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let policy = DelayPolicy::default();
        Self {
            min_spacing: policy.min_spacing,
            low_yield_penalty: policy.low_yield_penalty,
            show: postwatch_core::DEFAULT_SHOW.to_string(),
        }
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            min_spacing: config.min_spacing(),
            low_yield_penalty: config.low_yield_penalty(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// Cursor exhausted on a feed that is not monitored.
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSummary {
    pub feed: String,
    pub outcome: LoopOutcome,
    pub pages: u64,
    pub emitted: u64,
    pub restarts: u64,
}

enum FeedState {
    Fetching,
    Evaluating(ListingPage),
    Delaying(Duration),
    Done(LoopOutcome),
}

/// Registration in the engine's active-loop count, released on drop.
struct ActiveLoop {
    counter: Arc<AtomicUsize>,
}

impl ActiveLoop {
    fn register(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self {
            counter: Arc::clone(counter),
        }
    }

    fn current(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }
}

impl Drop for ActiveLoop {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct IngestionEngine {
    source: Arc<dyn ListingSource>,
    settings: EngineSettings,
    delay: DelayPolicy,
    active_loops: Arc<AtomicUsize>,
}

impl IngestionEngine {
    pub fn new(source: Arc<dyn ListingSource>, settings: EngineSettings) -> Self {
        let delay = DelayPolicy {
            min_spacing: settings.min_spacing,
            low_yield_penalty: settings.low_yield_penalty,
        };
        Self {
            source,
            settings,
            delay,
            active_loops: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn active_loops(&self) -> usize {
        self.active_loops.load(Ordering::SeqCst)
    }

    /// Polls one feed until it completes, is cancelled, or fails.
    pub async fn run_feed(
        &self,
        feed: &FeedConfiguration,
        handler: &dyn ItemHandler,
        cancel: &CancellationToken,
    ) -> Result<FeedSummary, CoreError> {
        feed.validate()?;
        let mut feed = feed.clone();
        if feed.show.is_empty() {
            feed.show = self.settings.show.clone();
        }

        let registration = ActiveLoop::register(&self.active_loops);
        let started_at = chrono::Utc::now().timestamp() as f64;
        let mut watched = WatchedItems::new();
        let mut cursor: Option<String> = None;
        let mut summary = FeedSummary {
            feed: feed.name.clone(),
            outcome: LoopOutcome::Completed,
            pages: 0,
            emitted: 0,
            restarts: 0,
        };

        info!(
            feed = %feed.name,
            sort = %feed.sort,
            monitor = %feed.monitor_type,
            "Starting feed loop"
        );

        let mut state = FeedState::Fetching;
        loop {
            state = match state {
                FeedState::Fetching => {
                    if cancel.is_cancelled() {
                        FeedState::Done(LoopOutcome::Cancelled)
                    } else {
                        match self.source.fetch_page(&feed, cursor.clone(), cancel).await {
                            Ok(page) => FeedState::Evaluating(page),
                            Err(CoreError::Cancelled) => FeedState::Done(LoopOutcome::Cancelled),
                            Err(e) => {
                                e.log_error();
                                warn!(feed = %feed.name, "Feed loop aborted by fetch error");
                                return Err(e);
                            }
                        }
                    }
                }
                FeedState::Evaluating(page) => {
                    summary.pages += 1;
                    cursor = page.after.clone();

                    let emitted = match self
                        .evaluate_page(&feed, &page, started_at, &mut watched, &mut cursor, handler, cancel)
                        .await
                    {
                        Ok(Some(emitted)) => emitted,
                        Ok(None) | Err(CoreError::Cancelled) => {
                            summary.outcome = LoopOutcome::Cancelled;
                            break;
                        }
                        Err(e) => {
                            e.log_error();
                            warn!(feed = %feed.name, "Feed loop aborted by handler error");
                            return Err(e);
                        }
                    };
                    summary.emitted += emitted as u64;

                    info!(
                        feed = %feed.name,
                        emitted,
                        received = page.items.len(),
                        "Page evaluated"
                    );

                    if cursor.is_none() && !feed.should_monitor() {
                        FeedState::Done(LoopOutcome::Completed)
                    } else {
                        if cursor.is_none() {
                            summary.restarts += 1;
                            debug!(feed = %feed.name, "Cursor exhausted, restarting from first page");
                        }
                        let delay = self.delay.next_delay(
                            &page.quota,
                            registration.current(),
                            feed.page_size,
                            emitted,
                        );
                        FeedState::Delaying(delay)
                    }
                }
                FeedState::Delaying(delay) => {
                    debug!(feed = %feed.name, "Delaying {:?} before next page", delay);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => FeedState::Done(LoopOutcome::Cancelled),
                        _ = sleep(delay) => FeedState::Fetching,
                    }
                }
                FeedState::Done(outcome) => {
                    summary.outcome = outcome;
                    break;
                }
            };
        }

        info!(
            feed = %summary.feed,
            outcome = ?summary.outcome,
            pages = summary.pages,
            emitted = summary.emitted,
            "Feed loop finished"
        );
        drop(registration);
        Ok(summary)
    }

    /// Emits the page's new and changed items. `None` means cancellation was
    /// observed between items.
    #[allow(clippy::too_many_arguments)]
    async fn evaluate_page(
        &self,
        feed: &FeedConfiguration,
        page: &ListingPage,
        started_at: f64,
        watched: &mut WatchedItems,
        cursor: &mut Option<String>,
        handler: &dyn ItemHandler,
        cancel: &CancellationToken,
    ) -> Result<Option<usize>, CoreError> {
        let mut emitted = 0;
        for item in &page.items {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            if feed.monitor_type == MonitorType::SinceStart && item.created_utc < started_at {
                if feed.sort == Sort::New {
                    // Everything after this is older still.
                    *cursor = None;
                    break;
                }
                continue;
            }

            let observation = watched.observe(item);
            if !observation.should_emit() {
                continue;
            }

            match observation {
                Observation::Changed { previous } => debug!(
                    feed = %feed.name,
                    id = %item.id,
                    previous,
                    ups = item.ups,
                    "Item updated"
                ),
                _ => debug!(feed = %feed.name, id = %item.id, ups = item.ups, "Item added"),
            }

            handler.handle(item, cancel).await?;
            emitted += 1;
        }
        Ok(Some(emitted))
    }

    /// Runs one task per feed and waits for all of them.
    pub async fn run_all(
        self: Arc<Self>,
        feeds: Vec<FeedConfiguration>,
        handler: Arc<dyn ItemHandler>,
        cancel: CancellationToken,
    ) -> Vec<(String, Result<FeedSummary, CoreError>)> {
        let tasks = feeds.into_iter().map(|feed| {
            let engine = Arc::clone(&self);
            let handler = Arc::clone(&handler);
            let cancel = cancel.clone();
            let name = feed.name.clone();
            let handle = tokio::spawn(async move {
                engine.run_feed(&feed, handler.as_ref(), &cancel).await
            });
            async move {
                let result = handle.await.unwrap_or_else(|e| {
                    Err(CoreError::Internal {
                        message: format!("feed task panicked: {}", e),
                    })
                });
                (name, result)
            }
        });

        futures::future::join_all(tasks).await
    }
}
