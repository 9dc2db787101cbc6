//! Durable repository built on per-table primary/object logs.

pub mod checkpoint;
pub mod session;
pub mod store;

pub use checkpoint::CheckpointInfo;
pub use store::{LogTable, Slot, RECORD_SIZE};

use crate::query;
use async_trait::async_trait;
use postwatch_core::{
    Author, ErrorExt, Item, Pagination, Repository, RepositoryConfig, RepositoryError,
    RepositoryResult,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const POSTS_TABLE: &str = "posts";
pub const AUTHORS_TABLE: &str = "authors";
const PROGRESS_EVERY: u64 = 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct LogOptions {
    pub root: PathBuf,
    pub checkpoint_interval: Duration,
    pub session_pool_size: usize,
}

impl LogOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            checkpoint_interval: Duration::from_secs(30),
            session_pool_size: 16,
        }
    }

    pub fn with_checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    pub fn with_session_pool_size(mut self, size: usize) -> Self {
        self.session_pool_size = size;
        self
    }

    pub fn from_config(config: &RepositoryConfig) -> RepositoryResult<Self> {
        let root = config
            .root
            .clone()
            .ok_or_else(|| RepositoryError::Storage {
                table: "*".to_string(),
                reason: "log backend requires a root directory".to_string(),
            })?;
        Ok(Self::new(root)
            .with_checkpoint_interval(config.checkpoint_interval())
            .with_session_pool_size(config.session_pool_size))
    }
}

struct LogInner {
    posts: LogTable,
    authors: LogTable,
    /// Item writes hold it shared; checkpoints hold it exclusively so both
    /// tables are snapshotted at the same write boundary.
    barrier: RwLock<()>,
    writes: Mutex<u64>,
}

impl LogInner {
    async fn checkpoint_all(&self) -> RepositoryResult<()> {
        let _quiesced = self.barrier.write().await;
        self.posts.checkpoint().await?;
        self.authors.checkpoint().await?;
        Ok(())
    }

    /// Rewrites author counters that disagree with the posts table.
    async fn reconcile_authors(&self) -> RepositoryResult<usize> {
        let mut expected: HashMap<String, i64> = HashMap::new();
        for item in self.items(None).await? {
            if !item.author.is_empty() {
                *expected.entry(item.author).or_default() += 1;
            }
        }

        let mut corrections = Vec::new();
        for (name, count) in self.counters().await? {
            let actual = expected.remove(&name).unwrap_or(0);
            if actual != count {
                corrections.push((name, actual));
            }
        }
        corrections.extend(expected);

        for (name, count) in &corrections {
            self.authors.upsert(name, encode_counter(*count)).await?;
        }
        Ok(corrections.len())
    }

    async fn record_write(&self) {
        let mut writes = self.writes.lock().await;
        *writes += 1;
        if *writes % PROGRESS_EVERY == 0 {
            info!(writes = *writes, "Log repository write progress");
        }
    }

    /// Adds `delta` to an author's post counter.
    async fn adjust_author(&self, name: &str, delta: i64) -> RepositoryResult<()> {
        if name.is_empty() {
            return Ok(());
        }
        self.authors
            .modify(name, |previous| {
                let count = previous.map(decode_counter).unwrap_or(0);
                encode_counter(count + delta)
            })
            .await?;
        Ok(())
    }

    async fn items(&self, feed: Option<&str>) -> RepositoryResult<Vec<Item>> {
        let entries = self.posts.scan().await?;
        Ok(decode_items(entries)
            .into_iter()
            .filter(|item| item.in_feed(feed))
            .collect())
    }

    async fn counters(&self) -> RepositoryResult<Vec<(String, i64)>> {
        Ok(self
            .authors
            .scan()
            .await?
            .into_iter()
            .map(|(name, raw)| {
                let count = decode_counter(&raw);
                (name, count)
            })
            .collect())
    }
}

fn decode_counter(raw: &[u8]) -> i64 {
    serde_json::from_slice(raw).unwrap_or_else(|e| {
        warn!("Unreadable author counter, treating as zero: {}", e);
        0
    })
}

fn encode_counter(count: i64) -> Vec<u8> {
    count.to_string().into_bytes()
}

fn decode_items(entries: Vec<(String, Vec<u8>)>) -> Vec<Item> {
    entries
        .into_iter()
        .filter_map(|(id, raw)| match serde_json::from_slice::<Item>(&raw) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(id = %id, "Skipping malformed post record: {}", e);
                None
            }
        })
        .collect()
}

/// Repository persisted under `<root>/posts` and `<root>/authors`.
pub struct LogRepository {
    inner: Arc<LogInner>,
    cancel: CancellationToken,
    checkpointer: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl LogRepository {
    pub async fn open(options: LogOptions) -> RepositoryResult<Self> {
        tokio::fs::create_dir_all(&options.root).await?;
        let posts = LogTable::open(&options.root, POSTS_TABLE, options.session_pool_size).await?;
        let authors =
            LogTable::open(&options.root, AUTHORS_TABLE, options.session_pool_size).await?;

        let inner = Arc::new(LogInner {
            posts,
            authors,
            barrier: RwLock::new(()),
            writes: Mutex::new(0),
        });

        let corrected = inner.reconcile_authors().await?;
        if corrected > 0 {
            warn!(corrected, "Author counters rebuilt from recovered posts");
        }
        let cancel = CancellationToken::new();
        let checkpointer =
            spawn_checkpointer(Arc::clone(&inner), options.checkpoint_interval, cancel.clone());

        info!(root = %options.root.display(), "Log repository opened");
        Ok(Self {
            inner,
            cancel,
            checkpointer: Mutex::new(Some(checkpointer)),
            closed: AtomicBool::new(false),
        })
    }

    /// Checkpoints both tables now.
    pub async fn checkpoint(&self) -> RepositoryResult<()> {
        self.ensure_open()?;
        self.inner.checkpoint_all().await
    }

    fn ensure_open(&self) -> RepositoryResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RepositoryError::Closed);
        }
        Ok(())
    }

    async fn write_item(&self, item: &Item) -> RepositoryResult<()> {
        let encoded = serde_json::to_vec(item).map_err(|e| RepositoryError::Storage {
            table: POSTS_TABLE.to_string(),
            reason: e.to_string(),
        })?;

        let _writing = self.inner.barrier.read().await;
        let previous = self.inner.posts.upsert(&item.id, encoded).await?;
        let previous_author = match previous {
            None => None,
            Some(raw) => match serde_json::from_slice::<Item>(&raw) {
                Ok(old) => Some(old.author),
                Err(e) => {
                    warn!(id = %item.id, "Previous post record unreadable: {}", e);
                    None
                }
            },
        };

        if previous_author.as_deref() != Some(item.author.as_str()) {
            if let Some(previous) = previous_author.as_deref() {
                self.inner.adjust_author(previous, -1).await?;
            }
            self.inner.adjust_author(&item.author, 1).await?;
        }

        self.inner.record_write().await;
        Ok(())
    }
}

fn spawn_checkpointer(
    inner: Arc<LogInner>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = inner.checkpoint_all().await {
                        e.log_error();
                    }
                }
            }
        }
        debug!("Checkpoint task stopped");
    })
}

#[async_trait]
impl Repository for LogRepository {
    async fn add_or_update(&self, items: &[Item]) -> RepositoryResult<()> {
        self.ensure_open()?;
        for item in items {
            if let Err(e) = self.write_item(item).await {
                error!(id = %item.id, "Write failed, abandoning remaining batch");
                e.log_error();
                return Err(e);
            }
        }
        Ok(())
    }

    async fn get_posts(
        &self,
        feed: Option<&str>,
        pagination: Pagination,
    ) -> RepositoryResult<Vec<Item>> {
        self.ensure_open()?;
        match feed.filter(|f| !f.is_empty()) {
            None => Ok(decode_items(self.inner.posts.page(pagination).await?)),
            Some(_) => Ok(pagination.apply(&self.inner.items(feed).await?)),
        }
    }

    async fn get_authors(
        &self,
        feed: Option<&str>,
        pagination: Pagination,
    ) -> RepositoryResult<Vec<Author>> {
        self.ensure_open()?;
        if feed.filter(|f| !f.is_empty()).is_some() {
            let authors = query::group_authors(self.inner.items(feed).await?);
            return Ok(pagination.apply(&authors));
        }

        let page = self.inner.authors.page(pagination).await?;
        let names: Vec<String> = page
            .into_iter()
            .filter(|(_, raw)| decode_counter(raw) > 0)
            .map(|(name, _)| name)
            .collect();
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_author: HashMap<String, Vec<Item>> = HashMap::new();
        for item in self.inner.items(None).await? {
            by_author.entry(item.author.clone()).or_default().push(item);
        }
        Ok(names
            .into_iter()
            .map(|name| {
                let mut posts = by_author.remove(&name).unwrap_or_default();
                query::sort_by_id(&mut posts);
                Author { name, posts }
            })
            .collect())
    }

    async fn get_post_count(&self, feed: Option<&str>) -> RepositoryResult<usize> {
        self.ensure_open()?;
        match feed.filter(|f| !f.is_empty()) {
            None => Ok(self.inner.posts.len().await),
            Some(_) => Ok(self.inner.items(feed).await?.len()),
        }
    }

    async fn get_author_count(&self, feed: Option<&str>) -> RepositoryResult<usize> {
        self.ensure_open()?;
        match feed.filter(|f| !f.is_empty()) {
            None => Ok(self
                .inner
                .counters()
                .await?
                .iter()
                .filter(|(_, count)| *count > 0)
                .count()),
            Some(_) => Ok(query::group_authors(self.inner.items(feed).await?).len()),
        }
    }

    async fn get_top_by_score(&self, feed: Option<&str>, n: usize) -> RepositoryResult<Vec<Item>> {
        self.ensure_open()?;
        let mut items = self.inner.items(feed).await?;
        query::rank_by_score(&mut items);
        items.truncate(n);
        Ok(items)
    }

    async fn get_top_by_comments(
        &self,
        feed: Option<&str>,
        n: usize,
    ) -> RepositoryResult<Vec<Item>> {
        self.ensure_open()?;
        let mut items = self.inner.items(feed).await?;
        query::rank_by_comments(&mut items);
        items.truncate(n);
        Ok(items)
    }

    async fn get_lowest_by_ratio(
        &self,
        feed: Option<&str>,
        n: usize,
    ) -> RepositoryResult<Vec<Item>> {
        self.ensure_open()?;
        let mut items = query::rank_by_ratio(self.inner.items(feed).await?);
        items.truncate(n);
        Ok(items)
    }

    async fn get_top_authors_by_post_count(
        &self,
        feed: Option<&str>,
        n: usize,
    ) -> RepositoryResult<Vec<Author>> {
        self.ensure_open()?;
        let mut authors = query::group_authors(self.inner.items(feed).await?);
        query::rank_authors(&mut authors);
        authors.truncate(n);
        Ok(authors)
    }

    async fn get_post(&self, id: &str) -> RepositoryResult<Option<Item>> {
        self.ensure_open()?;
        match self.inner.posts.get(id).await? {
            Some(raw) => Ok(decode_items(vec![(id.to_string(), raw)]).pop()),
            None => Ok(None),
        }
    }

    async fn shutdown(&self) -> RepositoryResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(RepositoryError::Closed);
        }

        self.cancel.cancel();
        if let Some(handle) = self.checkpointer.lock().await.take() {
            let _ = handle.await;
        }

        let result = self.inner.checkpoint_all().await;
        if let Err(e) = &result {
            e.log_error();
        }

        self.inner.posts.close().await;
        self.inner.authors.close().await;
        let writes = *self.inner.writes.lock().await;
        info!(writes, "Log repository shut down");
        result
    }
}

impl Drop for LogRepository {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
