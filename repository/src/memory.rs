use crate::cache::ViewCache;
use crate::query;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use postwatch_core::{
    Author, Item, Pagination, Repository, RepositoryConfig, RepositoryError, RepositoryResult,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryOptions {
    pub view_ttl: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            view_ttl: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

impl From<&RepositoryConfig> for MemoryOptions {
    fn from(config: &RepositoryConfig) -> Self {
        Self {
            view_ttl: config.view_ttl(),
            heartbeat_interval: config.heartbeat_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ViewKind {
    Posts,
    TopByScore,
    TopByComments,
    LowestByRatio,
    Authors,
    TopAuthors,
}

type ViewKey = (ViewKind, String);

#[derive(Default)]
struct MemoryState {
    items: DashMap<String, Item>,
    /// Author name to the ids currently attributed to it.
    authors: DashMap<String, BTreeSet<String>>,
}

impl MemoryState {
    fn items_in(&self, feed: Option<&str>) -> Vec<Item> {
        self.items
            .iter()
            .filter(|entry| entry.value().in_feed(feed))
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn authors_in(&self, feed: Option<&str>) -> Vec<Author> {
        // Snapshot the attribution first so no authors guard is held while
        // items are read.
        let attribution: Vec<(String, BTreeSet<String>)> = self
            .authors
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut authors: Vec<Author> = attribution
            .into_iter()
            .filter_map(|(name, ids)| {
                let posts: Vec<Item> = ids
                    .iter()
                    .filter_map(|id| self.items.get(id).map(|item| item.value().clone()))
                    .filter(|item| item.in_feed(feed))
                    .collect();
                (!posts.is_empty()).then_some(Author { name, posts })
            })
            .collect();
        authors.sort_by(|a, b| a.name.cmp(&b.name));
        authors
    }

    /// Moves `id` from its previous author to `author`. Caller holds the
    /// item's entry, so attribution changes for one id never interleave.
    fn attribute(&self, id: &str, previous: Option<&str>, author: &str) {
        if previous == Some(author) {
            return;
        }
        if let Some(previous) = previous.filter(|p| !p.is_empty()) {
            let now_empty = match self.authors.get_mut(previous) {
                Some(mut ids) => {
                    ids.remove(id);
                    ids.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.authors.remove_if(previous, |_, ids| ids.is_empty());
            }
        }
        if !author.is_empty() {
            self.authors
                .entry(author.to_string())
                .or_default()
                .insert(id.to_string());
        }
    }
}

/// In-process repository with cached derived views.
pub struct MemoryRepository {
    state: Arc<MemoryState>,
    item_views: ViewCache<ViewKey, Arc<Vec<Item>>>,
    author_views: ViewCache<ViewKey, Arc<Vec<Author>>>,
    cancel: CancellationToken,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl MemoryRepository {
    /// Must be called inside a tokio runtime; starts the heartbeat task.
    pub fn new(options: MemoryOptions) -> Self {
        let state = Arc::new(MemoryState::default());
        let cancel = CancellationToken::new();
        let heartbeat = spawn_heartbeat(Arc::clone(&state), options.heartbeat_interval, cancel.clone());

        Self {
            state,
            item_views: ViewCache::new(options.view_ttl),
            author_views: ViewCache::new(options.view_ttl),
            cancel,
            heartbeat: Mutex::new(Some(heartbeat)),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> RepositoryResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RepositoryError::Closed);
        }
        Ok(())
    }

    async fn item_view(&self, kind: ViewKind, feed: Option<&str>) -> Arc<Vec<Item>> {
        let key = (kind, feed.unwrap_or_default().to_ascii_lowercase());
        let state = &self.state;
        self.item_views
            .get_or_build(key, || async move {
                debug!("Building {:?} view for {:?}", kind, feed);
                let mut items = state.items_in(feed);
                let items = match kind {
                    ViewKind::TopByScore => {
                        query::rank_by_score(&mut items);
                        items
                    }
                    ViewKind::TopByComments => {
                        query::rank_by_comments(&mut items);
                        items
                    }
                    ViewKind::LowestByRatio => query::rank_by_ratio(items),
                    _ => {
                        query::sort_by_id(&mut items);
                        items
                    }
                };
                Arc::new(items)
            })
            .await
    }

    async fn author_view(&self, kind: ViewKind, feed: Option<&str>) -> Arc<Vec<Author>> {
        let key = (kind, feed.unwrap_or_default().to_ascii_lowercase());
        let state = &self.state;
        self.author_views
            .get_or_build(key, || async move {
                let mut authors = state.authors_in(feed);
                if kind == ViewKind::TopAuthors {
                    query::rank_authors(&mut authors);
                }
                Arc::new(authors)
            })
            .await
    }
}

fn spawn_heartbeat(
    state: Arc<MemoryState>,
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
                    info!(
                        items = state.items.len(),
                        authors = state.authors.len(),
                        "Memory repository heartbeat"
                    );
                }
            }
        }
        debug!("Memory repository heartbeat stopped");
    })
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn add_or_update(&self, items: &[Item]) -> RepositoryResult<()> {
        self.ensure_open()?;

        for item in items {
            let (guard, previous_author) = match self.state.items.entry(item.id.clone()) {
                Entry::Occupied(mut occupied) => {
                    let previous = occupied.insert(item.clone());
                    (occupied.into_ref(), Some(previous.author))
                }
                Entry::Vacant(vacant) => (vacant.insert(item.clone()), None),
            };
            self.state
                .attribute(&item.id, previous_author.as_deref(), &item.author);
            drop(guard);
        }

        if !items.is_empty() {
            self.item_views.clear();
            self.author_views.clear();
        }
        Ok(())
    }

    async fn get_posts(
        &self,
        feed: Option<&str>,
        pagination: Pagination,
    ) -> RepositoryResult<Vec<Item>> {
        self.ensure_open()?;
        let view = self.item_view(ViewKind::Posts, feed).await;
        Ok(pagination.apply(&view))
    }

    async fn get_authors(
        &self,
        feed: Option<&str>,
        pagination: Pagination,
    ) -> RepositoryResult<Vec<Author>> {
        self.ensure_open()?;
        let view = self.author_view(ViewKind::Authors, feed).await;
        Ok(pagination.apply(&view))
    }

    async fn get_post_count(&self, feed: Option<&str>) -> RepositoryResult<usize> {
        self.ensure_open()?;
        Ok(match feed.filter(|f| !f.is_empty()) {
            None => self.state.items.len(),
            Some(_) => self
                .state
                .items
                .iter()
                .filter(|entry| entry.value().in_feed(feed))
                .count(),
        })
    }

    async fn get_author_count(&self, feed: Option<&str>) -> RepositoryResult<usize> {
        self.ensure_open()?;
        Ok(match feed.filter(|f| !f.is_empty()) {
            None => self.state.authors.len(),
            Some(_) => self.state.authors_in(feed).len(),
        })
    }

    async fn get_top_by_score(&self, feed: Option<&str>, n: usize) -> RepositoryResult<Vec<Item>> {
        self.ensure_open()?;
        let view = self.item_view(ViewKind::TopByScore, feed).await;
        Ok(query::take(&view, n))
    }

    async fn get_top_by_comments(
        &self,
        feed: Option<&str>,
        n: usize,
    ) -> RepositoryResult<Vec<Item>> {
        self.ensure_open()?;
        let view = self.item_view(ViewKind::TopByComments, feed).await;
        Ok(query::take(&view, n))
    }

    async fn get_lowest_by_ratio(
        &self,
        feed: Option<&str>,
        n: usize,
    ) -> RepositoryResult<Vec<Item>> {
        self.ensure_open()?;
        let view = self.item_view(ViewKind::LowestByRatio, feed).await;
        Ok(query::take(&view, n))
    }

    async fn get_top_authors_by_post_count(
        &self,
        feed: Option<&str>,
        n: usize,
    ) -> RepositoryResult<Vec<Author>> {
        self.ensure_open()?;
        let view = self.author_view(ViewKind::TopAuthors, feed).await;
        Ok(query::take(&view, n))
    }

    async fn get_post(&self, id: &str) -> RepositoryResult<Option<Item>> {
        self.ensure_open()?;
        Ok(self.state.items.get(id).map(|item| item.value().clone()))
    }

    async fn shutdown(&self) -> RepositoryResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(RepositoryError::Closed);
        }
        self.cancel.cancel();
        if let Some(handle) = self.heartbeat.lock().await.take() {
            let _ = handle.await;
        }
        info!(
            items = self.state.items.len(),
            "Memory repository shut down"
        );
        Ok(())
    }
}

impl Drop for MemoryRepository {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
