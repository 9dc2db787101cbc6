use crate::error::RepositoryError;
use crate::types::{Author, Item, Pagination};
use async_trait::async_trait;

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Read/write contract shared by every storage backend.
///
/// `feed` of `None` (or an empty string) addresses all feeds. Reads observe
/// every write that completed before they started.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Idempotent upsert by item id. The first insertion of an id attaches
    /// the item to its author; a later author change moves it.
    async fn add_or_update(&self, items: &[Item]) -> RepositoryResult<()>;

    async fn get_posts(
        &self,
        feed: Option<&str>,
        pagination: Pagination,
    ) -> RepositoryResult<Vec<Item>>;

    async fn get_authors(
        &self,
        feed: Option<&str>,
        pagination: Pagination,
    ) -> RepositoryResult<Vec<Author>>;

    async fn get_post_count(&self, feed: Option<&str>) -> RepositoryResult<usize>;

    async fn get_author_count(&self, feed: Option<&str>) -> RepositoryResult<usize>;

    /// Highest `ups` first, ties by id.
    async fn get_top_by_score(&self, feed: Option<&str>, n: usize) -> RepositoryResult<Vec<Item>>;

    async fn get_top_by_comments(
        &self,
        feed: Option<&str>,
        n: usize,
    ) -> RepositoryResult<Vec<Item>>;

    /// Lowest upvote ratio first; unrated items are excluded.
    async fn get_lowest_by_ratio(
        &self,
        feed: Option<&str>,
        n: usize,
    ) -> RepositoryResult<Vec<Item>>;

    async fn get_top_authors_by_post_count(
        &self,
        feed: Option<&str>,
        n: usize,
    ) -> RepositoryResult<Vec<Author>>;

    async fn get_post(&self, id: &str) -> RepositoryResult<Option<Item>>;

    /// Stops background work and releases storage.
    async fn shutdown(&self) -> RepositoryResult<()>;
}
