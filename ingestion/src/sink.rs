use crate::engine::ItemHandler;
use async_trait::async_trait;
use postwatch_core::{CoreError, ErrorExt, Item, Publisher, Repository};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Stores each emitted item and optionally forwards it downstream.
pub struct RepositorySink {
    repository: Arc<dyn Repository>,
    publisher: Option<(Arc<dyn Publisher>, String)>,
}

impl RepositorySink {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self {
            repository,
            publisher: None,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>, topic: impl Into<String>) -> Self {
        self.publisher = Some((publisher, topic.into()));
        self
    }
}

#[async_trait]
impl ItemHandler for RepositorySink {
    async fn handle(&self, item: &Item, cancel: &CancellationToken) -> Result<(), CoreError> {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        self.repository
            .add_or_update(std::slice::from_ref(item))
            .await
            .map_err(|e| {
                e.log_error();
                CoreError::from(e)
            })?;
        debug!(id = %item.id, feed = %item.feed, "Item stored");

        if let Some((publisher, topic)) = &self.publisher {
            publisher.publish(item, topic).await;
        }
        Ok(())
    }
}
