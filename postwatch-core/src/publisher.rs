use crate::types::Item;
use async_trait::async_trait;

/// Fire-and-forget downstream delivery of ingested items.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, item: &Item, topic: &str);
}
