use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;

struct Slot<V> {
    created: Instant,
    cell: OnceCell<V>,
}

impl<V> Slot<V> {
    fn new() -> Self {
        Self {
            created: Instant::now(),
            cell: OnceCell::new(),
        }
    }
}

/// Time-bounded cache where concurrent misses on one key share a single
/// build.
pub struct ViewCache<K, V> {
    ttl: Duration,
    slots: DashMap<K, Arc<Slot<V>>>,
}

impl<K, V> ViewCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: DashMap::new(),
        }
    }

    pub async fn get_or_build<F, Fut>(&self, key: K, build: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let slot = {
            let mut entry = self.slots.entry(key).or_insert_with(|| Arc::new(Slot::new()));
            // A slot still being built is never replaced.
            if entry.cell.initialized() && entry.created.elapsed() >= self.ttl {
                *entry = Arc::new(Slot::new());
            }
            Arc::clone(entry.value())
        };
        slot.cell.get_or_init(build).await.clone()
    }

    pub fn clear(&self) {
        self.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_build_once() {
        let cache: Arc<ViewCache<&str, usize>> = Arc::new(ViewCache::new(Duration::from_secs(60)));
        let builds = Arc::new(AtomicUsize::new(0));

        let tasks = (0..5).map(|_| {
            let cache = Arc::clone(&cache);
            let builds = Arc::clone(&builds);
            tokio::spawn(async move {
                cache
                    .get_or_build("posts", || async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        builds.fetch_add(1, Ordering::SeqCst) + 1
                    })
                    .await
            })
        });

        for task in tasks.collect::<Vec<_>>() {
            assert_eq!(task.await.unwrap(), 1);
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_rebuilt() {
        let cache: ViewCache<&str, u32> = ViewCache::new(Duration::from_secs(60));

        assert_eq!(cache.get_or_build("k", || async { 1 }).await, 1);
        assert_eq!(cache.get_or_build("k", || async { 2 }).await, 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get_or_build("k", || async { 3 }).await, 3);
    }

    #[tokio::test]
    async fn test_clear_forces_rebuild() {
        let cache: ViewCache<&str, u32> = ViewCache::new(Duration::from_secs(60));
        cache.get_or_build("k", || async { 1 }).await;
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get_or_build("k", || async { 2 }).await, 2);
    }
}
