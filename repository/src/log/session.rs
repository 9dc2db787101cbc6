use postwatch_core::{RepositoryError, RepositoryResult};
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::debug;

const MAX_SESSIONS: usize = 1024;

/// Bounded pool of read handles on one table's object log.
pub struct SessionPool {
    path: PathBuf,
    size: u32,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<File>>,
}

impl SessionPool {
    pub fn new(path: PathBuf, size: usize) -> Self {
        let size = size.clamp(1, MAX_SESSIONS) as u32;
        Self {
            path,
            size,
            permits: Arc::new(Semaphore::new(size as usize)),
            idle: Mutex::new(Vec::new()),
        }
    }

    pub fn size(&self) -> usize {
        self.size as usize
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Waits for a free session. Fails with `Closed` once the pool is drained.
    pub async fn acquire(&self) -> RepositoryResult<Session<'_>> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| RepositoryError::Closed)?;

        let idle = self.idle.lock().unwrap_or_else(|e| e.into_inner()).pop();
        let file = match idle {
            Some(file) => file,
            None => File::open(&self.path).await?,
        };

        Ok(Session {
            pool: self,
            file: Some(file),
            _permit: permit,
        })
    }

    /// Waits for every session to come back, then refuses new ones.
    pub async fn drain(&self) {
        match self.permits.acquire_many(self.size).await {
            Ok(all) => {
                self.permits.close();
                drop(all);
            }
            Err(_) => debug!("Session pool already drained"),
        }
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn give_back(&self, file: File) {
        if !self.permits.is_closed() {
            self.idle.lock().unwrap_or_else(|e| e.into_inner()).push(file);
        }
    }
}

pub struct Session<'a> {
    pool: &'a SessionPool,
    file: Option<File>,
    _permit: SemaphorePermit<'a>,
}

impl Session<'_> {
    pub async fn read_at(&mut self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "session released"))?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            self.pool.give_back(file);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    async fn pool_with(contents: &[u8], size: usize) -> (SessionPool, PathBuf) {
        let dir = std::env::temp_dir().join(format!("postwatch_test_{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("object.log");
        tokio::fs::write(&path, contents).await.unwrap();
        (SessionPool::new(path, size), dir)
    }

    #[tokio::test]
    async fn test_read_at_offset() {
        let (pool, dir) = pool_with(b"keyvalue", 2).await;
        let mut session = pool.acquire().await.unwrap();
        assert_eq!(session.read_at(3, 5).await.unwrap(), b"value");
        drop(session);
        assert_eq!(pool.available(), 2);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_pool_bounds_sessions() {
        let (pool, dir) = pool_with(b"x", 1).await;
        let held = pool.acquire().await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(20), pool.acquire()).await;
        assert!(blocked.is_err());

        drop(held);
        assert!(pool.acquire().await.is_ok());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_drained_pool_refuses_sessions() {
        let (pool, dir) = pool_with(b"x", 3).await;
        pool.drain().await;
        assert!(matches!(pool.acquire().await, Err(RepositoryError::Closed)));
        let _ = std::fs::remove_dir_all(dir);
    }
}
