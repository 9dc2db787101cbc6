pub mod cache;
pub mod log;
pub mod memory;
pub mod query;


pub use cache::ViewCache;
pub use log::{LogOptions, LogRepository};
pub use memory::{MemoryOptions, MemoryRepository};

use postwatch_core::{Repository, RepositoryBackend, RepositoryConfig, RepositoryResult};
use std::sync::Arc;
use tracing::info;

/// Builds the backend selected by `config`.
pub async fn open_repository(config: &RepositoryConfig) -> RepositoryResult<Arc<dyn Repository>> {
    match config.backend {
        RepositoryBackend::Memory => {
            info!("Using in-memory repository");
            Ok(Arc::new(MemoryRepository::new(MemoryOptions::from(config))))
        }
        RepositoryBackend::Log => {
            let options = LogOptions::from_config(config)?;
            info!(root = %options.root.display(), "Using log repository");
            Ok(Arc::new(LogRepository::open(options).await?))
        }
    }
}
