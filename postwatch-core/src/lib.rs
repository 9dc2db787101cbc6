pub mod config;
pub mod error;
pub mod error_utils;
pub mod publisher;
pub mod repository;
pub mod types;

pub use config::*;
pub use error::*;
pub use error_utils::*;
pub use publisher::Publisher;
pub use repository::{Repository, RepositoryResult};
pub use types::*;
