pub mod delay;
pub mod engine;
pub mod publish;
pub mod sink;
pub mod watch;

pub use delay::DelayPolicy;
pub use engine::{
    EngineSettings, FeedSummary, IngestionEngine, ItemHandler, ListingSource, LoopOutcome,
};
pub use publish::HttpPublisher;
pub use sink::RepositorySink;
pub use watch::{Observation, WatchedItems};
