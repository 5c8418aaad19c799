pub mod blob_processor;
pub mod checkpoint;
pub mod git;
pub mod indexer;
pub mod metadata;

pub use indexer::{BranchStrategy, TemporalIndexer};
