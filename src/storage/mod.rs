pub mod blob_registry;
pub mod commit_store;
pub mod sql;

pub use sql::SqlDb;
