mod handler;

pub use handler::{WatchHandle, WatchHandler, WatchStatus, WatchStopStatus};
