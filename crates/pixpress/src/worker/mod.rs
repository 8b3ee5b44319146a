//! Background execution: the bounded compression worker pool and the
//! filesystem watcher that feeds it.

pub mod pool;
pub mod watcher;

pub use pool::WorkerPool;
pub use watcher::DirectoryWatcher;
