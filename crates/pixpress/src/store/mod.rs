//! Shared registry of compression jobs.
//!
//! The task store is the single synchronization point of the crate: every
//! other component works with ids and copies, never with references into the
//! map.

pub mod id;
pub mod task_store;

pub use id::generate_unique_id;
pub use task_store::{Job, JobStatus, StoreCounts, TaskStore};
