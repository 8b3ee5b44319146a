pub mod broadcast;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod store;
pub mod worker;

pub use broadcast::{JobEvent, JobEventBroadcaster};
pub use config::{AppConfig, ConfigManager, DEFAULT_QUALITY};
pub use coordinator::{Coordinator, RetryPolicy};
pub use engine::{compressed_output_path, CompressionEngine, ImageFormat, ImageRsEngine};
pub use error::{ConfigError, EngineError, PixpressError, Result, StoreError, WorkerError};
pub use store::{generate_unique_id, Job, JobStatus, StoreCounts, TaskStore};
pub use worker::{DirectoryWatcher, WorkerPool};
