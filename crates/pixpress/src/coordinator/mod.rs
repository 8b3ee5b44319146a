//! Compression orchestration: job submission, recompression, bulk
//! operations and the retry policy.

pub mod cycle;
pub mod retry;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::broadcast;

use crate::broadcast::{JobEvent, JobEventBroadcaster};
use crate::config::AppConfig;
use crate::engine::CompressionEngine;
use crate::error::{PixpressError, StoreError};
use crate::store::{generate_unique_id, Job, StoreCounts, TaskStore};
use crate::worker::WorkerPool;

pub use cycle::{CycleRequest, CycleRunner};
pub use retry::RetryPolicy;

/// Facade over the task store, the event publisher and the worker pool.
///
/// This is the single entry point a shell (filesystem watcher, UI command
/// layer) talks to. All operations are safe to call concurrently.
pub struct Coordinator {
    store: Arc<TaskStore>,
    events: JobEventBroadcaster,
    pool: WorkerPool,
    default_quality: u8,
}

impl Coordinator {
    pub fn new(config: &AppConfig, engine: Arc<dyn CompressionEngine>) -> Self {
        let store = Arc::new(TaskStore::new());
        let events = JobEventBroadcaster::default();
        let runner = Arc::new(CycleRunner::new(
            Arc::clone(&store),
            events.clone(),
            engine,
            config.retry.clone(),
            Duration::from_secs(config.engine_timeout_secs),
        ));
        let pool = WorkerPool::new(runner, config.worker_count.max(1));

        Self {
            store,
            events,
            pool,
            default_quality: config.quality.clamp(1, 100),
        }
    }

    /// Subscribes to the ordered notification stream.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Creates a job for `source_path` and begins its compression cycle
    /// asynchronously. Returns the allocated job id.
    pub fn submit(&self, source_path: PathBuf) -> Result<String, PixpressError> {
        let original_size = match fs::metadata(&source_path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!(
                    "Could not read size of {}: {}, submitting anyway",
                    source_path.display(),
                    e
                );
                0
            }
        };

        let id = generate_unique_id(&self.store);
        let job = Job::new(&id, source_path.clone(), original_size, self.default_quality);
        let created_at = job.created_at;
        self.store.insert(job).map_err(PixpressError::Store)?;

        self.events.send(JobEvent::Created {
            id: id.clone(),
            source_path: source_path.display().to_string(),
            created_at,
        });

        self.pool
            .submit(CycleRequest {
                id: id.clone(),
                quality: self.default_quality,
            })
            .map_err(PixpressError::Worker)?;

        info!("Submitted job {} for {}", id, source_path.display());
        Ok(id)
    }

    /// Submits a batch of files, skipping (and logging) the ones that fail.
    pub fn submit_many(&self, paths: Vec<PathBuf>) -> Vec<String> {
        let mut ids = Vec::with_capacity(paths.len());
        for path in paths {
            match self.submit(path) {
                Ok(id) => ids.push(id),
                Err(e) => error!("Failed to submit job: {}", e),
            }
        }
        ids
    }

    /// Starts a new compression cycle for an existing finished job at the
    /// given quality. The record keeps its id; progress and sizes are reset
    /// by the cycle itself. A job that is still pending or compressing is
    /// rejected, so a record never has two cycles in flight.
    pub fn recompress(&self, id: &str, quality: u8) -> Result<(), PixpressError> {
        match self.store.get(id) {
            None => {
                return Err(PixpressError::Store(StoreError::NotFound(id.to_string())));
            }
            Some(job) if !job.is_finished() => {
                return Err(PixpressError::Store(StoreError::InProgress(id.to_string())));
            }
            Some(_) => {}
        }
        self.pool
            .submit(CycleRequest {
                id: id.to_string(),
                quality: quality.clamp(1, 100),
            })
            .map_err(PixpressError::Worker)
    }

    /// Removes one job. Remove-then-emit: the deleted event only goes out
    /// for a record that actually existed.
    pub fn delete_task(&self, id: &str) -> Option<Job> {
        let removed = self.store.remove(id);
        if removed.is_some() {
            self.events.send(JobEvent::Deleted { id: id.to_string() });
            info!("Deleted job {}", id);
        }
        removed
    }

    /// Atomically removes all finished jobs and emits a deleted event per
    /// record. In-flight jobs are untouched and finish normally.
    pub fn clear_history(&self) -> Vec<Job> {
        let removed = self.store.snapshot_and_clear(|job| job.is_finished());
        for job in &removed {
            self.events.send(JobEvent::Deleted { id: job.id.clone() });
        }
        info!("Cleared {} finished jobs from history", removed.len());
        removed
    }

    /// Deletes the original files of all completed jobs. The affected
    /// records are collected and marked in one critical section; the file
    /// deletions happen outside the lock. Returns the number of files
    /// actually removed.
    pub fn delete_originals(&self) -> usize {
        let marked = self.store.mark_originals_deleted();

        let mut deleted_ids = Vec::new();
        for job in &marked {
            match fs::remove_file(&job.source_path) {
                Ok(()) => {
                    info!("Deleted original: {}", job.source_path.display());
                    deleted_ids.push(job.id.clone());
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    deleted_ids.push(job.id.clone());
                }
                Err(e) => {
                    error!("Failed to delete {}: {}", job.source_path.display(), e);
                }
            }
        }

        let count = deleted_ids.len();
        if !deleted_ids.is_empty() {
            self.events
                .send(JobEvent::OriginalsDeleted { ids: deleted_ids });
        }
        count
    }

    /// Consistent point-in-time copy of all jobs for bulk UI refresh.
    pub fn list(&self) -> Vec<Job> {
        self.store.list()
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.store.get(id)
    }

    pub fn counts(&self) -> StoreCounts {
        self.store.counts()
    }

    /// Signals the worker pool to stop and waits for in-flight cycles.
    pub fn shutdown(self) {
        self.pool.shutdown();
        self.pool.wait();
    }
}
