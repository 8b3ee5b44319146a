use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError};
use log::{info, warn};

use crate::broadcast::{JobEvent, JobEventBroadcaster};
use crate::coordinator::retry::RetryPolicy;
use crate::engine::{compressed_output_path, CompressionEngine};
use crate::error::EngineError;
use crate::store::{JobStatus, TaskStore};

/// One unit of work for the pool: run a compression cycle for `id`.
#[derive(Debug, Clone)]
pub struct CycleRequest {
    pub id: String,
    pub quality: u8,
}

enum EngineSignal {
    Progress(u8),
    Done(Result<u64, EngineError>),
}

/// Drives a single job from `Pending` (or a terminal state, on
/// recompression) to `Completed` or `Failed`.
///
/// Deletion is tolerated at every step: each store mutation re-verifies the
/// record still exists, and a missing record ends the cycle with a warning,
/// never a panic and never a resurrection.
pub struct CycleRunner {
    store: Arc<TaskStore>,
    events: JobEventBroadcaster,
    engine: Arc<dyn CompressionEngine>,
    retry: RetryPolicy,
    engine_timeout: Duration,
}

impl CycleRunner {
    pub fn new(
        store: Arc<TaskStore>,
        events: JobEventBroadcaster,
        engine: Arc<dyn CompressionEngine>,
        retry: RetryPolicy,
        engine_timeout: Duration,
    ) -> Self {
        Self {
            store,
            events,
            engine,
            retry,
            engine_timeout,
        }
    }

    pub fn run(&self, request: CycleRequest) {
        let id = request.id;

        let source = match self.store.get(&id) {
            Some(job) => job.source_path,
            None => {
                warn!("Job {} deleted before its cycle began, skipping", id);
                return;
            }
        };

        // Size is re-read outside the lock so recompression observes the
        // current file.
        let fresh_size = fs::metadata(&source).map(|m| m.len()).ok();

        // The begin mutation doubles as the admission check: only one cycle
        // may hold a record in `Compressing`, so a duplicate request loses
        // here, at the store's single synchronization point.
        let requested_quality = request.quality.clamp(1, 100);
        let mut already_running = false;
        let begun = self.store.mutate(&id, |job| {
            if job.status == JobStatus::Compressing {
                already_running = true;
                return;
            }
            job.status = JobStatus::Compressing;
            job.progress = 0;
            job.quality = requested_quality;
            job.compressed_size = None;
            job.error = None;
            if let Some(size) = fresh_size {
                job.original_size = size;
            }
        });
        if !begun {
            warn!("Job {} deleted before compression began, skipping", id);
            return;
        }
        if already_running {
            warn!("Job {} already has a cycle in flight, dropping duplicate request", id);
            return;
        }

        self.events.send(JobEvent::Started {
            id: id.clone(),
            source_path: source.display().to_string(),
        });

        let output = match compressed_output_path(&source) {
            Some(path) => path,
            None => {
                self.commit_failure(
                    &id,
                    &format!("Could not derive output path for {}", source.display()),
                );
                return;
            }
        };

        let original_size = match self.store.get(&id) {
            Some(job) => job.original_size,
            None => {
                warn!("Job {} deleted mid-compression, cycle exits", id);
                return;
            }
        };

        let mut quality = requested_quality;
        let mut attempts = 0u32;
        let final_size = loop {
            if !self.checkpoint(&id, 10) {
                return;
            }

            match self.invoke_engine(&id, &source, &output, quality) {
                Ok(size) => {
                    if RetryPolicy::grew(original_size, size) {
                        if let Some(next_quality) = self.retry.next_quality(attempts, quality) {
                            attempts += 1;
                            info!(
                                "Job {}: compressed size {} >= original {}, retrying at quality {} (attempt {})",
                                id, size, original_size, next_quality, attempts
                            );
                            self.events.send(JobEvent::Retry {
                                id: id.clone(),
                                attempt: attempts,
                                prior_quality: quality,
                                new_quality: next_quality,
                                original_size,
                                compressed_size: size,
                            });

                            // The oversized result is still the last finished
                            // attempt; keep its size on the record in case a
                            // later attempt fails outright.
                            let live = self.store.mutate(&id, |job| {
                                job.progress = 0;
                                job.quality = next_quality;
                                job.compressed_size = Some(size);
                            });
                            if !live {
                                warn!("Job {} deleted during retry, cycle exits", id);
                                return;
                            }
                            quality = next_quality;
                            continue;
                        }
                        info!(
                            "Job {}: accepting {} byte result after {} retries (original {})",
                            id, size, attempts, original_size
                        );
                    }
                    break size;
                }
                Err(e) => {
                    warn!("Job {}: engine failed: {}", id, e);
                    self.commit_failure(&id, &e.to_string());
                    return;
                }
            }
        };

        if !self.checkpoint(&id, 100) {
            return;
        }

        let committed = self.store.mutate(&id, |job| {
            job.status = JobStatus::Completed;
            job.compressed_size = Some(final_size);
            job.quality = quality;
            job.output_path = Some(output.clone());
        });
        if !committed {
            warn!("Job {} deleted before completion could be recorded", id);
            return;
        }

        // Terminal event carries the full record so the UI never needs a
        // placeholder state.
        match self.store.get(&id) {
            Some(job) => self.events.send(JobEvent::Completed {
                id: id.clone(),
                job,
            }),
            None => warn!("Job {} deleted right after completion", id),
        }
    }

    /// Commits a progress checkpoint and publishes it. Returns whether the
    /// record still existed.
    fn checkpoint(&self, id: &str, percent: u8) -> bool {
        let mut committed = percent;
        let live = self.store.mutate(id, |job| {
            // Monotonic within an attempt; resets to 0 happen at attempt
            // boundaries, never here.
            job.progress = job.progress.max(percent);
            committed = job.progress;
        });
        if live {
            self.events.send(JobEvent::Progress {
                id: id.to_string(),
                percent: committed,
            });
        } else {
            warn!("Job {} deleted mid-compression, dropping progress update", id);
        }
        live
    }

    fn commit_failure(&self, id: &str, error: &str) {
        let committed = self.store.mutate(id, |job| {
            job.status = JobStatus::Failed;
            job.error = Some(error.to_string());
        });
        if committed {
            self.events.send(JobEvent::Failed {
                id: id.to_string(),
                error: error.to_string(),
            });
        } else {
            warn!("Job {} deleted before failure could be recorded", id);
        }
    }

    /// Runs the engine on its own thread and waits with a deadline, so a
    /// wedged engine never blocks the cycle indefinitely. Engine-driven
    /// progress is clamped between the fixed 10% and 100% checkpoints.
    fn invoke_engine(
        &self,
        id: &str,
        input: &Path,
        output: &Path,
        quality: u8,
    ) -> Result<u64, EngineError> {
        let (tx, rx) = bounded::<EngineSignal>(16);
        let progress_tx = tx.clone();
        let engine = Arc::clone(&self.engine);
        let input = input.to_path_buf();
        let output = output.to_path_buf();

        thread::spawn(move || {
            let result = engine.compress(&input, &output, quality, &|percent| {
                let _ = progress_tx.try_send(EngineSignal::Progress(percent));
            });
            let _ = tx.send(EngineSignal::Done(result));
        });

        let deadline = Instant::now() + self.engine_timeout;
        let mut best_progress = 0u8;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(EngineSignal::Progress(percent)) => {
                    // Deletion here only stops the reporting; the engine
                    // call itself runs to completion and the cycle exits at
                    // the next existence check.
                    best_progress = best_progress.max(percent);
                    self.checkpoint(id, percent.clamp(10, 99));
                }
                Ok(EngineSignal::Done(result)) => {
                    // The progress hook is advisory. When the engine never
                    // reached the halfway mark on its own, the midpoint
                    // checkpoint is still owed for a successful attempt.
                    if result.is_ok() && best_progress < 50 {
                        self.checkpoint(id, 50);
                    }
                    return result;
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(EngineError::Timeout {
                        secs: self.engine_timeout.as_secs(),
                    })
                }
                Err(RecvTimeoutError::Disconnected) => return Err(EngineError::Terminated),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::JobEventBroadcaster;
    use crate::store::Job;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingEngine(AtomicU32);

    impl CompressionEngine for CountingEngine {
        fn compress(
            &self,
            _input: &Path,
            output: &Path,
            _quality: u8,
            _on_progress: &dyn Fn(u8),
        ) -> Result<u64, EngineError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            std::fs::write(output, b"x")?;
            Ok(1)
        }
    }

    #[test]
    fn test_request_for_job_already_compressing_is_dropped() {
        let store = Arc::new(TaskStore::new());
        let mut job = Job::new("busy", PathBuf::from("/tmp/busy.png"), 1000, 80);
        job.status = JobStatus::Compressing;
        job.progress = 42;
        store.insert(job).unwrap();

        let events = JobEventBroadcaster::default();
        let mut rx = events.subscribe();
        let engine = Arc::new(CountingEngine(AtomicU32::new(0)));
        let runner = CycleRunner::new(
            Arc::clone(&store),
            events,
            Arc::clone(&engine) as Arc<dyn CompressionEngine>,
            RetryPolicy::default(),
            Duration::from_secs(5),
        );

        runner.run(CycleRequest {
            id: "busy".to_string(),
            quality: 60,
        });

        // The in-flight cycle's record is untouched and the engine never ran
        assert_eq!(engine.0.load(Ordering::SeqCst), 0);
        let job = store.get("busy").unwrap();
        assert_eq!(job.status, JobStatus::Compressing);
        assert_eq!(job.progress, 42);
        assert_eq!(job.quality, 80);
        assert!(rx.try_recv().is_err());
    }
}
