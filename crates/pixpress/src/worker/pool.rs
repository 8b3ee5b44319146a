use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info};

use crate::coordinator::cycle::{CycleRequest, CycleRunner};
use crate::error::WorkerError;

/// Fixed-size pool of OS threads running compression cycles.
///
/// The queue is bounded, so a flood of submissions applies back pressure
/// instead of growing without limit.
pub struct WorkerPool {
    request_sender: Sender<CycleRequest>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn new(runner: Arc<CycleRunner>, worker_count: usize) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        let (request_sender, request_receiver) = bounded::<CycleRequest>(worker_count * 4);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let request_rx = request_receiver.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_runner = Arc::clone(&runner);

            let handle = thread::spawn(move || {
                run_worker(worker_id, request_rx, shutdown_flag, worker_runner);
            });
            workers.push(handle);
        }

        info!("Started {} compression workers", worker_count);

        Self {
            request_sender,
            workers,
            shutdown,
        }
    }

    pub fn submit(&self, request: CycleRequest) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }
        self.request_sender
            .send(request)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        // Drop sender to signal workers to exit
        drop(self.request_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_worker(
    worker_id: usize,
    request_receiver: Receiver<CycleRequest>,
    shutdown: Arc<AtomicBool>,
    runner: Arc<CycleRunner>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match request_receiver.recv_timeout(std::time::Duration::from_millis(100)) {
            Ok(request) => {
                debug!("Worker {} running cycle for job {}", worker_id, request.id);
                runner.run(request);
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} request channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::JobEventBroadcaster;
    use crate::coordinator::RetryPolicy;
    use crate::engine::CompressionEngine;
    use crate::error::EngineError;
    use crate::store::{Job, JobStatus, TaskStore};
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    struct FixedSizeEngine(u64);

    impl CompressionEngine for FixedSizeEngine {
        fn compress(
            &self,
            _input: &Path,
            output: &Path,
            _quality: u8,
            _on_progress: &dyn Fn(u8),
        ) -> Result<u64, EngineError> {
            std::fs::write(output, b"x")?;
            Ok(self.0)
        }
    }

    fn runner_with_store() -> (Arc<CycleRunner>, Arc<TaskStore>) {
        let store = Arc::new(TaskStore::new());
        let runner = Arc::new(CycleRunner::new(
            Arc::clone(&store),
            JobEventBroadcaster::default(),
            Arc::new(FixedSizeEngine(10)),
            RetryPolicy::default(),
            Duration::from_secs(5),
        ));
        (runner, store)
    }

    #[test]
    fn test_pool_startup_and_shutdown() {
        let (runner, _store) = runner_with_store();
        let pool = WorkerPool::new(runner, 2);

        assert!(!pool.is_shutdown());
        pool.shutdown();
        assert!(pool.is_shutdown());
        pool.wait();
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let (runner, _store) = runner_with_store();
        let pool = WorkerPool::new(runner, 1);
        pool.shutdown();

        let err = pool
            .submit(CycleRequest {
                id: "x".to_string(),
                quality: 80,
            })
            .unwrap_err();
        assert!(matches!(err, WorkerError::ChannelClosed));
        pool.wait();
    }

    #[test]
    fn test_pool_runs_cycle() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("a.png");
        std::fs::write(&source, vec![0u8; 100]).unwrap();

        let (runner, store) = runner_with_store();
        store
            .insert(Job::new("job-1", source, 100, 80))
            .unwrap();

        let pool = WorkerPool::new(runner, 1);
        pool.submit(CycleRequest {
            id: "job-1".to_string(),
            quality: 80,
        })
        .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while std::time::Instant::now() < deadline {
            if store
                .get("job-1")
                .is_some_and(|j| j.status == JobStatus::Completed)
            {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        let job = store.get("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.compressed_size, Some(10));
        assert_eq!(job.output_path, Some(tmp.path().join("a_compressed.png")));

        pool.shutdown();
        pool.wait();
    }
}
