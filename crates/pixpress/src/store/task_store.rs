use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Lifecycle state of a job. Transitions only move forward along
/// `Pending -> Compressing -> {Completed, Failed}`; a recompression request
/// re-enters `Compressing` from a terminal state on the same record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Compressing,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Compressing => write!(f, "compressing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One tracked compression job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique identifier, immutable for the job's lifetime.
    pub id: String,
    /// Absolute path of the original file.
    pub source_path: PathBuf,
    /// Path of the compressed copy (set on completion).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    /// Current status.
    pub status: JobStatus,
    /// Size of the source file in bytes (0 if it could not be read).
    pub original_size: u64,
    /// Size of the compressed file, present once an attempt has finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compressed_size: Option<u64>,
    /// Quality used for the attempt that produced `compressed_size`.
    pub quality: u8,
    /// Progress percentage, monotonic within a single attempt.
    pub progress: u8,
    /// Error message (present only when failed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Insertion timestamp, used for ordering.
    pub created_at: DateTime<Utc>,
    /// Whether the source file was deliberately deleted.
    #[serde(default)]
    pub original_deleted: bool,
}

impl Job {
    /// Creates a new pending job.
    pub fn new(id: &str, source_path: PathBuf, original_size: u64, quality: u8) -> Self {
        Self {
            id: id.to_string(),
            source_path,
            output_path: None,
            status: JobStatus::Pending,
            original_size,
            compressed_size: None,
            quality,
            progress: 0,
            error: None,
            created_at: Utc::now(),
            original_deleted: false,
        }
    }

    /// Returns true if this job is in a terminal state.
    pub fn is_finished(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Job counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreCounts {
    pub pending: usize,
    pub compressing: usize,
    pub completed: usize,
    pub failed: usize,
}

/// In-memory registry of jobs behind a single lock.
///
/// Every operation takes the lock for its own duration only; no caller may
/// hold it across file IO, engine invocations or event publishing. Compound
/// read-modify-write sequences go through [`TaskStore::mutate`] or
/// [`TaskStore::snapshot_and_clear`] so that existence checks and writes
/// happen in one critical section.
pub struct TaskStore {
    jobs: Mutex<HashMap<String, Job>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Job>> {
        match self.jobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Task store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Adds a new record. A duplicate id is a programming error upstream;
    /// the store rejects it rather than overwriting.
    pub fn insert(&self, job: Job) -> Result<(), StoreError> {
        let mut jobs = self.lock();
        if jobs.contains_key(&job.id) {
            return Err(StoreError::DuplicateId(job.id));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// Returns a copy of the record, never a live reference.
    pub fn get(&self, id: &str) -> Option<Job> {
        self.lock().get(id).cloned()
    }

    /// Applies `f` to the stored record in a single critical section.
    /// Returns whether the record still existed. This is the only sanctioned
    /// way to change a job's fields.
    pub fn mutate<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.lock();
        match jobs.get_mut(id) {
            Some(job) => {
                f(job);
                true
            }
            None => false,
        }
    }

    /// Atomically removes and returns the prior value, so deletion callers
    /// can act on the exact state that existed at removal time.
    pub fn remove(&self, id: &str) -> Option<Job> {
        self.lock().remove(id)
    }

    /// Collects all records matching `predicate` and removes them in one
    /// lock acquisition. Each record is returned to at most one caller.
    pub fn snapshot_and_clear<P>(&self, predicate: P) -> Vec<Job>
    where
        P: Fn(&Job) -> bool,
    {
        let mut jobs = self.lock();
        let ids: Vec<String> = jobs
            .values()
            .filter(|job| predicate(job))
            .map(|job| job.id.clone())
            .collect();
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = jobs.remove(&id) {
                removed.push(job);
            }
        }
        removed.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        removed
    }

    /// Marks `original_deleted` on every completed job whose source still
    /// stands, in one critical section, and returns copies of the affected
    /// records. The actual file deletion happens outside the lock.
    pub fn mark_originals_deleted(&self) -> Vec<Job> {
        let mut jobs = self.lock();
        let mut marked = Vec::new();
        for job in jobs.values_mut() {
            if job.status == JobStatus::Completed && !job.original_deleted {
                job.original_deleted = true;
                marked.push(job.clone());
            }
        }
        marked.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        marked
    }

    /// Consistent point-in-time copy of all jobs, newest first.
    pub fn list(&self) -> Vec<Job> {
        let jobs = self.lock();
        let mut result: Vec<Job> = jobs.values().cloned().collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        result
    }

    pub fn counts(&self) -> StoreCounts {
        let jobs = self.lock();
        let mut counts = StoreCounts::default();
        for job in jobs.values() {
            match job.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Compressing => counts.compressing += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}
