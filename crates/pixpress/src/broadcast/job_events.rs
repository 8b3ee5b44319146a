use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::store::Job;

/// Typed state-transition notification consumed by the UI layer.
///
/// Events for a single job are produced in lifecycle order: created,
/// started, progress checkpoints (optionally interleaved with retries), then
/// exactly one terminal completed/failed per cycle, and deleted once the
/// record is removed. Cross-job ordering is not guaranteed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum JobEvent {
    #[serde(rename = "job-created")]
    Created {
        id: String,
        source_path: String,
        created_at: DateTime<Utc>,
    },
    #[serde(rename = "job-started")]
    Started { id: String, source_path: String },
    #[serde(rename = "job-progress")]
    Progress { id: String, percent: u8 },
    #[serde(rename = "job-retry")]
    Retry {
        id: String,
        attempt: u32,
        prior_quality: u8,
        new_quality: u8,
        original_size: u64,
        compressed_size: u64,
    },
    #[serde(rename = "job-completed")]
    Completed { id: String, job: Job },
    #[serde(rename = "job-failed")]
    Failed { id: String, error: String },
    #[serde(rename = "job-deleted")]
    Deleted { id: String },
    #[serde(rename = "originals-deleted")]
    OriginalsDeleted { ids: Vec<String> },
}

impl JobEvent {
    /// The id of the job this event concerns, if it concerns exactly one.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            JobEvent::Created { id, .. }
            | JobEvent::Started { id, .. }
            | JobEvent::Progress { id, .. }
            | JobEvent::Retry { id, .. }
            | JobEvent::Completed { id, .. }
            | JobEvent::Failed { id, .. }
            | JobEvent::Deleted { id } => Some(id),
            JobEvent::OriginalsDeleted { .. } => None,
        }
    }
}

/// Fire-and-forget publisher over a `tokio::sync::broadcast` channel.
#[derive(Clone)]
pub struct JobEventBroadcaster {
    sender: Arc<broadcast::Sender<JobEvent>>,
}

impl JobEventBroadcaster {
    /// Creates a broadcaster with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Publishes an event to all subscribers. Delivery failure (no listener
    /// attached) is logged and otherwise ignored; it never unwinds the
    /// caller's operation.
    pub fn send(&self, event: JobEvent) {
        if let Err(e) = self.sender.send(event) {
            log::debug!("No subscribers for job event: {:?}", e.0);
        }
    }

    /// Creates a new subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for JobEventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
