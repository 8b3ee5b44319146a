//! Event publishing for real-time job status streaming.
//!
//! Delivery is best-effort: backend correctness never depends on a UI being
//! subscribed.

pub mod job_events;

pub use job_events::{JobEvent, JobEventBroadcaster};
