//! Shared harness for integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use pixpress::{CompressionEngine, EngineError, JobEvent};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

/// One scripted engine response.
pub enum Step {
    /// Report this compressed size.
    Size(u64),
    /// Sleep, then report this compressed size.
    SlowSize(u64, Duration),
    /// Fail with this message.
    Fail(String),
}

/// Engine double that replays a fixed script of responses in call order.
/// Once the script is exhausted it keeps answering with `fallback` bytes.
pub struct ScriptedEngine {
    steps: Mutex<VecDeque<Step>>,
    fallback: u64,
    report_progress: bool,
}

impl ScriptedEngine {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fallback: 10,
            report_progress: true,
        }
    }

    pub fn with_fallback(steps: Vec<Step>, fallback: u64) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fallback,
            report_progress: true,
        }
    }

    /// An engine that never touches the progress hook, which is allowed:
    /// the hook is advisory.
    pub fn silent(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fallback: 10,
            report_progress: false,
        }
    }
}

impl CompressionEngine for ScriptedEngine {
    fn compress(
        &self,
        _input: &Path,
        output: &Path,
        _quality: u8,
        on_progress: &dyn Fn(u8),
    ) -> Result<u64, EngineError> {
        let step = self.steps.lock().unwrap().pop_front();
        let size = match step {
            Some(Step::Size(size)) => size,
            Some(Step::SlowSize(size, delay)) => {
                std::thread::sleep(delay);
                size
            }
            Some(Step::Fail(message)) => return Err(EngineError::Encode(message)),
            None => self.fallback,
        };
        if self.report_progress {
            on_progress(50);
        }
        std::fs::write(output, b"compressed")?;
        Ok(size)
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn wait_until<F>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Drains every buffered event from the receiver.
pub fn drain_events(rx: &mut broadcast::Receiver<JobEvent>) -> Vec<JobEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(skipped)) => {
                panic!("event receiver lagged, lost {skipped} events")
            }
            Err(_) => break,
        }
    }
    events
}

/// Events in `events` concerning the given job id, in order.
pub fn events_for<'a>(events: &'a [JobEvent], id: &str) -> Vec<&'a JobEvent> {
    events
        .iter()
        .filter(|e| e.job_id() == Some(id))
        .collect()
}
