use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};

use crate::engine::ImageFormat;
use crate::error::WorkerError;

/// Extensions browsers use for in-progress downloads.
const SKIP_EXTENSIONS: &[&str] = &["tmp", "crdownload", "part"];

/// Returns true if `path` looks like a freshly arrived image worth
/// compressing: a supported format, not a partial download, and not one of
/// our own `*_compressed` outputs.
pub fn is_watch_candidate(path: &Path) -> bool {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if SKIP_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
            return false;
        }
    }

    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
        if stem.ends_with("_compressed") {
            return false;
        }
    }

    ImageFormat::from_path(path).is_some()
}

/// Debounced filesystem watcher over the configured folders.
///
/// Detection only: the watcher hands candidate paths to the callback
/// (typically `Coordinator::submit`) and owns no job state itself.
pub struct DirectoryWatcher {
    folders: Vec<PathBuf>,
}

impl DirectoryWatcher {
    pub fn new<I, P>(folders: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self {
            folders: folders
                .into_iter()
                .map(|p| p.as_ref().to_path_buf())
                .collect(),
        }
    }

    /// Blocks the calling thread, invoking `callback` for every new image
    /// until `shutdown` is set.
    pub fn watch<F>(&self, callback: F, shutdown: Arc<AtomicBool>) -> Result<(), WorkerError>
    where
        F: Fn(PathBuf) + Send + 'static,
    {
        let (tx, rx) = std::sync::mpsc::channel();

        let mut debouncer = new_debouncer(Duration::from_millis(500), tx)
            .map_err(|e| WorkerError::WatchError(e.to_string()))?;

        let mut watching = 0;
        for folder in &self.folders {
            if !folder.exists() {
                warn!("Watched folder does not exist: {}", folder.display());
                continue;
            }
            match debouncer.watcher().watch(folder, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    info!("Watching directory: {}", folder.display());
                    watching += 1;
                }
                Err(e) => error!("Failed to watch {}: {}", folder.display(), e),
            }
        }
        if watching == 0 {
            return Err(WorkerError::WatchError(
                "no watchable folders configured".to_string(),
            ));
        }

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("Watcher shutting down...");
                break;
            }

            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(Ok(events)) => {
                    for event in events {
                        if !matches!(event.kind, DebouncedEventKind::Any) {
                            continue;
                        }
                        let path = &event.path;
                        if path.is_dir() || !path.exists() {
                            continue;
                        }
                        if !is_watch_candidate(path) {
                            continue;
                        }
                        info!("New image detected: {}", path.display());
                        callback(path.to_path_buf());
                    }
                }
                Ok(Err(errors)) => {
                    warn!("Watch error: {:?}", errors);
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    continue;
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    error!("Watch channel disconnected");
                    break;
                }
            }
        }

        Ok(())
    }
}
