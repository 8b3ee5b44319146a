//! Persisted application settings.

use std::path::PathBuf;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::coordinator::RetryPolicy;
use crate::error::ConfigError;

/// Default compression quality for new jobs.
pub const DEFAULT_QUALITY: u8 = 80;

/// Default bound on the external engine call, in seconds.
const DEFAULT_ENGINE_TIMEOUT_SECS: u64 = 120;

fn default_worker_count() -> usize {
    num_cpus::get().clamp(1, 4)
}

/// User-facing settings, serialized as JSON on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// Folders the filesystem watcher observes for new images.
    pub watched_folders: Vec<String>,
    /// Default compression quality (1-100).
    pub quality: u8,
    /// Number of concurrent compression workers.
    pub worker_count: usize,
    /// Bound on a single engine invocation.
    pub engine_timeout_secs: u64,
    /// Size-growth retry knobs.
    pub retry: RetryPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut watched_folders = Vec::new();
        if let Some(downloads) = dirs::download_dir() {
            watched_folders.push(downloads.display().to_string());
        }
        Self {
            watched_folders,
            quality: DEFAULT_QUALITY,
            worker_count: default_worker_count(),
            engine_timeout_secs: DEFAULT_ENGINE_TIMEOUT_SECS,
            retry: RetryPolicy::default(),
        }
    }
}

/// Loads, mutates and saves the config file. Mutators persist immediately;
/// a failed save is logged and the in-memory state stays authoritative.
pub struct ConfigManager {
    pub config: AppConfig,
    path: PathBuf,
}

impl ConfigManager {
    /// Reads the config from `path`, falling back to defaults when the file
    /// is missing or unreadable.
    pub fn load(path: PathBuf) -> Self {
        let config = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Could not parse {}: {}, using defaults", path.display(), e);
                    AppConfig::default()
                }
            },
            Err(_) => AppConfig::default(),
        };

        Self { config, path }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(&self.config)?;
        std::fs::write(&self.path, json).map_err(|source| ConfigError::WriteFile {
            path: self.path.clone(),
            source,
        })
    }

    fn save_logged(&self) {
        if let Err(e) = self.save() {
            warn!("Failed to save config: {}", e);
        }
    }

    pub fn add_folder(&mut self, folder: String) {
        if !self.config.watched_folders.contains(&folder) {
            self.config.watched_folders.push(folder);
            self.save_logged();
        }
    }

    pub fn remove_folder(&mut self, folder: &str) {
        self.config.watched_folders.retain(|f| f != folder);
        self.save_logged();
    }

    pub fn set_quality(&mut self, quality: u8) {
        self.config.quality = quality.clamp(1, 100);
        self.save_logged();
    }
}
