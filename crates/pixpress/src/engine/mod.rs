//! Compression-engine boundary.
//!
//! The coordinator treats the engine as an opaque service: given a source
//! file, a target path and a quality parameter it produces a compressed file
//! and reports the resulting size. The default implementation re-encodes via
//! the `image` crate; desktop shells may plug in a native encoder instead.

pub mod image_rs;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub use image_rs::ImageRsEngine;

/// Supported input formats, derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
    Gif,
    Bmp,
    Tiff,
}

impl ImageFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" | "jfif" => Some(Self::Jpeg),
            "webp" => Some(Self::Webp),
            "gif" => Some(Self::Gif),
            "bmp" => Some(Self::Bmp),
            "tif" | "tiff" => Some(Self::Tiff),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Png => write!(f, "png"),
            Self::Jpeg => write!(f, "jpeg"),
            Self::Webp => write!(f, "webp"),
            Self::Gif => write!(f, "gif"),
            Self::Bmp => write!(f, "bmp"),
            Self::Tiff => write!(f, "tiff"),
        }
    }
}

/// Stateless compression service invoked independently per job.
///
/// `on_progress` is advisory: implementations may call it with 0-100
/// percentages at their own discretion, or never. Callers must not rely on
/// it firing.
pub trait CompressionEngine: Send + Sync {
    fn compress(
        &self,
        input: &Path,
        output: &Path,
        quality: u8,
        on_progress: &dyn Fn(u8),
    ) -> std::result::Result<u64, EngineError>;
}

/// Derives the output path for a compressed copy: `<stem>_compressed.<ext>`
/// next to the source file.
pub fn compressed_output_path(input: &Path) -> Option<PathBuf> {
    let stem = input.file_stem()?.to_str()?;
    let ext = input.extension()?.to_str()?;
    let name = format!("{}_compressed.{}", stem, ext);
    Some(input.with_file_name(name))
}
