//! Default compression engine backed by the `image` crate.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::ImageReader;
use log::info;

use crate::engine::{CompressionEngine, ImageFormat};
use crate::error::EngineError;

/// Pure-Rust engine: decodes the source and re-encodes it in place.
///
/// Quality maps directly onto the JPEG encoder; for PNG it selects the
/// compression preset (lower quality buys a harder search). The remaining
/// formats are re-encoded with the codec defaults.
pub struct ImageRsEngine;

impl ImageRsEngine {
    pub fn new() -> Self {
        Self
    }

    fn png_compression(quality: u8) -> CompressionType {
        match quality {
            0..=30 => CompressionType::Best,
            31..=70 => CompressionType::Default,
            _ => CompressionType::Fast,
        }
    }
}

impl Default for ImageRsEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionEngine for ImageRsEngine {
    fn compress(
        &self,
        input: &Path,
        output: &Path,
        quality: u8,
        on_progress: &dyn Fn(u8),
    ) -> Result<u64, EngineError> {
        let format = ImageFormat::from_path(input).ok_or_else(|| {
            EngineError::UnsupportedFormat(
                input
                    .extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            )
        })?;

        let q = quality.clamp(1, 100);
        let img = ImageReader::open(input)?
            .decode()
            .map_err(|e| EngineError::Decode(e.to_string()))?;

        on_progress(50);

        let bytes = match format {
            ImageFormat::Jpeg => {
                // JPEG has no alpha channel
                let rgb = img.to_rgb8();
                let mut buf = Vec::new();
                let mut encoder = JpegEncoder::new_with_quality(&mut buf, q);
                encoder
                    .encode_image(&rgb)
                    .map_err(|e| EngineError::Encode(e.to_string()))?;
                buf
            }
            ImageFormat::Png => {
                let mut buf = Vec::new();
                let encoder = PngEncoder::new_with_quality(
                    &mut buf,
                    Self::png_compression(q),
                    FilterType::Adaptive,
                );
                img.write_with_encoder(encoder)
                    .map_err(|e| EngineError::Encode(e.to_string()))?;
                buf
            }
            other => {
                let target = match other {
                    ImageFormat::Webp => image::ImageFormat::WebP,
                    ImageFormat::Gif => image::ImageFormat::Gif,
                    ImageFormat::Bmp => image::ImageFormat::Bmp,
                    ImageFormat::Tiff => image::ImageFormat::Tiff,
                    // Handled above
                    ImageFormat::Jpeg | ImageFormat::Png => unreachable!(),
                };
                let mut buf = Cursor::new(Vec::new());
                img.write_to(&mut buf, target)
                    .map_err(|e| EngineError::Encode(e.to_string()))?;
                buf.into_inner()
            }
        };

        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(output, &bytes)?;

        let size = bytes.len() as u64;
        info!(
            "[engine] {} {} -> {} bytes (q={})",
            format,
            input.display(),
            size,
            q
        );
        Ok(size)
    }
}
