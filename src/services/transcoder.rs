//! Thumbnail transcoding.
//!
//! The cache orchestrator only sees the [`Transcoder`] trait: `Ok(None)` means
//! "not an image, do not cache", an `Err` is a real failure. [`ImageTranscoder`]
//! is the production implementation on top of the `image` crate. Its work is
//! CPU-bound and must run on the blocking pool.

use crate::models::cache::Thumbnail;
use bytes::Bytes;
use image::{DynamicImage, GenericImageView, ImageOutputFormat, imageops::FilterType};
use std::{io::Cursor, path::Path};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to decode `{key}`: {reason}")]
    Decode { key: String, reason: String },
    #[error("failed to encode thumbnail for `{key}`: {reason}")]
    Encode { key: String, reason: String },
    #[error("transcode task for `{key}` did not complete: {reason}")]
    Task { key: String, reason: String },
}

pub trait Transcoder: Send + Sync + 'static {
    /// Produce a thumbnail for `original`, or `Ok(None)` if `filename_hint`
    /// does not name a recognised image format.
    fn transcode(
        &self,
        original: &[u8],
        filename_hint: &str,
    ) -> Result<Option<Thumbnail>, TranscodeError>;
}

/// Extensions `image` can decode. HEIC/HEIF is absent: the `image` crate has
/// no decoder for it.
const SUPPORTED_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "tif", "tiff", "gif", "bmp", "webp"];

#[derive(Clone, Debug)]
pub struct ThumbnailConfig {
    /// Output height in pixels; width follows the aspect ratio.
    pub fixed_height: u32,
    /// JPEG quality (0-100)
    pub quality: u8,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            fixed_height: 200,
            quality: 85,
        }
    }
}

/// Fixed-height JPEG thumbnails for the formats in `SUPPORTED_EXTENSIONS`.
///
/// HEIC/HEIF originals (iPhone photos) get no thumbnail. They are reported as
/// not-an-image, so the cache records `SkippedNotImage` for them and they are
/// still browsable and served through `/media`.
#[derive(Clone, Debug, Default)]
pub struct ImageTranscoder {
    config: ThumbnailConfig,
}

impl ImageTranscoder {
    pub fn new(config: ThumbnailConfig) -> Self {
        Self { config }
    }

    fn is_supported(filename_hint: &str) -> bool {
        Path::new(filename_hint)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                SUPPORTED_EXTENSIONS
                    .iter()
                    .any(|supported| supported.eq_ignore_ascii_case(ext))
            })
    }

    /// Width for `fixed_height`, keeping the aspect ratio. Never upscales.
    fn target_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        if height <= self.config.fixed_height {
            return (width, height);
        }
        let ratio = self.config.fixed_height as f64 / height as f64;
        let new_width = ((width as f64) * ratio).round() as u32;
        (new_width.max(1), self.config.fixed_height)
    }
}

impl Transcoder for ImageTranscoder {
    fn transcode(
        &self,
        original: &[u8],
        filename_hint: &str,
    ) -> Result<Option<Thumbnail>, TranscodeError> {
        if !Self::is_supported(filename_hint) {
            debug!(key = filename_hint, "not a supported image, skipping");
            return Ok(None);
        }

        let img = image::load_from_memory(original).map_err(|e| TranscodeError::Decode {
            key: filename_hint.to_string(),
            reason: e.to_string(),
        })?;

        let (orig_w, orig_h) = img.dimensions();
        let (width, height) = self.target_dimensions(orig_w, orig_h);
        let resized = if (width, height) == (orig_w, orig_h) {
            img
        } else {
            img.resize_exact(width, height, FilterType::Triangle)
        };

        // JPEG has no alpha channel.
        let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
        let mut buf = Vec::new();
        rgb.write_to(
            &mut Cursor::new(&mut buf),
            ImageOutputFormat::Jpeg(self.config.quality),
        )
        .map_err(|e| TranscodeError::Encode {
            key: filename_hint.to_string(),
            reason: e.to_string(),
        })?;

        debug!(
            key = filename_hint,
            original_width = orig_w,
            original_height = orig_h,
            width,
            height,
            size = buf.len(),
            "thumbnail generated"
        );

        Ok(Some(Thumbnail {
            data: Bytes::from(buf),
            content_type: "image/jpeg",
            width,
            height,
        }))
    }
}
