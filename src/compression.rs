//! Payload-size-constrained lossy re-encoding
//!
//! Upload paths through the reverse proxy have a hard body limit, so images
//! over the ceiling are flattened onto an opaque background and re-encoded as
//! JPEG at decreasing quality until they fit or the quality floor is reached.

use crate::error::{InpaintError, Result};
use crate::types::ImagePayload;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgb, RgbImage};
use std::io::Cursor;
use tracing::instrument;

/// Bytes in one megabyte as used for ceilings
pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
/// Default ceiling for single-image uploads
pub const DEFAULT_CEILING_MB: f64 = 3.5;
/// Ceiling applied to each image when two images share one request
pub const PAIRED_CEILING_MB: f64 = 2.0;

/// Result of a compression attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompressionOutcome {
    /// Already under the ceiling, returned as-is
    Unchanged(ImagePayload),
    /// Re-encoded; `quality` is the JPEG quality of the accepted attempt
    Reencoded { payload: ImagePayload, quality: u8 },
}

impl CompressionOutcome {
    #[must_use]
    pub fn payload(&self) -> &ImagePayload {
        match self {
            Self::Unchanged(payload) | Self::Reencoded { payload, .. } => payload,
        }
    }

    #[must_use]
    pub fn into_payload(self) -> ImagePayload {
        match self {
            Self::Unchanged(payload) | Self::Reencoded { payload, .. } => payload,
        }
    }

    #[must_use]
    pub fn quality(&self) -> Option<u8> {
        match self {
            Self::Unchanged(_) => None,
            Self::Reencoded { quality, .. } => Some(*quality),
        }
    }
}

/// Iterative JPEG re-encoding policy
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionPolicy {
    /// Size ceiling in megabytes
    pub ceiling_mb: f64,
    /// First quality tried (0-100)
    pub start_quality: u8,
    /// Quality decrement between attempts
    pub quality_step: u8,
    /// Once an attempt at or below this quality is made it is accepted
    pub floor_quality: u8,
    /// Colour transparent pixels are flattened onto
    pub background: Rgb<u8>,
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CEILING_MB)
    }
}

impl CompressionPolicy {
    #[must_use]
    pub fn new(ceiling_mb: f64) -> Self {
        Self {
            ceiling_mb,
            start_quality: 90,
            quality_step: 10,
            floor_quality: 50,
            background: Rgb([255, 255, 255]),
        }
    }

    #[must_use]
    pub fn ceiling_bytes(&self) -> u64 {
        (self.ceiling_mb * BYTES_PER_MB).floor().max(0.0) as u64
    }

    /// Shrink `payload` under the ceiling, best effort
    ///
    /// Never loops forever: the attempt at the floor quality is accepted
    /// whatever its size.
    #[instrument(
        name = "compression",
        level = "debug",
        skip(self, payload),
        fields(file_name = %payload.file_name, ceiling_mb = self.ceiling_mb)
    )]
    pub fn compress(&self, payload: &ImagePayload) -> Result<CompressionOutcome> {
        let ceiling = self.ceiling_bytes();
        if payload.size() <= ceiling {
            return Ok(CompressionOutcome::Unchanged(payload.clone()));
        }

        log::info!(
            "Compressing {} ({:.2}MB > {:.2}MB)",
            payload.file_name,
            payload.size() as f64 / BYTES_PER_MB,
            self.ceiling_mb
        );

        let decoded = image::load_from_memory(&payload.bytes).map_err(|e| {
            InpaintError::compression(format!("Failed to decode {}: {}", payload.file_name, e))
        })?;
        let flattened = self.flatten(&decoded);

        let mut quality = self.start_quality.clamp(1, 100);
        loop {
            let bytes = encode_jpeg(&flattened, quality)?;
            let size = bytes.len() as u64;
            log::debug!("JPEG attempt at quality {}: {} bytes", quality, size);

            if size <= ceiling || quality <= self.floor_quality {
                log::info!(
                    "Compressed to {:.2}MB (Quality: {})",
                    size as f64 / BYTES_PER_MB,
                    quality
                );
                let name = format!("{}.jpg", payload.stem());
                return Ok(CompressionOutcome::Reencoded {
                    payload: ImagePayload::new(name, "image/jpeg", bytes),
                    quality,
                });
            }

            quality = quality
                .saturating_sub(self.quality_step.max(1))
                .max(self.floor_quality)
                .max(1);
        }
    }

    /// Compress, falling back to the untouched payload when compression fails
    #[must_use]
    pub fn compress_or_original(&self, payload: ImagePayload) -> ImagePayload {
        match self.compress(&payload) {
            Ok(outcome) => outcome.into_payload(),
            Err(e) => {
                log::warn!("Compression failed, sending original: {}", e);
                payload
            },
        }
    }

    /// Composite onto the opaque background; JPEG has no alpha channel
    fn flatten(&self, image: &DynamicImage) -> RgbImage {
        if !image.color().has_alpha() {
            return image.to_rgb8();
        }
        let rgba = image.to_rgba8();
        let [br, bg, bb] = self.background.0;
        RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
            let [r, g, b, a] = rgba.get_pixel(x, y).0;
            let alpha = u16::from(a);
            let blend = |fg: u8, back: u8| -> u8 {
                ((u16::from(fg) * alpha + u16::from(back) * (255 - alpha) + 127) / 255) as u8
            };
            Rgb([blend(r, br), blend(g, bg), blend(b, bb)])
        })
    }
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut cursor = Cursor::new(&mut buffer);
    let mut encoder = JpegEncoder::new_with_quality(&mut cursor, quality);
    encoder
        .encode_image(image)
        .map_err(|e| InpaintError::compression(format!("Failed to encode JPEG: {}", e)))?;
    Ok(buffer)
}
