//! Screenshot comparison
//!
//! [`PixelComparator`] is the pixel-diff collaborator; [`ComparatorAdapter`]
//! reads the two files, runs the comparator off the async runtime and applies
//! the configured mismatch threshold.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use image::{DynamicImage, GenericImageView, ImageOutputFormat, Pixel, Rgba, RgbaImage};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{PixlError, PixlResult};

/// Raw output of a pixel comparison
#[derive(Debug, Clone)]
pub struct PixelDiff {
    /// Percentage of pixels that differ (0.0 - 100.0)
    pub mismatch_percent: f64,

    /// PNG highlighting the differing pixels
    pub diff_image: Vec<u8>,
}

/// Compares two encoded images
pub trait PixelComparator: Send + Sync {
    fn compare(&self, baseline: &[u8], candidate: &[u8]) -> PixlResult<PixelDiff>;
}

/// Comparison verdict after applying the threshold
#[derive(Debug, Clone)]
pub struct Verdict {
    pub failed: bool,
    pub mismatch_percent: f64,
    pub diff_image: Vec<u8>,
}

/// Stable `compare(baseline, candidate) -> verdict` contract over a pixel comparator
#[derive(Clone)]
pub struct ComparatorAdapter {
    comparator: Arc<dyn PixelComparator>,
    threshold_percent: f64,
}

impl ComparatorAdapter {
    pub fn new(comparator: Arc<dyn PixelComparator>, threshold_percent: f64) -> Self {
        Self {
            comparator,
            threshold_percent,
        }
    }

    pub fn threshold_percent(&self) -> f64 {
        self.threshold_percent
    }

    /// Compare two image files. Fails the verdict iff mismatch > threshold.
    pub async fn compare(&self, baseline_path: &Path, candidate_path: &Path) -> PixlResult<Verdict> {
        let baseline = tokio::fs::read(baseline_path).await?;
        let candidate = tokio::fs::read(candidate_path).await?;

        let comparator = Arc::clone(&self.comparator);
        let diff = tokio::task::spawn_blocking(move || comparator.compare(&baseline, &candidate))
            .await
            .map_err(|e| PixlError::Comparison(e.to_string()))??;

        Ok(Verdict {
            failed: diff.mismatch_percent > self.threshold_percent,
            mismatch_percent: diff.mismatch_percent,
            diff_image: diff.diff_image,
        })
    }
}

/// Per-channel tolerance comparison with a red-highlight diff image
#[derive(Debug, Clone)]
pub struct ImageDiffComparator {
    /// Largest per-channel difference still considered equal (anti-aliasing, compression)
    tolerance: u8,
}

impl Default for ImageDiffComparator {
    fn default() -> Self {
        Self { tolerance: 5 }
    }
}

impl ImageDiffComparator {
    pub fn new(tolerance: u8) -> Self {
        Self { tolerance }
    }

    /// Check if two pixels differ significantly
    fn pixels_differ(&self, a: &Rgba<u8>, b: &Rgba<u8>) -> bool {
        a.channels()
            .iter()
            .zip(b.channels())
            .any(|(x, y)| x.abs_diff(*y) > self.tolerance)
    }

    fn encode(image: RgbaImage) -> PixlResult<Vec<u8>> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(image).write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)?;
        Ok(bytes)
    }
}

impl PixelComparator for ImageDiffComparator {
    fn compare(&self, baseline: &[u8], candidate: &[u8]) -> PixlResult<PixelDiff> {
        let baseline_img = image::load_from_memory(baseline)?;
        let candidate_img = image::load_from_memory(candidate)?;

        // Quick hash comparison
        let baseline_hash = Sha256::digest(baseline);
        if baseline_hash == Sha256::digest(candidate) {
            debug!("Screenshots match exactly (sha256 {})", hex::encode(baseline_hash));
            let (width, height) = candidate_img.dimensions();
            return Ok(PixelDiff {
                mismatch_percent: 0.0,
                diff_image: Self::encode(dim(&candidate_img.to_rgba8(), width, height))?,
            });
        }

        if baseline_img.dimensions() != candidate_img.dimensions() {
            warn!(
                "Screenshot dimensions differ: baseline {:?} vs candidate {:?}",
                baseline_img.dimensions(),
                candidate_img.dimensions()
            );
        }

        // Compare over the union area; pixels present in only one image differ
        let width = baseline_img.width().max(candidate_img.width());
        let height = baseline_img.height().max(candidate_img.height());
        let baseline_rgba = baseline_img.to_rgba8();
        let candidate_rgba = candidate_img.to_rgba8();

        let total_pixels = (width as u64) * (height as u64);
        if total_pixels == 0 {
            return Ok(PixelDiff {
                mismatch_percent: 0.0,
                diff_image: Self::encode(RgbaImage::new(1, 1))?,
            });
        }

        let mut diff_img = RgbaImage::new(width, height);
        let mut diff_pixels = 0u64;

        for y in 0..height {
            for x in 0..width {
                let pair = (
                    baseline_rgba.in_bounds(x, y).then(|| baseline_rgba.get_pixel(x, y)),
                    candidate_rgba.in_bounds(x, y).then(|| candidate_rgba.get_pixel(x, y)),
                );
                match pair {
                    (Some(b), Some(c)) if !self.pixels_differ(b, c) => {
                        let channels = c.channels();
                        diff_img.put_pixel(
                            x,
                            y,
                            Rgba([channels[0] / 2, channels[1] / 2, channels[2] / 2, 128]),
                        );
                    }
                    _ => {
                        diff_pixels += 1;
                        diff_img.put_pixel(x, y, Rgba([255, 0, 0, 255]));
                    }
                }
            }
        }

        Ok(PixelDiff {
            mismatch_percent: (diff_pixels as f64 / total_pixels as f64) * 100.0,
            diff_image: Self::encode(diff_img)?,
        })
    }
}

fn dim(image: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        let channels = image.get_pixel(x, y).channels();
        Rgba([channels[0] / 2, channels[1] / 2, channels[2] / 2, 128])
    })
}
