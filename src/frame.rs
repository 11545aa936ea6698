// SPDX-License-Identifier: GPL-3.0-only

//! The basic unit of work moving through the pipeline: one captured image
//! plus the wall-clock instant it was captured at.

use std::sync::Arc;
use std::time::SystemTime;

/// A raw image: height x width pixels, 3 color channels, 8-bit unsigned,
/// row-major, interleaved (R,G,B) per pixel — plus its capture timestamp.
///
/// Immutable once captured. The pixel buffer is reference-counted so that
/// submitting a frame to the processor queue, broadcasting it to the stream
/// server, and annotating a copy for a saved photo are all cheap clones that
/// share the same backing bytes until one of them needs to mutate.
#[derive(Debug, Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Arc<Vec<u8>>,
    pub captured_at: SystemTime,
}

impl Frame {
    /// Builds a frame from an already-interleaved RGB buffer.
    ///
    /// # Panics
    /// Panics if `data.len() != width * height * 3`, which would indicate a
    /// bug in the caller rather than a recoverable runtime condition.
    pub fn new(width: u32, height: u32, data: Vec<u8>, captured_at: SystemTime) -> Self {
        assert_eq!(
            data.len(),
            width as usize * height as usize * 3,
            "frame buffer size does not match width*height*3"
        );
        Self {
            width,
            height,
            data: Arc::new(data),
            captured_at,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mean grayscale luminance over the whole frame, 0..=255, used for the
    /// night-mode darkness check.
    pub fn mean_luminance(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        let mut sum: u64 = 0;
        let mut count: u64 = 0;
        for px in self.data.chunks_exact(3) {
            let (r, g, b) = (px[0] as u32, px[1] as u32, px[2] as u32);
            // ITU-R BT.601 luma weights, integer-scaled.
            sum += ((r * 299 + g * 587 + b * 114) / 1000) as u64;
            count += 1;
        }
        sum as f64 / count as f64
    }

    /// Converts to an [`image::RgbImage`] for encoding/annotation, cloning
    /// the backing bytes.
    pub fn to_rgb_image(&self) -> image::RgbImage {
        image::RgbImage::from_raw(self.width, self.height, (*self.data).clone())
            .expect("frame dimensions validated at construction")
    }

    /// Builds a frame from an [`image::RgbImage`], e.g. after annotation or
    /// CLAHE enhancement.
    pub fn from_rgb_image(img: &image::RgbImage, captured_at: SystemTime) -> Self {
        Self::new(img.width(), img.height(), img.as_raw().clone(), captured_at)
    }
}
