//! Frame container.
//!
//! A `Frame` owns its pixel buffer. The dispatcher clones frames on submit, so a
//! capture source may keep reusing or mutating its own buffer after handing a
//! frame over.
//!
//! Every frame carries two clocks:
//! - `captured_at`: wall-clock time, used for snapshot file names.
//! - `capture_instant`: monotonic time, used for rate limiting and stationary timeouts.

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::time::{Instant, SystemTime};

#[derive(Clone, Debug)]
pub struct Frame {
    pixels: RgbImage,

    /// Sequence number assigned by the capture source.
    pub sequence: u64,

    /// Wall-clock capture time.
    pub captured_at: SystemTime,

    /// Monotonic capture instant.
    pub capture_instant: Instant,
}

impl Frame {
    /// Wrap pixels captured now.
    pub fn new(pixels: RgbImage, sequence: u64) -> Self {
        Self::with_capture_time(pixels, sequence, SystemTime::now(), Instant::now())
    }

    /// Wrap pixels with explicit capture clocks (replay and simulation).
    pub fn with_capture_time(
        pixels: RgbImage,
        sequence: u64,
        captured_at: SystemTime,
        capture_instant: Instant,
    ) -> Self {
        Self {
            pixels,
            sequence,
            captured_at,
            capture_instant,
        }
    }

    /// Build a frame from packed RGB8 bytes.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>, sequence: u64) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(anyhow!(
                "rgb buffer size mismatch: expected {} bytes for {}x{}, got {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        let pixels = RgbImage::from_raw(width, height, data)
            .ok_or_else(|| anyhow!("invalid {}x{} rgb buffer", width, height))?;
        Ok(Self::new(pixels, sequence))
    }

    /// Solid black frame, mostly useful for tests and dry runs.
    pub fn blank(width: u32, height: u32, sequence: u64) -> Self {
        Self::new(RgbImage::new(width, height), sequence)
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut RgbImage {
        &mut self.pixels
    }

    pub fn into_pixels(self) -> RgbImage {
        self.pixels
    }

    /// Raw byte length of the pixel buffer.
    pub fn byte_len(&self) -> usize {
        self.pixels.as_raw().len()
    }
}
