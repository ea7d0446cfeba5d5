use anyhow::Result;
use rand::Rng;

use super::{FrameSource, Pacer, SourceSettings};
use crate::frame::Frame;

/// Generated frames for `stub://` URLs.
///
/// Simulates a mostly static scene:
/// - A gradient background that shifts every 50 frames (scene change)
/// - Light per-frame sensor noise
pub struct SyntheticSource {
    settings: SourceSettings,
    frame_count: u64,
    scene_state: u8,
    pacer: Pacer,
}

impl SyntheticSource {
    pub fn new(settings: SourceSettings) -> Self {
        Self {
            pacer: Pacer::new(settings.target_fps),
            settings,
            frame_count: 0,
            scene_state: 0,
        }
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        if self.frame_count > 0 && self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let width = self.settings.width as usize;
        let height = self.settings.height as usize;
        let mut pixels = vec![0u8; width * height * 3];
        let mut rng = rand::thread_rng();
        for (i, pixel) in pixels.iter_mut().enumerate() {
            let x = (i / 3) % width;
            let y = (i / 3) / width;
            let base = (x + y) as u64 + self.scene_state as u64 * 40;
            let noise: u64 = rng.gen_range(0..4);
            *pixel = ((base + noise) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.settings.url
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.pacer.wait();
        let pixels = self.generate_pixels();
        let frame = Frame::from_rgb(
            self.settings.width,
            self.settings.height,
            pixels,
            self.frame_count,
        )?;
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}
