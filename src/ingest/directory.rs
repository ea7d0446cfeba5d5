use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use super::{FrameSource, Pacer};
use crate::frame::Frame;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Replays the images of a local directory in file-name order.
///
/// Unreadable images are skipped with a warning; the directory listing is
/// taken once at open time.
pub struct DirectorySource {
    name: String,
    files: Vec<PathBuf>,
    cursor: usize,
    frame_count: u64,
    pacer: Pacer,
}

impl DirectorySource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("failed to list image directory {}", dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && has_image_extension(&path) {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(anyhow!("no images found in {}", dir.display()));
        }
        files.sort();
        Ok(Self {
            name: format!("dir://{}", dir.display()),
            files,
            cursor: 0,
            frame_count: 0,
            pacer: Pacer::new(0),
        })
    }

    /// Release at most `target_fps` images per second (0 = as fast as read).
    pub fn paced(mut self, target_fps: u32) -> Self {
        self.pacer = Pacer::new(target_fps);
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for DirectorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.pacer.wait();
        while let Some(path) = self.files.get(self.cursor) {
            self.cursor += 1;
            match image::open(path) {
                Ok(image) => {
                    let frame = Frame::new(image.to_rgb8(), self.frame_count);
                    self.frame_count += 1;
                    return Ok(Some(frame));
                }
                Err(err) => log::warn!("skipping {}: {}", path.display(), err),
            }
        }
        Ok(None)
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
