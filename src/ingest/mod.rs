//! Frame capture sources.
//!
//! Sources are selected by URL scheme:
//! - `stub://<name>`: synthetic frames generated in memory
//! - `dir://<path>`: image files replayed from a local directory in name order
//!
//! Every frame carries the source's sequence number and both capture clocks.
//! Sources are driven from a single capture thread and are not shared.

pub mod directory;
pub mod synthetic;

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::frame::Frame;

pub use directory::DirectorySource;
pub use synthetic::SyntheticSource;

pub const DEFAULT_SOURCE_URL: &str = "stub://front_camera";
pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;
pub const DEFAULT_TARGET_FPS: u32 = 5;

/// Capture source settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceSettings {
    pub url: String,
    /// Frame width for synthetic frames.
    pub width: u32,
    /// Frame height for synthetic frames.
    pub height: u32,
    /// Capture rate; synthetic sources pace themselves to it. 0 disables pacing.
    pub target_fps: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_SOURCE_URL.to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            target_fps: DEFAULT_TARGET_FPS,
        }
    }
}

impl SourceSettings {
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(anyhow!("source url must not be empty"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("source width and height must be > 0"));
        }
        Ok(())
    }
}

/// Something that yields frames.
pub trait FrameSource: Send {
    fn name(&self) -> &str;

    /// Next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn frames_captured(&self) -> u64;
}

/// Open the source named by `settings.url`.
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    settings.validate()?;
    if settings.url.starts_with("stub://") {
        let source = SyntheticSource::new(settings.clone());
        log::info!("source: {} (synthetic)", settings.url);
        Ok(Box::new(source))
    } else if let Some(path) = settings.url.strip_prefix("dir://") {
        let source = DirectorySource::open(path)?.paced(settings.target_fps);
        log::info!("source: {} ({} images)", settings.url, source.len());
        Ok(Box::new(source))
    } else {
        Err(anyhow!(
            "unsupported source url '{}' (expected stub:// or dir://)",
            settings.url
        ))
    }
}

/// Sleeps just enough to hold a source to its target frame rate.
#[derive(Debug, Default)]
pub(crate) struct Pacer {
    interval: Option<Duration>,
    last: Option<Instant>,
}

impl Pacer {
    pub(crate) fn new(target_fps: u32) -> Self {
        let interval = match target_fps {
            0 => None,
            fps => Some(Duration::from_secs(1) / fps),
        };
        Self {
            interval,
            last: None,
        }
    }

    pub(crate) fn wait(&mut self) {
        if let (Some(interval), Some(last)) = (self.interval, self.last) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
        self.last = Some(Instant::now());
    }
}
