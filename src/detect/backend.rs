use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// # Contract
///
/// Implementations MUST:
/// - Treat the frame as read-only and not retain references to it after `detect` returns
/// - Be reentrant: `detect` takes `&self` and may run on several workers concurrently
/// - Report bounding boxes in pixel coordinates of the frame they were given
///
/// A returned error marks the frame as not processed; it never stops the pipeline.
pub trait DetectorBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}
