use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// JSON detection script.
///
/// ```json
/// {
///   "loop": false,
///   "latency_ms": 40,
///   "fail_frames": [7],
///   "segments": [
///     { "repeat": 10, "detections": [] },
///     { "repeat": 50, "detections": [
///         { "class_name": "car", "confidence": 0.9,
///           "bbox": { "x": 100, "y": 80, "width": 120, "height": 60 } } ] }
///   ]
/// }
/// ```
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DetectionScript {
    #[serde(default, rename = "loop")]
    pub looped: bool,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub fail_frames: Vec<u64>,
    #[serde(default)]
    pub segments: Vec<ScriptSegment>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ScriptSegment {
    #[serde(default = "default_repeat")]
    pub repeat: u64,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

fn default_repeat() -> u64 {
    1
}

impl DetectionScript {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read detection script {}", path.display()))?;
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid detection script {}: {}", path.display(), e))
    }

    /// Number of frames the script covers before looping or going quiet.
    pub fn frame_count(&self) -> u64 {
        self.segments.iter().map(|segment| segment.repeat).sum()
    }
}

/// Replays scripted detections keyed by the frame's sequence number.
///
/// The backend holds no per-call state, so concurrent workers see the same
/// answer for the same frame regardless of processing order.
#[derive(Clone, Debug, Default)]
pub struct ScriptedBackend {
    frames: Vec<Vec<Detection>>,
    looped: bool,
    latency: Duration,
    fail_frames: BTreeSet<u64>,
}

impl ScriptedBackend {
    pub fn new(frames: Vec<Vec<Detection>>) -> Self {
        Self {
            frames,
            ..Self::default()
        }
    }

    pub fn from_script(script: DetectionScript) -> Self {
        let mut frames = Vec::new();
        for segment in script.segments {
            for _ in 0..segment.repeat {
                frames.push(segment.detections.clone());
            }
        }
        Self {
            frames,
            looped: script.looped,
            latency: Duration::from_millis(script.latency_ms),
            fail_frames: script.fail_frames.into_iter().collect(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::from_script(DetectionScript::load(path)?))
    }

    /// Wrap around at the end of the script instead of reporting nothing.
    pub fn looping(mut self) -> Self {
        self.looped = true;
        self
    }

    /// Simulated inference latency per call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail detection for the given frame sequence number.
    pub fn failing_on(mut self, sequence: u64) -> Self {
        self.fail_frames.insert(sequence);
        self
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn detections_for(&self, sequence: u64) -> Vec<Detection> {
        if self.frames.is_empty() {
            return Vec::new();
        }
        let len = self.frames.len() as u64;
        let index = if self.looped {
            sequence % len
        } else if sequence < len {
            sequence
        } else {
            return Vec::new();
        };
        self.frames[index as usize].clone()
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        if self.fail_frames.contains(&frame.sequence) {
            return Err(anyhow!(
                "scripted detector failure at frame {}",
                frame.sequence
            ));
        }
        Ok(self.detections_for(frame.sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn car() -> Detection {
        Detection::new("car", 0.9, BoundingBox::new(10.0, 10.0, 50.0, 30.0))
    }

    #[test]
    fn replays_by_sequence_number() {
        let backend = ScriptedBackend::new(vec![vec![], vec![car()]]);

        assert!(backend.detect(&Frame::blank(4, 4, 0)).unwrap().is_empty());
        assert_eq!(backend.detect(&Frame::blank(4, 4, 1)).unwrap(), vec![car()]);
        assert!(backend.detect(&Frame::blank(4, 4, 2)).unwrap().is_empty());

        let looped = backend.looping();
        assert_eq!(looped.detect(&Frame::blank(4, 4, 3)).unwrap(), vec![car()]);
    }

    #[test]
    fn scripted_failures_surface_as_errors() {
        let backend = ScriptedBackend::new(vec![vec![car()]; 3]).failing_on(1);
        assert!(backend.detect(&Frame::blank(4, 4, 0)).is_ok());
        assert!(backend.detect(&Frame::blank(4, 4, 1)).is_err());
    }

    #[test]
    fn expands_segments() {
        let script: DetectionScript = serde_json::from_str(
            r#"{
                "fail_frames": [2],
                "segments": [
                    { "repeat": 2 },
                    { "detections": [ { "class_name": "car", "confidence": 0.9,
                        "bbox": { "x": 10, "y": 10, "width": 50, "height": 30 } } ] }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(script.frame_count(), 3);

        let backend = ScriptedBackend::from_script(script);
        assert_eq!(backend.len(), 3);
        assert!(backend.detect(&Frame::blank(4, 4, 1)).unwrap().is_empty());
        assert!(backend.detect(&Frame::blank(4, 4, 2)).is_err());
    }
}
