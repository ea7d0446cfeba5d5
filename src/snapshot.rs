//! Snapshot writer.
//!
//! `SnapshotWriter::save` runs the decision policy, annotates a copy of the
//! frame and hands it to a `SnapshotSink`, all under one lock. The snapshot
//! memory is updated in the same critical section and only after the sink
//! reports success, so two workers can never both pass the rate-limit check
//! for the same window.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use crate::annotate::Annotator;
use crate::detect::Detection;
use crate::frame::Frame;
use crate::policy::{object_histogram, Decision, DecisionPolicy, SnapshotMemory};
use crate::tracking::TrackedObject;

pub const DEFAULT_OUTPUT_DIR: &str = "snapshots";
pub const DEFAULT_JPEG_QUALITY: u8 = 90;
pub const SNAPSHOT_SUFFIX: &str = " detected.jpg";

#[derive(Clone, Debug, PartialEq)]
pub struct SnapshotConfig {
    pub output_dir: PathBuf,
    pub jpeg_quality: u8,
    /// Font used for label text. Without one, labels are drawn as plain bars.
    pub label_font: Option<PathBuf>,
    pub label_scale: f32,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            label_font: None,
            label_scale: 16.0,
        }
    }
}

impl SnapshotConfig {
    pub fn validate(&self) -> Result<()> {
        if self.output_dir.as_os_str().is_empty() {
            return Err(anyhow!("snapshot output_dir must not be empty"));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be in 1..=100"));
        }
        if !self.label_scale.is_finite() || self.label_scale < 1.0 {
            return Err(anyhow!("label_scale must be >= 1"));
        }
        Ok(())
    }
}

/// Destination for encoded snapshots.
pub trait SnapshotSink: Send + Sync {
    /// Persist `image` under `file_name`; returns where it landed.
    fn persist(&self, file_name: &str, image: &RgbImage) -> Result<PathBuf>;
}

/// Writes JPEG files into a directory via tmp-file + rename.
pub struct FilesystemSink {
    root: PathBuf,
    quality: u8,
}

impl FilesystemSink {
    pub fn new(root: impl Into<PathBuf>, quality: u8) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create snapshot dir {}", root.display()))?;
        Ok(Self { root, quality })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SnapshotSink for FilesystemSink {
    fn persist(&self, file_name: &str, image: &RgbImage) -> Result<PathBuf> {
        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, self.quality)
            .encode_image(image)
            .map_err(|e| anyhow!("jpeg encode failed: {}", e))?;

        let path = self.root.join(file_name);
        write_atomic(&path, &encoded)
            .with_context(|| format!("failed to write snapshot {}", path.display()))?;
        Ok(path)
    }
}

/// Keeps snapshot names in memory. Used for dry runs and tests.
#[derive(Default)]
pub struct MemorySink {
    saved: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self) -> Vec<String> {
        self.saved
            .lock()
            .map(|names| names.clone())
            .unwrap_or_default()
    }
}

impl SnapshotSink for MemorySink {
    fn persist(&self, file_name: &str, _image: &RgbImage) -> Result<PathBuf> {
        self.saved
            .lock()
            .map_err(|_| anyhow!("memory sink lock poisoned"))?
            .push(file_name.to_string());
        Ok(PathBuf::from(file_name))
    }
}

impl<S: SnapshotSink + ?Sized> SnapshotSink for std::sync::Arc<S> {
    fn persist(&self, file_name: &str, image: &RgbImage) -> Result<PathBuf> {
        (**self).persist(file_name, image)
    }
}

/// `"YYYY-MM-DD HHMMSS <classes> detected.jpg"` with classes sorted and de-duplicated.
pub fn snapshot_file_name(captured_at: SystemTime, detections: &[Detection]) -> String {
    let stamp = DateTime::<Local>::from(captured_at).format("%Y-%m-%d %H%M%S");
    let classes: BTreeSet<String> = detections
        .iter()
        .map(|det| sanitize_class(&det.class_name))
        .filter(|class| !class.is_empty())
        .collect();
    let mut name = stamp.to_string();
    for class in &classes {
        name.push(' ');
        name.push_str(class);
    }
    name.push_str(SNAPSHOT_SUFFIX);
    name
}

fn sanitize_class(class_name: &str) -> String {
    class_name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq)]
pub struct SnapshotOutcome {
    pub decision: Decision,
    /// Set when a snapshot was written.
    pub path: Option<PathBuf>,
}

pub struct SnapshotWriter {
    policy: DecisionPolicy,
    annotator: Annotator,
    sink: Box<dyn SnapshotSink>,
    memory: Mutex<SnapshotMemory>,
}

impl SnapshotWriter {
    pub fn new(config: &SnapshotConfig, policy: DecisionPolicy) -> Result<Self> {
        config.validate()?;
        let annotator = match &config.label_font {
            Some(path) => Annotator::with_font_file(path)?,
            None => Annotator::new(),
        }
        .scale(config.label_scale);
        let sink = FilesystemSink::new(&config.output_dir, config.jpeg_quality)?;
        Ok(Self::with_sink(policy, annotator, Box::new(sink)))
    }

    pub fn with_sink(
        policy: DecisionPolicy,
        annotator: Annotator,
        sink: Box<dyn SnapshotSink>,
    ) -> Self {
        Self {
            policy,
            annotator,
            sink,
            memory: Mutex::new(SnapshotMemory::default()),
        }
    }

    pub fn policy(&self) -> &DecisionPolicy {
        &self.policy
    }

    /// Copy of the current snapshot memory.
    pub fn memory(&self) -> Result<SnapshotMemory> {
        Ok(self.lock_memory().clone())
    }

    // Memory is only written after a successful persist, so a panic while it
    // was held leaves it at the last good save.
    fn lock_memory(&self) -> MutexGuard<'_, SnapshotMemory> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide and, if warranted, persist an annotated copy of `frame`.
    ///
    /// Errors only when a snapshot was due and the sink failed; the memory is
    /// left unchanged so the next qualifying frame retries.
    pub fn save(
        &self,
        frame: &Frame,
        detections: &[Detection],
        tracked: &[TrackedObject],
    ) -> Result<SnapshotOutcome> {
        let mut memory = self.lock_memory();
        let now = frame.capture_instant;

        let decision = self.policy.decide(detections, tracked, &memory, now);
        let reason = match &decision {
            Decision::Persist(reason) => reason,
            Decision::Skip(_) => {
                return Ok(SnapshotOutcome {
                    decision,
                    path: None,
                })
            }
        };

        let annotated = self.annotator.annotate(frame.pixels(), detections);
        let file_name = snapshot_file_name(frame.captured_at, detections);
        let path = self
            .sink
            .persist(&file_name, &annotated)
            .with_context(|| format!("snapshot not saved ({})", reason))?;

        memory.record_save(object_histogram(detections), now);
        log::info!("saved snapshot {} ({})", path.display(), reason);

        Ok(SnapshotOutcome {
            decision,
            path: Some(path),
        })
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use crate::policy::{PersistReason, SkipReason};
    use crate::tracking::ObjectRegistry;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn det(class: &str) -> Detection {
        Detection::new(class, 0.9, BoundingBox::new(10.0, 30.0, 20.0, 20.0))
    }

    fn frame_at(t0: Instant, secs: u64) -> Frame {
        Frame::with_capture_time(
            RgbImage::new(64, 64),
            secs,
            SystemTime::now(),
            t0 + Duration::from_secs(secs),
        )
    }

    #[test]
    fn file_name_sorts_and_dedups_classes() {
        let when = SystemTime::now();
        let name = snapshot_file_name(when, &[det("person"), det("car"), det("person")]);
        let stamp = DateTime::<Local>::from(when).format("%Y-%m-%d %H%M%S").to_string();
        assert_eq!(name, format!("{} car person detected.jpg", stamp));

        let odd = snapshot_file_name(when, &[det("Traffic Light")]);
        assert!(odd.ends_with(" traffic_light detected.jpg"));
    }

    #[test]
    fn filesystem_sink_writes_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FilesystemSink::new(dir.path().join("out"), 80).unwrap();
        let path = sink
            .persist("2024-01-01 000000 car detected.jpg", &RgbImage::new(16, 16))
            .unwrap();

        assert!(path.exists());
        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn save_updates_memory_only_when_written() {
        let sink = Arc::new(MemorySink::new());
        let writer = SnapshotWriter::with_sink(
            DecisionPolicy::default(),
            Annotator::new(),
            Box::new(sink.clone()),
        );
        let mut registry = ObjectRegistry::default();
        let t0 = Instant::now();
        let dets = vec![det("car")];

        let frame = frame_at(t0, 0);
        registry.update(&dets, frame.capture_instant);
        let outcome = writer
            .save(&frame, &dets, registry.tracked_objects())
            .unwrap();
        assert!(matches!(
            outcome.decision,
            Decision::Persist(PersistReason::NewObjectType { .. })
        ));
        assert!(outcome.path.is_some());

        let frame = frame_at(t0, 2);
        registry.update(&dets, frame.capture_instant);
        let outcome = writer
            .save(&frame, &dets, registry.tracked_objects())
            .unwrap();
        assert!(matches!(
            outcome.decision,
            Decision::Skip(SkipReason::RateLimited { .. })
        ));
        assert!(outcome.path.is_none());

        assert_eq!(sink.saved().len(), 1);
        let memory = writer.memory().unwrap();
        assert_eq!(memory.last_photo_time, Some(t0));
    }

    #[test]
    fn save_leaves_caller_frame_untouched() {
        let writer = SnapshotWriter::with_sink(
            DecisionPolicy::default(),
            Annotator::new(),
            Box::new(MemorySink::new()),
        );
        let frame = frame_at(Instant::now(), 0);
        let before = frame.pixels().clone();
        writer.save(&frame, &[det("dog")], &[]).unwrap();
        assert_eq!(frame.pixels(), &before);
    }

    #[test]
    fn failed_write_keeps_memory() {
        struct Broken;
        impl SnapshotSink for Broken {
            fn persist(&self, _: &str, _: &RgbImage) -> Result<PathBuf> {
                Err(anyhow!("disk full"))
            }
        }

        let writer =
            SnapshotWriter::with_sink(DecisionPolicy::default(), Annotator::new(), Box::new(Broken));
        let frame = frame_at(Instant::now(), 0);
        assert!(writer.save(&frame, &[det("cat")], &[]).is_err());
        assert_eq!(writer.memory().unwrap(), SnapshotMemory::default());
    }

    #[test]
    fn panicking_sink_leaves_memory_usable() {
        struct Flaky(std::sync::atomic::AtomicBool);
        impl SnapshotSink for Flaky {
            fn persist(&self, file_name: &str, _: &RgbImage) -> Result<PathBuf> {
                if !self.0.swap(true, std::sync::atomic::Ordering::SeqCst) {
                    panic!("encoder crashed");
                }
                Ok(PathBuf::from(file_name))
            }
        }

        let writer = SnapshotWriter::with_sink(
            DecisionPolicy::default(),
            Annotator::new(),
            Box::new(Flaky(Default::default())),
        );
        let t0 = Instant::now();
        let crashed = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            writer.save(&frame_at(t0, 0), &[det("car")], &[])
        }));
        assert!(crashed.is_err());
        assert_eq!(writer.memory().unwrap(), SnapshotMemory::default());

        let outcome = writer.save(&frame_at(t0, 1), &[det("car")], &[]).unwrap();
        assert!(outcome.path.is_some());
        assert_eq!(
            writer.memory().unwrap().last_photo_time,
            Some(t0 + Duration::from_secs(1))
        );
    }

    #[test]
    fn invalid_quality_rejected() {
        let config = SnapshotConfig {
            jpeg_quality: 0,
            ..SnapshotConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
