//! Per-frame processing body shared by every dispatcher mode.
//!
//! - Detection runs outside any lock and may overlap across workers.
//! - Tracking, the snapshot decision and the write form one critical section,
//!   entered in ticket order through `SequenceGate`.
//! - A failing or panicking detector marks the frame unprocessed; it still
//!   takes its turn at the gate so later frames are not held back.
//! - A failing or panicking snapshot write is counted and logged; the frame
//!   is still processed and tracking carries on.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use anyhow::{anyhow, Result};

use crate::config::SentinelConfig;
use crate::detect::{Detection, DetectorBackend, TargetClasses};
use crate::frame::Frame;
use crate::policy::{Decision, DecisionPolicy, SnapshotMemory};
use crate::snapshot::SnapshotWriter;
use crate::stats::PipelineStats;
use crate::tracking::{ObjectRegistry, TrackEvent, TrackedObject, TrackingConfig};

/// Outcome of one submitted frame. Owned by the caller once resolved.
#[derive(Clone, Debug)]
pub struct FrameResult {
    /// Submission ticket assigned by the dispatcher.
    pub ticket: u64,
    /// Source sequence number of the frame.
    pub sequence: u64,
    pub capture_time: SystemTime,
    pub processed: bool,
    /// Target-class detections for the frame.
    pub detections: Vec<Detection>,
    pub events: Vec<TrackEvent>,
    /// Present when tracking ran and the writer reached a decision.
    pub decision: Option<Decision>,
    pub snapshot: Option<PathBuf>,
    /// Why the frame was not processed.
    pub error: Option<String>,
}

impl FrameResult {
    pub fn unprocessed(ticket: u64, sequence: u64, capture_time: SystemTime, error: String) -> Self {
        Self {
            ticket,
            sequence,
            capture_time,
            processed: false,
            detections: Vec::new(),
            events: Vec::new(),
            decision: None,
            snapshot: None,
            error: Some(error),
        }
    }

    pub fn saved(&self) -> bool {
        self.snapshot.is_some()
    }
}

// ---- Ordering ----

/// Admits tickets strictly in order: 0, 1, 2, ...
#[derive(Debug, Default)]
pub struct SequenceGate {
    next: Mutex<u64>,
    turn: Condvar,
}

impl SequenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until every earlier ticket has released its turn.
    pub fn wait_turn(&self, ticket: u64) -> GateTurn<'_> {
        let mut next = self.next.lock().unwrap_or_else(PoisonError::into_inner);
        while *next < ticket {
            next = self
                .turn
                .wait(next)
                .unwrap_or_else(PoisonError::into_inner);
        }
        GateTurn { gate: self, ticket }
    }

    /// The ticket currently allowed through.
    pub fn next_ticket(&self) -> u64 {
        *self.next.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held while a ticket owns the gate; releasing it admits the next ticket.
pub struct GateTurn<'a> {
    gate: &'a SequenceGate,
    ticket: u64,
}

impl Drop for GateTurn<'_> {
    fn drop(&mut self) {
        let mut next = self.gate.next.lock().unwrap_or_else(PoisonError::into_inner);
        if *next <= self.ticket {
            *next = self.ticket + 1;
        }
        drop(next);
        self.gate.turn.notify_all();
    }
}

// ---- Processor ----

pub struct FrameProcessor {
    detector: Arc<dyn DetectorBackend>,
    targets: TargetClasses,
    registry: Mutex<ObjectRegistry>,
    writer: SnapshotWriter,
    gate: SequenceGate,
    stats: Arc<PipelineStats>,
}

impl FrameProcessor {
    pub fn new(
        detector: Arc<dyn DetectorBackend>,
        targets: TargetClasses,
        tracking: TrackingConfig,
        writer: SnapshotWriter,
    ) -> Self {
        Self {
            detector,
            targets,
            registry: Mutex::new(ObjectRegistry::new(tracking)),
            writer,
            gate: SequenceGate::new(),
            stats: Arc::new(PipelineStats::new()),
        }
    }

    /// Build the processor described by `config`, writing to the filesystem.
    pub fn from_config(config: &SentinelConfig, detector: Arc<dyn DetectorBackend>) -> Result<Self> {
        config.validate()?;
        let writer = SnapshotWriter::new(
            &config.snapshot,
            DecisionPolicy::new(config.policy.clone()),
        )?;
        Ok(Self::new(
            detector,
            config.targets(),
            config.tracking.clone(),
            writer,
        ))
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Copy of the tracked objects as of the last processed frame.
    pub fn tracked_objects(&self) -> Result<Vec<TrackedObject>> {
        Ok(self.lock_registry().tracked_objects().to_vec())
    }

    // A panic on an earlier frame must not disable tracking for the rest of
    // the run; the registry is consistent between `update` calls.
    fn lock_registry(&self) -> MutexGuard<'_, ObjectRegistry> {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot_memory(&self) -> Result<SnapshotMemory> {
        self.writer.memory()
    }

    /// Run detect, track, decide and (maybe) save for one frame.
    ///
    /// Tickets must be handed out contiguously from 0, and every ticket must be
    /// processed exactly once, or later tickets wait forever at the gate.
    pub fn process(&self, ticket: u64, frame: Frame) -> FrameResult {
        let detected = self.run_detector(&frame);

        let _turn = self.gate.wait_turn(ticket);
        let detections = match detected {
            Ok(detections) => self.targets.filter(detections),
            Err(err) => {
                log::warn!(
                    "frame {} (ticket {}) not processed: {:#}",
                    frame.sequence,
                    ticket,
                    err
                );
                self.stats.record_failed();
                return FrameResult::unprocessed(
                    ticket,
                    frame.sequence,
                    frame.captured_at,
                    err.to_string(),
                );
            }
        };

        let (events, decision, snapshot) = self.track_and_save(&frame, &detections);
        self.stats.record_processed(&detections);
        FrameResult {
            ticket,
            sequence: frame.sequence,
            capture_time: frame.captured_at,
            processed: true,
            detections,
            events,
            decision,
            snapshot,
            error: None,
        }
    }

    fn run_detector(&self, frame: &Frame) -> Result<Vec<Detection>> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.detector.detect(frame))) {
            Ok(result) => result,
            Err(_) => Err(anyhow!("{} detector panicked", self.detector.name())),
        }
    }

    fn track_and_save(
        &self,
        frame: &Frame,
        detections: &[Detection],
    ) -> (Vec<TrackEvent>, Option<Decision>, Option<PathBuf>) {
        let mut registry = self.lock_registry();
        let events = registry.update(detections, frame.capture_instant);

        let saved = panic::catch_unwind(AssertUnwindSafe(|| {
            self.writer
                .save(frame, detections, registry.tracked_objects())
        }))
        .unwrap_or_else(|_| Err(anyhow!("snapshot writer panicked")));
        match saved {
            Ok(outcome) => {
                if outcome.path.is_some() {
                    self.stats.record_snapshot();
                } else {
                    log::debug!("frame {}: {}", frame.sequence, outcome.decision);
                }
                (events, Some(outcome.decision), outcome.path)
            }
            Err(err) => {
                log::error!("frame {}: {:#}", frame.sequence, err);
                self.stats.record_snapshot_failure();
                (events, None, None)
            }
        }
    }
}
