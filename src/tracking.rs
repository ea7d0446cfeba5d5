//! Cross-frame object registry.
//!
//! Identities are kept with greedy nearest-centroid matching:
//! - Candidate pairs are (track, detection) of the same class closer than `match_distance`
//! - Pairs are assigned shortest-first; each track and each detection is used at most once
//! - Unmatched detections open new tracks (enter event)
//! - Unmatched tracks age by one frame; past `exit_after_frames` they emit one exit event,
//!   past `stale_after_frames` they are dropped
//!
//! The registry is not thread-safe on its own. The pipeline holds it behind the
//! per-frame critical section so updates land in submission order.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::detect::Detection;

pub const DEFAULT_MATCH_DISTANCE: f32 = 100.0;
pub const DEFAULT_EXIT_AFTER_FRAMES: u32 = 5;
pub const DEFAULT_STALE_AFTER_FRAMES: u32 = 30;
pub const DEFAULT_STATIONARY_JITTER: f32 = 10.0;
pub const DEFAULT_STATIONARY_WINDOW: usize = 10;
pub const DEFAULT_STATIONARY_MIN_SAMPLES: usize = 3;
pub const DEFAULT_MOVEMENT_LOG_THRESHOLD: f32 = 5.0;

/// Tracking thresholds.
///
/// The frame-count thresholds are counted in processed frames, not seconds. Their
/// wall-clock meaning depends on the analysis rate: at 5 fps, five missed frames
/// is one second of absence.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackingConfig {
    /// Maximum centroid distance (pixels) for a detection to continue a track.
    pub match_distance: f32,
    /// A track missing for more than this many frames has exited.
    pub exit_after_frames: u32,
    /// A track missing for more than this many frames is removed.
    pub stale_after_frames: u32,
    /// Mean per-frame displacement (pixels) below which a track is stationary.
    pub stationary_jitter: f32,
    /// Number of recent centres kept per track.
    pub stationary_window: usize,
    /// Centres required before a track can be declared stationary.
    pub stationary_min_samples: usize,
    /// Displacement (pixels) above which a match is logged as movement.
    pub movement_log_threshold: f32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            match_distance: DEFAULT_MATCH_DISTANCE,
            exit_after_frames: DEFAULT_EXIT_AFTER_FRAMES,
            stale_after_frames: DEFAULT_STALE_AFTER_FRAMES,
            stationary_jitter: DEFAULT_STATIONARY_JITTER,
            stationary_window: DEFAULT_STATIONARY_WINDOW,
            stationary_min_samples: DEFAULT_STATIONARY_MIN_SAMPLES,
            movement_log_threshold: DEFAULT_MOVEMENT_LOG_THRESHOLD,
        }
    }
}

impl TrackingConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("match_distance", self.match_distance),
            ("stationary_jitter", self.stationary_jitter),
            ("movement_log_threshold", self.movement_log_threshold),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(anyhow!("{} must be a non-negative number", name));
            }
        }
        if self.stale_after_frames < self.exit_after_frames {
            return Err(anyhow!(
                "stale_after_frames ({}) must be >= exit_after_frames ({})",
                self.stale_after_frames,
                self.exit_after_frames
            ));
        }
        if self.stationary_min_samples < 2 {
            return Err(anyhow!("stationary_min_samples must be >= 2"));
        }
        if self.stationary_window < self.stationary_min_samples {
            return Err(anyhow!(
                "stationary_window ({}) must be >= stationary_min_samples ({})",
                self.stationary_window,
                self.stationary_min_samples
            ));
        }
        Ok(())
    }
}

/// An identity maintained across frames.
#[derive(Clone, Debug)]
pub struct TrackedObject {
    /// Registry-local identifier, unique for the life of the registry.
    pub id: u64,
    pub object_type: String,
    /// Centroid of the latest matched box.
    pub center: (f32, f32),
    /// Centroid before the latest match.
    pub previous_center: (f32, f32),
    pub was_present_last_frame: bool,
    /// Consecutive frames without a match.
    pub frames_since_detection: u32,
    /// True only on the frame the object entered (first sighting or re-entry).
    pub is_new: bool,
    pub is_stationary: bool,
    pub stationary_since: Option<Instant>,
    /// Confidence of the latest matched detection.
    pub last_confidence: f32,
    exited: bool,
    history: VecDeque<(f32, f32)>,
}

impl TrackedObject {
    fn spawn(id: u64, detection: &Detection) -> Self {
        let center = detection.center();
        let mut history = VecDeque::new();
        history.push_back(center);
        Self {
            id,
            object_type: detection.class_name.clone(),
            center,
            previous_center: center,
            was_present_last_frame: true,
            frames_since_detection: 0,
            is_new: true,
            is_stationary: false,
            stationary_since: None,
            last_confidence: detection.confidence,
            exited: false,
            history,
        }
    }

    /// Matched in the most recent update.
    pub fn is_present(&self) -> bool {
        self.frames_since_detection == 0
    }

    /// True once the exit event has fired and until the object re-enters.
    pub fn has_exited(&self) -> bool {
        self.exited
    }

    /// How long the object has been stationary as of `now`.
    pub fn stationary_for(&self, now: Instant) -> Option<Duration> {
        if !self.is_stationary {
            return None;
        }
        self.stationary_since
            .map(|since| now.saturating_duration_since(since))
    }

    /// Stationary for strictly longer than `timeout`.
    pub fn is_stationary_past(&self, timeout: Duration, now: Instant) -> bool {
        self.stationary_for(now)
            .is_some_and(|elapsed| elapsed > timeout)
    }

    /// Recent centres, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &(f32, f32)> {
        self.history.iter()
    }
}

/// Something that happened to a track during one update.
#[derive(Clone, Debug, PartialEq)]
pub enum TrackEvent {
    Entered {
        id: u64,
        object_type: String,
        center: (f32, f32),
        confidence: f32,
    },
    Moved {
        id: u64,
        object_type: String,
        from: (f32, f32),
        to: (f32, f32),
    },
    BecameStationary {
        id: u64,
        object_type: String,
        center: (f32, f32),
    },
    Exited {
        id: u64,
        object_type: String,
        last_center: (f32, f32),
    },
    Removed {
        id: u64,
        object_type: String,
    },
}

impl TrackEvent {
    pub fn id(&self) -> u64 {
        match self {
            TrackEvent::Entered { id, .. }
            | TrackEvent::Moved { id, .. }
            | TrackEvent::BecameStationary { id, .. }
            | TrackEvent::Exited { id, .. }
            | TrackEvent::Removed { id, .. } => *id,
        }
    }

    pub fn object_type(&self) -> &str {
        match self {
            TrackEvent::Entered { object_type, .. }
            | TrackEvent::Moved { object_type, .. }
            | TrackEvent::BecameStationary { object_type, .. }
            | TrackEvent::Exited { object_type, .. }
            | TrackEvent::Removed { object_type, .. } => object_type,
        }
    }
}

impl fmt::Display for TrackEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackEvent::Entered {
                id,
                object_type,
                center,
                confidence,
            } => write!(
                f,
                "{} #{} entered at ({:.0}, {:.0}) with confidence {}%",
                object_type,
                id,
                center.0,
                center.1,
                (confidence * 100.0) as u32
            ),
            TrackEvent::Moved {
                id,
                object_type,
                from,
                to,
            } => write!(
                f,
                "{} #{} moved from ({:.0}, {:.0}) to ({:.0}, {:.0})",
                object_type, id, from.0, from.1, to.0, to.1
            ),
            TrackEvent::BecameStationary {
                id,
                object_type,
                center,
            } => write!(
                f,
                "{} #{} stationary at ({:.0}, {:.0})",
                object_type, id, center.0, center.1
            ),
            TrackEvent::Exited {
                id,
                object_type,
                last_center,
            } => write!(
                f,
                "{} #{} exited, last seen at ({:.0}, {:.0})",
                object_type, id, last_center.0, last_center.1
            ),
            TrackEvent::Removed { id, object_type } => {
                write!(f, "{} #{} removed (stale)", object_type, id)
            }
        }
    }
}

pub struct ObjectRegistry {
    config: TrackingConfig,
    tracks: Vec<TrackedObject>,
    next_id: u64,
}

impl ObjectRegistry {
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    /// Read-only view of the current tracks.
    pub fn tracked_objects(&self) -> &[TrackedObject] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Drop every track. Identifiers keep increasing.
    pub fn reset(&mut self) {
        self.tracks.clear();
    }

    /// Apply one frame of detections observed at `now`.
    ///
    /// An empty detection list is valid and ages every track by one miss.
    pub fn update(&mut self, detections: &[Detection], now: Instant) -> Vec<TrackEvent> {
        let mut events = Vec::new();

        for track in &mut self.tracks {
            track.is_new = false;
        }

        let mut pairs = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (di, det) in detections.iter().enumerate() {
                if track.object_type != det.class_name {
                    continue;
                }
                let distance = distance(track.center, det.center());
                if distance < self.config.match_distance {
                    pairs.push((distance, ti, di));
                }
            }
        }
        pairs.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        let mut track_matched = vec![false; self.tracks.len()];
        let mut det_matched = vec![false; detections.len()];
        for (_, ti, di) in pairs {
            if track_matched[ti] || det_matched[di] {
                continue;
            }
            track_matched[ti] = true;
            det_matched[di] = true;
            self.apply_match(ti, &detections[di], now, &mut events);
        }

        for (ti, matched) in track_matched.iter().enumerate() {
            if !matched {
                self.apply_miss(ti, &mut events);
            }
        }

        for (di, det) in detections.iter().enumerate() {
            if det_matched[di] {
                continue;
            }
            let track = TrackedObject::spawn(self.next_id, det);
            self.next_id += 1;
            events.push(TrackEvent::Entered {
                id: track.id,
                object_type: track.object_type.clone(),
                center: track.center,
                confidence: track.last_confidence,
            });
            self.tracks.push(track);
        }

        let stale_after = self.config.stale_after_frames;
        self.tracks.retain(|track| {
            if track.frames_since_detection > stale_after {
                events.push(TrackEvent::Removed {
                    id: track.id,
                    object_type: track.object_type.clone(),
                });
                false
            } else {
                true
            }
        });

        for event in &events {
            log_event(event);
        }
        events
    }

    fn apply_match(
        &mut self,
        index: usize,
        detection: &Detection,
        now: Instant,
        events: &mut Vec<TrackEvent>,
    ) {
        let config = &self.config;
        let track = &mut self.tracks[index];
        let center = detection.center();

        track.previous_center = track.center;
        track.center = center;
        track.frames_since_detection = 0;
        track.was_present_last_frame = true;
        track.last_confidence = detection.confidence;

        if track.exited {
            // Back after a gap longer than the exit threshold: a fresh entry.
            track.exited = false;
            track.is_new = true;
            track.is_stationary = false;
            track.stationary_since = None;
            track.history.clear();
            track.history.push_back(center);
            events.push(TrackEvent::Entered {
                id: track.id,
                object_type: track.object_type.clone(),
                center,
                confidence: detection.confidence,
            });
            return;
        }

        if distance(track.previous_center, center) > config.movement_log_threshold {
            events.push(TrackEvent::Moved {
                id: track.id,
                object_type: track.object_type.clone(),
                from: track.previous_center,
                to: center,
            });
        }

        if record_position(track, center, now, config) {
            events.push(TrackEvent::BecameStationary {
                id: track.id,
                object_type: track.object_type.clone(),
                center,
            });
        }
    }

    fn apply_miss(&mut self, index: usize, events: &mut Vec<TrackEvent>) {
        let exit_after = self.config.exit_after_frames;
        let track = &mut self.tracks[index];
        track.frames_since_detection += 1;
        track.was_present_last_frame = false;
        if track.frames_since_detection > exit_after && !track.exited {
            track.exited = true;
            events.push(TrackEvent::Exited {
                id: track.id,
                object_type: track.object_type.clone(),
                last_center: track.center,
            });
        }
    }
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new(TrackingConfig::default())
    }
}

/// Push a centre into the track history and refresh stationary status.
///
/// Returns true when the track just became stationary.
fn record_position(
    track: &mut TrackedObject,
    center: (f32, f32),
    now: Instant,
    config: &TrackingConfig,
) -> bool {
    let jump = track
        .history
        .back()
        .map(|last| distance(*last, center))
        .unwrap_or(0.0);
    if jump > config.stationary_jitter {
        track.history.clear();
        track.history.push_back(center);
        track.is_stationary = false;
        track.stationary_since = None;
        return false;
    }

    track.history.push_back(center);
    while track.history.len() > config.stationary_window {
        track.history.pop_front();
    }
    if track.history.len() < config.stationary_min_samples {
        return false;
    }

    let steps = track.history.len() - 1;
    let travelled: f32 = track
        .history
        .iter()
        .zip(track.history.iter().skip(1))
        .map(|(a, b)| distance(*a, *b))
        .sum();
    let mean_step = travelled / steps as f32;

    if mean_step < config.stationary_jitter {
        if !track.is_stationary {
            track.is_stationary = true;
            track.stationary_since = Some(now);
            return true;
        }
    } else {
        track.is_stationary = false;
        track.stationary_since = None;
    }
    false
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

fn log_event(event: &TrackEvent) {
    match event {
        TrackEvent::Entered { .. }
        | TrackEvent::Exited { .. }
        | TrackEvent::BecameStationary { .. } => log::info!("{}", event),
        TrackEvent::Moved { .. } | TrackEvent::Removed { .. } => log::debug!("{}", event),
    }
}
