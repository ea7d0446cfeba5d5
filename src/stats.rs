//! Pipeline counters, shared between the dispatcher, workers and the daemon loop.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::detect::Detection;

#[derive(Debug, Default)]
pub struct PipelineStats {
    submitted: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    snapshots_saved: AtomicU64,
    snapshot_failures: AtomicU64,
    backpressure_waits: AtomicU64,
    per_class: Mutex<BTreeMap<String, u64>>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self, detections: &[Detection]) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        if detections.is_empty() {
            return;
        }
        // Counters are best effort; a poisoned map just stops counting classes.
        if let Ok(mut per_class) = self.per_class.lock() {
            for det in detections {
                *per_class.entry(det.class_name.clone()).or_insert(0) += 1;
            }
        }
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot(&self) {
        self.snapshots_saved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot_failure(&self) {
        self.snapshot_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backpressure(&self) {
        self.backpressure_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            snapshots_saved: self.snapshots_saved.load(Ordering::Relaxed),
            snapshot_failures: self.snapshot_failures.load(Ordering::Relaxed),
            backpressure_waits: self.backpressure_waits.load(Ordering::Relaxed),
            detections_by_class: self
                .per_class
                .lock()
                .map(|per_class| per_class.clone())
                .unwrap_or_default(),
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub processed: u64,
    pub failed: u64,
    pub snapshots_saved: u64,
    pub snapshot_failures: u64,
    pub backpressure_waits: u64,
    pub detections_by_class: BTreeMap<String, u64>,
}

impl StatsSnapshot {
    /// Frames submitted but not yet resolved.
    pub fn in_flight(&self) -> u64 {
        self.submitted
            .saturating_sub(self.processed)
            .saturating_sub(self.failed)
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "submitted={} processed={} failed={} snapshots={} snapshot_failures={} backpressure={}",
            self.submitted,
            self.processed,
            self.failed,
            self.snapshots_saved,
            self.snapshot_failures,
            self.backpressure_waits
        )?;
        if !self.detections_by_class.is_empty() {
            let classes: Vec<String> = self
                .detections_by_class
                .iter()
                .map(|(class, count)| format!("{}:{}", class, count))
                .collect();
            write!(f, " detections=[{}]", classes.join(" "))?;
        }
        Ok(())
    }
}
