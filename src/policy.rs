//! Snapshot decision policy.
//!
//! Evaluated once per processed frame, in this order:
//! 1. No target detections: skip.
//! 2. A class absent from the last saved histogram: persist now.
//! 3. A class whose count grew since the last save: persist now.
//! 4. A tracked object that entered on this frame: persist now.
//! 5. Every present object stationary past the timeout: suppress periodic saves.
//! 6. Photo interval elapsed since the last save: persist.
//! 7. Otherwise skip.
//!
//! The policy itself is stateless. `SnapshotMemory` is owned by the snapshot
//! writer and only changes after a successful save.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::detect::Detection;
use crate::tracking::TrackedObject;

pub const DEFAULT_PHOTO_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_STATIONARY_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Minimum time between periodic (non-urgent) snapshots.
    pub photo_interval: Duration,
    /// Stationary scenes older than this stop producing periodic snapshots.
    pub stationary_timeout: Duration,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            photo_interval: DEFAULT_PHOTO_INTERVAL,
            stationary_timeout: DEFAULT_STATIONARY_TIMEOUT,
        }
    }
}

impl PolicyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.photo_interval.is_zero() {
            return Err(anyhow!("photo_interval must be > 0"));
        }
        if self.stationary_timeout.is_zero() {
            return Err(anyhow!("stationary_timeout must be > 0"));
        }
        Ok(())
    }
}

/// What the writer remembers about the last snapshot it persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SnapshotMemory {
    pub last_saved_object_counts: BTreeMap<String, usize>,
    /// `None` until the first save; the interval counts as elapsed.
    pub last_photo_time: Option<Instant>,
}

impl SnapshotMemory {
    pub fn record_save(&mut self, counts: BTreeMap<String, usize>, at: Instant) {
        self.last_saved_object_counts = counts;
        self.last_photo_time = Some(at);
    }
}

/// Per-class detection counts for one frame.
pub fn object_histogram(detections: &[Detection]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for det in detections {
        *counts.entry(det.class_name.clone()).or_insert(0) += 1;
    }
    counts
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PersistReason {
    NewObjectType { class_name: String },
    NewInstance {
        class_name: String,
        previous: usize,
        current: usize,
    },
    NewlyEntered { id: u64, class_name: String },
    Interval,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    NoTargets,
    StationaryTimeout,
    RateLimited { remaining: Duration },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Persist(PersistReason),
    Skip(SkipReason),
}

impl Decision {
    pub fn should_persist(&self) -> bool {
        matches!(self, Decision::Persist(_))
    }

    /// Persist that bypasses the photo interval.
    pub fn is_immediate(&self) -> bool {
        matches!(self, Decision::Persist(reason) if *reason != PersistReason::Interval)
    }
}

impl fmt::Display for PersistReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistReason::NewObjectType { class_name } => {
                write!(f, "new object type: {}", class_name)
            }
            PersistReason::NewInstance {
                class_name,
                previous,
                current,
            } => write!(
                f,
                "new {} instance: {} -> {}",
                class_name, previous, current
            ),
            PersistReason::NewlyEntered { id, class_name } => {
                write!(f, "{} #{} entered", class_name, id)
            }
            PersistReason::Interval => f.write_str("photo interval elapsed"),
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoTargets => f.write_str("no target objects"),
            SkipReason::StationaryTimeout => f.write_str("all objects stationary past timeout"),
            SkipReason::RateLimited { remaining } => {
                write!(f, "rate limited ({:.1}s remaining)", remaining.as_secs_f32())
            }
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Persist(reason) => write!(f, "persist ({})", reason),
            Decision::Skip(reason) => write!(f, "skip ({})", reason),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct DecisionPolicy {
    config: PolicyConfig,
}

impl DecisionPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Decide whether the frame observed at `now` should be persisted.
    ///
    /// `tracked` must already reflect this frame's registry update.
    pub fn decide(
        &self,
        detections: &[Detection],
        tracked: &[TrackedObject],
        memory: &SnapshotMemory,
        now: Instant,
    ) -> Decision {
        if detections.is_empty() {
            return Decision::Skip(SkipReason::NoTargets);
        }

        let counts = object_histogram(detections);
        for (class_name, &current) in &counts {
            match memory.last_saved_object_counts.get(class_name) {
                None => {
                    return Decision::Persist(PersistReason::NewObjectType {
                        class_name: class_name.clone(),
                    })
                }
                Some(&previous) if current > previous => {
                    return Decision::Persist(PersistReason::NewInstance {
                        class_name: class_name.clone(),
                        previous,
                        current,
                    })
                }
                Some(_) => {}
            }
        }

        if let Some(entered) = tracked
            .iter()
            .find(|obj| obj.is_new && obj.frames_since_detection == 0)
        {
            return Decision::Persist(PersistReason::NewlyEntered {
                id: entered.id,
                class_name: entered.object_type.clone(),
            });
        }

        let mut present = tracked.iter().filter(|obj| obj.is_present()).peekable();
        if present.peek().is_some()
            && present.all(|obj| obj.is_stationary_past(self.config.stationary_timeout, now))
        {
            return Decision::Skip(SkipReason::StationaryTimeout);
        }

        match memory.last_photo_time {
            None => Decision::Persist(PersistReason::Interval),
            Some(last) => {
                let elapsed = now.saturating_duration_since(last);
                if elapsed >= self.config.photo_interval {
                    Decision::Persist(PersistReason::Interval)
                } else {
                    Decision::Skip(SkipReason::RateLimited {
                        remaining: self.config.photo_interval - elapsed,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use crate::tracking::ObjectRegistry;

    fn det(class: &str, x: f32) -> Detection {
        Detection::new(class, 0.8, BoundingBox::new(x, 100.0, 60.0, 40.0))
    }

    /// Registry + memory harness that saves whenever the policy says so.
    struct Harness {
        registry: ObjectRegistry,
        policy: DecisionPolicy,
        memory: SnapshotMemory,
        t0: Instant,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                registry: ObjectRegistry::default(),
                policy: DecisionPolicy::default(),
                memory: SnapshotMemory::default(),
                t0: Instant::now(),
            }
        }

        fn frame(&mut self, secs: u64, detections: &[Detection]) -> Decision {
            let now = self.t0 + Duration::from_secs(secs);
            self.registry.update(detections, now);
            let decision =
                self.policy
                    .decide(detections, self.registry.tracked_objects(), &self.memory, now);
            if decision.should_persist() {
                self.memory.record_save(object_histogram(detections), now);
            }
            decision
        }
    }

    #[test]
    fn no_targets_never_persists() {
        let mut h = Harness::new();
        assert_eq!(h.frame(0, &[]), Decision::Skip(SkipReason::NoTargets));
        assert_eq!(h.frame(60, &[]), Decision::Skip(SkipReason::NoTargets));
    }

    #[test]
    fn car_rate_limit_cycle() {
        let mut h = Harness::new();
        let car = [det("car", 100.0)];

        assert!(h.frame(0, &car).is_immediate());
        assert_eq!(
            h.memory.last_saved_object_counts,
            BTreeMap::from([("car".to_string(), 1)])
        );
        assert!(matches!(
            h.frame(3, &car),
            Decision::Skip(SkipReason::RateLimited { .. })
        ));
        assert_eq!(h.frame(10, &car), Decision::Persist(PersistReason::Interval));
        assert_eq!(h.memory.last_photo_time, Some(h.t0 + Duration::from_secs(10)));
    }

    #[test]
    fn parked_car_stops_periodic_saves() {
        let mut h = Harness::new();
        let car = [det("car", 100.0)];
        let mut saves = Vec::new();
        for t in 0..=200 {
            if h.frame(t, &car).should_persist() {
                saves.push(t);
            }
        }
        // Stationary from t=2, so the timeout passes after t=122.
        assert_eq!(
            saves,
            vec![0, 10, 20, 30, 40, 50, 60, 70, 80, 90, 100, 110, 120]
        );
        assert_eq!(
            h.frame(201, &car),
            Decision::Skip(SkipReason::StationaryTimeout)
        );
    }

    #[test]
    fn new_type_saves_through_stationary_suppression() {
        let mut h = Harness::new();
        let car = det("car", 100.0);
        for t in 0..=130 {
            h.frame(t, &[car.clone()]);
        }
        assert_eq!(
            h.frame(131, &[car.clone()]),
            Decision::Skip(SkipReason::StationaryTimeout)
        );

        let decision = h.frame(132, &[car.clone(), det("person", 400.0)]);
        assert_eq!(
            decision,
            Decision::Persist(PersistReason::NewObjectType {
                class_name: "person".into()
            })
        );
    }

    #[test]
    fn new_type_bypasses_rate_limit() {
        let mut h = Harness::new();
        let car = det("car", 100.0);
        assert!(h.frame(0, &[car.clone()]).should_persist());

        let decision = h.frame(1, &[car, det("dog", 400.0)]);
        assert!(decision.is_immediate());
    }

    #[test]
    fn second_person_is_new_instance() {
        let mut h = Harness::new();
        assert!(h.frame(0, &[det("person", 100.0)]).should_persist());

        let decision = h.frame(1, &[det("person", 100.0), det("person", 400.0)]);
        assert_eq!(
            decision,
            Decision::Persist(PersistReason::NewInstance {
                class_name: "person".into(),
                previous: 1,
                current: 2
            })
        );
        assert_eq!(h.memory.last_saved_object_counts.get("person"), Some(&2));
    }

    #[test]
    fn fewer_instances_do_not_trigger() {
        let mut h = Harness::new();
        h.frame(0, &[det("person", 100.0), det("person", 400.0)]);
        assert!(!h.frame(1, &[det("person", 100.0)]).should_persist());
    }

    #[test]
    fn reentry_persists_without_histogram_change() {
        let mut h = Harness::new();
        let car = [det("car", 100.0)];
        h.frame(0, &car);
        for t in 1..=6 {
            h.frame(t, &[]);
        }
        let decision = h.frame(7, &car);
        assert!(matches!(
            decision,
            Decision::Persist(PersistReason::NewlyEntered { id: 1, .. })
        ));
    }

    #[test]
    fn moving_object_lifts_suppression_on_next_interval() {
        let mut h = Harness::new();
        for t in 0..=130 {
            h.frame(t, &[det("car", 100.0)]);
        }
        // Moves 30px: stationary cleared, interval long elapsed.
        assert_eq!(
            h.frame(131, &[det("car", 130.0)]),
            Decision::Persist(PersistReason::Interval)
        );
    }

    #[test]
    fn decision_display() {
        let d = Decision::Skip(SkipReason::RateLimited {
            remaining: Duration::from_millis(2500),
        });
        assert_eq!(d.to_string(), "skip (rate limited (2.5s remaining))");
    }
}
