//! Capture-side analysis throttle with optional burst mode.
//!
//! The dispatcher never drops frames, so load shedding happens before
//! `submit`: the capture loop asks `ready` and skips frames that arrive faster
//! than `analysis_rate_limit`. With burst mode enabled the limit is lifted while
//! something new is in the scene:
//! - activated when a class appears that was not present on the previous
//!   observation, or a tracked object (re-)enters
//! - deactivated when every present object is stationary, or nothing is present

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::tracking::TrackedObject;

pub const DEFAULT_ANALYSIS_RATE_LIMIT: f64 = 1.0;

#[derive(Clone, Debug, PartialEq)]
pub struct ThrottleSettings {
    /// Frames analysed per second.
    pub analysis_rate_limit: f64,
    pub burst_mode: bool,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            analysis_rate_limit: DEFAULT_ANALYSIS_RATE_LIMIT,
            burst_mode: false,
        }
    }
}

impl ThrottleSettings {
    pub fn validate(&self) -> Result<()> {
        if !self.analysis_rate_limit.is_finite() || self.analysis_rate_limit <= 0.0 {
            return Err(anyhow!("analysis_rate_limit must be > 0"));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.analysis_rate_limit)
    }
}

#[derive(Debug)]
pub struct AnalysisThrottle {
    interval: Duration,
    burst_enabled: bool,
    burst_active: bool,
    last_submit: Option<Instant>,
    previous_types: BTreeSet<String>,
}

impl AnalysisThrottle {
    pub fn new(settings: &ThrottleSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            interval: settings.interval(),
            burst_enabled: settings.burst_mode,
            burst_active: false,
            last_submit: None,
            previous_types: BTreeSet::new(),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_bursting(&self) -> bool {
        self.burst_enabled && self.burst_active
    }

    /// Whether a frame captured at `now` should be analysed.
    pub fn ready(&self, now: Instant) -> bool {
        if self.is_bursting() {
            return true;
        }
        match self.last_submit {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// Time left until `ready` turns true.
    pub fn wait_time(&self, now: Instant) -> Duration {
        if self.is_bursting() {
            return Duration::ZERO;
        }
        match self.last_submit {
            None => Duration::ZERO,
            Some(last) => self
                .interval
                .saturating_sub(now.saturating_duration_since(last)),
        }
    }

    pub fn mark_submitted(&mut self, now: Instant) {
        self.last_submit = Some(now);
    }

    /// Update burst state from the latest tracked objects.
    pub fn observe(&mut self, tracked: &[TrackedObject]) {
        if !self.burst_enabled {
            return;
        }

        let mut current_types = BTreeSet::new();
        let mut something_new = false;
        let mut all_stationary = true;
        for obj in tracked.iter().filter(|obj| obj.is_present()) {
            if !self.previous_types.contains(&obj.object_type) || obj.is_new {
                something_new = true;
            }
            if !obj.is_stationary {
                all_stationary = false;
            }
            current_types.insert(obj.object_type.clone());
        }

        if something_new {
            if !self.burst_active {
                log::info!("burst mode activated: new object in scene");
            }
            self.burst_active = true;
        } else if current_types.is_empty() {
            if self.burst_active {
                log::info!("burst mode deactivated: scene empty");
            }
            self.burst_active = false;
        } else if all_stationary {
            if self.burst_active {
                log::info!("burst mode deactivated: all objects stationary");
            }
            self.burst_active = false;
        }

        self.previous_types = current_types;
    }
}
