use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{TargetClasses, DEFAULT_TARGET_CLASSES};
use crate::dispatcher::DispatchConfig;
use crate::ingest::SourceSettings;
use crate::policy::PolicyConfig;
use crate::snapshot::SnapshotConfig;
use crate::throttle::ThrottleSettings;
use crate::tracking::TrackingConfig;

const DEFAULT_STATS_INTERVAL_SECS: u64 = 60 * 60;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SentinelConfigFile {
    source: Option<SourceConfigFile>,
    dispatch: Option<DispatchConfigFile>,
    tracking: Option<TrackingConfigFile>,
    policy: Option<PolicyConfigFile>,
    snapshot: Option<SnapshotConfigFile>,
    throttle: Option<ThrottleConfigFile>,
    target_classes: Option<Vec<String>>,
    detector_script: Option<PathBuf>,
    stats_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SourceConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DispatchConfigFile {
    num_threads: Option<usize>,
    max_queue_size: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TrackingConfigFile {
    match_distance: Option<f32>,
    exit_after_frames: Option<u32>,
    stale_after_frames: Option<u32>,
    stationary_jitter: Option<f32>,
    stationary_window: Option<usize>,
    stationary_min_samples: Option<usize>,
    movement_log_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PolicyConfigFile {
    photo_interval_secs: Option<u64>,
    stationary_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SnapshotConfigFile {
    output_dir: Option<PathBuf>,
    jpeg_quality: Option<u8>,
    label_font: Option<PathBuf>,
    label_scale: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ThrottleConfigFile {
    analysis_rate_limit: Option<f64>,
    burst_mode: Option<bool>,
}

/// Daemon configuration.
///
/// Loaded from the file named by `SENTINEL_CONFIG` (JSON, or TOML for a
/// `.toml` path), then overridden from the environment, then validated.
/// Every field has a default, so no file is required.
#[derive(Debug, Clone, PartialEq)]
pub struct SentinelConfig {
    pub source: SourceSettings,
    pub dispatch: DispatchConfig,
    pub tracking: TrackingConfig,
    pub policy: PolicyConfig,
    pub snapshot: SnapshotConfig,
    pub throttle: ThrottleSettings,
    /// Classes to track. An empty list tracks every class.
    pub target_classes: Vec<String>,
    /// Detection script replayed by the scripted detector. None runs the stub detector.
    pub detector_script: Option<PathBuf>,
    /// How often the daemon logs a stats summary.
    pub stats_interval: Duration,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self::from_file(SentinelConfigFile::default())
    }
}

impl SentinelConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTINEL_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from an explicit file, skipping the environment.
    pub fn from_path(path: &Path) -> Result<Self> {
        let cfg = Self::from_file(read_config_file(path)?);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentinelConfigFile) -> Self {
        let source_file = file.source.unwrap_or_default();
        let source_defaults = SourceSettings::default();
        let source = SourceSettings {
            url: source_file.url.unwrap_or(source_defaults.url),
            width: source_file.width.unwrap_or(source_defaults.width),
            height: source_file.height.unwrap_or(source_defaults.height),
            target_fps: source_file.target_fps.unwrap_or(source_defaults.target_fps),
        };

        let dispatch_file = file.dispatch.unwrap_or_default();
        let dispatch_defaults = DispatchConfig::default();
        let dispatch = DispatchConfig {
            num_threads: dispatch_file
                .num_threads
                .unwrap_or(dispatch_defaults.num_threads),
            max_queue_size: dispatch_file
                .max_queue_size
                .unwrap_or(dispatch_defaults.max_queue_size),
        };

        let tracking_file = file.tracking.unwrap_or_default();
        let tracking_defaults = TrackingConfig::default();
        let tracking = TrackingConfig {
            match_distance: tracking_file
                .match_distance
                .unwrap_or(tracking_defaults.match_distance),
            exit_after_frames: tracking_file
                .exit_after_frames
                .unwrap_or(tracking_defaults.exit_after_frames),
            stale_after_frames: tracking_file
                .stale_after_frames
                .unwrap_or(tracking_defaults.stale_after_frames),
            stationary_jitter: tracking_file
                .stationary_jitter
                .unwrap_or(tracking_defaults.stationary_jitter),
            stationary_window: tracking_file
                .stationary_window
                .unwrap_or(tracking_defaults.stationary_window),
            stationary_min_samples: tracking_file
                .stationary_min_samples
                .unwrap_or(tracking_defaults.stationary_min_samples),
            movement_log_threshold: tracking_file
                .movement_log_threshold
                .unwrap_or(tracking_defaults.movement_log_threshold),
        };

        let policy_file = file.policy.unwrap_or_default();
        let policy_defaults = PolicyConfig::default();
        let policy = PolicyConfig {
            photo_interval: policy_file
                .photo_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(policy_defaults.photo_interval),
            stationary_timeout: policy_file
                .stationary_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(policy_defaults.stationary_timeout),
        };

        let snapshot_file = file.snapshot.unwrap_or_default();
        let snapshot_defaults = SnapshotConfig::default();
        let snapshot = SnapshotConfig {
            output_dir: snapshot_file
                .output_dir
                .unwrap_or(snapshot_defaults.output_dir),
            jpeg_quality: snapshot_file
                .jpeg_quality
                .unwrap_or(snapshot_defaults.jpeg_quality),
            label_font: snapshot_file.label_font.or(snapshot_defaults.label_font),
            label_scale: snapshot_file
                .label_scale
                .unwrap_or(snapshot_defaults.label_scale),
        };

        let throttle_file = file.throttle.unwrap_or_default();
        let throttle_defaults = ThrottleSettings::default();
        let throttle = ThrottleSettings {
            analysis_rate_limit: throttle_file
                .analysis_rate_limit
                .unwrap_or(throttle_defaults.analysis_rate_limit),
            burst_mode: throttle_file
                .burst_mode
                .unwrap_or(throttle_defaults.burst_mode),
        };

        let target_classes = file.target_classes.unwrap_or_else(|| {
            DEFAULT_TARGET_CLASSES
                .iter()
                .map(|class| class.to_string())
                .collect()
        });

        Self {
            source,
            dispatch,
            tracking,
            policy,
            snapshot,
            throttle,
            target_classes,
            detector_script: file.detector_script,
            stats_interval: Duration::from_secs(
                file.stats_interval_secs
                    .unwrap_or(DEFAULT_STATS_INTERVAL_SECS),
            ),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("SENTINEL_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(dir) = std::env::var("SENTINEL_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.snapshot.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(threads) = std::env::var("SENTINEL_THREADS") {
            self.dispatch.num_threads = threads
                .trim()
                .parse()
                .map_err(|_| anyhow!("SENTINEL_THREADS must be a positive integer"))?;
        }
        if let Ok(queue) = std::env::var("SENTINEL_QUEUE_SIZE") {
            self.dispatch.max_queue_size = queue
                .trim()
                .parse()
                .map_err(|_| anyhow!("SENTINEL_QUEUE_SIZE must be a positive integer"))?;
        }
        if let Ok(interval) = std::env::var("SENTINEL_PHOTO_INTERVAL_SECS") {
            let seconds: u64 = interval.trim().parse().map_err(|_| {
                anyhow!("SENTINEL_PHOTO_INTERVAL_SECS must be an integer number of seconds")
            })?;
            self.policy.photo_interval = Duration::from_secs(seconds);
        }
        if let Ok(timeout) = std::env::var("SENTINEL_STATIONARY_TIMEOUT_SECS") {
            let seconds: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("SENTINEL_STATIONARY_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.policy.stationary_timeout = Duration::from_secs(seconds);
        }
        if let Ok(classes) = std::env::var("SENTINEL_TARGET_CLASSES") {
            let parsed = split_csv(&classes);
            if !parsed.is_empty() {
                self.target_classes = parsed;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.source.validate()?;
        self.dispatch.validate()?;
        self.tracking.validate()?;
        self.policy.validate()?;
        self.snapshot.validate()?;
        self.throttle.validate()?;
        if self.stats_interval.is_zero() {
            return Err(anyhow!("stats_interval must be greater than zero"));
        }
        Ok(())
    }

    pub fn targets(&self) -> TargetClasses {
        TargetClasses::new(self.target_classes.iter().cloned())
    }
}

fn read_config_file(path: &Path) -> Result<SentinelConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
