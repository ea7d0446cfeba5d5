//! replay - run a detection script through the full pipeline with simulated time

use anyhow::{anyhow, Result};
use clap::Parser;
use image::{Rgb, RgbImage};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use frame_sentinel::annotate::Annotator;
use frame_sentinel::{
    Decision, DecisionPolicy, DetectionScript, DetectorBackend, DispatchConfig, Frame,
    FrameDispatcher, FrameProcessor, FrameResult, MemorySink, PendingFrames, PersistReason,
    PolicyConfig, ScriptedBackend, SnapshotConfig, SnapshotWriter, StubBackend, TargetClasses,
    TrackEvent, TrackingConfig,
};

const DEFAULT_FRAMES: u64 = 100;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Detection script (JSON). Without one, the stub detector reports nothing.
    #[arg(long)]
    script: Option<PathBuf>,
    /// Output directory for snapshots.
    #[arg(long, default_value = "snapshots")]
    out: PathBuf,
    /// Worker threads (1 = sequential).
    #[arg(long, default_value_t = 1)]
    threads: usize,
    /// Bounded queue capacity for parallel mode.
    #[arg(long, default_value_t = 10)]
    queue: usize,
    /// Simulated capture rate in frames per second.
    #[arg(long, default_value_t = 5.0)]
    fps: f64,
    /// Number of frames to replay (defaults to the script length).
    #[arg(long)]
    frames: Option<u64>,
    /// Loop the script when replaying more frames than it covers.
    #[arg(long = "loop")]
    looped: bool,
    #[arg(long, default_value_t = 640)]
    width: u32,
    #[arg(long, default_value_t = 480)]
    height: u32,
    /// Minimum seconds between periodic snapshots.
    #[arg(long, default_value_t = 10)]
    photo_interval_secs: u64,
    /// Seconds of stillness after which periodic snapshots stop.
    #[arg(long, default_value_t = 120)]
    stationary_timeout_secs: u64,
    /// Comma-separated target classes (empty = all classes).
    #[arg(long, env = "SENTINEL_TARGET_CLASSES")]
    targets: Option<String>,
    /// Decide and annotate, but keep snapshots in memory.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    if !args.fps.is_finite() || args.fps <= 0.0 {
        return Err(anyhow!("fps must be > 0"));
    }

    let (detector, script_frames): (Arc<dyn DetectorBackend>, Option<u64>) = match &args.script {
        Some(path) => {
            let script = DetectionScript::load(path)?;
            let frames = script.frame_count();
            let mut backend = ScriptedBackend::from_script(script);
            if args.looped {
                backend = backend.looping();
            }
            (Arc::new(backend), Some(frames))
        }
        None => (Arc::new(StubBackend::new()), None),
    };
    detector.warm_up()?;
    let total_frames = args.frames.or(script_frames).unwrap_or(DEFAULT_FRAMES);

    let policy = DecisionPolicy::new(PolicyConfig {
        photo_interval: Duration::from_secs(args.photo_interval_secs),
        stationary_timeout: Duration::from_secs(args.stationary_timeout_secs),
    });
    policy.config().validate()?;

    let memory_sink = Arc::new(MemorySink::new());
    let writer = if args.dry_run {
        SnapshotWriter::with_sink(policy, Annotator::new(), Box::new(Arc::clone(&memory_sink)))
    } else {
        let config = SnapshotConfig {
            output_dir: args.out.clone(),
            ..SnapshotConfig::default()
        };
        SnapshotWriter::new(&config, policy)?
    };

    let targets = match args.targets.as_deref() {
        Some(list) => TargetClasses::new(list.split(',')),
        None => TargetClasses::default(),
    };
    let processor = FrameProcessor::new(detector, targets, TrackingConfig::default(), writer);
    let dispatcher = FrameDispatcher::new(
        DispatchConfig {
            num_threads: args.threads,
            max_queue_size: args.queue,
        },
        processor,
    )?;

    let base_instant = Instant::now();
    let base_time = SystemTime::now();
    let background = RgbImage::from_pixel(args.width, args.height, Rgb([48, 48, 48]));
    let mut pending = PendingFrames::new();
    let mut summary = Summary::default();

    for sequence in 0..total_frames {
        let offset = Duration::from_secs_f64(sequence as f64 / args.fps);
        let frame = Frame::with_capture_time(
            background.clone(),
            sequence,
            base_time + offset,
            base_instant + offset,
        );
        pending.push(dispatcher.submit(&frame)?);
        for result in pending.drain_ready() {
            summary.record(&result, args.fps);
        }
    }
    dispatcher.shutdown()?;
    for result in pending.drain_all() {
        summary.record(&result, args.fps);
    }

    let stats = dispatcher.stats().snapshot();
    println!("replay summary:");
    println!("  frames submitted: {}", stats.submitted);
    println!("  frames processed: {}", stats.processed);
    println!("  frames failed: {}", stats.failed);
    println!("  objects entered: {}", summary.entered);
    println!("  objects exited: {}", summary.exited);
    println!("  snapshots saved: {}", stats.snapshots_saved);
    println!("  snapshot failures: {}", stats.snapshot_failures);
    for (reason, count) in &summary.reasons {
        println!("    {}: {}", reason, count);
    }
    if args.dry_run {
        for name in memory_sink.saved() {
            println!("  (dry run) {}", name);
        }
    } else {
        println!("  output dir: {}", args.out.display());
    }
    Ok(())
}

#[derive(Default)]
struct Summary {
    entered: u64,
    exited: u64,
    reasons: BTreeMap<String, u64>,
}

impl Summary {
    fn record(&mut self, result: &FrameResult, fps: f64) {
        for event in &result.events {
            match event {
                TrackEvent::Entered { .. } => self.entered += 1,
                TrackEvent::Exited { .. } => self.exited += 1,
                _ => {}
            }
        }
        if let (Some(decision), Some(_)) = (&result.decision, &result.snapshot) {
            println!(
                "t={:>7.2}s frame {:>5}: {}",
                result.sequence as f64 / fps,
                result.sequence,
                decision
            );
            let key = match decision {
                Decision::Persist(reason) => reason_kind(reason),
                Decision::Skip(_) => "skip",
            };
            *self.reasons.entry(key.to_string()).or_insert(0) += 1;
        }
    }
}

fn reason_kind(reason: &PersistReason) -> &'static str {
    match reason {
        PersistReason::NewObjectType { .. } => "new object type",
        PersistReason::NewInstance { .. } => "new instance",
        PersistReason::NewlyEntered { .. } => "newly entered",
        PersistReason::Interval => "interval",
    }
}
