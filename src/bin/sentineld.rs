//! sentineld - frame sentinel daemon
//!
//! This daemon:
//! 1. Captures frames from the configured source (stub:// or dir://)
//! 2. Throttles analysis to the configured rate (burst mode lifts the limit)
//! 3. Dispatches frames to the detector/tracker pipeline
//! 4. Collects results in submission order
//! 5. Logs a periodic stats summary
//! 6. Drains in-flight frames on Ctrl-C

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use frame_sentinel::{
    open_source, AnalysisThrottle, DetectorBackend, FrameDispatcher, FrameProcessor, FrameResult,
    PendingFrames, ScriptedBackend, SentinelConfig, StubBackend,
};

const MAX_CONSECUTIVE_SOURCE_ERRORS: u32 = 10;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = SentinelConfig::load()?;

    let running = Arc::new(AtomicBool::new(true));
    let signal = Arc::clone(&running);
    ctrlc::set_handler(move || {
        signal.store(false, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;

    let detector: Arc<dyn DetectorBackend> = match &cfg.detector_script {
        Some(path) => Arc::new(ScriptedBackend::load(path)?.looping()),
        None => Arc::new(StubBackend::new()),
    };
    detector.warm_up()?;

    let processor = FrameProcessor::from_config(&cfg, detector)?;
    let dispatcher = FrameDispatcher::new(cfg.dispatch.clone(), processor)?;
    let mut source = open_source(&cfg.source)?;
    let mut throttle = AnalysisThrottle::new(&cfg.throttle)?;
    let mut pending = PendingFrames::new();

    log::info!(
        "sentineld running. source={} snapshots={}",
        source.name(),
        cfg.snapshot.output_dir.display()
    );
    log::info!(
        "analysis rate limit: {:.2}/s, burst mode {}",
        cfg.throttle.analysis_rate_limit,
        if cfg.throttle.burst_mode { "enabled" } else { "disabled" }
    );

    let mut last_stats = Instant::now();
    let mut source_errors = 0u32;
    while running.load(Ordering::SeqCst) {
        let frame = match source.next_frame() {
            Ok(Some(frame)) => {
                source_errors = 0;
                frame
            }
            Ok(None) => {
                log::info!("source {} exhausted", source.name());
                break;
            }
            Err(e) => {
                source_errors += 1;
                log::error!("capture failed ({}/{}): {}", source_errors, MAX_CONSECUTIVE_SOURCE_ERRORS, e);
                if source_errors >= MAX_CONSECUTIVE_SOURCE_ERRORS {
                    log::error!("too many consecutive capture failures, stopping");
                    break;
                }
                std::thread::sleep(Duration::from_millis(500));
                continue;
            }
        };

        if throttle.ready(frame.capture_instant) {
            throttle.mark_submitted(frame.capture_instant);
            pending.push(dispatcher.submit(&frame)?);
        }

        for result in pending.drain_ready() {
            report(&result);
        }
        if cfg.throttle.burst_mode {
            throttle.observe(&dispatcher.processor().tracked_objects()?);
        }

        if last_stats.elapsed() >= cfg.stats_interval {
            log::info!("stats: {}", dispatcher.stats().snapshot());
            last_stats = Instant::now();
        }
    }

    log::info!("shutting down, {} frame(s) in flight", pending.len());
    dispatcher.shutdown()?;
    for result in pending.drain_all() {
        report(&result);
    }
    log::info!("final stats: {}", dispatcher.stats().snapshot());
    Ok(())
}

fn report(result: &FrameResult) {
    if !result.processed {
        return;
    }
    if let Some(path) = &result.snapshot {
        log::debug!("frame {} -> {}", result.sequence, path.display());
    }
}
