//! Frame dispatcher.
//!
//! Two modes behind the same `submit` contract:
//! - Sequential (`num_threads == 1`): the frame is processed on the caller's
//!   thread and the returned handle is already resolved.
//! - Parallel (`num_threads > 1`): the frame is queued on a bounded queue served
//!   by a fixed worker pool. A full queue blocks the submitter; frames are never
//!   dropped.
//!
//! Handles resolve in completion order. Callers that want submission order keep
//! handles in a FIFO (see `collector::PendingFrames`).

use std::cell::OnceCell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::frame::Frame;
use crate::pipeline::{FrameProcessor, FrameResult};
use crate::stats::PipelineStats;

pub const DEFAULT_NUM_THREADS: usize = 1;
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 10;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchConfig {
    pub num_threads: usize,
    pub max_queue_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            num_threads: DEFAULT_NUM_THREADS,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_threads == 0 {
            return Err(anyhow!("num_threads must be >= 1"));
        }
        if self.max_queue_size == 0 {
            return Err(anyhow!("max_queue_size must be >= 1"));
        }
        Ok(())
    }
}

/// Pending result of one submitted frame.
pub struct FrameHandle {
    ticket: u64,
    sequence: u64,
    capture_time: SystemTime,
    rx: Receiver<FrameResult>,
    received: OnceCell<FrameResult>,
}

impl FrameHandle {
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Block until the frame is resolved.
    pub fn wait(self) -> FrameResult {
        if let Some(result) = self.received.into_inner() {
            return result;
        }
        match self.rx.recv() {
            Ok(result) => result,
            Err(_) => abandoned(self.ticket, self.sequence, self.capture_time),
        }
    }

    /// Result if already resolved. Once resolved, every call returns the same result.
    pub fn try_wait(&self) -> Option<FrameResult> {
        if let Some(result) = self.received.get() {
            return Some(result.clone());
        }
        match self.rx.try_recv() {
            Ok(result) => Some(self.keep(result)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(self.abandoned()),
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<FrameResult> {
        if let Some(result) = self.received.get() {
            return Some(result.clone());
        }
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(self.keep(result)),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(self.abandoned()),
        }
    }

    fn keep(&self, result: FrameResult) -> FrameResult {
        self.received.get_or_init(|| result).clone()
    }

    fn abandoned(&self) -> FrameResult {
        abandoned(self.ticket, self.sequence, self.capture_time)
    }
}

fn abandoned(ticket: u64, sequence: u64, capture_time: SystemTime) -> FrameResult {
    FrameResult::unprocessed(
        ticket,
        sequence,
        capture_time,
        "frame abandoned before completion".to_string(),
    )
}

struct Task {
    ticket: u64,
    frame: Frame,
    reply: Sender<FrameResult>,
}

struct QueueState {
    tasks: VecDeque<Task>,
    next_ticket: u64,
    shutting_down: bool,
}

struct WorkQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl WorkQueue {
    fn lock(&self) -> Result<MutexGuard<'_, QueueState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("frame queue lock poisoned"))
    }
}

enum Mode {
    Sequential { next_ticket: AtomicU64 },
    Parallel {
        queue: Arc<WorkQueue>,
        workers: Mutex<Vec<JoinHandle<()>>>,
    },
}

pub struct FrameDispatcher {
    processor: Arc<FrameProcessor>,
    mode: Mode,
    stopped: AtomicBool,
}

impl FrameDispatcher {
    pub fn new(config: DispatchConfig, processor: FrameProcessor) -> Result<Self> {
        config.validate()?;
        let processor = Arc::new(processor);

        let mode = if config.num_threads == 1 {
            log::info!(
                "frame dispatcher: sequential mode ({} detector)",
                processor.detector_name()
            );
            Mode::Sequential {
                next_ticket: AtomicU64::new(0),
            }
        } else {
            let queue = Arc::new(WorkQueue {
                state: Mutex::new(QueueState {
                    tasks: VecDeque::with_capacity(config.max_queue_size),
                    next_ticket: 0,
                    shutting_down: false,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
                capacity: config.max_queue_size,
            });
            let mut workers = Vec::with_capacity(config.num_threads);
            for index in 0..config.num_threads {
                let queue = Arc::clone(&queue);
                let processor = Arc::clone(&processor);
                let join = thread::Builder::new()
                    .name(format!("frame-worker-{}", index))
                    .spawn(move || run_worker(index, queue, processor))
                    .with_context(|| format!("failed to spawn frame worker {}", index))?;
                workers.push(join);
            }
            log::info!(
                "frame dispatcher: {} workers, queue capacity {} ({} detector)",
                config.num_threads,
                config.max_queue_size,
                processor.detector_name()
            );
            Mode::Parallel {
                queue,
                workers: Mutex::new(workers),
            }
        };

        Ok(Self {
            processor,
            mode,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self.mode, Mode::Parallel { .. })
    }

    pub fn processor(&self) -> &Arc<FrameProcessor> {
        &self.processor
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.processor.stats()
    }

    /// Frames waiting for a worker. Always 0 in sequential mode.
    pub fn queue_len(&self) -> usize {
        match &self.mode {
            Mode::Sequential { .. } => 0,
            Mode::Parallel { queue, .. } => queue.lock().map(|state| state.tasks.len()).unwrap_or(0),
        }
    }

    /// Submit a copy of `frame`.
    ///
    /// Blocks while the queue is full. Fails once shutdown has begun.
    pub fn submit(&self, frame: &Frame) -> Result<FrameHandle> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(anyhow!("frame dispatcher is shut down"));
        }
        let frame = frame.clone();
        let (reply, rx) = bounded(1);
        let sequence = frame.sequence;
        let capture_time = frame.captured_at;

        let ticket = match &self.mode {
            Mode::Sequential { next_ticket } => {
                let ticket = next_ticket.fetch_add(1, Ordering::SeqCst);
                self.processor.stats().record_submitted();
                let result = process_contained(&self.processor, ticket, frame);
                // The receiver is still held locally, so this cannot fail.
                let _ = reply.send(result);
                ticket
            }
            Mode::Parallel { queue, .. } => self.enqueue(queue, frame, reply)?,
        };

        Ok(FrameHandle {
            ticket,
            sequence,
            capture_time,
            rx,
            received: OnceCell::new(),
        })
    }

    fn enqueue(&self, queue: &WorkQueue, frame: Frame, reply: Sender<FrameResult>) -> Result<u64> {
        let mut state = queue.lock()?;
        if state.tasks.len() >= queue.capacity && !state.shutting_down {
            log::warn!(
                "frame queue full ({} pending); blocking submit of frame {}",
                state.tasks.len(),
                frame.sequence
            );
            self.processor.stats().record_backpressure();
            while state.tasks.len() >= queue.capacity && !state.shutting_down {
                state = queue
                    .not_full
                    .wait(state)
                    .map_err(|_| anyhow!("frame queue lock poisoned"))?;
            }
        }
        if state.shutting_down {
            return Err(anyhow!("frame dispatcher is shut down"));
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.tasks.push_back(Task {
            ticket,
            frame,
            reply,
        });
        self.processor.stats().record_submitted();
        drop(state);
        queue.not_empty.notify_one();
        Ok(ticket)
    }

    /// Stop intake, let queued and in-flight frames finish, join the workers.
    ///
    /// Idempotent.
    pub fn shutdown(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let Mode::Parallel { queue, workers } = &self.mode else {
            return Ok(());
        };

        {
            let mut state = queue.lock()?;
            state.shutting_down = true;
            log::info!(
                "frame dispatcher shutting down ({} queued)",
                state.tasks.len()
            );
        }
        queue.not_empty.notify_all();
        queue.not_full.notify_all();

        let handles: Vec<_> = workers
            .lock()
            .map_err(|_| anyhow!("worker list lock poisoned"))?
            .drain(..)
            .collect();
        let mut panicked = 0;
        for join in handles {
            if join.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            return Err(anyhow!("{} frame worker(s) panicked", panicked));
        }
        Ok(())
    }
}

impl Drop for FrameDispatcher {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::warn!("frame dispatcher shutdown: {}", err);
        }
    }
}

/// Process one frame, turning a panic into an unprocessed result.
fn process_contained(processor: &FrameProcessor, ticket: u64, frame: Frame) -> FrameResult {
    let sequence = frame.sequence;
    let capture_time = frame.captured_at;
    match panic::catch_unwind(AssertUnwindSafe(|| processor.process(ticket, frame))) {
        Ok(result) => result,
        Err(_) => {
            log::error!("panic while processing frame {} (ticket {})", sequence, ticket);
            processor.stats().record_failed();
            FrameResult::unprocessed(
                ticket,
                sequence,
                capture_time,
                "panicked while processing frame".to_string(),
            )
        }
    }
}

fn run_worker(index: usize, queue: Arc<WorkQueue>, processor: Arc<FrameProcessor>) {
    log::debug!("frame-worker-{} started", index);
    loop {
        let task = {
            let mut state = match queue.lock() {
                Ok(state) => state,
                Err(err) => {
                    log::error!("frame-worker-{}: {}", index, err);
                    break;
                }
            };
            loop {
                if let Some(task) = state.tasks.pop_front() {
                    break Some(task);
                }
                if state.shutting_down {
                    break None;
                }
                state = match queue.not_empty.wait(state) {
                    Ok(state) => state,
                    Err(_) => {
                        log::error!("frame-worker-{}: frame queue lock poisoned", index);
                        return;
                    }
                };
            }
        };
        let Some(task) = task else {
            break;
        };
        queue.not_full.notify_one();

        let Task {
            ticket,
            frame,
            reply,
        } = task;
        let sequence = frame.sequence;
        let result = process_contained(&processor, ticket, frame);
        if reply.send(result).is_err() {
            log::debug!("frame {} resolved after its handle was dropped", sequence);
        }
    }
    log::debug!("frame-worker-{} stopped", index);
}
