//! Frame Sentinel
//!
//! Parallel frame processing with cross-frame object tracking and a snapshot
//! policy that decides which frames are worth keeping.
//!
//! # Pipeline
//!
//! ```text
//! FrameSource -> FrameDispatcher::submit -> DetectorBackend::detect
//!             -> ObjectRegistry::update -> DecisionPolicy::decide
//!             -> SnapshotWriter (annotate + persist) -> FrameHandle
//! ```
//!
//! Detection runs concurrently across workers. Tracking, the decision and the
//! snapshot write run as one critical section per frame, in submission order,
//! so enter/exit accounting and the rate limit never see interleaved frames.
//!
//! # Module Structure
//!
//! - `frame`: owned pixel buffers with capture clocks
//! - `detect`: detector port, target-class filter, stub and scripted backends
//! - `tracking`: object registry (identity, enter/exit hysteresis, stationary status)
//! - `policy`: snapshot decision policy and snapshot memory
//! - `annotate`, `snapshot`: annotated copies and atomic persistence
//! - `pipeline`: per-frame body and the ordering gate
//! - `dispatcher`, `collector`: bounded worker pool and FIFO result collection
//! - `throttle`: capture-side rate limit with burst mode
//! - `ingest`: frame sources
//! - `config`, `stats`: daemon configuration and counters

pub mod annotate;
pub mod collector;
pub mod config;
pub mod detect;
pub mod dispatcher;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod policy;
pub mod snapshot;
pub mod stats;
pub mod throttle;
pub mod tracking;

pub use collector::PendingFrames;
pub use config::SentinelConfig;
pub use detect::{
    BoundingBox, Detection, DetectionScript, DetectorBackend, ScriptedBackend, StubBackend,
    TargetClasses,
};
pub use dispatcher::{DispatchConfig, FrameDispatcher, FrameHandle};
pub use frame::Frame;
pub use ingest::{open_source, FrameSource, SourceSettings};
pub use pipeline::{FrameProcessor, FrameResult};
pub use policy::{Decision, DecisionPolicy, PersistReason, PolicyConfig, SkipReason, SnapshotMemory};
pub use snapshot::{FilesystemSink, MemorySink, SnapshotConfig, SnapshotSink, SnapshotWriter};
pub use stats::{PipelineStats, StatsSnapshot};
pub use throttle::{AnalysisThrottle, ThrottleSettings};
pub use tracking::{ObjectRegistry, TrackEvent, TrackedObject, TrackingConfig};
