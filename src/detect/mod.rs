//! Detection port.
//!
//! The core treats the detector as a black box: a frame goes in, a list of
//! labelled boxes comes out. Backends must be safe to call from several worker
//! threads at once.

mod backend;
mod backends;
mod result;
mod targets;

pub use backend::DetectorBackend;
pub use backends::{DetectionScript, ScriptedBackend, StubBackend};
pub use result::{BoundingBox, Detection};
pub use targets::{normalize_class, TargetClasses, DEFAULT_TARGET_CLASSES};
