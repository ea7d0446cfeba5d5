pub mod scripted;
pub mod stub;

pub use scripted::{DetectionScript, ScriptedBackend};
pub use stub::StubBackend;
