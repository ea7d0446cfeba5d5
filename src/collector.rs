//! Submission-order result collection.
//!
//! The dispatcher resolves handles in completion order. `PendingFrames` keeps
//! them in a FIFO and only releases a result once everything submitted before
//! it has been released too.

use std::collections::VecDeque;

use crate::dispatcher::FrameHandle;
use crate::pipeline::FrameResult;

#[derive(Default)]
pub struct PendingFrames {
    handles: VecDeque<FrameHandle>,
}

impl PendingFrames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handle: FrameHandle) {
        self.handles.push_back(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Pop resolved results from the front without blocking.
    ///
    /// Stops at the first unresolved handle, even if later ones are done.
    pub fn drain_ready(&mut self) -> Vec<FrameResult> {
        let mut ready = Vec::new();
        while let Some(front) = self.handles.front() {
            match front.try_wait() {
                Some(result) => {
                    self.handles.pop_front();
                    ready.push(result);
                }
                None => break,
            }
        }
        ready
    }

    /// Block until every pending frame is resolved, in submission order.
    pub fn drain_all(&mut self) -> Vec<FrameResult> {
        self.handles.drain(..).map(FrameHandle::wait).collect()
    }
}
