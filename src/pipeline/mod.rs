//! Pipeline lifecycle
//!
//! [`Pipeline`] owns every long-lived piece: the frame store, the capture
//! device, the slot table and, while running, the admission queue and the
//! dispatcher task. `start()` and `stop()` are idempotent because the
//! connectivity collaborator may call either one repeatedly while the network
//! flaps.

pub mod connectivity;
pub mod lifecycle;

pub use connectivity::Connectivity;
pub use lifecycle::Pipeline;

use std::fmt;

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Nothing running
    Stopped,
    /// `start()` in progress
    Starting,
    /// Capture running, dispatcher accepting viewers
    Running,
    /// `stop()` in progress
    Stopping,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineState::Stopped => "stopped",
            PipelineState::Starting => "starting",
            PipelineState::Running => "running",
            PipelineState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}
