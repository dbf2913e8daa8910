//! Capture hardware boundary
//!
//! The hardware capture subsystem is an external collaborator. It is
//! configured once at bootstrap with its scratch buffers and a [`FrameSink`],
//! then started and suspended by the pipeline lifecycle. Whenever it has a
//! complete compressed frame it calls [`FrameSink::on_frame_captured`].

pub mod synthetic;

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::frame::{FrameOutcome, FrameStore};
use crate::memory::CaptureBuffers;

pub use synthetic::{CameraMonitor, SyntheticCamera};

/// Stream parameters passed to the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Time between frames
    pub frame_interval: Duration,
}

/// A hardware video source delivering complete compressed frames
pub trait CaptureDevice: Send + 'static {
    /// Configure the stream and register the frame callback
    ///
    /// Called exactly once, at bootstrap.
    fn configure(
        &mut self,
        config: CaptureConfig,
        buffers: CaptureBuffers,
        sink: FrameSink,
    ) -> Result<()>;

    /// Start (or resume) frame delivery
    fn start(&mut self) -> Result<()>;

    /// Stop delivering frames but keep the stream handle for a later restart
    fn suspend(&mut self) {}
}

/// Capture callback target handed to the hardware
///
/// Cheap to clone; every clone writes into the same frame store.
#[derive(Clone)]
pub struct FrameSink {
    store: Arc<FrameStore>,
}

impl FrameSink {
    pub fn new(store: Arc<FrameStore>) -> Self {
        Self { store }
    }

    /// Hand a complete frame to the store
    ///
    /// Safe to call from the hardware's callback context: it never blocks on
    /// a reader, never allocates and never panics.
    pub fn on_frame_captured(&self, data: &[u8]) -> FrameOutcome {
        self.store.on_frame_captured(data)
    }

    /// Buffer capacity, for drivers that want to pre-check lengths
    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }
}

impl std::fmt::Debug for FrameSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSink")
            .field("capacity", &self.store.capacity())
            .finish()
    }
}
