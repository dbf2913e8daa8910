//! Pipeline configuration
//!
//! All values are fixed at bootstrap. Nothing here can change while the
//! pipeline is running.

use std::time::Duration;

use crate::error::{Error, Result};

/// Default capture width in pixels
pub const DEFAULT_FRAME_WIDTH: u32 = 800;

/// Default capture height in pixels
pub const DEFAULT_FRAME_HEIGHT: u32 = 600;

/// Default frame interval (3 fps)
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_micros(333_333);

/// Smallest frame accepted from the hardware; anything shorter is a truncated capture
pub const DEFAULT_MIN_FRAME_SIZE: usize = 2000;

/// Capture driver payload buffer size
pub const DEFAULT_PAYLOAD_BUFFER_SIZE: usize = 32 * 1024;

/// Capture driver transfer buffer size
pub const DEFAULT_TRANSFER_BUFFER_SIZE: usize = 128 * 1024;

/// Default number of concurrent viewers
pub const DEFAULT_MAX_VIEWERS: usize = 3;

/// Pipeline configuration options
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Capture width in pixels
    pub frame_width: u32,

    /// Capture height in pixels
    pub frame_height: u32,

    /// Time between frames delivered by the hardware
    pub frame_interval: Duration,

    /// Capacity of each frame buffer (maximum compressed frame size)
    pub frame_buffer_size: usize,

    /// Frames shorter than this are rejected as truncated
    pub min_frame_size: usize,

    /// Size of each capture driver payload buffer
    pub payload_buffer_size: usize,

    /// Size of the capture driver transfer buffer
    pub transfer_buffer_size: usize,

    /// Maximum concurrent viewers (slot table size and admission queue capacity)
    pub max_viewers: usize,

    /// How often a delivery worker polls the frame store when idle
    pub worker_poll_interval: Duration,

    /// How long `stop()` waits for a cancelled task before aborting it
    pub shutdown_grace_period: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_width: DEFAULT_FRAME_WIDTH,
            frame_height: DEFAULT_FRAME_HEIGHT,
            frame_interval: DEFAULT_FRAME_INTERVAL,
            frame_buffer_size: frame_buffer_size_for(DEFAULT_FRAME_WIDTH, DEFAULT_FRAME_HEIGHT),
            min_frame_size: DEFAULT_MIN_FRAME_SIZE,
            payload_buffer_size: DEFAULT_PAYLOAD_BUFFER_SIZE,
            transfer_buffer_size: DEFAULT_TRANSFER_BUFFER_SIZE,
            max_viewers: DEFAULT_MAX_VIEWERS,
            worker_poll_interval: Duration::from_millis(10),
            shutdown_grace_period: Duration::from_secs(2),
        }
    }
}

/// Worst-case compressed frame size for a resolution (2 bytes per pixel)
pub fn frame_buffer_size_for(width: u32, height: u32) -> usize {
    width as usize * height as usize * 2
}

impl PipelineConfig {
    /// Set the capture resolution and resize the frame buffers to match
    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.frame_width = width;
        self.frame_height = height;
        self.frame_buffer_size = frame_buffer_size_for(width, height);
        self
    }

    /// Set the frame interval
    pub fn frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Override the frame buffer capacity
    pub fn frame_buffer_size(mut self, size: usize) -> Self {
        self.frame_buffer_size = size;
        self
    }

    /// Set the truncated-frame threshold
    pub fn min_frame_size(mut self, size: usize) -> Self {
        self.min_frame_size = size;
        self
    }

    /// Set the capture driver scratch buffer sizes
    pub fn driver_buffers(mut self, payload: usize, transfer: usize) -> Self {
        self.payload_buffer_size = payload;
        self.transfer_buffer_size = transfer;
        self
    }

    /// Set maximum concurrent viewers
    pub fn max_viewers(mut self, max: usize) -> Self {
        self.max_viewers = max;
        self
    }

    /// Set the worker poll interval
    pub fn worker_poll_interval(mut self, interval: Duration) -> Self {
        self.worker_poll_interval = interval;
        self
    }

    /// Set the shutdown grace period
    pub fn shutdown_grace_period(mut self, grace: Duration) -> Self {
        self.shutdown_grace_period = grace;
        self
    }

    /// Total external memory needed by bootstrap
    pub fn external_memory_required(&self) -> usize {
        2 * self.frame_buffer_size + 2 * self.payload_buffer_size + self.transfer_buffer_size
    }

    /// Check the configuration before anything is allocated
    pub fn validate(&self) -> Result<()> {
        if self.max_viewers == 0 {
            return Err(Error::InvalidConfig("max_viewers must be at least 1".into()));
        }
        if self.frame_buffer_size == 0 {
            return Err(Error::InvalidConfig("frame_buffer_size must be non-zero".into()));
        }
        if self.min_frame_size > self.frame_buffer_size {
            return Err(Error::InvalidConfig(format!(
                "min_frame_size {} exceeds frame_buffer_size {}",
                self.min_frame_size, self.frame_buffer_size
            )));
        }
        if self.worker_poll_interval.is_zero() {
            return Err(Error::InvalidConfig("worker_poll_interval must be non-zero".into()));
        }
        Ok(())
    }
}
