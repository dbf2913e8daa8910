//! Synthetic camera
//!
//! Emits JPEG-shaped frames from a dedicated thread at the configured
//! interval, standing in for real capture hardware in demos and tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::{CaptureConfig, CaptureDevice, FrameSink};
use crate::error::{Error, Result};
use crate::memory::CaptureBuffers;

/// Shared view of a synthetic camera's activity
#[derive(Debug, Default)]
pub struct CameraMonitor {
    starts: AtomicU64,
    frames_emitted: AtomicU64,
    paused: AtomicBool,
    shutdown: AtomicBool,
}

impl CameraMonitor {
    /// Number of times the hardware stream was (re)started
    pub fn starts(&self) -> u64 {
        self.starts.load(Ordering::Relaxed)
    }

    /// Frames passed to the capture callback
    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted.load(Ordering::Relaxed)
    }

    /// Whether the stream is suspended
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }
}

struct Pending {
    config: CaptureConfig,
    buffers: CaptureBuffers,
    sink: FrameSink,
}

/// Thread-driven fake capture device
pub struct SyntheticCamera {
    frame_size: usize,
    monitor: Arc<CameraMonitor>,
    pending: Option<Pending>,
    thread: Option<JoinHandle<()>>,
}

impl SyntheticCamera {
    /// Camera producing frames of `frame_size` bytes
    ///
    /// Frames are assembled in the driver's transfer buffer, so the effective
    /// size is capped by that buffer.
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size,
            monitor: Arc::new(CameraMonitor::default()),
            pending: None,
            thread: None,
        }
    }

    /// Handle for observing the camera after it has been moved into a pipeline
    pub fn monitor(&self) -> Arc<CameraMonitor> {
        Arc::clone(&self.monitor)
    }

    fn spawn(&mut self, pending: Pending) -> Result<()> {
        let Pending {
            config,
            mut buffers,
            sink,
        } = pending;
        let monitor = Arc::clone(&self.monitor);
        let frame_size = self.frame_size.min(buffers.transfer.len());
        let interval = config.frame_interval.max(Duration::from_millis(1));

        let thread = std::thread::Builder::new()
            .name("synthetic-camera".into())
            .spawn(move || {
                let mut counter: u64 = 0;
                while !monitor.shutdown.load(Ordering::Acquire) {
                    std::thread::sleep(interval);
                    if monitor.paused.load(Ordering::Acquire) {
                        continue;
                    }
                    counter += 1;
                    let frame = &mut buffers.transfer[..frame_size];
                    fill_frame(frame, counter);
                    sink.on_frame_captured(frame);
                    monitor.frames_emitted.fetch_add(1, Ordering::Relaxed);
                }
            })?;

        tracing::debug!(
            width = config.width,
            height = config.height,
            frame_size,
            "Synthetic camera thread started"
        );
        self.thread = Some(thread);
        Ok(())
    }
}

/// Write a minimal JPEG-looking payload: SOI, frame counter, filler, EOI
fn fill_frame(frame: &mut [u8], counter: u64) {
    let len = frame.len();
    frame.fill((counter % 251) as u8);
    if len >= 4 {
        frame[..2].copy_from_slice(&[0xFF, 0xD8]);
        frame[len - 2..].copy_from_slice(&[0xFF, 0xD9]);
    }
    if len >= 12 {
        frame[2..10].copy_from_slice(&counter.to_be_bytes());
    }
}

impl CaptureDevice for SyntheticCamera {
    fn configure(
        &mut self,
        config: CaptureConfig,
        buffers: CaptureBuffers,
        sink: FrameSink,
    ) -> Result<()> {
        if self.pending.is_some() || self.thread.is_some() {
            return Err(Error::Capture("camera already configured".into()));
        }
        self.pending = Some(Pending {
            config,
            buffers,
            sink,
        });
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if let Some(pending) = self.pending.take() {
            self.spawn(pending)?;
        } else if self.thread.is_none() {
            return Err(Error::Capture("camera not configured".into()));
        }

        self.monitor.paused.store(false, Ordering::Release);
        self.monitor.starts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn suspend(&mut self) {
        self.monitor.paused.store(true, Ordering::Release);
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.monitor.shutdown.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{BufferId, FrameStore};

    fn buffers(transfer: usize) -> CaptureBuffers {
        CaptureBuffers {
            payload_a: vec![0u8; 16].into_boxed_slice(),
            payload_b: vec![0u8; 16].into_boxed_slice(),
            transfer: vec![0u8; transfer].into_boxed_slice(),
        }
    }

    fn capture_config() -> CaptureConfig {
        CaptureConfig {
            width: 32,
            height: 32,
            frame_interval: Duration::from_millis(2),
        }
    }

    #[test]
    fn test_fill_frame_markers() {
        let mut frame = vec![0u8; 32];
        fill_frame(&mut frame, 5);

        assert_eq!(&frame[..2], &[0xFF, 0xD8]);
        assert_eq!(&frame[30..], &[0xFF, 0xD9]);
        assert_eq!(u64::from_be_bytes(frame[2..10].try_into().unwrap()), 5);
    }

    #[test]
    fn test_start_requires_configure() {
        let mut camera = SyntheticCamera::new(64);
        assert!(matches!(camera.start(), Err(Error::Capture(_))));
    }

    #[test]
    fn test_emits_into_store() {
        let store = Arc::new(FrameStore::with_capacity(256, 4));
        let mut camera = SyntheticCamera::new(64);
        let monitor = camera.monitor();

        camera
            .configure(capture_config(), buffers(128), FrameSink::new(Arc::clone(&store)))
            .unwrap();
        camera.start().unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while !store.is_ready(BufferId::A) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }

        assert!(store.is_ready(BufferId::A));
        assert_eq!(store.ready_len(BufferId::A), 64);
        assert!(monitor.frames_emitted() >= 1);
        assert_eq!(monitor.starts(), 1);
    }

    #[test]
    fn test_suspend_and_resume() {
        let store = Arc::new(FrameStore::with_capacity(256, 4));
        let mut camera = SyntheticCamera::new(64);
        let monitor = camera.monitor();
        camera
            .configure(capture_config(), buffers(128), FrameSink::new(store))
            .unwrap();

        camera.start().unwrap();
        camera.suspend();
        assert!(monitor.is_paused());

        camera.start().unwrap();
        assert!(!monitor.is_paused());
        assert_eq!(monitor.starts(), 2);
    }
}
