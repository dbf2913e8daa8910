//! Counters for the capture path and the dispatcher
//!
//! Counters are lock-free atomics so the capture callback can bump them
//! without entering a critical section. Snapshots are plain structs.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::pipeline::PipelineState;

/// Live counters owned by the frame store
#[derive(Debug, Default)]
pub struct FrameCounters {
    received: AtomicU64,
    stored: AtomicU64,
    dropped_malformed: AtomicU64,
    dropped_backpressure: AtomicU64,
    sent: AtomicU64,
}

impl FrameCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stored(&self) {
        self.stored.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed(&self) {
        self.dropped_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_backpressure(&self) {
        self.dropped_backpressure.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a consistent-enough snapshot for reporting
    pub fn snapshot(&self) -> FrameStats {
        FrameStats {
            received: self.received.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            dropped_backpressure: self.dropped_backpressure.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
        }
    }
}

/// Capture path statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames handed to the capture callback
    pub received: u64,
    /// Frames written into a buffer
    pub stored: u64,
    /// Frames rejected for a bad length
    pub dropped_malformed: u64,
    /// Frames discarded because no buffer was free, or because a reset overtook the copy
    pub dropped_backpressure: u64,
    /// Frames transmitted by delivery workers
    pub sent: u64,
}

impl FrameStats {
    /// All dropped frames regardless of reason
    pub fn dropped(&self) -> u64 {
        self.dropped_malformed + self.dropped_backpressure
    }

    /// Fraction of received frames that were dropped
    pub fn drop_rate(&self) -> f64 {
        if self.received > 0 {
            self.dropped() as f64 / self.received as f64
        } else {
            0.0
        }
    }
}

/// Live counters owned by the dispatcher
#[derive(Debug, Default)]
pub struct DispatchCounters {
    admitted: AtomicU64,
    rejected_queue_full: AtomicU64,
    rejected_no_slot: AtomicU64,
    spawn_failures: AtomicU64,
    finished: AtomicU64,
}

impl DispatchCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_queue_full(&self) {
        self.rejected_queue_full.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_no_slot(&self) {
        self.rejected_no_slot.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_spawn_failure(&self) {
        self.spawn_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_finished(&self) {
        self.finished.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected_queue_full: self.rejected_queue_full.load(Ordering::Relaxed),
            rejected_no_slot: self.rejected_no_slot.load(Ordering::Relaxed),
            spawn_failures: self.spawn_failures.load(Ordering::Relaxed),
            finished: self.finished.load(Ordering::Relaxed),
        }
    }
}

/// Dispatcher statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Viewers bound to a slot and handed to a worker
    pub admitted: u64,
    /// Viewers refused because the admission queue was full
    pub rejected_queue_full: u64,
    /// Viewers refused because every slot was occupied
    pub rejected_no_slot: u64,
    /// Workers that could not be spawned
    pub spawn_failures: u64,
    /// Workers that ran to completion (disconnect, error or cancellation)
    pub finished: u64,
}

impl DispatchStats {
    /// Viewers closed without ever being served
    pub fn rejected(&self) -> u64 {
        self.rejected_queue_full + self.rejected_no_slot + self.spawn_failures
    }
}

/// Pipeline-wide snapshot
#[derive(Debug, Clone)]
pub struct PipelineStats {
    /// Current lifecycle state
    pub state: PipelineState,
    /// Whether the capture hardware is logically running
    pub capture_running: bool,
    /// Whether a dispatcher task exists
    pub dispatcher_running: bool,
    /// Slots currently held by delivery workers
    pub occupied_slots: usize,
    /// Slot table size
    pub max_viewers: usize,
    /// Viewers waiting in the admission queue
    pub queued_viewers: usize,
    /// Capture path counters
    pub frames: FrameStats,
    /// Dispatcher counters
    pub dispatch: DispatchStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_counters_new() {
        let stats = FrameCounters::new().snapshot();
        assert_eq!(stats, FrameStats::default());
        assert_eq!(stats.dropped(), 0);
        assert_eq!(stats.drop_rate(), 0.0);
    }

    #[test]
    fn test_frame_drop_rate() {
        let counters = FrameCounters::new();
        for _ in 0..4 {
            counters.record_received();
        }
        counters.record_stored();
        counters.record_stored();
        counters.record_malformed();
        counters.record_backpressure();

        let stats = counters.snapshot();
        assert_eq!(stats.received, 4);
        assert_eq!(stats.stored, 2);
        assert_eq!(stats.dropped(), 2);
        assert_eq!(stats.drop_rate(), 0.5);
    }

    #[test]
    fn test_dispatch_rejected_total() {
        let counters = DispatchCounters::new();
        counters.record_admitted();
        counters.record_queue_full();
        counters.record_no_slot();
        counters.record_spawn_failure();
        counters.record_finished();

        let stats = counters.snapshot();
        assert_eq!(stats.admitted, 1);
        assert_eq!(stats.finished, 1);
        assert_eq!(stats.rejected(), 3);
    }
}
