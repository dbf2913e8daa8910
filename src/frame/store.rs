//! Frame store implementation

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::RwLock;

use super::buffer::{BufferId, DropReason, FrameOutcome, ReadyFrame};
use crate::error::{Error, Result};
use crate::stats::{FrameCounters, FrameStats};

/// Per-buffer state, only ever changed under the flag lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// No unconsumed frame; writable
    Empty,
    /// Capture path is copying into the buffer
    Filling,
    /// Complete frame present and not yet released
    Ready { len: usize, sequence: u64 },
}

#[derive(Debug)]
struct Flags {
    selector: BufferId,
    slots: [SlotState; 2],
    next_sequence: u64,
    /// Bumped by every reset; a capture claimed under an older epoch is discarded
    epoch: u64,
}

/// Two equally sized frame buffers plus their readiness flags
///
/// The flag lock is a `parking_lot` mutex that is never held across I/O or
/// the frame copy: it guards only the check-and-claim before the copy and the
/// publish after it. Buffer contents sit behind their own `RwLock`; the
/// capture path only ever calls `try_write`, so it never blocks on a reader.
pub struct FrameStore {
    buffers: [Arc<RwLock<Box<[u8]>>>; 2],
    flags: Mutex<Flags>,
    capacity: usize,
    min_frame_size: usize,
    counters: FrameCounters,
}

impl FrameStore {
    /// Build a store over two pre-allocated regions
    pub fn from_regions(a: Box<[u8]>, b: Box<[u8]>, min_frame_size: usize) -> Result<Self> {
        if a.len() != b.len() {
            return Err(Error::RegionMismatch {
                a: a.len(),
                b: b.len(),
            });
        }

        let capacity = a.len();
        Ok(Self {
            buffers: [Arc::new(RwLock::new(a)), Arc::new(RwLock::new(b))],
            flags: Mutex::new(Flags {
                selector: BufferId::A,
                slots: [SlotState::Empty; 2],
                next_sequence: 1,
                epoch: 0,
            }),
            capacity,
            min_frame_size,
            counters: FrameCounters::new(),
        })
    }

    /// Build a store with heap-allocated buffers
    pub fn with_capacity(capacity: usize, min_frame_size: usize) -> Self {
        Self {
            buffers: [
                Arc::new(RwLock::new(vec![0u8; capacity].into_boxed_slice())),
                Arc::new(RwLock::new(vec![0u8; capacity].into_boxed_slice())),
            ],
            flags: Mutex::new(Flags {
                selector: BufferId::A,
                slots: [SlotState::Empty; 2],
                next_sequence: 1,
                epoch: 0,
            }),
            capacity,
            min_frame_size,
            counters: FrameCounters::new(),
        }
    }

    /// Capacity of each buffer in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Smallest frame accepted
    pub fn min_frame_size(&self) -> usize {
        self.min_frame_size
    }

    /// Buffer the capture path will try to fill next
    pub fn selector(&self) -> BufferId {
        self.flags.lock().selector
    }

    /// Whether a buffer holds an unreleased frame
    pub fn is_ready(&self, which: BufferId) -> bool {
        matches!(self.flags.lock().slots[which.index()], SlotState::Ready { .. })
    }

    /// Length of the ready frame in a buffer, 0 if none
    pub fn ready_len(&self, which: BufferId) -> usize {
        match self.flags.lock().slots[which.index()] {
            SlotState::Ready { len, .. } => len,
            _ => 0,
        }
    }

    /// Counter snapshot
    pub fn stats(&self) -> FrameStats {
        self.counters.snapshot()
    }

    /// Record that a worker transmitted a frame
    pub fn record_sent(&self) {
        self.counters.record_sent();
    }

    /// Capture callback: copy a complete frame into the selected buffer
    ///
    /// Never blocks, never allocates and never panics. Every failure becomes a
    /// dropped frame; the returned outcome is informational.
    pub fn on_frame_captured(&self, data: &[u8]) -> FrameOutcome {
        self.counters.record_received();

        let len = data.len();
        if let Some(reason) = self.check_length(len) {
            return self.drop_frame(reason, len);
        }

        let (target, epoch) = match self.claim() {
            Ok(claimed) => claimed,
            Err(reason) => return self.drop_frame(reason, len),
        };

        // A reader may still hold a released buffer for transmission
        let Ok(mut buffer) = self.buffers[target.index()].try_write() else {
            self.flags.lock().slots[target.index()] = SlotState::Empty;
            return self.drop_frame(DropReason::Backpressure, len);
        };
        buffer[..len].copy_from_slice(data);
        drop(buffer);

        self.publish(target, epoch, len)
    }

    /// Mark the selected buffer as filling, or refuse if its frame is unconsumed
    fn claim(&self) -> std::result::Result<(BufferId, u64), DropReason> {
        let mut flags = self.flags.lock();
        let target = flags.selector;
        if flags.slots[target.index()] != SlotState::Empty {
            return Err(DropReason::Backpressure);
        }
        flags.slots[target.index()] = SlotState::Filling;
        Ok((target, flags.epoch))
    }

    /// Mark a filled buffer ready and advance the selector
    ///
    /// A `reset()` since the claim wins: the buffer goes back to empty and the
    /// selector stays where the reset put it.
    fn publish(&self, target: BufferId, epoch: u64, len: usize) -> FrameOutcome {
        let mut flags = self.flags.lock();
        if flags.epoch != epoch {
            flags.slots[target.index()] = SlotState::Empty;
            drop(flags);
            return self.drop_frame(DropReason::Reset, len);
        }

        let sequence = flags.next_sequence;
        flags.next_sequence += 1;
        flags.slots[target.index()] = SlotState::Ready { len, sequence };
        flags.selector = target.other();
        drop(flags);

        self.counters.record_stored();
        FrameOutcome::Stored {
            buffer: target,
            sequence,
        }
    }

    fn check_length(&self, len: usize) -> Option<DropReason> {
        if len == 0 {
            Some(DropReason::Empty)
        } else if len > self.capacity {
            Some(DropReason::TooLarge)
        } else if len < self.min_frame_size {
            Some(DropReason::TooSmall)
        } else {
            None
        }
    }

    fn drop_frame(&self, reason: DropReason, len: usize) -> FrameOutcome {
        if reason.is_malformed() {
            self.counters.record_malformed();
            tracing::trace!(len, reason = ?reason, "Malformed frame dropped");
        } else {
            self.counters.record_backpressure();
            tracing::trace!(len, reason = ?reason, "Store busy, frame dropped");
        }
        FrameOutcome::Dropped(reason)
    }

    /// Borrow the frame in a buffer if it is ready
    ///
    /// The frame stays ready after this call; the reader clears it with
    /// [`release_frame`](Self::release_frame) or
    /// [`release_ready`](Self::release_ready) once it has been transmitted.
    pub fn try_take_ready_frame(&self, which: BufferId) -> Option<ReadyFrame> {
        let flags = self.flags.lock();
        self.view(&flags, which)
    }

    /// Freshest ready frame with a sequence number above `after`
    pub fn latest_ready(&self, after: Option<u64>) -> Option<ReadyFrame> {
        let flags = self.flags.lock();
        let newest = BufferId::ALL
            .into_iter()
            .filter_map(|id| match flags.slots[id.index()] {
                SlotState::Ready { sequence, .. } if after.map_or(true, |a| sequence > a) => {
                    Some((sequence, id))
                }
                _ => None,
            })
            .max_by_key(|(sequence, _)| *sequence)?;

        self.view(&flags, newest.1)
    }

    fn view(&self, flags: &Flags, which: BufferId) -> Option<ReadyFrame> {
        match flags.slots[which.index()] {
            SlotState::Ready { len, sequence } => {
                let data = Arc::clone(&self.buffers[which.index()])
                    .try_read_owned()
                    .ok()?;
                Some(ReadyFrame {
                    buffer: which,
                    sequence,
                    len,
                    data,
                })
            }
            _ => None,
        }
    }

    /// Clear a buffer's ready flag so the capture path may reuse it
    ///
    /// Returns false if the buffer held no ready frame.
    pub fn release_frame(&self, which: BufferId) -> bool {
        let mut flags = self.flags.lock();
        match flags.slots[which.index()] {
            SlotState::Ready { .. } => {
                flags.slots[which.index()] = SlotState::Empty;
                true
            }
            _ => false,
        }
    }

    /// Release a frame previously taken from the store
    ///
    /// Only clears the flag if the buffer still holds that same frame, so a
    /// late release can never discard a newer capture.
    pub fn release_ready(&self, frame: ReadyFrame) -> bool {
        let mut flags = self.flags.lock();
        let slot = &mut flags.slots[frame.buffer.index()];
        match *slot {
            SlotState::Ready { sequence, .. } if sequence == frame.sequence => {
                *slot = SlotState::Empty;
                true
            }
            _ => false,
        }
    }

    /// Release every ready frame older than `sequence`
    ///
    /// A viewer that has just sent `sequence` will never pick those up, and
    /// leaving them ready would keep the selector parked on a full buffer.
    pub fn release_older(&self, sequence: u64) -> usize {
        let mut flags = self.flags.lock();
        let mut released = 0;
        for slot in flags.slots.iter_mut() {
            if matches!(*slot, SlotState::Ready { sequence: s, .. } if s < sequence) {
                *slot = SlotState::Empty;
                released += 1;
            }
        }
        released
    }

    /// Forget every ready frame and point the selector back at A
    ///
    /// A write already in progress finishes its copy but is discarded instead
    /// of published.
    pub fn reset(&self) {
        let mut flags = self.flags.lock();
        for slot in flags.slots.iter_mut() {
            if matches!(slot, SlotState::Ready { .. }) {
                *slot = SlotState::Empty;
            }
        }
        flags.selector = BufferId::A;
        flags.epoch += 1;
    }
}

impl std::fmt::Debug for FrameStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameStore")
            .field("capacity", &self.capacity)
            .field("flags", &*self.flags.lock())
            .finish()
    }
}
