//! Buffer identity, capture outcomes and the reader-side frame view

use std::fmt;
use std::ops::Deref;

use bytes::Bytes;
use tokio::sync::OwnedRwLockReadGuard;

/// Which of the two frame buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferId {
    A,
    B,
}

impl BufferId {
    /// Both buffers in selector order
    pub const ALL: [BufferId; 2] = [BufferId::A, BufferId::B];

    /// The other buffer of the pair
    pub fn other(self) -> Self {
        match self {
            BufferId::A => BufferId::B,
            BufferId::B => BufferId::A,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            BufferId::A => 0,
            BufferId::B => 1,
        }
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferId::A => write!(f, "A"),
            BufferId::B => write!(f, "B"),
        }
    }
}

/// Why a captured frame was not stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Zero-length frame
    Empty,
    /// Shorter than the minimum plausible size
    TooSmall,
    /// Larger than the buffer capacity
    TooLarge,
    /// Selected buffer still holds an unreleased frame
    Backpressure,
    /// Store was reset while the frame was being copied
    Reset,
}

impl DropReason {
    /// Whether the frame itself was bad (as opposed to a full store)
    pub fn is_malformed(self) -> bool {
        !matches!(self, DropReason::Backpressure | DropReason::Reset)
    }
}

/// Result of handing one frame to the capture callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Frame copied into a buffer and marked ready
    Stored {
        /// Buffer that now holds the frame
        buffer: BufferId,
        /// Sequence number assigned to the frame
        sequence: u64,
    },
    /// Frame discarded
    Dropped(DropReason),
}

impl FrameOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, FrameOutcome::Stored { .. })
    }
}

/// A ready frame borrowed from the store
///
/// Holding a `ReadyFrame` keeps the capture path from overwriting the buffer;
/// drop it (or hand it back through
/// [`FrameStore::release_ready`](super::FrameStore::release_ready)) as soon as
/// the frame has been transmitted.
pub struct ReadyFrame {
    pub(super) buffer: BufferId,
    pub(super) sequence: u64,
    pub(super) len: usize,
    pub(super) data: OwnedRwLockReadGuard<Box<[u8]>>,
}

impl ReadyFrame {
    /// Buffer the frame lives in
    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// Sequence number assigned at capture
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Valid bytes in the frame
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Frame contents
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Copy the frame out so the buffer can be released before transmission
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_slice())
    }
}

impl Deref for ReadyFrame {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for ReadyFrame {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for ReadyFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadyFrame")
            .field("buffer", &self.buffer)
            .field("sequence", &self.sequence)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_other() {
        assert_eq!(BufferId::A.other(), BufferId::B);
        assert_eq!(BufferId::B.other(), BufferId::A);
        assert_eq!(BufferId::A.other().other(), BufferId::A);
    }

    #[test]
    fn test_drop_reason_classification() {
        assert!(DropReason::Empty.is_malformed());
        assert!(DropReason::TooSmall.is_malformed());
        assert!(DropReason::TooLarge.is_malformed());
        assert!(!DropReason::Backpressure.is_malformed());
        assert!(!DropReason::Reset.is_malformed());
    }
}
