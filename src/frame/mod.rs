//! Double-buffered frame store
//!
//! The capture callback is the only writer; delivery workers are readers.
//! Two fixed buffers alternate under a selector, and a buffer becomes
//! writable again only when a reader releases it.
//!
//! ```text
//!   capture ──► selector ──► [A: Empty|Filling|Ready] ──► reader ─┐
//!                   │                                             │
//!                   └──────► [B: Empty|Filling|Ready] ──► reader ─┤
//!                                                                 ▼
//!                                                        release_frame()
//! ```
//!
//! When the selected buffer still holds an unreleased frame, the new frame is
//! dropped. There is no queue behind the pair.

pub mod buffer;
pub mod store;

pub use buffer::{BufferId, DropReason, FrameOutcome, ReadyFrame};
pub use store::FrameStore;
