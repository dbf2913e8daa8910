//! Frame capture buffering and multi-viewer streaming dispatch
//!
//! `camstream` is the capture-to-network core of a security camera: a single
//! hardware video source delivers compressed frames at a fixed cadence, and
//! zero-to-several network viewers pull the freshest frame asynchronously.
//!
//! # Architecture
//!
//! ```text
//!   hardware ──► FrameSink::on_frame_captured ──► FrameStore [A | B]
//!                                                     │
//!                        ┌────────────────────────────┼──────────────┐
//!                        ▼                            ▼              ▼
//!   accept ──► AdmissionQueue ──► Dispatcher ──► SlotTable[0]  SlotTable[n-1]
//!                                                DeliveryHandler (one per viewer)
//!                                                     │
//!                                                     └──► network
//! ```
//!
//! The [`Pipeline`] ties these together and exposes idempotent
//! [`start`](Pipeline::start) / [`stop`](Pipeline::stop) entry points for the
//! connectivity collaborator.
//!
//! Memory is bounded by construction: two frame buffers reserved at bootstrap,
//! an admission queue no larger than the viewer cap, and a fixed slot table.
//! Delivery is freshest-available, never guaranteed.

pub mod capture;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod memory;
pub mod pipeline;
pub mod server;
pub mod stats;

pub use capture::{CaptureConfig, CaptureDevice, FrameSink, SyntheticCamera};
pub use config::PipelineConfig;
pub use dispatch::{ClientHandle, DeliveryHandler, SubmitError, WorkerContext};
pub use error::{Error, Result};
pub use frame::{BufferId, FrameOutcome, FrameStore, ReadyFrame};
pub use memory::{ExternalMemory, HeapMemory};
pub use pipeline::{Connectivity, Pipeline, PipelineState};
pub use server::{ListenerConfig, ViewerListener};
pub use stats::PipelineStats;
