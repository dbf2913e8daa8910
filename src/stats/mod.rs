//! Statistics and metrics

pub mod metrics;

pub use metrics::{DispatchCounters, DispatchStats, FrameCounters, FrameStats, PipelineStats};
