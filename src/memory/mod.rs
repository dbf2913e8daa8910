//! Large-buffer allocation from external memory
//!
//! Frame buffers are hundreds of kilobytes each and live in a scarce, slower
//! memory pool separate from the general heap. Everything is reserved once at
//! bootstrap; if the pool is missing or too small the system cannot run.

pub mod pool;

pub use pool::{allocate_regions, BufferRegions, CaptureBuffers, ExternalMemory, HeapMemory};
