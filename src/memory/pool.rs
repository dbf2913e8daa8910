//! External memory pool and bootstrap region reservation

use crate::config::PipelineConfig;
use crate::error::{Error, Result};

/// A pool of large, slow memory (PSRAM or equivalent)
pub trait ExternalMemory: Send {
    /// Whether the pool is physically present
    fn is_present(&self) -> bool;

    /// Bytes still available for allocation
    fn available(&self) -> usize;

    /// Reserve a zeroed region of exactly `size` bytes
    ///
    /// Returns `None` if the pool cannot satisfy the request.
    fn allocate(&mut self, size: usize) -> Option<Box<[u8]>>;
}

/// External memory backed by the process heap with a fixed byte budget
///
/// Allocation is fallible: the budget is enforced first, then the heap
/// reservation itself goes through `try_reserve_exact`.
#[derive(Debug)]
pub struct HeapMemory {
    budget: usize,
    used: usize,
}

impl HeapMemory {
    /// Create a pool with the given byte budget
    pub fn with_budget(budget: usize) -> Self {
        Self { budget, used: 0 }
    }

    /// Create a pool exactly large enough for a configuration
    pub fn for_config(config: &PipelineConfig) -> Self {
        Self::with_budget(config.external_memory_required())
    }

    /// A pool that reports itself as absent
    pub fn absent() -> Self {
        Self::with_budget(0)
    }

    /// Bytes handed out so far
    pub fn used(&self) -> usize {
        self.used
    }
}

impl ExternalMemory for HeapMemory {
    fn is_present(&self) -> bool {
        self.budget > 0
    }

    fn available(&self) -> usize {
        self.budget - self.used
    }

    fn allocate(&mut self, size: usize) -> Option<Box<[u8]>> {
        if size > self.available() {
            return None;
        }

        let mut region = Vec::new();
        region.try_reserve_exact(size).ok()?;
        region.resize(size, 0);

        self.used += size;
        Some(region.into_boxed_slice())
    }
}

/// Scratch regions handed to the capture driver
#[derive(Debug)]
pub struct CaptureBuffers {
    /// First payload (USB transfer) buffer
    pub payload_a: Box<[u8]>,
    /// Second payload buffer
    pub payload_b: Box<[u8]>,
    /// Frame reassembly buffer
    pub transfer: Box<[u8]>,
}

/// Every region the pipeline needs, reserved at bootstrap
#[derive(Debug)]
pub struct BufferRegions {
    /// Frame buffer A
    pub frame_a: Box<[u8]>,
    /// Frame buffer B
    pub frame_b: Box<[u8]>,
    /// Capture driver scratch space
    pub capture: CaptureBuffers,
}

/// Reserve all bootstrap regions from external memory
///
/// Any failure here is fatal: the caller is expected to halt rather than run
/// with partial buffers.
pub fn allocate_regions<M: ExternalMemory + ?Sized>(
    memory: &mut M,
    config: &PipelineConfig,
) -> Result<BufferRegions> {
    if !memory.is_present() {
        tracing::error!("External memory not found");
        return Err(Error::MemoryUnavailable);
    }

    tracing::info!(
        available = memory.available(),
        required = config.external_memory_required(),
        "Reserving frame buffers"
    );

    let frame_a = reserve(memory, "frame buffer A", config.frame_buffer_size)?;
    let frame_b = reserve(memory, "frame buffer B", config.frame_buffer_size)?;
    let payload_a = reserve(memory, "payload buffer A", config.payload_buffer_size)?;
    let payload_b = reserve(memory, "payload buffer B", config.payload_buffer_size)?;
    let transfer = reserve(memory, "transfer buffer", config.transfer_buffer_size)?;

    Ok(BufferRegions {
        frame_a,
        frame_b,
        capture: CaptureBuffers {
            payload_a,
            payload_b,
            transfer,
        },
    })
}

fn reserve<M: ExternalMemory + ?Sized>(
    memory: &mut M,
    region: &'static str,
    size: usize,
) -> Result<Box<[u8]>> {
    memory.allocate(size).ok_or_else(|| {
        tracing::error!(region, size, available = memory.available(), "Allocation failed");
        Error::AllocationFailed { region, size }
    })
}
