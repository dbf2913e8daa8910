//! Error types
//!
//! Bootstrap and lifecycle errors. Per-frame problems never surface here:
//! the capture path converts every fault into a dropped frame.

use std::fmt;
use std::io;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-level error type
#[derive(Debug)]
pub enum Error {
    /// Underlying I/O error (socket setup, capture device)
    Io(io::Error),
    /// External memory pool is not present
    MemoryUnavailable,
    /// External memory pool could not satisfy a region request
    AllocationFailed {
        /// Region being reserved
        region: &'static str,
        /// Requested size in bytes
        size: usize,
    },
    /// The two frame buffers do not have the same capacity
    RegionMismatch {
        /// Capacity of buffer A
        a: usize,
        /// Capacity of buffer B
        b: usize,
    },
    /// Configuration rejected at bootstrap
    InvalidConfig(String),
    /// Capture hardware refused to configure or start
    Capture(String),
}

impl Error {
    /// Whether the error means the system cannot run at all
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::MemoryUnavailable | Error::AllocationFailed { .. } | Error::RegionMismatch { .. }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::MemoryUnavailable => write!(f, "External memory pool not present"),
            Error::AllocationFailed { region, size } => {
                write!(f, "Failed to allocate {} ({} bytes)", region, size)
            }
            Error::RegionMismatch { a, b } => {
                write!(f, "Frame buffer size mismatch: A={} B={}", a, b)
            }
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::Capture(msg) => write!(f, "Capture device error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
