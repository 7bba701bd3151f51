/// Core types and structures for pagefreeze
use crate::shape::Kind;
use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Runtime configuration for the freeze engine
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreezeConfig {
    /// Pin frozen pages in RAM with mlock(2)
    pub lock_pages: bool,
    /// Granularity used for region sizing and the split layout.
    /// Must be a multiple of the OS page size; `None` uses the OS page size.
    pub page_size: Option<usize>,
    /// Strict mode: validation warnings and mlock failures become fatal
    pub strict_mode: bool,
}

impl Default for FreezeConfig {
    fn default() -> Self {
        Self {
            lock_pages: false,
            page_size: None,
            strict_mode: false,
        }
    }
}

/// Custom error types for pagefreeze
#[derive(Error, Debug)]
pub enum FreezeError {
    /// Wrong value shape handed to a typed entry point. Raised before any
    /// memory is mapped; the caller may recover.
    #[error("{operation} called on {found} value (expected {expected})")]
    InvalidShape {
        operation: &'static str,
        expected: &'static str,
        found: Kind,
    },

    #[error("mmap of {len} bytes failed: {source}")]
    Map { len: usize, source: Errno },

    #[error("mprotect of {len} bytes failed: {source}")]
    Protect { len: usize, source: Errno },

    #[error("munmap of {len} bytes failed: {source}")]
    Unmap { len: usize, source: Errno },

    #[error("mlock of {len} bytes failed: {source}")]
    Lock { len: usize, source: Errno },

    #[error("Region layout error: {0}")]
    Layout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Probe error: {0}")]
    Probe(String),

    #[error("System error: {0}")]
    System(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FreezeError {
    /// True for the only recoverable class: invalid usage at a typed entry point.
    pub fn is_invalid_usage(&self) -> bool {
        matches!(self, FreezeError::InvalidShape { .. })
    }
}

impl From<Errno> for FreezeError {
    fn from(err: Errno) -> Self {
        FreezeError::System(err.to_string())
    }
}

/// Result type alias for pagefreeze operations
pub type Result<T> = std::result::Result<T, FreezeError>;
