//! Testing infrastructure
//!
//! Fork-based probes that check protection faults without killing the caller.

pub mod fault_probe;

// Re-export commonly used items
pub use fault_probe::*;
