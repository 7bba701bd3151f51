//! pagefreeze: hardware-enforced immutability
//! Values are copied into fresh pages that are then made read-only by the kernel;
//! any later write through the returned handle faults.
//!
//! # Architecture
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::pages`]: Anonymous mappings, mprotect, munmap, mlock
//!
//! ## Regions ([`region`])
//! - [`region::PageRegion`]: Type-state `ReadWrite -> ReadOnly` page ranges
//! - [`region::split`]: Control/payload split layout for maps
//!
//! ## Freezing
//! - [`engine`]: Copy-and-protect primitive and the typed entry points
//! - [`walker`]: Depth-first deep freeze over [`shape::Node`]s
//! - [`shape`]: Shape reflection (`Reflect`, `Node`, `reflect_record!`)
//!
//! ## Handles
//! - [`Ptr`]: Exclusively owned pointer
//! - [`Seq`]: Growable sequence
//! - [`Map`]: Hash map with a split control record
//!
//! ## Safety & Reclamation ([`safety`])
//! - [`safety::reclaim`]: RAII ownership of every mapped range
//!
//! ## Observability ([`observability`])
//! - [`observability::metrics`]: Region accounting and Prometheus export
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: `FreezeConfig`, `FreezeError`
//! - [`config::loader`]: JSON and `PAGEFREEZE_*` environment loading
//! - [`config::validator`]: Startup validation
//!
//! ## Testing Infrastructure ([`testing`])
//! - [`testing::fault_probe`]: Fork-based fault probes
//!
//! # Example
//!
//! ```
//! use pagefreeze::{freeze_deep, reflect_record, Ptr, Seq};
//!
//! struct Scenario {
//!     name: String,
//!     count: Ptr<i64>,
//!     tags: Seq<Ptr<bool>>,
//! }
//!
//! reflect_record!(Scenario {
//!     exported name,
//!     exported count,
//!     exported tags,
//! });
//!
//! let scenario = Ptr::new(Scenario {
//!     name: "demo".to_string(),
//!     count: Ptr::new(3),
//!     tags: vec![Ptr::new(true), Ptr::new(false)].into(),
//! });
//! let scenario = freeze_deep(scenario).unwrap();
//!
//! assert_eq!(scenario.name, "demo");
//! assert_eq!(*scenario.count, 3);
//! assert!(scenario.tags.is_frozen());
//! assert!(scenario.tags.iter().all(|tag| tag.is_frozen()));
//! ```

// Kernel Primitives
pub mod kernel;

// Regions
pub mod region;

// Freezing
pub mod engine;
pub mod shape;
pub mod walker;

// Handles
pub mod map;
pub mod ptr;
pub mod seq;

// Safety & Reclamation
pub mod safety;

// Observability
pub mod observability;

// Configuration
pub mod config;

// Testing Infrastructure
pub mod testing;

// CLI entrypoint wiring for the pagefreeze binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
pub use engine::FreezeEngine;
pub use map::Map;
pub use ptr::Ptr;
pub use seq::Seq;
pub use shape::{Kind, Reflect, Visibility};
pub use walker::WalkStats;

/// Freeze the value behind a pointer. Single level; nil passes through.
pub fn freeze_single<T: Reflect>(value: T) -> Result<T> {
    FreezeEngine::global().freeze_single(value)
}

/// Freeze a sequence's backing buffer. Elements are not descended.
pub fn freeze_sequence<T: Reflect>(value: T) -> Result<T> {
    FreezeEngine::global().freeze_sequence(value)
}

/// Freeze a map's buckets and control record. Keys and values are not descended.
pub fn freeze_map<T: Reflect>(value: T) -> Result<T> {
    FreezeEngine::global().freeze_map(value)
}

/// Freeze a pointer, sequence or map root and everything reachable from it,
/// except through private record members.
pub fn freeze_deep<T: Reflect>(value: T) -> Result<T> {
    FreezeEngine::global().freeze_deep(value)
}
