//! Observability
//!
//! Region accounting for operational visibility.

pub mod metrics;

pub use metrics::{get_metrics, snapshot, MetricsSnapshot, RegionMetrics};
