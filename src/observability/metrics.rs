// Region Accounting Metrics
//
// Purpose: make the mapping, protection and release of frozen regions observable.
// Invariant: live_regions / live_bytes return to their previous values once every
// handle created since a snapshot has been dropped.
//
// This module provides counters, gauges, and histograms for:
// - Regions mapped, protected, split and released
// - Bytes currently mapped by live frozen handles
// - mlock failures on frozen pages
// - Deep freeze duration

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Monotonic counter
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn add(&self, delta: u64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Level of something currently held (regions, bytes)
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn add(&self, delta: u64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn sub(&self, delta: u64) {
        self.0.fetch_sub(delta, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn dec(&self) {
        self.sub(1);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Upper bounds of the deep-freeze latency buckets, in microseconds
const LATENCY_BOUNDS_MICROS: [u64; 6] = [10, 100, 1_000, 10_000, 100_000, 1_000_000];

/// Cumulative histogram of deep-freeze durations
#[derive(Debug, Default)]
pub struct LatencyHistogram {
    buckets: [AtomicU64; LATENCY_BOUNDS_MICROS.len()],
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl LatencyHistogram {
    pub fn observe(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.sum_micros.fetch_add(micros, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        for (bound, bucket) in LATENCY_BOUNDS_MICROS.iter().zip(&self.buckets) {
            if micros <= *bound {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum_micros(&self) -> u64 {
        self.sum_micros.load(Ordering::Relaxed)
    }

    /// `(upper bound in microseconds, observations at or below it)`
    pub fn buckets(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        LATENCY_BOUNDS_MICROS
            .iter()
            .zip(&self.buckets)
            .map(|(bound, bucket)| (*bound, bucket.load(Ordering::Relaxed)))
    }
}

/// Global region metrics registry
#[derive(Debug, Default)]
pub struct RegionMetrics {
    // Lifecycle counters
    pub regions_mapped: Counter,
    pub regions_protected: Counter,
    pub regions_split: Counter,
    pub regions_released: Counter,
    pub release_failures: Counter,
    pub lock_failures: Counter,

    // Byte counters
    pub bytes_mapped: Counter,
    pub bytes_released: Counter,

    // Live state
    pub live_regions: Gauge,
    pub live_bytes: Gauge,

    // Walker
    pub deep_freezes: Counter,
    pub deep_freeze_duration: LatencyHistogram,
}

impl RegionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly mapped range
    pub fn record_mapped(&self, len: usize) {
        self.regions_mapped.inc();
        self.bytes_mapped.add(len as u64);
        self.live_regions.inc();
        self.live_bytes.add(len as u64);
    }

    /// Record one owned range becoming two
    pub fn record_split(&self) {
        self.regions_split.inc();
        self.live_regions.inc();
    }

    pub fn record_protected(&self) {
        self.regions_protected.inc();
    }

    /// Record a released range
    pub fn record_released(&self, len: usize) {
        self.regions_released.inc();
        self.bytes_released.add(len as u64);
        self.live_regions.dec();
        self.live_bytes.sub(len as u64);
    }

    pub fn record_release_failure(&self, len: usize) {
        self.release_failures.inc();
        // The range is leaked, not live
        self.live_regions.dec();
        self.live_bytes.sub(len as u64);
    }

    pub fn record_deep_freeze(&self, elapsed: Duration) {
        self.deep_freezes.inc();
        self.deep_freeze_duration.observe(elapsed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            regions_mapped: self.regions_mapped.get(),
            regions_protected: self.regions_protected.get(),
            regions_split: self.regions_split.get(),
            regions_released: self.regions_released.get(),
            release_failures: self.release_failures.get(),
            lock_failures: self.lock_failures.get(),
            bytes_mapped: self.bytes_mapped.get(),
            bytes_released: self.bytes_released.get(),
            live_regions: self.live_regions.get(),
            live_bytes: self.live_bytes.get(),
            deep_freezes: self.deep_freezes.get(),
            deep_freeze_micros: self.deep_freeze_duration.sum_micros(),
        }
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();
        let snapshot = self.snapshot();

        let counters = [
            ("pagefreeze_regions_mapped_total", "Regions mapped", snapshot.regions_mapped),
            ("pagefreeze_regions_protected_total", "Regions downgraded to read-only", snapshot.regions_protected),
            ("pagefreeze_regions_split_total", "Mappings split into control and payload", snapshot.regions_split),
            ("pagefreeze_regions_released_total", "Regions unmapped", snapshot.regions_released),
            ("pagefreeze_release_failures_total", "munmap failures", snapshot.release_failures),
            ("pagefreeze_lock_failures_total", "mlock failures", snapshot.lock_failures),
            ("pagefreeze_bytes_mapped_total", "Bytes mapped", snapshot.bytes_mapped),
            ("pagefreeze_bytes_released_total", "Bytes unmapped", snapshot.bytes_released),
            ("pagefreeze_deep_freezes_total", "Completed deep freezes", snapshot.deep_freezes),
        ];
        for (name, help, value) in counters {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!("{} {}\n", name, value));
        }

        let gauges = [
            ("pagefreeze_live_regions", "Regions owned by live handles", snapshot.live_regions),
            ("pagefreeze_live_bytes", "Bytes owned by live handles", snapshot.live_bytes),
        ];
        for (name, help, value) in gauges {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} gauge\n", name));
            output.push_str(&format!("{} {}\n", name, value));
        }

        let name = "pagefreeze_deep_freeze_seconds";
        let histogram = &self.deep_freeze_duration;
        output.push_str(&format!("# HELP {} Deep freeze duration\n", name));
        output.push_str(&format!("# TYPE {} histogram\n", name));
        for (bound, count) in histogram.buckets() {
            let le = Duration::from_micros(bound).as_secs_f64();
            output.push_str(&format!("{}_bucket{{le=\"{}\"}} {}\n", name, le, count));
        }
        output.push_str(&format!("{}_bucket{{le=\"+Inf\"}} {}\n", name, histogram.count()));
        output.push_str(&format!(
            "{}_sum {}\n",
            name,
            Duration::from_micros(histogram.sum_micros()).as_secs_f64()
        ));
        output.push_str(&format!("{}_count {}\n", name, histogram.count()));

        output
    }
}

/// Serializable copy of [`RegionMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub regions_mapped: u64,
    pub regions_protected: u64,
    pub regions_split: u64,
    pub regions_released: u64,
    pub release_failures: u64,
    pub lock_failures: u64,
    pub bytes_mapped: u64,
    pub bytes_released: u64,
    pub live_regions: u64,
    pub live_bytes: u64,
    pub deep_freezes: u64,
    pub deep_freeze_micros: u64,
}

/// Global metrics instance
static METRICS: once_cell::sync::Lazy<Arc<RegionMetrics>> =
    once_cell::sync::Lazy::new(|| Arc::new(RegionMetrics::new()));

/// Get global metrics registry
pub fn get_metrics() -> Arc<RegionMetrics> {
    METRICS.clone()
}

/// Borrow the global registry without touching the Arc count
pub(crate) fn metrics() -> &'static RegionMetrics {
    &METRICS
}

/// Snapshot of the global registry
pub fn snapshot() -> MetricsSnapshot {
    METRICS.snapshot()
}
