// Freeze latency benchmark
// Measures copy-and-protect cost for single values, sequences, maps and a
// deep object graph, including the release of the frozen regions.
// Target: p50 < 1ms for a deep freeze of the sample graph

use pagefreeze::{freeze_deep, freeze_map, freeze_sequence, freeze_single, reflect_record, Map, Ptr, Seq};
use std::hint::black_box;
use std::time::{Duration, Instant};

/// Benchmark configuration
const ITERATIONS: usize = 200;
const WARMUP_ITERATIONS: usize = 20;

/// Latency percentiles
struct LatencyStats {
    p50: Duration,
    p95: Duration,
    p99: Duration,
    min: Duration,
    max: Duration,
    mean: Duration,
}

impl LatencyStats {
    fn from_samples(mut samples: Vec<Duration>) -> Self {
        samples.sort();
        let len = samples.len();

        let p50_idx = (len as f64 * 0.50) as usize;
        let p95_idx = (len as f64 * 0.95) as usize;
        let p99_idx = (len as f64 * 0.99) as usize;

        let sum: Duration = samples.iter().sum();
        let mean = sum / len as u32;

        Self {
            p50: samples[p50_idx],
            p95: samples[p95_idx],
            p99: samples[p99_idx],
            min: samples[0],
            max: samples[len - 1],
            mean,
        }
    }

    fn print(&self, label: &str) {
        println!("\n{}", label);
        println!("  p50: {:?}", self.p50);
        println!("  p95: {:?}", self.p95);
        println!("  p99: {:?}", self.p99);
        println!("  min: {:?}", self.min);
        println!("  max: {:?}", self.max);
        println!("  mean: {:?}", self.mean);
    }
}

/// Benchmark result
struct BenchmarkResult {
    scenario: String,
    stats: LatencyStats,
    passed: bool,
    reason: Option<String>,
}

impl BenchmarkResult {
    fn print(&self) {
        println!("\n=== {} ===", self.scenario);
        self.stats.print("Latency");

        match &self.reason {
            None => println!("PASS"),
            Some(reason) => println!("FAIL: {}", reason),
        }
    }
}

struct Order {
    id: String,
    quantity: Ptr<i64>,
    lines: Seq<Ptr<u32>>,
    attributes: Map<String, Ptr<String>>,
}

reflect_record!(Order {
    exported id,
    exported quantity,
    exported lines,
    exported attributes,
});

fn sample_order() -> Ptr<Order> {
    Ptr::new(Order {
        id: "order-1".to_string(),
        quantity: Ptr::new(12),
        lines: (0..16).map(Ptr::new).collect(),
        attributes: (0..8)
            .map(|i| (format!("attr{}", i), Ptr::new(format!("value{}", i))))
            .collect(),
    })
}

/// Time `freeze` on fresh input built by `build`; the frozen value is dropped
/// inside the timed section so release cost is included.
fn measure<T, B, F>(scenario: &str, budget: Duration, build: B, freeze: F) -> BenchmarkResult
where
    B: Fn() -> T,
    F: Fn(T) -> T,
{
    // Warmup
    for _ in 0..WARMUP_ITERATIONS {
        drop(black_box(freeze(build())));
    }

    // Actual benchmark
    let mut samples = Vec::with_capacity(ITERATIONS);
    for _ in 0..ITERATIONS {
        let input = build();
        let start = Instant::now();
        drop(black_box(freeze(input)));
        samples.push(start.elapsed());
    }

    let stats = LatencyStats::from_samples(samples);
    let passed = stats.p50 < budget;
    let reason = if !passed {
        Some(format!("p50={:?} (target <{:?})", stats.p50, budget))
    } else {
        None
    };

    BenchmarkResult {
        scenario: scenario.to_string(),
        stats,
        passed,
        reason,
    }
}

fn main() {
    env_logger::init();

    println!("=== pagefreeze Freeze Latency Benchmark ===");
    println!("Iterations: {} (after {} warmup)", ITERATIONS, WARMUP_ITERATIONS);

    let results = vec![
        measure(
            "Single pointer",
            Duration::from_micros(100),
            || Ptr::new(42u64),
            |p| freeze_single(p).unwrap_or_else(|e| panic!("{}", e)),
        ),
        measure(
            "Sequence of 4096 u64",
            Duration::from_micros(250),
            || (0..4096u64).collect::<Seq<_>>(),
            |xs| freeze_sequence(xs).unwrap_or_else(|e| panic!("{}", e)),
        ),
        measure(
            "Map of 256 entries",
            Duration::from_micros(250),
            || (0..256u32).map(|i| (i, i)).collect::<Map<_, _>>(),
            |m| freeze_map(m).unwrap_or_else(|e| panic!("{}", e)),
        ),
        measure(
            "Deep order graph",
            Duration::from_millis(1),
            sample_order,
            |order| freeze_deep(order).unwrap_or_else(|e| panic!("{}", e)),
        ),
    ];

    // Print all results
    for result in &results {
        result.print();
    }

    // Summary
    let passed_count = results.iter().filter(|r| r.passed).count();
    let total_count = results.len();

    println!("\n=== Summary ===");
    println!("{}/{} scenarios passed", passed_count, total_count);

    if passed_count == total_count {
        println!("All freeze latency budgets met");
        std::process::exit(0);
    } else {
        println!("Some freeze latency budgets exceeded");
        std::process::exit(1);
    }
}
