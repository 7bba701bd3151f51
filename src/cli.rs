use crate::config::types::FreezeConfig;
use crate::config::validator;
use crate::kernel::pages;
use crate::observability::metrics;
use crate::testing::fault_probe::{self, ProbeOutcome};
use crate::{reflect_record, FreezeEngine, Map, Ptr, Seq};
use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file installed before any freeze
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check in forked children that frozen memory faults on write
    Probe {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration and its validation result
    Config {
        /// Validate this file instead of the effective configuration
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Freeze and release a sample graph, printing region accounting
    Stats {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
        /// Emit the registry in Prometheus text format
        #[arg(long, conflicts_with = "json")]
        prometheus: bool,
    },
}

pub fn run() -> Result<()> {
    // Initialize structured logging
    env_logger::init();

    if !cfg!(unix) {
        eprintln!("Error: pagefreeze requires a platform with page protection (mprotect)");
        std::process::exit(1);
    }

    let cli = Cli::parse();
    if let Some(path) = cli.config.as_deref() {
        crate::config::init(FreezeConfig::from_file(path)?)?;
    }

    match cli.command {
        Commands::Probe { json } => run_probe(json),
        Commands::Config { file } => run_config(file),
        Commands::Stats { json, prometheus } => run_stats(json, prometheus),
    }
}

fn run_probe(json: bool) -> Result<()> {
    let reports = fault_probe::run_probes()?;
    let failed = reports.iter().filter(|r| !r.passed).count();

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        println!("{:<34} {:<10} {:<16} {}", "PROBE", "EXPECT", "OUTCOME", "RESULT");
        for report in &reports {
            let expect = if report.expect_fault { "fault" } else { "no fault" };
            let outcome = match report.outcome {
                ProbeOutcome::Faulted { signal } => format!("signal {}", signal),
                ProbeOutcome::Completed { code } => format!("exit {}", code),
                ProbeOutcome::Panicked => "panicked".to_string(),
            };
            let result = if report.passed { "ok" } else { "FAILED" };
            println!("{:<34} {:<10} {:<16} {}", report.name, expect, outcome, result);
        }
        println!("{} probes, {} failed", reports.len(), failed);
    }

    if failed > 0 {
        anyhow::bail!("{} fault probe(s) failed", failed);
    }
    Ok(())
}

fn run_config(file: Option<PathBuf>) -> Result<()> {
    let config = match file {
        Some(path) => FreezeConfig::from_file(&path)?,
        None => crate::config::current().clone(),
    };

    println!("{}", config.to_json_pretty()?);
    let result = validator::validate_config(&config, pages::os_page_size())?;
    for warning in &result.warnings {
        eprintln!("Warning: {}", warning);
    }
    eprintln!(
        "Configuration valid (OS page size {} bytes, engine page size {} bytes)",
        pages::os_page_size(),
        FreezeEngine::new(&config).page_size()
    );
    Ok(())
}

struct Sample {
    name: String,
    count: Ptr<i64>,
    tags: Seq<Ptr<bool>>,
    index: Map<String, Ptr<u32>>,
}

reflect_record!(Sample {
    exported name,
    exported count,
    exported tags,
    exported index,
});

#[derive(Serialize)]
struct StatsReport {
    before: metrics::MetricsSnapshot,
    frozen: metrics::MetricsSnapshot,
    after: metrics::MetricsSnapshot,
    walk: crate::WalkStats,
}

fn run_stats(json: bool, prometheus: bool) -> Result<()> {
    let before = metrics::snapshot();

    let sample = Ptr::new(Sample {
        name: "sample".to_string(),
        count: Ptr::new(3),
        tags: (0..4).map(|i| Ptr::new(i % 2 == 0)).collect(),
        index: (0..4).map(|i| (format!("k{}", i), Ptr::new(i))).collect(),
    });
    let (sample, walk) = FreezeEngine::global().freeze_deep_with_stats(sample)?;
    let frozen = metrics::snapshot();
    drop(sample);
    let after = metrics::snapshot();

    if prometheus {
        print!("{}", metrics::get_metrics().export_prometheus());
        return Ok(());
    }

    let report = StatsReport {
        before,
        frozen,
        after,
        walk,
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Deep freeze of sample graph:");
    println!("  nodes visited:      {}", walk.nodes_visited);
    println!("  regions frozen:     {}", walk.regions_frozen());
    println!("  private skipped:    {}", walk.private_members_skipped);
    println!("  max depth:          {}", walk.max_depth);
    println!("Live regions: {} -> {} -> {}", before.live_regions, frozen.live_regions, after.live_regions);
    println!("Live bytes:   {} -> {} -> {}", before.live_bytes, frozen.live_bytes, after.live_bytes);
    if after.live_regions != before.live_regions {
        anyhow::bail!(
            "{} region(s) still live after release",
            after.live_regions.saturating_sub(before.live_regions)
        );
    }
    Ok(())
}
