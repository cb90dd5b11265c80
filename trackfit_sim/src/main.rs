//! Trackfit simulation CLI
//!
//! Simulate tracks through toy detectors, fit them with the Kalman actor and
//! check the outcome.

use clap::Parser;
use trackfit_sim::scenarios::ScenarioId;
use trackfit_sim::{ScenarioResult, ScenarioRunner, SimExport};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Trackfit deterministic simulation CLI
#[derive(Parser, Debug)]
#[command(name = "trackfit-sim")]
#[command(about = "Run deterministic Kalman fit scenarios", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Number of tracks per scenario
    #[arg(short, long, default_value = "100")]
    tracks: usize,

    /// Number of detector layers
    #[arg(short, long, default_value = "5")]
    layers: usize,

    /// Scenario to run (nominal, shuffled, unresolved_layer, outlier, stop_on_all, parallel, barrel, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Worker threads for the parallel scenario
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Verbose output (includes per-step actor debug output)
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export per-track fit results to a JSON file
    #[arg(long)]
    export: Option<String>,
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
    }

    if !args.json {
        info!("Trackfit Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            let names: Vec<&str> = ScenarioId::all().iter().map(|s| s.name()).collect();
            eprintln!("Available scenarios: {}, all", names.join(", "));
            std::process::exit(1);
        })]
    };

    if args.export.is_some() && (scenarios.len() > 1 || args.seeds > 1) {
        eprintln!("Error: --export only supports a single scenario and seed");
        std::process::exit(1);
    }

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;

    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = ScenarioRunner::new(seed, args.tracks)
            .with_layers(args.layers)
            .with_workers(args.workers)
            .with_debug(args.verbose);

        for scenario in &scenarios {
            let result = runner.run(*scenario);

            if !args.json {
                if result.passed {
                    info!("✓ {} (seed={}) PASSED", scenario.name(), seed);
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }

            if !result.passed {
                failed_count += 1;
            }

            all_results.push(result);
        }
    }

    if let (Some(path), Some(result)) = (&args.export, all_results.first()) {
        match SimExport::from_result(result).write_to_file(path) {
            Ok(()) => info!("Exported {} tracks to {}", result.summaries.len(), path),
            Err(e) => error!("Failed to write export: {:?}", e),
        }
    }

    // Summary
    let total = all_results.len();
    let passed = total - failed_count;

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "metrics": r.metrics,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to serialize summary: {}", e),
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);

            for result in &all_results {
                if !result.passed {
                    error!(
                        "  - {} seed={}: {}",
                        result.scenario.name(),
                        result.seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
