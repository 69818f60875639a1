//! Serverless cold-start simulator CLI
//!
//! Replays synthetic workloads against a simulated FaaS platform and reports
//! cold-start behavior per scenario.

use clap::Parser;
use serverless_core::RoutingPolicyKind;
use serverless_sim::scenarios::ScenarioId;
use serverless_sim::{ScenarioResult, ScenarioRunner};
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Serverless cold-start simulation CLI
#[derive(Parser, Debug)]
#[command(name = "serverless-sim")]
#[command(about = "Run deterministic cold-start simulations of a FaaS platform", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Number of functions in the workload
    #[arg(short, long, default_value = "4")]
    functions: usize,

    /// Scenario to run (lambda, azure, google, zero, bursty, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Routing policy (first_idle, random)
    #[arg(short, long, default_value = "first_idle")]
    routing: RoutingPolicyKind,

    /// Number of consecutive seeds to run
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Arrival window in seconds
    #[arg(short, long, default_value = "60")]
    duration: f64,

    /// Verbose output (RUST_LOG takes precedence when set)
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,
}

/// Log level used when `RUST_LOG` is not set.
fn default_level(json: bool, verbose: bool) -> Level {
    match (json, verbose) {
        // Keep stderr quiet so the JSON summary is the only output
        (true, _) => Level::WARN,
        (false, true) => Level::DEBUG,
        (false, false) => Level::INFO,
    }
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = default_level(args.json, args.verbose);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    if !args.json {
        info!("Serverless Sim v{}", env!("CARGO_PKG_VERSION"));
    }

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            eprintln!("Available scenarios: lambda, azure, google, zero, bursty, all");
            std::process::exit(1);
        })]
    };

    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or(1)
    } else {
        args.seed
    };

    let mut all_results: Vec<ScenarioResult> = Vec::new();

    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);

        let runner = ScenarioRunner::new(seed)
            .with_functions(args.functions)
            .with_duration(args.duration)
            .with_routing(args.routing);

        for scenario in &scenarios {
            let result = runner.run(*scenario);

            if !args.json {
                if result.passed {
                    info!(
                        "✓ {} (seed={}) PASSED: {} invocations, {:.1}% cold, mean {:.1} ms, max {:.1} ms",
                        scenario.name(),
                        seed,
                        result.metrics.invocations,
                        result.metrics.cold_start_ratio * 100.0,
                        result.metrics.mean_cold_start_ms,
                        result.metrics.max_cold_start_ms
                    );
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }

            all_results.push(result);
        }
    }

    let total = all_results.len();
    let failed_count = all_results.iter().filter(|r| !r.passed).count();

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed_count,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "time_secs": r.final_time_secs,
                    "failure_reason": r.failure_reason,
                    "metrics": r.metrics,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: failed to encode summary: {}", e);
                std::process::exit(1);
            }
        }
    } else if failed_count == 0 {
        info!("All {} scenario runs passed", total);
    } else {
        error!("{}/{} scenario runs failed", failed_count, total);
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
