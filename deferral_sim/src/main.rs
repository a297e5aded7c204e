//! Deferral Simulator CLI
//!
//! Runs one simulation and writes its JSON summary.

use clap::Parser;
use deferral_core::{ExecutionPolicy, OpMix};
use deferral_sim::{Preset, RunController, RunError, SimConfig, SimExport};
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Key contention simulator with bounded deferral
#[derive(Parser, Debug)]
#[command(name = "deferral-sim")]
#[command(about = "Simulate transactions contending for keys across partitions", long_about = None)]
struct Args {
    /// Output file for the JSON run summary
    #[arg(short, long)]
    output: PathBuf,

    /// Start from a named preset (serial_hotspot, sparse_keys, zero_defer, dense_partitions, wide_keyspace)
    #[arg(long)]
    preset: Option<Preset>,

    /// Number of partitions [default: 10]
    #[arg(long)]
    num_partitions: Option<u32>,

    /// Number of distinct keys [default: 20]
    #[arg(long)]
    keyspace_size: Option<u64>,

    /// Arrival window in seconds [default: 30]
    #[arg(long)]
    duration: Option<f64>,

    /// Mean arrival rate [default: 10]
    #[arg(long)]
    tps: Option<f64>,

    /// Mean execution time in seconds [default: 1]
    #[arg(long)]
    execution_time_avg: Option<f64>,

    /// Longest a transaction may wait for its key, in seconds (uncapped if absent)
    #[arg(long)]
    max_defer_time: Option<f64>,

    /// Master seed (derived from the clock if absent)
    #[arg(long)]
    seed: Option<u64>,

    /// Admission policy (deferred, eager) [default: deferred]
    #[arg(long)]
    policy: Option<ExecutionPolicy>,

    /// Probability of a get operation [default: 1/3]. Given alone, the
    /// other two kinds split the remainder in their current proportion
    #[arg(long)]
    get_ratio: Option<f64>,

    /// Probability of an overwrite operation [default: 1/3]. Given alone, the
    /// other two kinds split the remainder in their current proportion
    #[arg(long)]
    overwrite_ratio: Option<f64>,

    /// Run each partition as an independent shard in parallel
    #[arg(long)]
    parallel: bool,

    /// Include per-transaction records in the output
    #[arg(long)]
    include_transactions: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Preset (or default) configuration with explicit flags applied on top.
    fn to_config(&self) -> SimConfig {
        let mut config = self.preset.map(|p| p.config()).unwrap_or_default();

        if let Some(n) = self.num_partitions {
            config.num_partitions = n;
        }
        if let Some(k) = self.keyspace_size {
            config.keyspace_size = k;
        }
        if let Some(d) = self.duration {
            config.duration_secs = d;
        }
        if let Some(tps) = self.tps {
            config.tps = tps;
        }
        if let Some(exec) = self.execution_time_avg {
            config.execution_time_avg_secs = exec;
        }
        if self.max_defer_time.is_some() {
            config.max_defer_time_secs = self.max_defer_time;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if let Some(policy) = self.policy {
            config.policy = policy;
        }
        config.op_mix = match (self.get_ratio, self.overwrite_ratio) {
            (Some(get), Some(overwrite)) => OpMix::new(get, overwrite),
            (Some(get), None) => config.op_mix.with_get_ratio(get),
            (None, Some(overwrite)) => config.op_mix.with_overwrite_ratio(overwrite),
            (None, None) => config.op_mix,
        };
        config.parallel |= self.parallel;
        config
    }
}

fn run(args: &Args) -> Result<(), RunError> {
    let controller = RunController::new(args.to_config())?.with_transaction_log(args.include_transactions);
    if args.seed.is_none() {
        info!("Using seed {}", controller.seed());
    }

    let outcome = controller.run()?;
    let summary = &outcome.summary;

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!(
        "generated={} completed={} dropped={} drop_rate={:.4}",
        summary.generated, summary.completed, summary.dropped, summary.drop_rate
    );
    if let Some(latency) = &summary.latency {
        info!(
            "latency mean={:.4}s p50={:.4}s p99={:.4}s max={:.4}s",
            latency.mean_secs, latency.p50_secs, latency.p99_secs, latency.max_secs
        );
    }
    if summary.conflicts > 0 || summary.lost_updates > 0 {
        info!("conflicts={} lost_updates={}", summary.conflicts, summary.lost_updates);
    }
    info!(
        "reads correct={:.4} wrong={:.4} keys_diverged={}/{}",
        summary.reads.correct_ratio, summary.reads.wrong_ratio, summary.keys.diverged, summary.keys.compared
    );

    SimExport::from_outcome(&outcome, args.include_transactions).write_to_file(&args.output)?;
    info!("Wrote summary to {}", args.output.display());
    Ok(())
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    info!("Deferral Simulator v{}", env!("CARGO_PKG_VERSION"));
    if let Some(preset) = args.preset {
        info!("Preset {}: {}", preset, preset.description());
    }

    if let Err(e) = run(&args) {
        error!("{}", e);
        std::process::exit(e.exit_code());
    }
}
