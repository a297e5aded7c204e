//! Deferral Simulator - Run Harness
//!
//! Turns a configuration into a verified [`RunSummary`](deferral_core::RunSummary):
//!
//! ```text
//!   WorkloadGenerator ──► EventQueue ──► ContentionResolver ──► StatsAggregator
//!          ▲                  │                  │
//!          └── next arrival ──┘                  └── completions / retries
//! ```
//!
//! - **Determinism**: all randomness comes from the run seed, so the same
//!   configuration and seed produce byte-identical output
//! - **Sharding**: with `parallel` set, each partition runs as its own
//!   simulation on a rayon pool and the results are merged in order
//!
//! # Usage
//!
//! ```ignore
//! use deferral_sim::{RunController, SimConfig};
//!
//! let config = SimConfig::default().with_seed(42).with_max_defer(Some(0.5));
//! let outcome = RunController::new(config)?.run()?;
//! println!("drop rate {:.3}", outcome.summary.drop_rate);
//! ```

mod config;
mod exporter;
mod runner;
mod sharded;
mod workload;
pub mod scenarios;

pub use config::{ConfigError, RunParams, SimConfig};
pub use exporter::{KeyRecord, SimExport, TransactionRecord};
pub use runner::{RunController, RunError, RunOutcome};
pub use scenarios::Preset;
pub use workload::{IdSequence, KeyDomain, WorkloadGenerator, WorkloadSpec};
