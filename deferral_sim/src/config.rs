//! Run configuration and validation.
//!
//! `SimConfig` is the user-facing, serializable form (it is echoed into the
//! result file). `validate()` turns it into `RunParams`, the typed form the
//! runner works with. Nothing runs until validation has passed.

use deferral_core::{ExecutionPolicy, OpMix, PartitionMap};
use deferral_env::{SimContext, SimDuration, SimTime};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use thiserror::Error;

/// Configuration rejected before the run starts.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Partition count must be positive")]
    NonPositivePartitions,

    #[error("Keyspace size must be positive")]
    NonPositiveKeyspace,

    #[error("Duration must be a finite, non-negative number of seconds (got {0})")]
    InvalidDuration(f64),

    #[error("TPS must be finite and positive (got {0})")]
    InvalidTps(f64),

    #[error("Average execution time must be finite and positive (got {0})")]
    InvalidExecutionTime(f64),

    #[error("Max defer time must be a finite, non-negative number of seconds (got {0})")]
    InvalidMaxDefer(f64),

    #[error("Operation ratios must lie in [0, 1] and sum to at most 1 (get {get}, overwrite {overwrite})")]
    InvalidOpMix { get: f64, overwrite: f64 },
}

/// Configuration for a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Number of partitions (independent locking domains)
    pub num_partitions: u32,

    /// Number of distinct keys
    pub keyspace_size: u64,

    /// Arrivals are generated over `[0, duration]` seconds
    pub duration_secs: f64,

    /// Mean arrival rate
    pub tps: f64,

    /// Mean execution time in seconds
    pub execution_time_avg_secs: f64,

    /// Defer cap in seconds; `None` waits forever
    pub max_defer_time_secs: Option<f64>,

    /// Master seed; `None` derives one from the wall clock
    pub seed: Option<u64>,

    pub policy: ExecutionPolicy,

    pub op_mix: OpMix,

    /// Run one independent simulation per partition on a thread pool
    pub parallel: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            num_partitions: 10,
            keyspace_size: 20,
            duration_secs: 30.0,
            tps: 10.0,
            execution_time_avg_secs: 1.0,
            max_defer_time_secs: None,
            seed: None,
            policy: ExecutionPolicy::Deferred,
            op_mix: OpMix::default(),
            parallel: false,
        }
    }
}

impl SimConfig {
    pub fn with_partitions(mut self, num_partitions: u32) -> Self {
        self.num_partitions = num_partitions;
        self
    }

    pub fn with_keyspace(mut self, keyspace_size: u64) -> Self {
        self.keyspace_size = keyspace_size;
        self
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = secs;
        self
    }

    pub fn with_tps(mut self, tps: f64) -> Self {
        self.tps = tps;
        self
    }

    pub fn with_execution_time(mut self, secs: f64) -> Self {
        self.execution_time_avg_secs = secs;
        self
    }

    pub fn with_max_defer(mut self, secs: Option<f64>) -> Self {
        self.max_defer_time_secs = secs;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_op_mix(mut self, op_mix: OpMix) -> Self {
        self.op_mix = op_mix;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Checks every parameter and resolves the seed.
    pub fn validate(&self) -> Result<RunParams, ConfigError> {
        let partitions = NonZeroU32::new(self.num_partitions).ok_or(ConfigError::NonPositivePartitions)?;
        if self.keyspace_size == 0 {
            return Err(ConfigError::NonPositiveKeyspace);
        }

        let horizon = SimTime::from_secs_f64(self.duration_secs)
            .map_err(|_| ConfigError::InvalidDuration(self.duration_secs))?;

        if !(self.tps.is_finite() && self.tps > 0.0) {
            return Err(ConfigError::InvalidTps(self.tps));
        }

        let exec = self.execution_time_avg_secs;
        if !(exec.is_finite() && exec > 0.0) {
            return Err(ConfigError::InvalidExecutionTime(exec));
        }

        let max_defer = self
            .max_defer_time_secs
            .map(|secs| SimDuration::from_secs_f64(secs).map_err(|_| ConfigError::InvalidMaxDefer(secs)))
            .transpose()?;

        if !self.op_mix.is_valid() {
            return Err(ConfigError::InvalidOpMix {
                get: self.op_mix.get_ratio,
                overwrite: self.op_mix.overwrite_ratio,
            });
        }

        let context = match self.seed {
            Some(seed) => SimContext::new(seed),
            None => SimContext::from_entropy(),
        };

        Ok(RunParams {
            map: PartitionMap::new(partitions),
            keyspace_size: self.keyspace_size,
            horizon,
            tps: self.tps,
            execution_time_avg_secs: exec,
            max_defer,
            policy: self.policy,
            op_mix: self.op_mix,
            parallel: self.parallel,
            keep_transactions: true,
            context,
        })
    }
}

/// Validated, typed run parameters.
#[derive(Debug, Clone)]
pub struct RunParams {
    pub map: PartitionMap,
    pub keyspace_size: u64,

    /// Last instant at which an arrival may occur
    pub horizon: SimTime,

    pub tps: f64,
    pub execution_time_avg_secs: f64,
    pub max_defer: Option<SimDuration>,
    pub policy: ExecutionPolicy,
    pub op_mix: OpMix,
    pub parallel: bool,

    /// Hand every transaction back in the outcome. When off, transactions
    /// are dropped from memory as soon as they are recorded.
    pub keep_transactions: bool,

    /// Seeded randomness for the run
    pub context: SimContext,
}

impl RunParams {
    /// The configuration as it actually ran (seed resolved).
    pub fn echo(&self) -> SimConfig {
        SimConfig {
            num_partitions: self.map.num_partitions(),
            keyspace_size: self.keyspace_size,
            duration_secs: self.horizon.as_secs_f64(),
            tps: self.tps,
            execution_time_avg_secs: self.execution_time_avg_secs,
            max_defer_time_secs: self.max_defer.map(|d| d.as_secs_f64()),
            seed: Some(self.context.seed()),
            policy: self.policy,
            op_mix: self.op_mix,
            parallel: self.parallel,
        }
    }
}
