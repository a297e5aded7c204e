//! Workload generator.
//!
//! Produces arrivals as a Poisson process: inter-arrival gaps are
//! exponential with mean `1 / tps`, and generation stops at the first
//! arrival that would land after the horizon. Each arrival gets a uniform
//! key, an exponential execution time and an operation kind, each drawn from
//! its own seeded stream.
//!
//! The generator is lazy and never touches resolver state; the runner pulls
//! the next arrival whenever it dispatches the current one.

use crate::config::{ConfigError, RunParams};
use deferral_core::{Key, OpMix, PartitionId, PartitionMap, Transaction};
use deferral_env::{RngStream, SimContext, SimDuration, SimTime, TxnId};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Exp};

/// Which keys arrivals are drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDomain {
    /// Uniform over `[0, keyspace_size)`
    Full { keyspace_size: u64 },

    /// Uniform over the `count` keys owned by one partition
    Partition { partition: PartitionId, count: u64 },
}

impl KeyDomain {
    fn len(&self) -> u64 {
        match self {
            KeyDomain::Full { keyspace_size } => *keyspace_size,
            KeyDomain::Partition { count, .. } => *count,
        }
    }
}

/// Id assignment: `offset + n * stride` for the n-th arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdSequence {
    pub offset: u64,
    pub stride: u64,
}

impl Default for IdSequence {
    fn default() -> Self {
        Self { offset: 0, stride: 1 }
    }
}

/// Everything the generator needs for one (possibly sharded) run.
#[derive(Debug, Clone)]
pub struct WorkloadSpec {
    pub map: PartitionMap,
    pub domain: KeyDomain,
    pub horizon: SimTime,
    pub tps: f64,
    pub execution_time_avg_secs: f64,
    pub op_mix: OpMix,
    pub ids: IdSequence,
}

impl WorkloadSpec {
    /// The unsharded workload of a run.
    pub fn from_params(params: &RunParams) -> Self {
        Self {
            map: params.map,
            domain: KeyDomain::Full { keyspace_size: params.keyspace_size },
            horizon: params.horizon,
            tps: params.tps,
            execution_time_avg_secs: params.execution_time_avg_secs,
            op_mix: params.op_mix,
            ids: IdSequence::default(),
        }
    }
}

/// Lazy producer of arrival transactions.
pub struct WorkloadGenerator {
    spec: WorkloadSpec,

    /// `None` when the domain has no keys (nothing ever arrives)
    gaps: Option<Exp<f64>>,
    execution: Exp<f64>,

    arrival_rng: ChaCha8Rng,
    key_rng: ChaCha8Rng,
    execution_rng: ChaCha8Rng,
    op_rng: ChaCha8Rng,

    /// Time of the last arrival produced
    clock: SimTime,

    /// Arrivals produced so far
    produced: u64,

    exhausted: bool,
}

impl WorkloadGenerator {
    pub fn new(context: &SimContext, spec: WorkloadSpec) -> Result<Self, ConfigError> {
        let gaps = if spec.domain.len() == 0 {
            None
        } else {
            Some(Exp::new(spec.tps).map_err(|_| ConfigError::InvalidTps(spec.tps))?)
        };
        let execution = Exp::new(1.0 / spec.execution_time_avg_secs)
            .map_err(|_| ConfigError::InvalidExecutionTime(spec.execution_time_avg_secs))?;

        Ok(Self {
            exhausted: gaps.is_none(),
            spec,
            gaps,
            execution,
            arrival_rng: context.rng(RngStream::Arrivals),
            key_rng: context.rng(RngStream::Keys),
            execution_rng: context.rng(RngStream::Execution),
            op_rng: context.rng(RngStream::Operations),
            clock: SimTime::ZERO,
            produced: 0,
        })
    }

    /// Number of arrivals produced so far.
    pub fn produced(&self) -> u64 {
        self.produced
    }

    /// Drains the generator into a list of arrivals.
    pub fn generate_all(self) -> Vec<Transaction> {
        self.collect()
    }

    fn draw_key(&mut self) -> Key {
        match self.spec.domain {
            KeyDomain::Full { keyspace_size } => self.key_rng.gen_range(0..keyspace_size),
            KeyDomain::Partition { partition, count } => {
                let index = self.key_rng.gen_range(0..count);
                self.spec.map.nth_key(partition, index)
            }
        }
    }
}

impl Iterator for WorkloadGenerator {
    type Item = Transaction;

    fn next(&mut self) -> Option<Transaction> {
        if self.exhausted {
            return None;
        }
        let gaps = self.gaps.as_ref()?;

        let gap = SimDuration::from_secs_saturating(gaps.sample(&mut self.arrival_rng));
        let arrival = self.clock + gap;
        if arrival > self.spec.horizon {
            self.exhausted = true;
            return None;
        }
        self.clock = arrival;

        let key = self.draw_key();
        let execution_time = SimDuration::from_secs_saturating(self.execution.sample(&mut self.execution_rng));
        let op = self.spec.op_mix.pick(self.op_rng.gen::<f64>());
        let id = TxnId(self.spec.ids.offset + self.produced * self.spec.ids.stride);
        self.produced += 1;

        Some(Transaction::new(
            id,
            key,
            self.spec.map.partition_of(key),
            op,
            arrival,
            execution_time,
        ))
    }
}
