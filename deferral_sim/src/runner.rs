//! Run controller - drives one simulation from configuration to summary.

use crate::config::{ConfigError, RunParams, SimConfig};
use crate::sharded;
use crate::workload::{WorkloadGenerator, WorkloadSpec};

use deferral_core::{
    ContentionResolver, Key, KeySummary, RunSummary, SerialReference, SimError, StatsAggregator, Transaction,
};
use deferral_env::{EventKind, EventQueue, SimContext, SimTime};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

/// Anything that stops a run from producing a summary.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Simulation aborted: {0}")]
    Sim(#[from] SimError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RunError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Config(_) => 2,
            _ => 1,
        }
    }
}

/// Result of one simulation instance (the whole run, or one shard).
pub(crate) struct ShardOutcome {
    pub stats: StatsAggregator,
    pub generated: u64,
    pub end_time: SimTime,
    pub events_dispatched: u64,
    pub retries_scheduled: u64,
    pub transactions: Vec<Transaction>,
    pub key_values: Vec<(Key, i64)>,
    pub reference_values: Vec<(Key, i64)>,
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Configuration as it ran (seed resolved)
    pub config: SimConfig,

    pub summary: RunSummary,

    /// Time of the last dispatched event
    pub end_time: SimTime,

    pub events_dispatched: u64,
    pub retries_scheduled: u64,

    /// Every transaction in id order, empty when the transaction log is off
    pub transactions: Vec<Transaction>,

    /// Final value of every key that was written
    pub key_values: BTreeMap<Key, i64>,

    /// Final key values of the serial replay of the same arrivals
    pub reference_values: BTreeMap<Key, i64>,
}

/// Runs simulations for one validated configuration.
pub struct RunController {
    params: RunParams,
}

impl RunController {
    /// Validates `config`. Nothing runs on failure.
    pub fn new(config: SimConfig) -> Result<Self, ConfigError> {
        Ok(Self { params: config.validate()? })
    }

    /// Whether the outcome carries every transaction. On by default; when
    /// off, terminal transactions are released as soon as they are recorded.
    pub fn with_transaction_log(mut self, keep: bool) -> Self {
        self.params.keep_transactions = keep;
        self
    }

    pub fn params(&self) -> &RunParams {
        &self.params
    }

    /// The resolved seed.
    pub fn seed(&self) -> u64 {
        self.params.context.seed()
    }

    /// Runs to completion and returns the verified outcome.
    pub fn run(&self) -> Result<RunOutcome, RunError> {
        let params = &self.params;
        info!(
            "Starting run: {} partitions, {} keys, {:.1} tps for {}, policy {}, seed {}",
            params.map.num_partitions(),
            params.keyspace_size,
            params.tps,
            params.horizon.saturating_since(SimTime::ZERO),
            params.policy,
            params.context.seed(),
        );

        let shards = if params.parallel {
            sharded::run_sharded(params)?
        } else {
            vec![simulate(params, &params.context, WorkloadSpec::from_params(params))?]
        };

        let outcome = finalize(params, shards)?;
        info!(
            "Run finished at {}: {} generated, {} completed, {} dropped ({:.2}% drop rate)",
            outcome.end_time,
            outcome.summary.generated,
            outcome.summary.completed,
            outcome.summary.dropped,
            outcome.summary.drop_rate * 100.0,
        );
        info!(
            "Reads: {} correct, {} wrong ({:.2}% wrong); {} of {} keys diverged from serial",
            outcome.summary.reads.correct,
            outcome.summary.reads.wrong,
            outcome.summary.reads.wrong_ratio * 100.0,
            outcome.summary.keys.diverged,
            outcome.summary.keys.compared,
        );
        Ok(outcome)
    }
}

/// Runs the event loop for one workload until the queue drains.
///
/// Only the first arrival is scheduled up front; each dispatched arrival
/// pulls the next one from the generator. Every arrival is also replayed
/// through a serial reference as it is generated, so gets carry the value a
/// serial execution would have read.
pub(crate) fn simulate(params: &RunParams, context: &SimContext, spec: WorkloadSpec) -> Result<ShardOutcome, RunError> {
    let map = spec.map;
    let mut generator = WorkloadGenerator::new(context, spec)?;
    let mut resolver = ContentionResolver::new(map, params.policy, params.max_defer);
    let mut stats = StatsAggregator::new(map.num_partitions())?;
    let mut queue = EventQueue::new();
    let mut reference = SerialReference::new();

    if let Some(first) = generator.next() {
        enqueue_arrival(&mut resolver, &mut reference, &mut queue, first)?;
    }

    while let Some(event) = queue.next() {
        if event.kind == EventKind::Arrival {
            if let Some(txn) = generator.next() {
                enqueue_arrival(&mut resolver, &mut reference, &mut queue, txn)?;
            }
        }

        if let Some(done) = resolver.handle(event, &mut queue)? {
            let txn = resolver.transaction(done).ok_or(SimError::UnknownTransaction(done))?;
            stats.record(txn)?;
            if !params.keep_transactions {
                resolver.retire(done)?;
            }
        }
    }

    if resolver.live() > 0 {
        return Err(SimError::Stranded(resolver.live()).into());
    }

    debug!(
        "Queue drained at {} after {} events ({} arrivals)",
        queue.now(),
        queue.dispatched(),
        generator.produced()
    );

    Ok(ShardOutcome {
        generated: generator.produced(),
        end_time: queue.now(),
        events_dispatched: queue.dispatched(),
        retries_scheduled: resolver.retries_scheduled(),
        key_values: resolver.store().written().collect(),
        reference_values: reference.final_values().into_iter().collect(),
        transactions: resolver.into_transactions(),
        stats,
    })
}

fn enqueue_arrival(
    resolver: &mut ContentionResolver,
    reference: &mut SerialReference,
    queue: &mut EventQueue,
    mut txn: Transaction,
) -> Result<(), SimError> {
    txn.reference_read = reference.apply(&txn);
    let (id, arrival) = (txn.id, txn.arrival_time);
    resolver.register(txn)?;
    queue.schedule(arrival, EventKind::Arrival, id)?;
    Ok(())
}

/// Merges shard outcomes in order and checks conservation.
pub(crate) fn finalize(params: &RunParams, shards: Vec<ShardOutcome>) -> Result<RunOutcome, RunError> {
    let mut stats = StatsAggregator::new(params.map.num_partitions())?;
    let mut generated = 0;
    let mut end_time = SimTime::ZERO;
    let mut events_dispatched = 0;
    let mut retries_scheduled = 0;
    let mut transactions = Vec::new();
    let mut key_values = BTreeMap::new();
    let mut reference_values = BTreeMap::new();

    for shard in shards {
        stats.merge(shard.stats)?;
        generated += shard.generated;
        end_time = end_time.max(shard.end_time);
        events_dispatched += shard.events_dispatched;
        retries_scheduled += shard.retries_scheduled;
        transactions.extend(shard.transactions);
        key_values.extend(shard.key_values);
        reference_values.extend(shard.reference_values);
    }
    transactions.sort_by_key(|t| t.id);

    let mut summary = stats.summarize();
    summary.keys = KeySummary::compare(&key_values, &reference_values);
    if summary.generated != generated || summary.completed + summary.dropped != generated {
        return Err(SimError::Conservation {
            generated,
            completed: summary.completed,
            dropped: summary.dropped,
        }
        .into());
    }

    Ok(RunOutcome {
        config: params.echo(),
        summary,
        end_time,
        events_dispatched,
        retries_scheduled,
        transactions,
        key_values,
        reference_values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use deferral_core::{ExecutionPolicy, OpKind, TxnStatus};

    fn run(config: SimConfig) -> RunOutcome {
        RunController::new(config).unwrap().run().unwrap()
    }

    #[test]
    fn test_default_run_conserves() {
        let outcome = run(SimConfig::default().with_seed(42));
        let s = &outcome.summary;

        assert!(s.generated > 0);
        assert_eq!(s.generated, s.completed + s.dropped);
        assert_eq!(outcome.transactions.len() as u64, s.generated);
        assert!(outcome.transactions.iter().all(|t| t.is_terminal()));
        // Uncapped never drops
        assert_eq!(s.dropped, 0);
    }

    #[test]
    fn test_zero_duration_run_is_empty() {
        let outcome = run(SimConfig::default().with_seed(1).with_duration(0.0));

        assert_eq!(outcome.summary.generated, 0);
        assert!(outcome.summary.latency.is_none());
        assert_eq!(outcome.events_dispatched, 0);
        assert_eq!(outcome.end_time, SimTime::ZERO);
    }

    #[test]
    fn test_capped_run_respects_cap() {
        let outcome = run(
            SimConfig::default()
                .with_seed(4)
                .with_partitions(2)
                .with_keyspace(4)
                .with_tps(20.0)
                .with_max_defer(Some(0.3)),
        );
        let cap = outcome.config.max_defer_time_secs.unwrap();

        assert!(outcome.summary.dropped > 0);
        for t in &outcome.transactions {
            assert!(t.accumulated_defer.as_secs_f64() <= cap + 1e-9);
            if t.status == TxnStatus::Dropped {
                assert_eq!(t.completion_time, None);
            }
        }
    }

    #[test]
    fn test_events_account_for_every_transaction() {
        let outcome = run(SimConfig::default().with_seed(8).with_max_defer(Some(0.5)));
        let s = &outcome.summary;

        // One arrival per transaction, one completion per completed, plus retries
        assert_eq!(outcome.events_dispatched, s.generated + s.completed + outcome.retries_scheduled);
    }

    #[test]
    fn test_eager_policy_never_drops() {
        let outcome = run(
            SimConfig::default()
                .with_seed(3)
                .with_keyspace(2)
                .with_max_defer(Some(0.0))
                .with_policy(ExecutionPolicy::Eager),
        );

        assert_eq!(outcome.summary.dropped, 0);
        assert_eq!(outcome.summary.defer.deferred, 0);
        assert!(outcome.summary.conflicts > 0);
    }

    #[test]
    fn test_uncapped_deferral_matches_serial_reference() {
        let outcome = run(SimConfig::default().with_seed(21).with_keyspace(3).with_tps(15.0));
        let s = &outcome.summary;

        assert!(s.reads.correct > 0);
        assert_eq!(s.reads.wrong, 0);
        assert_eq!(s.keys.diverged, 0);
        assert_eq!(outcome.key_values, outcome.reference_values);
        for t in outcome.transactions.iter().filter(|t| t.op == OpKind::Get) {
            assert_eq!(t.read_value, t.reference_read);
        }
    }

    #[test]
    fn test_eager_reads_diverge_under_contention() {
        let outcome = run(
            SimConfig::default()
                .with_seed(21)
                .with_keyspace(3)
                .with_tps(15.0)
                .with_policy(ExecutionPolicy::Eager),
        );

        assert!(outcome.summary.reads.wrong > 0);
        assert!(outcome.summary.reads.wrong_ratio > 0.0);
    }

    #[test]
    fn test_transaction_log_off_releases_transactions() {
        let config = SimConfig::default().with_seed(6).with_max_defer(Some(0.4));
        let kept = run(config.clone());
        let released = RunController::new(config)
            .unwrap()
            .with_transaction_log(false)
            .run()
            .unwrap();

        assert!(released.transactions.is_empty());
        assert_eq!(released.summary, kept.summary);
        assert_eq!(released.key_values, kept.key_values);
    }

    #[test]
    fn test_config_error_exit_code() {
        let err: RunError = ConfigError::NonPositiveKeyspace.into();
        assert_eq!(err.exit_code(), 2);

        let err: RunError = SimError::Stranded(1).into();
        assert_eq!(err.exit_code(), 1);
    }
}
