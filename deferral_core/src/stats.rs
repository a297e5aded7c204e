//! Statistics aggregator and the run summary.
//!
//! The aggregator sees each transaction exactly once, after it is terminal.
//! Latency is `completion - arrival` over completed transactions only;
//! dropped transactions count towards drops and nothing else.

use crate::error::SimError;
use crate::partition::Key;
use crate::transaction::{Transaction, TxnStatus};
use deferral_env::TxnId;
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Significant digits kept by the latency histogram.
const HISTOGRAM_SIGFIG: u8 = 3;

const NANOS_PER_MICRO: u64 = 1_000;
const NANOS_PER_SEC: f64 = 1_000_000_000.0;
const MICROS_PER_SEC: f64 = 1_000_000.0;

// =============================================================================
// SUMMARY TYPES
// =============================================================================

/// Latency distribution of completed transactions, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: u64,
    pub min_secs: f64,
    pub mean_secs: f64,
    pub max_secs: f64,
    pub p50_secs: f64,
    pub p90_secs: f64,
    pub p95_secs: f64,
    pub p99_secs: f64,
}

/// Time spent waiting on locked keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeferSummary {
    /// Transactions that waited at least once
    pub deferred: u64,

    /// Sum of accumulated defer time over all transactions
    pub total_secs: f64,

    /// Mean defer over deferred transactions
    pub mean_secs: f64,

    pub max_secs: f64,
}

/// Outcome counts of one partition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionSummary {
    pub partition: u32,
    pub generated: u64,
    pub completed: u64,
    pub dropped: u64,
    pub deferred: u64,
    pub conflicts: u64,
    pub lost_updates: u64,

    /// Completed gets that read what the serial reference read
    pub correct_reads: u64,

    /// Completed gets that read something else
    pub wrong_reads: u64,
}

/// Read correctness of completed gets against the serial reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadSummary {
    pub correct: u64,
    pub wrong: u64,

    /// `correct / (correct + wrong)`, 1 when no get completed
    pub correct_ratio: f64,

    pub wrong_ratio: f64,
}

impl ReadSummary {
    pub fn new(correct: u64, wrong: u64) -> Self {
        let total = correct + wrong;
        let (correct_ratio, wrong_ratio) = if total > 0 {
            (correct as f64 / total as f64, wrong as f64 / total as f64)
        } else {
            (1.0, 0.0)
        };
        Self { correct, wrong, correct_ratio, wrong_ratio }
    }
}

/// Final key values compared against the serial reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeySummary {
    /// Keys written by either execution
    pub compared: u64,

    /// Keys whose final value differs from the reference
    pub diverged: u64,
}

impl KeySummary {
    /// Compares two sets of final values; missing keys hold 0.
    pub fn compare(actual: &BTreeMap<Key, i64>, reference: &BTreeMap<Key, i64>) -> Self {
        let keys: BTreeSet<Key> = actual.keys().chain(reference.keys()).copied().collect();
        let value = |map: &BTreeMap<Key, i64>, key: &Key| map.get(key).copied().unwrap_or(0);
        let diverged = keys
            .iter()
            .filter(|key| value(actual, key) != value(reference, key))
            .count();

        Self {
            compared: keys.len() as u64,
            diverged: diverged as u64,
        }
    }
}

/// Aggregate result of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub generated: u64,
    pub completed: u64,
    pub dropped: u64,

    /// `dropped / generated`, 0 when nothing was generated
    pub drop_rate: f64,

    /// Eager policy: starts that overlapped another execution on the same key
    pub conflicts: u64,

    /// Writes applied over a newer version than the one read
    pub lost_updates: u64,

    /// `None` when no transaction completed
    pub latency: Option<LatencySummary>,

    pub defer: DeferSummary,

    pub reads: ReadSummary,

    /// Filled in once the run's final key values are known
    pub keys: KeySummary,

    pub partitions: Vec<PartitionSummary>,
}

impl RunSummary {
    /// Mean latency in seconds, if anything completed.
    pub fn mean_latency_secs(&self) -> Option<f64> {
        self.latency.as_ref().map(|l| l.mean_secs)
    }
}

// =============================================================================
// AGGREGATOR
// =============================================================================

/// Accumulates terminal transactions into a [`RunSummary`].
pub struct StatsAggregator {
    /// Ids recorded so far
    recorded: HashSet<TxnId>,

    /// Indexed by partition id
    partitions: Vec<PartitionSummary>,

    /// Completed latencies in microseconds
    latency_hist: Histogram<u64>,

    /// Exact latency sum in nanoseconds
    latency_sum_ns: u128,
    latency_min_ns: Option<u64>,
    latency_max_ns: Option<u64>,

    defer_sum_ns: u128,
    defer_max_ns: u64,
}

impl StatsAggregator {
    /// Creates an aggregator for `num_partitions` partitions.
    pub fn new(num_partitions: u32) -> Result<Self, SimError> {
        let partitions = (0..num_partitions)
            .map(|partition| PartitionSummary { partition, ..Default::default() })
            .collect();

        Ok(Self {
            recorded: HashSet::new(),
            partitions,
            latency_hist: Histogram::new(HISTOGRAM_SIGFIG).map_err(SimError::histogram)?,
            latency_sum_ns: 0,
            latency_min_ns: None,
            latency_max_ns: None,
            defer_sum_ns: 0,
            defer_max_ns: 0,
        })
    }

    /// Number of transactions recorded.
    pub fn recorded(&self) -> u64 {
        self.recorded.len() as u64
    }

    fn partition_mut(&mut self, index: usize) -> &mut PartitionSummary {
        if index >= self.partitions.len() {
            let start = self.partitions.len() as u32;
            let end = index as u32 + 1;
            self.partitions
                .extend((start..end).map(|partition| PartitionSummary { partition, ..Default::default() }));
        }
        &mut self.partitions[index]
    }

    /// Records a terminal transaction. Each id may be recorded once.
    pub fn record(&mut self, txn: &Transaction) -> Result<(), SimError> {
        if !txn.is_terminal() {
            return Err(SimError::NotTerminal { id: txn.id, status: txn.status });
        }
        if !self.recorded.insert(txn.id) {
            return Err(SimError::DuplicateRecord(txn.id));
        }

        let defer_ns = txn.accumulated_defer.as_nanos();
        self.defer_sum_ns += defer_ns as u128;
        self.defer_max_ns = self.defer_max_ns.max(defer_ns);

        let latency_ns = match txn.status {
            TxnStatus::Completed => txn.latency().map(|l| l.as_nanos()),
            _ => None,
        };
        if let Some(ns) = latency_ns {
            let micros = (ns + NANOS_PER_MICRO / 2) / NANOS_PER_MICRO;
            self.latency_hist.record(micros).map_err(SimError::histogram)?;
            self.latency_sum_ns += ns as u128;
            self.latency_min_ns = Some(self.latency_min_ns.map_or(ns, |m| m.min(ns)));
            self.latency_max_ns = Some(self.latency_max_ns.map_or(ns, |m| m.max(ns)));
        }

        let part = self.partition_mut(txn.partition.index());
        part.generated += 1;
        match txn.status {
            TxnStatus::Completed => part.completed += 1,
            _ => part.dropped += 1,
        }
        part.deferred += u64::from(txn.deferred);
        part.conflicts += u64::from(txn.conflicted);
        part.lost_updates += u64::from(txn.lost_update);
        match txn.read_matches_reference() {
            Some(true) => part.correct_reads += 1,
            Some(false) => part.wrong_reads += 1,
            None => {}
        }

        Ok(())
    }

    /// Folds another aggregator (a disjoint shard) into this one.
    pub fn merge(&mut self, other: StatsAggregator) -> Result<(), SimError> {
        if let Some(dup) = other.recorded.iter().find(|id| self.recorded.contains(id)) {
            return Err(SimError::DuplicateRecord(*dup));
        }
        self.recorded.extend(other.recorded);

        for theirs in other.partitions {
            let ours = self.partition_mut(theirs.partition as usize);
            ours.generated += theirs.generated;
            ours.completed += theirs.completed;
            ours.dropped += theirs.dropped;
            ours.deferred += theirs.deferred;
            ours.conflicts += theirs.conflicts;
            ours.lost_updates += theirs.lost_updates;
            ours.correct_reads += theirs.correct_reads;
            ours.wrong_reads += theirs.wrong_reads;
        }

        self.latency_hist.add(&other.latency_hist).map_err(SimError::histogram)?;
        self.latency_sum_ns += other.latency_sum_ns;
        self.latency_min_ns = match (self.latency_min_ns, other.latency_min_ns) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.latency_max_ns = match (self.latency_max_ns, other.latency_max_ns) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.defer_sum_ns += other.defer_sum_ns;
        self.defer_max_ns = self.defer_max_ns.max(other.defer_max_ns);

        Ok(())
    }

    fn latency_summary(&self, completed: u64) -> Option<LatencySummary> {
        let (min_ns, max_ns) = (self.latency_min_ns?, self.latency_max_ns?);
        if completed == 0 {
            return None;
        }

        let min_secs = min_ns as f64 / NANOS_PER_SEC;
        let max_secs = max_ns as f64 / NANOS_PER_SEC;
        // Histogram buckets report their upper edge; keep quantiles inside the exact range
        let quantile = |q: f64| {
            let micros = self.latency_hist.value_at_quantile(q);
            (micros as f64 / MICROS_PER_SEC).clamp(min_secs, max_secs)
        };

        Some(LatencySummary {
            count: completed,
            min_secs,
            mean_secs: (self.latency_sum_ns as f64 / completed as f64) / NANOS_PER_SEC,
            max_secs,
            p50_secs: quantile(0.50),
            p90_secs: quantile(0.90),
            p95_secs: quantile(0.95),
            p99_secs: quantile(0.99),
        })
    }

    /// Builds the summary of everything recorded so far.
    pub fn summarize(&self) -> RunSummary {
        let sum = |f: fn(&PartitionSummary) -> u64| self.partitions.iter().map(f).sum::<u64>();

        let generated = sum(|p| p.generated);
        let completed = sum(|p| p.completed);
        let dropped = sum(|p| p.dropped);
        let deferred = sum(|p| p.deferred);

        let defer = DeferSummary {
            deferred,
            total_secs: self.defer_sum_ns as f64 / NANOS_PER_SEC,
            mean_secs: if deferred > 0 {
                (self.defer_sum_ns as f64 / deferred as f64) / NANOS_PER_SEC
            } else {
                0.0
            },
            max_secs: self.defer_max_ns as f64 / NANOS_PER_SEC,
        };

        RunSummary {
            generated,
            completed,
            dropped,
            drop_rate: if generated > 0 { dropped as f64 / generated as f64 } else { 0.0 },
            conflicts: sum(|p| p.conflicts),
            lost_updates: sum(|p| p.lost_updates),
            latency: self.latency_summary(completed),
            defer,
            reads: ReadSummary::new(sum(|p| p.correct_reads), sum(|p| p.wrong_reads)),
            keys: KeySummary::default(),
            partitions: self.partitions.clone(),
        }
    }
}
