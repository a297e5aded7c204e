//! Sharded runner: one independent simulation per partition.
//!
//! Partitions share no keys, so each one can run as its own event loop. Shard
//! `p` sees the arrivals of the full run thinned to its keys: rate
//! `tps * keys_in(p) / keyspace_size`, keys uniform over the partition.

use crate::config::RunParams;
use crate::runner::{simulate, RunError, ShardOutcome};
use crate::workload::{IdSequence, KeyDomain, WorkloadSpec};

use deferral_core::PartitionId;
use rayon::prelude::*;
use tracing::debug;

/// Workload of shard `partition`.
pub(crate) fn shard_spec(params: &RunParams, partition: PartitionId) -> WorkloadSpec {
    let count = params.map.keys_in(partition, params.keyspace_size);
    let share = count as f64 / params.keyspace_size as f64;

    WorkloadSpec {
        map: params.map,
        domain: KeyDomain::Partition { partition, count },
        horizon: params.horizon,
        tps: params.tps * share,
        execution_time_avg_secs: params.execution_time_avg_secs,
        op_mix: params.op_mix,
        ids: IdSequence {
            offset: partition.0 as u64,
            stride: params.map.num_partitions() as u64,
        },
    }
}

/// Runs every shard on the rayon pool. Outcomes come back in partition order.
pub(crate) fn run_sharded(params: &RunParams) -> Result<Vec<ShardOutcome>, RunError> {
    let partitions: Vec<PartitionId> = params.map.partitions().collect();
    debug!("Running {} shards in parallel", partitions.len());

    partitions
        .into_par_iter()
        .map(|partition| {
            let context = params.context.fork(partition.0 as u64);
            simulate(params, &context, shard_spec(params, partition))
        })
        .collect()
}
