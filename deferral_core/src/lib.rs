//! Deferral Simulator Core - Contention Model
//!
//! Models transactions competing for keys spread over independent
//! partitions:
//! 1. **Routing**: `key mod num_partitions` picks the owning partition
//! 2. **Contention**: one holder per key, FIFO wait-lists, an optional cap on
//!    how long a transaction may wait before it is dropped
//! 3. **Accounting**: every terminal transaction is recorded once into a
//!    mergeable summary (counts, latency percentiles, per-partition outcomes)
//! 4. **Reference**: a serial replay of the same arrivals that every read and
//!    final key value is checked against
//!
//! The event loop itself lives in `deferral_sim`; this crate only reacts to
//! events handed to it.

pub mod error;
pub mod partition;
pub mod reference;
pub mod resolver;
pub mod stats;
pub mod store;
pub mod transaction;

// Re-export key types for convenience
pub use error::SimError;
pub use partition::{Key, Partition, PartitionId, PartitionMap};
pub use reference::SerialReference;
pub use resolver::{ContentionResolver, ExecutionPolicy};
pub use stats::{
    DeferSummary, KeySummary, LatencySummary, PartitionSummary, ReadSummary, RunSummary, StatsAggregator,
};
pub use store::{KeyStore, WriteOutcome};
pub use transaction::{OpKind, OpMix, Snapshot, Transaction, TxnStatus};
