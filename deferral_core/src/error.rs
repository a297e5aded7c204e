//! Error types for the contention model.
//!
//! Every variant except `Env` passthroughs is an invariant violation: the
//! model reached a state it must never reach. Callers abort the run instead
//! of producing a summary from corrupted state.

use crate::partition::{Key, PartitionId};
use crate::transaction::TxnStatus;
use deferral_env::{EnvError, SimDuration, TxnId};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// Clock or event queue misuse
    #[error(transparent)]
    Env(#[from] EnvError),

    /// A transaction id was registered twice
    #[error("Transaction {0} registered twice")]
    DuplicateTransaction(TxnId),

    /// An event referenced a transaction the resolver never saw
    #[error("Unknown transaction {0}")]
    UnknownTransaction(TxnId),

    /// A status change outside the state machine
    #[error("Illegal transition for {id}: {from} -> {to}")]
    IllegalTransition { id: TxnId, from: TxnStatus, to: TxnStatus },

    /// Two transactions tried to hold the same key
    #[error("Key {key} already locked by {holder}, requested by {requester}")]
    KeyAlreadyLocked { key: Key, holder: TxnId, requester: TxnId },

    /// A release from a transaction that does not hold the key
    #[error("Transaction {requester} does not hold key {key}")]
    NotHolder { key: Key, requester: TxnId },

    /// A key routed to a partition that does not own it
    #[error("Key {key} does not belong to partition {partition}")]
    ForeignKey { key: Key, partition: PartitionId },

    /// Accumulated defer time went past the configured cap
    #[error("Transaction {id} deferred for {deferred}, cap is {cap}")]
    DeferCapExceeded { id: TxnId, deferred: SimDuration, cap: SimDuration },

    /// A transaction was recorded twice
    #[error("Transaction {0} already recorded")]
    DuplicateRecord(TxnId),

    /// A non-terminal transaction was handed to the aggregator
    #[error("Transaction {id} is not terminal ({status})")]
    NotTerminal { id: TxnId, status: TxnStatus },

    /// The queue drained with transactions still pending or running
    #[error("{0} transactions left non-terminal after the event queue drained")]
    Stranded(usize),

    /// generated != completed + dropped
    #[error("Conservation violated: generated {generated}, completed {completed}, dropped {dropped}")]
    Conservation { generated: u64, completed: u64, dropped: u64 },

    /// Latency histogram failure
    #[error("Histogram error: {0}")]
    Histogram(String),
}

impl SimError {
    /// Creates a histogram error.
    pub fn histogram(err: impl std::fmt::Display) -> Self {
        Self::Histogram(err.to_string())
    }
}
