//! Keyspace, partition map and per-partition lock tables.
//!
//! Keys are routed with `key mod num_partitions`. With the keyspace size
//! independent of the partition count this spreads keys evenly, about
//! `keyspace_size / num_partitions` per partition.

use crate::error::SimError;
use deferral_env::TxnId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::num::NonZeroU32;

/// A key in `[0, keyspace_size)`.
pub type Key = u64;

/// Partition index in `[0, num_partitions)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionId(pub u32);

impl PartitionId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for PartitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Static routing of keys to partitions. Fixed for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionMap {
    num_partitions: NonZeroU32,
}

impl PartitionMap {
    pub fn new(num_partitions: NonZeroU32) -> Self {
        Self { num_partitions }
    }

    pub fn num_partitions(&self) -> u32 {
        self.num_partitions.get()
    }

    /// Owning partition of `key`.
    pub fn partition_of(&self, key: Key) -> PartitionId {
        PartitionId((key % self.num_partitions.get() as u64) as u32)
    }

    /// How many keys of `[0, keyspace_size)` route to `partition`.
    pub fn keys_in(&self, partition: PartitionId, keyspace_size: u64) -> u64 {
        let n = self.num_partitions.get() as u64;
        let p = partition.0 as u64;
        if p >= n {
            return 0;
        }
        keyspace_size / n + u64::from(p < keyspace_size % n)
    }

    /// The `index`-th key owned by `partition`.
    pub fn nth_key(&self, partition: PartitionId, index: u64) -> Key {
        partition.0 as u64 + index * self.num_partitions.get() as u64
    }

    /// All partition ids in order.
    pub fn partitions(&self) -> impl Iterator<Item = PartitionId> {
        (0..self.num_partitions.get()).map(PartitionId)
    }
}

/// Lock table and wait-lists of one partition.
///
/// A key is either absent (free) or held by exactly one transaction. Keys
/// that are held may carry a FIFO of transactions waiting for them.
#[derive(Debug)]
pub struct Partition {
    id: PartitionId,

    /// Routing used to reject foreign keys
    map: PartitionMap,

    /// key -> holder
    locks: HashMap<Key, TxnId>,

    /// key -> waiters, oldest first
    waiters: HashMap<Key, VecDeque<TxnId>>,
}

impl Partition {
    pub fn new(id: PartitionId, map: PartitionMap) -> Self {
        Self {
            id,
            map,
            locks: HashMap::new(),
            waiters: HashMap::new(),
        }
    }

    pub fn id(&self) -> PartitionId {
        self.id
    }

    fn check_owned(&self, key: Key) -> Result<(), SimError> {
        if self.map.partition_of(key) != self.id {
            return Err(SimError::ForeignKey { key, partition: self.id });
        }
        Ok(())
    }

    /// Current holder of `key`.
    pub fn holder(&self, key: Key) -> Option<TxnId> {
        self.locks.get(&key).copied()
    }

    pub fn is_locked(&self, key: Key) -> bool {
        self.locks.contains_key(&key)
    }

    /// Number of keys currently executing.
    pub fn locked_keys(&self) -> usize {
        self.locks.len()
    }

    /// Takes the lock on `key`. Fails if anyone holds it.
    pub fn acquire(&mut self, key: Key, txn: TxnId) -> Result<(), SimError> {
        self.check_owned(key)?;
        if let Some(holder) = self.holder(key) {
            return Err(SimError::KeyAlreadyLocked { key, holder, requester: txn });
        }
        self.locks.insert(key, txn);
        Ok(())
    }

    /// Releases `key`. Only its holder may do so.
    pub fn release(&mut self, key: Key, txn: TxnId) -> Result<(), SimError> {
        self.check_owned(key)?;
        match self.holder(key) {
            Some(holder) if holder == txn => {
                self.locks.remove(&key);
                Ok(())
            }
            _ => Err(SimError::NotHolder { key, requester: txn }),
        }
    }

    /// Appends `txn` to the wait-list of `key`.
    pub fn enqueue_waiter(&mut self, key: Key, txn: TxnId) -> Result<(), SimError> {
        self.check_owned(key)?;
        self.waiters.entry(key).or_default().push_back(txn);
        Ok(())
    }

    /// Removes and returns the longest-waiting transaction for `key`.
    pub fn pop_waiter(&mut self, key: Key) -> Option<TxnId> {
        let queue = self.waiters.get_mut(&key)?;
        let head = queue.pop_front();
        if queue.is_empty() {
            self.waiters.remove(&key);
        }
        head
    }

    /// Removes `txn` from the wait-list of `key`. Returns whether it was there.
    pub fn remove_waiter(&mut self, key: Key, txn: TxnId) -> bool {
        let Some(queue) = self.waiters.get_mut(&key) else {
            return false;
        };
        let Some(pos) = queue.iter().position(|t| *t == txn) else {
            return false;
        };
        queue.remove(pos);
        if queue.is_empty() {
            self.waiters.remove(&key);
        }
        true
    }

    /// Waiters for `key`, oldest first.
    pub fn waiters(&self, key: Key) -> impl Iterator<Item = TxnId> + '_ {
        self.waiters.get(&key).into_iter().flat_map(|q| q.iter().copied())
    }

    /// Total number of waiting transactions.
    pub fn waiting_count(&self) -> usize {
        self.waiters.values().map(VecDeque::len).sum()
    }
}
