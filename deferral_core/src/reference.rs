//! Serial reference execution.
//!
//! Replays arrivals one at a time, each finishing before the next starts.
//! What a get reads here is the value a correct execution must return, and
//! the final key values are the ones a correct execution must leave behind.

use crate::partition::Key;
use crate::store::KeyStore;
use crate::transaction::{OpKind, Transaction};
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct SerialReference {
    store: KeyStore,
    applied: u64,
}

impl SerialReference {
    pub fn new() -> Self {
        Self::default()
    }

    /// Executes `txn` instantly. Must be called in arrival order per key.
    ///
    /// Returns the value a get reads; writes return `None`.
    pub fn apply(&mut self, txn: &Transaction) -> Option<i64> {
        self.applied += 1;
        let snapshot = self.store.snapshot(txn.key);
        match txn.op {
            OpKind::Get => Some(snapshot.value),
            op => {
                self.store.apply(txn.key, op, snapshot);
                None
            }
        }
    }

    /// Number of transactions replayed.
    pub fn applied(&self) -> u64 {
        self.applied
    }

    pub fn value(&self, key: Key) -> i64 {
        self.store.value(key)
    }

    /// Final values of every key written.
    pub fn final_values(&self) -> BTreeMap<Key, i64> {
        self.store.written().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::PartitionId;
    use deferral_env::{SimDuration, SimTime, TxnId};

    fn txn(id: u64, key: Key, op: OpKind) -> Transaction {
        Transaction::new(TxnId(id), key, PartitionId(0), op, SimTime::ZERO, SimDuration::ZERO)
    }

    #[test]
    fn test_gets_see_every_earlier_write() {
        let mut reference = SerialReference::new();

        assert_eq!(reference.apply(&txn(0, 1, OpKind::Get)), Some(0));
        assert_eq!(reference.apply(&txn(1, 1, OpKind::Increase)), None);
        assert_eq!(reference.apply(&txn(2, 1, OpKind::Increase)), None);
        assert_eq!(reference.apply(&txn(3, 1, OpKind::Get)), Some(2));
        assert_eq!(reference.apply(&txn(4, 1, OpKind::Overwrite)), None);
        assert_eq!(reference.apply(&txn(5, 1, OpKind::Get)), Some(0));

        assert_eq!(reference.applied(), 6);
    }

    #[test]
    fn test_keys_are_independent() {
        let mut reference = SerialReference::new();
        reference.apply(&txn(0, 1, OpKind::Increase));
        reference.apply(&txn(1, 2, OpKind::Increase));
        reference.apply(&txn(2, 2, OpKind::Increase));
        reference.apply(&txn(3, 3, OpKind::Get));

        assert_eq!(reference.value(1), 1);
        assert_eq!(reference.value(2), 2);
        assert_eq!(reference.final_values(), BTreeMap::from([(1, 1), (2, 2)]));
    }
}
