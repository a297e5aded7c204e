//! Versioned integer store backing transaction reads and writes.

use crate::partition::Key;
use crate::transaction::{OpKind, Snapshot};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Cell {
    value: i64,
    version: u64,
}

/// Outcome of applying a finished transaction's write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Operation does not write
    ReadOnly,

    /// Write applied on top of the version it read
    Applied,

    /// Write applied, but someone else wrote the key since the snapshot
    Stale,
}

/// Every key starts at value 0, version 0. Each write bumps the version.
#[derive(Debug, Default)]
pub struct KeyStore {
    cells: BTreeMap<Key, Cell>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `key` for a transaction that is starting.
    pub fn snapshot(&self, key: Key) -> Snapshot {
        let cell = self.cells.get(&key).copied().unwrap_or_default();
        Snapshot { value: cell.value, version: cell.version }
    }

    /// Applies `op` for a transaction that read `snapshot`.
    pub fn apply(&mut self, key: Key, op: OpKind, snapshot: Snapshot) -> WriteOutcome {
        let value = match op {
            OpKind::Get => return WriteOutcome::ReadOnly,
            OpKind::Overwrite => 0,
            OpKind::Increase => snapshot.value + 1,
        };

        let cell = self.cells.entry(key).or_default();
        let stale = cell.version != snapshot.version;
        cell.value = value;
        cell.version += 1;

        if stale {
            WriteOutcome::Stale
        } else {
            WriteOutcome::Applied
        }
    }

    pub fn value(&self, key: Key) -> i64 {
        self.cells.get(&key).map(|c| c.value).unwrap_or(0)
    }

    /// Keys that were written at least once, with their final values.
    pub fn written(&self) -> impl Iterator<Item = (Key, i64)> + '_ {
        self.cells.iter().map(|(k, c)| (*k, c.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_increments() {
        let mut store = KeyStore::new();
        for _ in 0..3 {
            let snap = store.snapshot(1);
            assert_eq!(store.apply(1, OpKind::Increase, snap), WriteOutcome::Applied);
        }
        assert_eq!(store.value(1), 3);
    }

    #[test]
    fn test_overlapping_increments_lose_an_update() {
        let mut store = KeyStore::new();
        let a = store.snapshot(1);
        let b = store.snapshot(1);

        assert_eq!(store.apply(1, OpKind::Increase, a), WriteOutcome::Applied);
        assert_eq!(store.apply(1, OpKind::Increase, b), WriteOutcome::Stale);
        assert_eq!(store.value(1), 1);
    }

    #[test]
    fn test_reads_do_not_write() {
        let mut store = KeyStore::new();
        let snap = store.snapshot(2);

        assert_eq!(store.apply(2, OpKind::Get, snap), WriteOutcome::ReadOnly);
        assert_eq!(store.written().count(), 0);

        store.apply(2, OpKind::Overwrite, snap);
        assert_eq!(store.written().collect::<Vec<_>>(), vec![(2, 0)]);
    }
}
