//! The simulated transaction and its lifecycle.
//!
//! ```text
//!   pending ──► running ──► completed
//!      │
//!      └──────► dropped
//! ```
//!
//! Only the contention resolver calls the transition methods. Once a
//! transaction is terminal every transition fails.

use crate::error::SimError;
use crate::partition::{Key, PartitionId};
use deferral_env::{SimDuration, SimTime, TxnId};
use serde::{Deserialize, Serialize};

/// What a transaction does to its key when it finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    /// Reads the key, writes nothing
    Get,

    /// Writes 0
    Overwrite,

    /// Writes the value read at start plus one
    Increase,
}

impl OpKind {
    /// Whether the operation writes its key.
    pub fn is_write(&self) -> bool {
        !matches!(self, OpKind::Get)
    }

    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Get => "get",
            OpKind::Overwrite => "overwrite",
            OpKind::Increase => "increase",
        }
    }
}

/// Probability of each operation kind. `increase` takes the remainder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpMix {
    pub get_ratio: f64,
    pub overwrite_ratio: f64,
}

impl OpMix {
    pub fn new(get_ratio: f64, overwrite_ratio: f64) -> Self {
        Self { get_ratio, overwrite_ratio }
    }

    /// Whether the ratios form a probability distribution.
    pub fn is_valid(&self) -> bool {
        let in_unit = |r: f64| r.is_finite() && (0.0..=1.0).contains(&r);
        in_unit(self.get_ratio)
            && in_unit(self.overwrite_ratio)
            && self.get_ratio + self.overwrite_ratio <= 1.0 + 1e-9
    }

    /// Sets the get ratio and rescales `overwrite` into the remaining
    /// probability, keeping its proportion to `increase`.
    pub fn with_get_ratio(self, get_ratio: f64) -> Self {
        let rest = 1.0 - self.get_ratio;
        let share = if rest > 0.0 { self.overwrite_ratio / rest } else { 0.0 };
        Self {
            get_ratio,
            overwrite_ratio: (1.0 - get_ratio).max(0.0) * share,
        }
    }

    /// Sets the overwrite ratio and rescales `get` into the remaining
    /// probability, keeping its proportion to `increase`.
    pub fn with_overwrite_ratio(self, overwrite_ratio: f64) -> Self {
        let rest = 1.0 - self.overwrite_ratio;
        let share = if rest > 0.0 { self.get_ratio / rest } else { 0.0 };
        Self {
            get_ratio: (1.0 - overwrite_ratio).max(0.0) * share,
            overwrite_ratio,
        }
    }

    /// Maps a uniform draw in `[0, 1)` to an operation.
    pub fn pick(&self, u: f64) -> OpKind {
        if u < self.get_ratio {
            OpKind::Get
        } else if u < self.get_ratio + self.overwrite_ratio {
            OpKind::Overwrite
        } else {
            OpKind::Increase
        }
    }
}

impl Default for OpMix {
    fn default() -> Self {
        Self {
            get_ratio: 1.0 / 3.0,
            overwrite_ratio: 1.0 / 3.0,
        }
    }
}

/// Lifecycle state. `Completed` and `Dropped` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnStatus {
    Pending,
    Running,
    Completed,
    Dropped,
}

impl TxnStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxnStatus::Completed | TxnStatus::Dropped)
    }
}

impl std::fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TxnStatus::Pending => "pending",
            TxnStatus::Running => "running",
            TxnStatus::Completed => "completed",
            TxnStatus::Dropped => "dropped",
        };
        write!(f, "{}", name)
    }
}

/// Key state captured when a transaction starts executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Value read
    pub value: i64,

    /// Key version at read time
    pub version: u64,
}

/// One simulated unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxnId,
    pub key: Key,
    pub partition: PartitionId,
    pub op: OpKind,

    /// Time of creation
    pub arrival_time: SimTime,

    /// How long execution takes once admitted (drawn at generation)
    pub execution_time: SimDuration,

    /// Time execution began
    pub start_time: Option<SimTime>,

    /// Time execution ended; never set for dropped transactions
    pub completion_time: Option<SimTime>,

    /// Time the transaction reached `Dropped`
    pub dropped_time: Option<SimTime>,

    /// Total time spent blocked on a locked key
    pub accumulated_defer: SimDuration,

    pub status: TxnStatus,

    /// When the transaction joined its key's wait-list, while waiting
    pub wait_since: Option<SimTime>,

    /// Had to wait for its key at least once
    pub deferred: bool,

    /// Key state read at start
    pub snapshot: Option<Snapshot>,

    /// Started while another transaction was executing on the same key
    pub conflicted: bool,

    /// Its write landed on a key version newer than its snapshot
    pub lost_update: bool,

    /// Value observed: at completion for gets, the snapshot for writes
    pub read_value: Option<i64>,

    /// Value a get would read if every transaction ran serially in arrival order
    pub reference_read: Option<i64>,
}

impl Transaction {
    /// Creates a pending transaction.
    pub fn new(
        id: TxnId,
        key: Key,
        partition: PartitionId,
        op: OpKind,
        arrival_time: SimTime,
        execution_time: SimDuration,
    ) -> Self {
        Self {
            id,
            key,
            partition,
            op,
            arrival_time,
            execution_time,
            start_time: None,
            completion_time: None,
            dropped_time: None,
            accumulated_defer: SimDuration::ZERO,
            status: TxnStatus::Pending,
            wait_since: None,
            deferred: false,
            snapshot: None,
            conflicted: false,
            lost_update: false,
            read_value: None,
            reference_read: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `completion_time - arrival_time`, for completed transactions.
    pub fn latency(&self) -> Option<SimDuration> {
        self.completion_time.map(|done| done.saturating_since(self.arrival_time))
    }

    /// For completed gets, whether the read matches the serial reference.
    pub fn read_matches_reference(&self) -> Option<bool> {
        if self.op != OpKind::Get || self.status != TxnStatus::Completed {
            return None;
        }
        Some(self.read_value? == self.reference_read?)
    }

    /// Time at which the running execution ends.
    pub fn finishes_at(&self) -> Option<SimTime> {
        self.start_time.map(|start| start + self.execution_time)
    }

    fn transition(&mut self, expected: TxnStatus, to: TxnStatus) -> Result<(), SimError> {
        if self.status != expected {
            return Err(SimError::IllegalTransition { id: self.id, from: self.status, to });
        }
        self.status = to;
        Ok(())
    }

    /// Folds the current wait into `accumulated_defer`.
    fn settle_wait(&mut self, now: SimTime) {
        if let Some(since) = self.wait_since.take() {
            self.accumulated_defer += now.saturating_since(since);
        }
    }

    /// Joins a wait-list at `now`.
    pub fn begin_wait(&mut self, now: SimTime) -> Result<(), SimError> {
        if self.status != TxnStatus::Pending || self.wait_since.is_some() {
            return Err(SimError::IllegalTransition {
                id: self.id,
                from: self.status,
                to: TxnStatus::Pending,
            });
        }
        self.wait_since = Some(now);
        self.deferred = true;
        Ok(())
    }

    /// `pending -> running`.
    pub fn start(&mut self, now: SimTime, snapshot: Snapshot) -> Result<(), SimError> {
        self.transition(TxnStatus::Pending, TxnStatus::Running)?;
        self.settle_wait(now);
        self.start_time = Some(now);
        self.snapshot = Some(snapshot);
        Ok(())
    }

    /// `running -> completed`.
    pub fn complete(&mut self, now: SimTime) -> Result<(), SimError> {
        self.transition(TxnStatus::Running, TxnStatus::Completed)?;
        self.completion_time = Some(now);
        Ok(())
    }

    /// `pending -> dropped`.
    pub fn abandon(&mut self, now: SimTime) -> Result<(), SimError> {
        self.transition(TxnStatus::Pending, TxnStatus::Dropped)?;
        self.settle_wait(now);
        self.dropped_time = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn() -> Transaction {
        Transaction::new(
            TxnId(1),
            4,
            PartitionId(0),
            OpKind::Increase,
            SimTime::from_nanos(100),
            SimDuration::from_nanos(50),
        )
    }

    fn snap() -> Snapshot {
        Snapshot { value: 0, version: 0 }
    }

    #[test]
    fn test_start_and_complete() {
        let mut t = txn();
        t.start(SimTime::from_nanos(100), snap()).unwrap();
        assert_eq!(t.status, TxnStatus::Running);
        assert_eq!(t.finishes_at(), Some(SimTime::from_nanos(150)));

        t.complete(SimTime::from_nanos(150)).unwrap();
        assert!(t.is_terminal());
        assert_eq!(t.latency(), Some(SimDuration::from_nanos(50)));
        assert_eq!(t.accumulated_defer, SimDuration::ZERO);
    }

    #[test]
    fn test_wait_accumulates_on_start() {
        let mut t = txn();
        t.begin_wait(SimTime::from_nanos(100)).unwrap();
        t.start(SimTime::from_nanos(130), snap()).unwrap();

        assert_eq!(t.accumulated_defer, SimDuration::from_nanos(30));
        assert_eq!(t.wait_since, None);
        assert!(t.deferred);
    }

    #[test]
    fn test_abandon_settles_wait() {
        let mut t = txn();
        t.begin_wait(SimTime::from_nanos(100)).unwrap();
        t.abandon(SimTime::from_nanos(175)).unwrap();

        assert_eq!(t.status, TxnStatus::Dropped);
        assert_eq!(t.accumulated_defer, SimDuration::from_nanos(75));
        assert_eq!(t.completion_time, None);
        assert_eq!(t.latency(), None);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut t = txn();
        t.abandon(SimTime::from_nanos(100)).unwrap();

        assert!(t.start(SimTime::from_nanos(100), snap()).is_err());
        assert!(t.complete(SimTime::from_nanos(100)).is_err());
        assert!(t.abandon(SimTime::from_nanos(100)).is_err());
    }

    #[test]
    fn test_cannot_complete_pending() {
        let mut t = txn();
        let err = t.complete(SimTime::from_nanos(100)).unwrap_err();
        assert!(matches!(err, SimError::IllegalTransition { from: TxnStatus::Pending, .. }));
    }

    #[test]
    fn test_op_mix_pick() {
        let mix = OpMix::new(0.25, 0.25);
        assert!(mix.is_valid());
        assert_eq!(mix.pick(0.1), OpKind::Get);
        assert_eq!(mix.pick(0.3), OpKind::Overwrite);
        assert_eq!(mix.pick(0.9), OpKind::Increase);

        assert!(!OpMix::new(0.8, 0.4).is_valid());
        assert!(!OpMix::new(-0.1, 0.4).is_valid());
        assert!(OpMix::default().is_valid());
    }

    #[test]
    fn test_op_mix_rescales_unset_ratio() {
        let mix = OpMix::default().with_get_ratio(0.8);
        assert!(mix.is_valid());
        assert!((mix.overwrite_ratio - 0.1).abs() < 1e-12);

        let mix = OpMix::default().with_overwrite_ratio(0.6);
        assert!(mix.is_valid());
        assert!((mix.get_ratio - 0.2).abs() < 1e-12);

        // Nothing left to share
        let mix = OpMix::new(1.0, 0.0).with_get_ratio(0.5);
        assert_eq!(mix.overwrite_ratio, 0.0);
        assert!(mix.is_valid());
    }

    #[test]
    fn test_read_matches_reference_only_for_completed_gets() {
        let mut get = Transaction::new(
            TxnId(2),
            4,
            PartitionId(0),
            OpKind::Get,
            SimTime::from_nanos(0),
            SimDuration::from_nanos(10),
        );
        get.reference_read = Some(3);
        assert_eq!(get.read_matches_reference(), None);

        get.start(SimTime::from_nanos(0), snap()).unwrap();
        get.complete(SimTime::from_nanos(10)).unwrap();
        get.read_value = Some(3);
        assert_eq!(get.read_matches_reference(), Some(true));
        get.read_value = Some(4);
        assert_eq!(get.read_matches_reference(), Some(false));

        let mut write = txn();
        write.start(SimTime::from_nanos(100), snap()).unwrap();
        write.complete(SimTime::from_nanos(150)).unwrap();
        write.read_value = Some(0);
        assert_eq!(write.read_matches_reference(), None);
    }
}
