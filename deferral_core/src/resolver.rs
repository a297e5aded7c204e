//! Contention resolver: admits, defers and drops transactions.
//!
//! The resolver owns every transaction of a run and is the only thing that
//! changes their state. It reacts to the three event kinds:
//!
//! - **arrival**: take the key if it is free, otherwise join the key's
//!   wait-list (or drop on the spot when the defer cap is zero)
//! - **completion**: release the key and hand it to the oldest waiter
//! - **retry**: the defer deadline of a waiting transaction; if it is still
//!   waiting it is dropped with exactly `max_defer` accumulated
//!
//! Waiting is data, not a timer loop: a deferred transaction is woken by the
//! completion of the holder, never by polling.

use crate::error::SimError;
use crate::partition::{Key, Partition, PartitionMap};
use crate::store::{KeyStore, WriteOutcome};
use crate::transaction::{OpKind, Transaction, TxnStatus};
use deferral_env::{Event, EventKind, EventQueue, SimDuration, SimTime, TxnId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace};

/// How arrivals are admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPolicy {
    /// Per-key locking with FIFO deferral and an optional defer cap
    #[default]
    Deferred,

    /// Start everything at arrival, ignoring locks (baseline)
    Eager,
}

impl ExecutionPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionPolicy::Deferred => "deferred",
            ExecutionPolicy::Eager => "eager",
        }
    }
}

impl std::fmt::Display for ExecutionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ExecutionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deferred" | "defer" => Ok(ExecutionPolicy::Deferred),
            "eager" => Ok(ExecutionPolicy::Eager),
            _ => Err(format!("Unknown policy: {} (expected deferred or eager)", s)),
        }
    }
}

/// Per-key lock state, wait-lists and the transaction table of one run.
pub struct ContentionResolver {
    map: PartitionMap,
    policy: ExecutionPolicy,

    /// `None` = wait forever
    max_defer: Option<SimDuration>,

    /// Indexed by partition id
    partitions: Vec<Partition>,

    /// Every registered transaction
    txns: BTreeMap<TxnId, Transaction>,

    store: KeyStore,

    /// Eager policy: transactions currently executing per key
    executing: HashMap<Key, u32>,

    /// Registered transactions that are not yet terminal
    live: usize,

    retries_scheduled: u64,
}

fn lookup(txns: &mut BTreeMap<TxnId, Transaction>, id: TxnId) -> Result<&mut Transaction, SimError> {
    txns.get_mut(&id).ok_or(SimError::UnknownTransaction(id))
}

fn check_cap(max_defer: Option<SimDuration>, txn: &Transaction) -> Result<(), SimError> {
    match max_defer {
        Some(cap) if txn.accumulated_defer > cap => Err(SimError::DeferCapExceeded {
            id: txn.id,
            deferred: txn.accumulated_defer,
            cap,
        }),
        _ => Ok(()),
    }
}

impl ContentionResolver {
    pub fn new(map: PartitionMap, policy: ExecutionPolicy, max_defer: Option<SimDuration>) -> Self {
        let partitions = map.partitions().map(|id| Partition::new(id, map)).collect();
        Self {
            map,
            policy,
            max_defer,
            partitions,
            txns: BTreeMap::new(),
            store: KeyStore::new(),
            executing: HashMap::new(),
            live: 0,
            retries_scheduled: 0,
        }
    }

    /// Adds a freshly generated transaction. Its arrival event is scheduled by the caller.
    pub fn register(&mut self, txn: Transaction) -> Result<(), SimError> {
        let owner = self.map.partition_of(txn.key);
        if txn.partition != owner {
            return Err(SimError::ForeignKey { key: txn.key, partition: txn.partition });
        }
        if txn.status != TxnStatus::Pending {
            return Err(SimError::IllegalTransition { id: txn.id, from: txn.status, to: TxnStatus::Pending });
        }
        if self.txns.contains_key(&txn.id) {
            return Err(SimError::DuplicateTransaction(txn.id));
        }
        self.txns.insert(txn.id, txn);
        self.live += 1;
        Ok(())
    }

    /// Dispatches one event. Returns the transaction that became terminal, if any.
    ///
    /// An event terminates at most one transaction: a completion finishes its
    /// own transaction and may admit (not finish) the next waiter.
    pub fn handle(&mut self, event: Event, queue: &mut EventQueue) -> Result<Option<TxnId>, SimError> {
        trace!("{} {} at {}", event.kind, event.txn, event.time);
        match event.kind {
            EventKind::Arrival => self.on_arrival(event.txn, event.time, queue),
            EventKind::Retry => self.on_retry(event.txn, event.time),
            EventKind::Completion => self.on_completion(event.txn, event.time, queue),
        }
    }

    fn on_arrival(&mut self, id: TxnId, now: SimTime, queue: &mut EventQueue) -> Result<Option<TxnId>, SimError> {
        let (key, partition) = {
            let txn = lookup(&mut self.txns, id)?;
            (txn.key, txn.partition)
        };

        if self.policy == ExecutionPolicy::Eager {
            self.admit(id, now, queue)?;
            return Ok(None);
        }

        let lock_table = &mut self.partitions[partition.index()];
        let Some(holder) = lock_table.holder(key) else {
            self.admit(id, now, queue)?;
            return Ok(None);
        };

        let txn = lookup(&mut self.txns, id)?;
        match self.max_defer {
            Some(cap) if cap.is_zero() => {
                txn.abandon(now)?;
                self.live -= 1;
                debug!("{}: dropping {} on arrival, key {} held by {}", now, id, key, holder);
                Ok(Some(id))
            }
            cap => {
                txn.begin_wait(now)?;
                lock_table.enqueue_waiter(key, id)?;
                if let Some(cap) = cap {
                    queue.schedule(now + cap, EventKind::Retry, id)?;
                    self.retries_scheduled += 1;
                }
                debug!("{}: deferring {} because key {} is held by {}", now, id, key, holder);
                Ok(None)
            }
        }
    }

    fn on_retry(&mut self, id: TxnId, now: SimTime) -> Result<Option<TxnId>, SimError> {
        let txn = lookup(&mut self.txns, id)?;
        if txn.status != TxnStatus::Pending || txn.wait_since.is_none() {
            // Admitted before its deadline
            trace!("{}: stale retry for {} ({})", now, id, txn.status);
            return Ok(None);
        }

        let (key, partition) = (txn.key, txn.partition);
        if !self.partitions[partition.index()].remove_waiter(key, id) {
            return Err(SimError::IllegalTransition { id, from: txn.status, to: TxnStatus::Dropped });
        }

        txn.abandon(now)?;
        check_cap(self.max_defer, txn)?;
        self.live -= 1;

        debug!("{}: dropping {} after {} deferred on key {}", now, id, txn.accumulated_defer, key);
        Ok(Some(id))
    }

    fn on_completion(&mut self, id: TxnId, now: SimTime, queue: &mut EventQueue) -> Result<Option<TxnId>, SimError> {
        let txn = lookup(&mut self.txns, id)?;
        txn.complete(now)?;

        if let Some(snapshot) = txn.snapshot {
            if self.store.apply(txn.key, txn.op, snapshot) == WriteOutcome::Stale {
                txn.lost_update = true;
            }
            txn.read_value = Some(match txn.op {
                OpKind::Get => self.store.value(txn.key),
                _ => snapshot.value,
            });
        }
        let (key, partition) = (txn.key, txn.partition);
        self.live -= 1;

        match self.policy {
            ExecutionPolicy::Deferred => {
                let lock_table = &mut self.partitions[partition.index()];
                lock_table.release(key, id)?;
                if let Some(next) = lock_table.pop_waiter(key) {
                    debug!("{}: {} released key {}, waking {}", now, id, key, next);
                    self.admit(next, now, queue)?;
                }
            }
            ExecutionPolicy::Eager => {
                if let Some(count) = self.executing.get_mut(&key) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        self.executing.remove(&key);
                    }
                }
            }
        }

        Ok(Some(id))
    }

    /// Starts `id` at `now` and schedules its completion.
    fn admit(&mut self, id: TxnId, now: SimTime, queue: &mut EventQueue) -> Result<(), SimError> {
        let txn = lookup(&mut self.txns, id)?;
        let snapshot = self.store.snapshot(txn.key);

        match self.policy {
            ExecutionPolicy::Deferred => {
                self.partitions[txn.partition.index()].acquire(txn.key, id)?;
            }
            ExecutionPolicy::Eager => {
                let running = self.executing.entry(txn.key).or_insert(0);
                if *running > 0 {
                    txn.conflicted = true;
                }
                *running += 1;
            }
        }

        txn.start(now, snapshot)?;
        check_cap(self.max_defer, txn)?;

        let done = now + txn.execution_time;
        queue.schedule(done, EventKind::Completion, id)?;
        trace!("{}: {} started on key {}, done at {}", now, id, txn.key, done);
        Ok(())
    }

    pub fn transaction(&self, id: TxnId) -> Option<&Transaction> {
        self.txns.get(&id)
    }

    /// All transactions in id order.
    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.txns.values()
    }

    /// Removes a terminal transaction once it has been accounted for.
    pub fn retire(&mut self, id: TxnId) -> Result<Transaction, SimError> {
        let txn = self.txns.get(&id).ok_or(SimError::UnknownTransaction(id))?;
        if !txn.is_terminal() {
            return Err(SimError::NotTerminal { id, status: txn.status });
        }
        self.txns.remove(&id).ok_or(SimError::UnknownTransaction(id))
    }

    /// Transactions still held (all registered ones unless retired).
    pub fn retained(&self) -> usize {
        self.txns.len()
    }

    pub fn into_transactions(self) -> Vec<Transaction> {
        self.txns.into_values().collect()
    }

    /// Transactions still pending or running.
    pub fn live(&self) -> usize {
        self.live
    }

    pub fn retries_scheduled(&self) -> u64 {
        self.retries_scheduled
    }

    pub fn store(&self) -> &KeyStore {
        &self.store
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn policy(&self) -> ExecutionPolicy {
        self.policy
    }

    pub fn max_defer(&self) -> Option<SimDuration> {
        self.max_defer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::PartitionId;
    use crate::transaction::OpKind;
    use std::num::NonZeroU32;

    fn secs(s: f64) -> SimDuration {
        SimDuration::from_secs_f64(s).unwrap()
    }

    fn at(s: f64) -> SimTime {
        SimTime::from_secs_f64(s).unwrap()
    }

    struct Harness {
        resolver: ContentionResolver,
        queue: EventQueue,
        finished: Vec<TxnId>,
    }

    impl Harness {
        fn new(partitions: u32, policy: ExecutionPolicy, max_defer: Option<f64>) -> Self {
            let map = PartitionMap::new(NonZeroU32::new(partitions).unwrap());
            Self {
                resolver: ContentionResolver::new(map, policy, max_defer.map(secs)),
                queue: EventQueue::new(),
                finished: Vec::new(),
            }
        }

        fn submit(&mut self, id: u64, key: Key, arrival: f64, exec: f64) {
            let partition = PartitionId((key % self.resolver.map.num_partitions() as u64) as u32);
            let txn = Transaction::new(TxnId(id), key, partition, OpKind::Increase, at(arrival), secs(exec));
            self.resolver.register(txn).unwrap();
            self.queue.schedule(at(arrival), EventKind::Arrival, TxnId(id)).unwrap();
        }

        fn run(&mut self) {
            while let Some(event) = self.queue.next() {
                if let Some(done) = self.resolver.handle(event, &mut self.queue).unwrap() {
                    self.finished.push(done);
                }
            }
        }

        fn txn(&self, id: u64) -> &Transaction {
            self.resolver.transaction(TxnId(id)).unwrap()
        }
    }

    #[test]
    fn test_free_key_admits_immediately() {
        let mut h = Harness::new(2, ExecutionPolicy::Deferred, None);
        h.submit(0, 0, 1.0, 2.0);
        h.submit(1, 1, 1.0, 2.0);
        h.run();

        for id in 0..2 {
            let t = h.txn(id);
            assert_eq!(t.status, TxnStatus::Completed);
            assert_eq!(t.start_time, Some(at(1.0)));
            assert_eq!(t.completion_time, Some(at(3.0)));
            assert_eq!(t.accumulated_defer, SimDuration::ZERO);
        }
        assert_eq!(h.resolver.live(), 0);
    }

    #[test]
    fn test_contended_key_waits_for_holder() {
        let mut h = Harness::new(1, ExecutionPolicy::Deferred, None);
        h.submit(0, 0, 0.0, 1.0);
        h.submit(1, 0, 0.25, 1.0);
        h.run();

        let second = h.txn(1);
        assert_eq!(second.start_time, Some(at(1.0)));
        assert_eq!(second.completion_time, Some(at(2.0)));
        assert_eq!(second.accumulated_defer, secs(0.75));
        assert_eq!(h.finished, vec![TxnId(0), TxnId(1)]);
    }

    #[test]
    fn test_wake_order_is_fifo() {
        let mut h = Harness::new(1, ExecutionPolicy::Deferred, None);
        h.submit(0, 0, 0.0, 1.0);
        h.submit(1, 0, 0.1, 1.0);
        h.submit(2, 0, 0.2, 1.0);
        h.submit(3, 0, 0.3, 1.0);
        h.run();

        let starts: Vec<SimTime> = (0..4).map(|id| h.txn(id).start_time.unwrap()).collect();
        assert_eq!(starts, vec![at(0.0), at(1.0), at(2.0), at(3.0)]);
    }

    #[test]
    fn test_zero_cap_drops_on_arrival() {
        let mut h = Harness::new(1, ExecutionPolicy::Deferred, Some(0.0));
        h.submit(0, 0, 0.0, 1.0);
        h.submit(1, 0, 0.5, 1.0);
        h.run();

        let dropped = h.txn(1);
        assert_eq!(dropped.status, TxnStatus::Dropped);
        assert_eq!(dropped.dropped_time, Some(at(0.5)));
        assert_eq!(dropped.accumulated_defer, SimDuration::ZERO);
        assert_eq!(h.resolver.retries_scheduled(), 0);
    }

    #[test]
    fn test_cap_drops_exactly_at_deadline() {
        let mut h = Harness::new(1, ExecutionPolicy::Deferred, Some(0.5));
        h.submit(0, 0, 0.0, 2.0);
        h.submit(1, 0, 0.25, 1.0);
        h.submit(2, 0, 1.9, 1.0);
        h.run();

        let capped = h.txn(1);
        assert_eq!(capped.status, TxnStatus::Dropped);
        assert_eq!(capped.dropped_time, Some(at(0.75)));
        assert_eq!(capped.accumulated_defer, secs(0.5));

        // Later waiter is woken once the holder finishes, within its cap
        let woken = h.txn(2);
        assert_eq!(woken.status, TxnStatus::Completed);
        assert_eq!(woken.start_time, Some(at(2.0)));
        assert_eq!(woken.accumulated_defer, secs(0.1));
    }

    #[test]
    fn test_retry_after_admission_is_stale() {
        let mut h = Harness::new(1, ExecutionPolicy::Deferred, Some(5.0));
        h.submit(0, 0, 0.0, 1.0);
        h.submit(1, 0, 0.5, 1.0);
        h.run();

        assert_eq!(h.resolver.retries_scheduled(), 1);
        assert_eq!(h.txn(1).status, TxnStatus::Completed);
        assert_eq!(h.finished.len(), 2);
    }

    #[test]
    fn test_admission_at_exact_cap_is_allowed() {
        // Completion at 1.0 is scheduled before the retry at 1.0, so it wins the tie
        let mut h = Harness::new(1, ExecutionPolicy::Deferred, Some(0.5));
        h.submit(0, 0, 0.0, 1.0);
        h.submit(1, 0, 0.5, 1.0);
        h.run();

        let t = h.txn(1);
        assert_eq!(t.status, TxnStatus::Completed);
        assert_eq!(t.accumulated_defer, secs(0.5));
    }

    #[test]
    fn test_eager_policy_never_defers() {
        let mut h = Harness::new(1, ExecutionPolicy::Eager, Some(0.0));
        h.submit(0, 0, 0.0, 1.0);
        h.submit(1, 0, 0.5, 1.0);
        h.submit(2, 0, 3.0, 1.0);
        h.run();

        let second = h.txn(1);
        assert_eq!(second.start_time, Some(at(0.5)));
        assert!(second.conflicted);
        // Both read version 0, the second write lands on version 1
        assert!(second.lost_update);

        assert!(!h.txn(2).conflicted);
        assert!(!h.txn(2).lost_update);
        assert_eq!(h.resolver.store().value(0), 2);
    }

    #[test]
    fn test_deferred_policy_has_no_lost_updates() {
        let mut h = Harness::new(1, ExecutionPolicy::Deferred, None);
        for id in 0..5 {
            h.submit(id, 0, id as f64 * 0.1, 1.0);
        }
        h.run();

        assert!(h.resolver.transactions().all(|t| !t.lost_update && !t.conflicted));
        assert_eq!(h.resolver.store().value(0), 5);
    }

    #[test]
    fn test_gets_read_at_completion() {
        let mut h = Harness::new(1, ExecutionPolicy::Eager, None);
        h.submit(0, 0, 0.0, 2.0);
        let get = Transaction::new(TxnId(1), 0, PartitionId(0), OpKind::Get, at(0.5), secs(2.0));
        h.resolver.register(get).unwrap();
        h.queue.schedule(at(0.5), EventKind::Arrival, TxnId(1)).unwrap();
        h.run();

        // Started before the increase landed, finished after it
        assert_eq!(h.txn(0).read_value, Some(0));
        assert_eq!(h.txn(1).read_value, Some(1));
    }

    #[test]
    fn test_retire_only_terminal() {
        let mut h = Harness::new(1, ExecutionPolicy::Deferred, None);
        h.submit(0, 0, 0.0, 1.0);
        assert!(matches!(h.resolver.retire(TxnId(0)), Err(SimError::NotTerminal { .. })));

        h.run();
        assert_eq!(h.resolver.retire(TxnId(0)).unwrap().status, TxnStatus::Completed);
        assert_eq!(h.resolver.retained(), 0);
        assert_eq!(h.resolver.retire(TxnId(0)).unwrap_err(), SimError::UnknownTransaction(TxnId(0)));
    }

    #[test]
    fn test_register_rejects_duplicates_and_misrouting() {
        let map = PartitionMap::new(NonZeroU32::new(2).unwrap());
        let mut resolver = ContentionResolver::new(map, ExecutionPolicy::Deferred, None);
        let txn = Transaction::new(TxnId(0), 3, PartitionId(1), OpKind::Get, SimTime::ZERO, SimDuration::ZERO);

        resolver.register(txn.clone()).unwrap();
        assert_eq!(resolver.register(txn).unwrap_err(), SimError::DuplicateTransaction(TxnId(0)));

        let wrong = Transaction::new(TxnId(1), 3, PartitionId(0), OpKind::Get, SimTime::ZERO, SimDuration::ZERO);
        assert!(matches!(resolver.register(wrong), Err(SimError::ForeignKey { .. })));
    }

    #[test]
    fn test_unknown_transaction_event() {
        let map = PartitionMap::new(NonZeroU32::new(1).unwrap());
        let mut resolver = ContentionResolver::new(map, ExecutionPolicy::Deferred, None);
        let mut queue = EventQueue::new();
        let event = Event { time: SimTime::ZERO, kind: EventKind::Arrival, txn: TxnId(9) };

        assert_eq!(resolver.handle(event, &mut queue).unwrap_err(), SimError::UnknownTransaction(TxnId(9)));
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("eager".parse::<ExecutionPolicy>().unwrap(), ExecutionPolicy::Eager);
        assert_eq!("Deferred".parse::<ExecutionPolicy>().unwrap(), ExecutionPolicy::Deferred);
        assert!("lazy".parse::<ExecutionPolicy>().is_err());
    }
}
