//! The clock and its event queue.
//!
//! Events live in a `BTreeMap` keyed by `(time, sequence)`. The sequence is a
//! per-queue insertion counter, so two events with the same timestamp come
//! out in the order they went in. Dispatching an event moves `now()` forward;
//! nothing else does.

use crate::error::EnvError;
use crate::time::SimTime;
use crate::types::TxnId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::trace;

/// What happened to a transaction at an instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Transaction enters the system
    Arrival,

    /// A deferred transaction is re-evaluated at its defer deadline
    Retry,

    /// A running transaction finishes executing
    Completion,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventKind::Arrival => "arrival",
            EventKind::Retry => "retry",
            EventKind::Completion => "completion",
        };
        write!(f, "{}", name)
    }
}

/// A scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub time: SimTime,
    pub kind: EventKind,
    pub txn: TxnId,
}

/// Total order of the queue: time first, then insertion sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey {
    pub time: SimTime,
    pub seq: u64,
}

/// Time-ordered, FIFO-on-ties event queue that doubles as the simulation clock.
#[derive(Debug, Default)]
pub struct EventQueue {
    /// Pending events
    events: BTreeMap<EventKey, Event>,

    /// Next insertion sequence number
    next_seq: u64,

    /// Timestamp of the most recently dispatched event
    now: SimTime,

    /// Number of events dispatched so far
    dispatched: u64,
}

impl EventQueue {
    /// Creates an empty queue at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules an event.
    ///
    /// Scheduling before `now()` is a defect in the caller and fails with
    /// [`EnvError::ScheduledInPast`]; scheduling exactly at `now()` is fine.
    pub fn schedule(&mut self, time: SimTime, kind: EventKind, txn: TxnId) -> Result<EventKey, EnvError> {
        if time < self.now {
            return Err(EnvError::ScheduledInPast { at: time, now: self.now });
        }

        let key = EventKey { time, seq: self.next_seq };
        self.next_seq += 1;
        self.events.insert(key, Event { time, kind, txn });

        trace!("scheduled {} for {} at {}", kind, txn, time);
        Ok(key)
    }

    /// Returns the time of the most recently dispatched event (zero before the first).
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Returns the timestamp of the earliest pending event.
    pub fn peek_time(&self) -> Option<SimTime> {
        self.events.keys().next().map(|key| key.time)
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events dispatched so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Number of events ever scheduled.
    pub fn scheduled_total(&self) -> u64 {
        self.next_seq
    }
}

impl Iterator for EventQueue {
    type Item = Event;

    /// Removes the earliest event and advances the clock to its timestamp.
    fn next(&mut self) -> Option<Event> {
        let (_, event) = self.events.pop_first()?;
        self.now = event.time;
        self.dispatched += 1;
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn at(nanos: u64) -> SimTime {
        SimTime::from_nanos(nanos)
    }

    #[test]
    fn test_empty_queue() {
        let mut queue = EventQueue::new();

        assert!(queue.is_empty());
        assert_eq!(queue.now(), SimTime::ZERO);
        assert_eq!(queue.next(), None);
        assert_eq!(queue.now(), SimTime::ZERO);
    }

    #[test]
    fn test_time_order() {
        let mut queue = EventQueue::new();
        queue.schedule(at(30), EventKind::Completion, TxnId(1)).unwrap();
        queue.schedule(at(10), EventKind::Arrival, TxnId(2)).unwrap();
        queue.schedule(at(20), EventKind::Retry, TxnId(3)).unwrap();

        assert_eq!(queue.peek_time(), Some(at(10)));

        let order: Vec<TxnId> = queue.by_ref().map(|e| e.txn).collect();
        assert_eq!(order, vec![TxnId(2), TxnId(3), TxnId(1)]);
        assert_eq!(queue.now(), at(30));
        assert_eq!(queue.dispatched(), 3);
    }

    #[test]
    fn test_ties_are_fifo() {
        let mut queue = EventQueue::new();
        for id in 0..5 {
            queue.schedule(at(7), EventKind::Arrival, TxnId(id)).unwrap();
        }

        let order: Vec<u64> = queue.map(|e| e.txn.0).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_now_tracks_dispatch() {
        let mut queue = EventQueue::new();
        queue.schedule(at(5), EventKind::Arrival, TxnId(0)).unwrap();

        // Scheduling does not move the clock
        assert_eq!(queue.now(), SimTime::ZERO);

        queue.next();
        assert_eq!(queue.now(), at(5));
    }

    #[test]
    fn test_rejects_past_schedule() {
        let mut queue = EventQueue::new();
        queue.schedule(at(100), EventKind::Arrival, TxnId(0)).unwrap();
        queue.next();

        let err = queue.schedule(at(99), EventKind::Completion, TxnId(0)).unwrap_err();
        assert_eq!(err, EnvError::ScheduledInPast { at: at(99), now: at(100) });

        // Same instant is allowed
        assert!(queue.schedule(at(100), EventKind::Completion, TxnId(0)).is_ok());
    }

    proptest! {
        #[test]
        fn prop_dispatch_is_sorted_and_stable(times in prop::collection::vec(0u64..50, 1..200)) {
            let mut queue = EventQueue::new();
            for (idx, t) in times.iter().enumerate() {
                queue.schedule(at(*t), EventKind::Arrival, TxnId(idx as u64)).unwrap();
            }

            let dispatched: Vec<Event> = queue.by_ref().collect();
            prop_assert_eq!(dispatched.len(), times.len());

            for pair in dispatched.windows(2) {
                prop_assert!(pair[0].time <= pair[1].time);
                if pair[0].time == pair[1].time {
                    prop_assert!(pair[0].txn < pair[1].txn);
                }
            }
        }
    }
}
