//! Deferral Simulator Environment Layer
//!
//! This crate holds everything the simulation needs from "the world":
//! - **Time**: an integer virtual clock (`SimTime`) that only moves when an
//!   event is dispatched
//! - **Ordering**: the event queue, time-then-FIFO
//! - **Randomness**: independent ChaCha8 streams derived from one 64-bit seed
//!
//! Nothing here knows about locks, partitions or statistics. Given the same
//! seed and the same sequence of `schedule` calls, the queue dispatches the
//! same events in the same order on every platform.
//!
//! # Example
//!
//! ```ignore
//! use deferral_env::{EventKind, EventQueue, SimTime, TxnId};
//!
//! let mut queue = EventQueue::new();
//! queue.schedule(SimTime::from_nanos(10), EventKind::Arrival, TxnId(0))?;
//!
//! while let Some(event) = queue.next() {
//!     handle(event, &mut queue)?;
//! }
//! ```

mod context;
mod error;
mod queue;
mod time;
mod types;

pub use context::{RngStream, SimContext};
pub use error::EnvError;
pub use queue::{Event, EventKey, EventKind, EventQueue};
pub use time::{SimDuration, SimTime};
pub use types::TxnId;
