//! Error types for the simulation environment.

use crate::time::SimTime;
use thiserror::Error;

/// Errors raised by the environment layer.
///
/// None of these are recoverable: they signal a defect in whoever drives the
/// clock, and the run must abort rather than keep going with a broken
/// timeline.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EnvError {
    /// An event was scheduled before the current dispatch time
    #[error("Event scheduled in the past: at {at}, now {now}")]
    ScheduledInPast { at: SimTime, now: SimTime },
    
    /// A seconds value could not be mapped onto the simulated clock
    #[error("Invalid time value: {0}")]
    InvalidTime(String),
}

impl EnvError {
    /// Creates an invalid-time error.
    pub fn invalid_time(msg: impl Into<String>) -> Self {
        Self::InvalidTime(msg.into())
    }
}
