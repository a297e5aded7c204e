//! Virtual time for the discrete-event loop.
//!
//! Time is kept as integer nanoseconds since the start of the run. Seconds
//! only appear at the edges (CLI input, JSON output, distribution draws), so
//! ordering and cap comparisons inside the loop are exact.

use crate::error::EnvError;
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// A point on the simulated timeline (nanoseconds since run start).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SimTime(u64);

/// A span of simulated time (nanoseconds).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SimDuration(u64);

impl SimTime {
    /// Start of every run.
    pub const ZERO: SimTime = SimTime(0);

    /// Creates a time from raw nanoseconds.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Converts seconds since start into a time, rounding to the nearest nanosecond.
    pub fn from_secs_f64(secs: f64) -> Result<Self, EnvError> {
        SimDuration::from_secs_f64(secs).map(|d| Self(d.0))
    }

    /// Returns the raw nanosecond count.
    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Returns seconds since start.
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC
    }

    /// Time elapsed since `earlier`, or zero if `earlier` is later.
    pub fn saturating_since(&self, earlier: SimTime) -> SimDuration {
        SimDuration(self.0.saturating_sub(earlier.0))
    }
}

impl SimDuration {
    pub const ZERO: SimDuration = SimDuration(0);

    /// Creates a duration from raw nanoseconds.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Converts seconds into a duration.
    ///
    /// Rejects NaN, infinities, negative values and values beyond the clock
    /// range.
    pub fn from_secs_f64(secs: f64) -> Result<Self, EnvError> {
        if !secs.is_finite() {
            return Err(EnvError::invalid_time(format!("{} is not finite", secs)));
        }
        if secs < 0.0 {
            return Err(EnvError::invalid_time(format!("{} is negative", secs)));
        }
        let nanos = (secs * NANOS_PER_SEC).round();
        if nanos > u64::MAX as f64 {
            return Err(EnvError::invalid_time(format!("{}s overflows the simulated clock", secs)));
        }
        Ok(Self(nanos as u64))
    }

    /// Converts a sampled seconds value, clamping anything out of range.
    ///
    /// Distribution draws are always finite and non-negative, so this never
    /// clamps in practice; it exists so that draws don't need a `Result`.
    pub fn from_secs_saturating(secs: f64) -> Self {
        if secs.is_nan() || secs <= 0.0 {
            return Self::ZERO;
        }
        let nanos = (secs * NANOS_PER_SEC).round();
        if nanos >= u64::MAX as f64 {
            Self(u64::MAX)
        } else {
            Self(nanos as u64)
        }
    }

    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Add<SimDuration> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: SimDuration) -> SimTime {
        SimTime(self.0.saturating_add(rhs.0))
    }
}

impl Add for SimDuration {
    type Output = SimDuration;

    fn add(self, rhs: SimDuration) -> SimDuration {
        SimDuration(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for SimDuration {
    fn add_assign(&mut self, rhs: SimDuration) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl std::fmt::Display for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}

impl std::fmt::Display for SimDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secs_round_to_nearest_nano() {
        let d = SimDuration::from_secs_f64(1.5).unwrap();
        assert_eq!(d.as_nanos(), 1_500_000_000);

        let t = SimTime::from_secs_f64(0.000_000_000_6).unwrap();
        assert_eq!(t.as_nanos(), 1);
    }

    #[test]
    fn test_rejects_bad_seconds() {
        assert!(SimDuration::from_secs_f64(-1.0).is_err());
        assert!(SimDuration::from_secs_f64(f64::NAN).is_err());
        assert!(SimDuration::from_secs_f64(f64::INFINITY).is_err());
        assert!(SimDuration::from_secs_f64(1e30).is_err());
    }

    #[test]
    fn test_saturating_conversion() {
        assert_eq!(SimDuration::from_secs_saturating(-3.0), SimDuration::ZERO);
        assert_eq!(SimDuration::from_secs_saturating(f64::NAN), SimDuration::ZERO);
        assert_eq!(SimDuration::from_secs_saturating(1e30).as_nanos(), u64::MAX);
    }

    #[test]
    fn test_time_arithmetic() {
        let start = SimTime::from_nanos(100);
        let later = start + SimDuration::from_nanos(50);

        assert_eq!(later.as_nanos(), 150);
        assert_eq!(later.saturating_since(start).as_nanos(), 50);
        assert_eq!(start.saturating_since(later), SimDuration::ZERO);
    }
}
