//! Time utilities for ledger operations.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Default limits.
pub mod constants {
    use std::time::Duration;

    /// Default deadline for a single ledger operation (5 seconds).
    pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

    /// Default time allowed for in-flight operations to drain on shutdown (30 seconds).
    pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
}

/// A timestamp with timezone (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Point in time by which an operation must have committed.
///
/// An unbounded deadline never elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// Deadline `duration` from now.
    pub fn after(duration: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(duration),
        }
    }

    /// Deadline at a fixed instant.
    pub fn at(instant: Instant) -> Self {
        Self { at: Some(instant) }
    }

    /// Deadline that never elapses.
    pub fn unbounded() -> Self {
        Self { at: None }
    }

    /// The instant of the deadline, if bounded.
    pub fn instant(&self) -> Option<Instant> {
        self.at
    }

    /// Check if the deadline has passed.
    pub fn is_exceeded(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Get remaining duration, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::after(constants::DEFAULT_OPERATION_TIMEOUT)
    }
}
