//! Service lifecycle state.

use std::fmt;

/// Where the service is in its lifecycle.
///
/// `Starting -> Running -> ShuttingDown -> Stopped`. A service that never
/// started may still be shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Constructed, not yet serving.
    Starting,
    /// Serving requests.
    Running,
    /// Draining in-flight operations; new requests are refused.
    ShuttingDown,
    /// Drained and closed.
    Stopped,
}

impl ServiceState {
    /// Only a running service takes new operations.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, ServiceState::Running)
    }

    /// Check if the service is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServiceState::Stopped)
    }

    /// Check whether moving to `next` is a legal lifecycle step.
    pub fn can_transition_to(&self, next: ServiceState) -> bool {
        use ServiceState::*;
        matches!(
            (self, next),
            (Starting, Running)
                | (Starting, ShuttingDown)
                | (Running, ShuttingDown)
                | (ShuttingDown, Stopped)
        )
    }

    /// Lowercase name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::ShuttingDown => "shutting_down",
            ServiceState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
