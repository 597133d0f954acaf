//! Service lifecycle states.

/// Service operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Built but not started.
    Starting,
    /// Accepting requests, background jobs running.
    Running,
    /// Draining: no new requests.
    ShuttingDown,
    /// Stopped.
    Stopped,
}

impl CoordinatorState {
    /// Check if the service is accepting new requests.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, CoordinatorState::Running)
    }

    /// Check if the service is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CoordinatorState::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CoordinatorState::Starting => "starting",
            CoordinatorState::Running => "running",
            CoordinatorState::ShuttingDown => "shutting_down",
            CoordinatorState::Stopped => "stopped",
        }
    }
}
