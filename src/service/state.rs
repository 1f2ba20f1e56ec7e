/// Service lifecycle state machine
///
/// A service is created, runs its dispatch loop once and is stopped for good;
/// there is no restart.
use std::fmt;
use std::time::{Duration, Instant};

/// State of a service
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ServiceState {
    /// Constructed, handlers may be registered, not attached to the hub yet
    Created,

    /// Dispatch loop running
    Running { since: Instant },

    /// Stop requested, dispatch thread winding down (transitional state)
    Stopping,

    /// Detached and closed
    Stopped,
}

impl ServiceState {
    pub fn is_running(&self) -> bool {
        matches!(self, ServiceState::Running { .. })
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, ServiceState::Stopped)
    }

    /// Get the time since the service started (if running)
    pub fn running_duration(&self) -> Option<Duration> {
        match self {
            ServiceState::Running { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    /// Get a human-readable description of the state
    pub fn description(&self) -> &'static str {
        match self {
            ServiceState::Created => "Created",
            ServiceState::Running { .. } => "Running",
            ServiceState::Stopping => "Stopping...",
            ServiceState::Stopped => "Stopped",
        }
    }
}

impl Default for ServiceState {
    fn default() -> Self {
        ServiceState::Created
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Guards the lifecycle transitions. A rejected transition returns the state
/// that prevented it.
#[derive(Debug, Default)]
pub struct ServiceStateMachine {
    state: ServiceState,
}

impl ServiceStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    /// Created -> Running
    pub fn start(&mut self) -> Result<(), ServiceState> {
        match self.state {
            ServiceState::Created => {
                self.state = ServiceState::Running {
                    since: Instant::now(),
                };
                Ok(())
            }
            other => Err(other),
        }
    }

    /// Running -> Stopping
    pub fn stop(&mut self) -> Result<(), ServiceState> {
        match self.state {
            ServiceState::Running { .. } => {
                self.state = ServiceState::Stopping;
                Ok(())
            }
            other => Err(other),
        }
    }

    /// Stopping -> Stopped
    pub fn mark_stopped(&mut self) -> Result<(), ServiceState> {
        match self.state {
            ServiceState::Stopping => {
                self.state = ServiceState::Stopped;
                Ok(())
            }
            other => Err(other),
        }
    }

    /// Go straight to Stopped (never started, or startup failed)
    pub fn force_stop(&mut self) {
        self.state = ServiceState::Stopped;
    }
}
