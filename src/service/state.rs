//! Lifecycle vocabulary shared by every service instance.
//!
//! [`ServiceState::apply`] is the single source of truth for which
//! [`Trigger`] is legal in which state. Everything that mutates an
//! instance's state goes through it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a service instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    /// Instance exists but has not been registered with the manager
    Unregistered,
    /// Registered and waiting for configuration or a start request
    Initializing,
    /// `start` is in flight
    Starting,
    /// Operational; sub-surface is reachable
    Running,
    /// `stop` is in flight
    Stopping,
    /// Stopped cleanly; may be started again
    Stopped,
    /// Failed; may be retried
    Error,
}

/// Event that drives a state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Instance was handed to the manager
    Register,
    /// Options were accepted by the service
    Configure,
    /// A start was requested
    Start,
    /// `start` returned successfully
    StartSucceeded,
    /// `start` returned an error
    StartFailed,
    /// A stop was requested
    Stop,
    /// `stop` returned successfully
    StopCompleted,
    /// `stop` returned an error or did not finish in time
    StopFailed,
    /// A failure detected outside of a start/stop call
    Fault,
    /// A retry was requested for a failed instance
    Retry,
}

impl ServiceState {
    /// Every state, in lifecycle order.
    pub const ALL: [ServiceState; 7] = [
        ServiceState::Unregistered,
        ServiceState::Initializing,
        ServiceState::Starting,
        ServiceState::Running,
        ServiceState::Stopping,
        ServiceState::Stopped,
        ServiceState::Error,
    ];

    /// Apply `trigger` to this state.
    ///
    /// Returns the destination state, or `None` when the transition is not
    /// in the table. The caller keeps the current state on `None`.
    pub fn apply(self, trigger: Trigger) -> Option<ServiceState> {
        use ServiceState::*;
        use Trigger::*;

        match (self, trigger) {
            (Unregistered, Register) => Some(Initializing),
            (Initializing, Configure) => Some(Initializing),
            (Initializing, Start) => Some(Starting),
            (Starting, StartSucceeded) => Some(Running),
            (Starting, StartFailed) => Some(Error),
            (Running, Stop) => Some(Stopping),
            (Stopping, StopCompleted) => Some(Stopped),
            (Stopping, StopFailed) => Some(Error),
            (Error, Retry) => Some(Initializing),
            (Stopped, Start) => Some(Starting),
            (Initializing | Starting | Running | Stopping, Fault) => Some(Error),
            _ => None,
        }
    }

    /// Triggers accepted in this state.
    pub fn triggers(self) -> Vec<Trigger> {
        Trigger::ALL
            .into_iter()
            .filter(|t| self.apply(*t).is_some())
            .collect()
    }

    /// Whether a start request is accepted in this state.
    pub fn can_start(self) -> bool {
        self.apply(Trigger::Start).is_some()
    }

    /// Whether the instance is in the middle of a start or stop call.
    pub fn is_transitional(self) -> bool {
        matches!(self, ServiceState::Starting | ServiceState::Stopping)
    }

    /// Upper-case name, as used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceState::Unregistered => "UNREGISTERED",
            ServiceState::Initializing => "INITIALIZING",
            ServiceState::Starting => "STARTING",
            ServiceState::Running => "RUNNING",
            ServiceState::Stopping => "STOPPING",
            ServiceState::Stopped => "STOPPED",
            ServiceState::Error => "ERROR",
        }
    }
}

impl Trigger {
    /// Every trigger.
    pub const ALL: [Trigger; 10] = [
        Trigger::Register,
        Trigger::Configure,
        Trigger::Start,
        Trigger::StartSucceeded,
        Trigger::StartFailed,
        Trigger::Stop,
        Trigger::StopCompleted,
        Trigger::StopFailed,
        Trigger::Fault,
        Trigger::Retry,
    ];

    /// Snake-case name, as used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::Register => "register",
            Trigger::Configure => "configure",
            Trigger::Start => "start",
            Trigger::StartSucceeded => "start_succeeded",
            Trigger::StartFailed => "start_failed",
            Trigger::Stop => "stop",
            Trigger::StopCompleted => "stop_completed",
            Trigger::StopFailed => "stop_failed",
            Trigger::Fault => "fault",
            Trigger::Retry => "retry",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
