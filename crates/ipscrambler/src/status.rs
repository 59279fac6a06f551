//! Relay Status State Machine
//!
//! Tracks the lifecycle of the external relay service from the status
//! values it broadcasts.
//!
//! # Transition rules
//!
//! | Source action | Current | New | Applied? |
//! |---------------|---------|-----|----------|
//! | explicit query | any | any | always (forced) |
//! | bandwidth | STARTING | ON | yes |
//! | other | STARTING | ON | no, wait for traffic |
//! | any non-query | X | X | no |
//! | any non-query | X | Y | yes |
//!
//! The service reports ON before its tunnel is usable, so a plain
//! broadcast is not trusted to finish a start. The first bandwidth sample
//! carrying ON is.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Relay service status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Service stopped
    Off,
    /// Tunnel up and carrying traffic
    On,
    /// Service bootstrapping
    Starting,
    /// Service shutting down
    Stopping,
    /// Start refused by the service
    StartDisabled,
}

impl Status {
    /// All status values, in declaration order
    pub fn all() -> &'static [Status] {
        &[
            Status::Off,
            Status::On,
            Status::Starting,
            Status::Stopping,
            Status::StartDisabled,
        ]
    }

    /// Wire name used by the relay service
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Off => "OFF",
            Status::On => "ON",
            Status::Starting => "STARTING",
            Status::Stopping => "STOPPING",
            Status::StartDisabled => "START_DISABLED",
        }
    }

    /// Map a wire name to a status.
    ///
    /// Names are matched exactly; the service always sends them upper-case.
    pub fn parse(value: &str) -> Result<Self, UnknownStatusValue> {
        Status::all()
            .iter()
            .copied()
            .find(|s| s.as_str() == value)
            .ok_or_else(|| UnknownStatusValue(value.to_string()))
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = UnknownStatusValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::parse(s)
    }
}

/// A status string the relay service sent that maps to no known value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown relay status value: {0:?}")]
pub struct UnknownStatusValue(pub String);

/// Which kind of inbound event carried a status value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceAction {
    /// Response to an explicit status query
    ExplicitQuery,
    /// Bandwidth sample (traffic observed on the tunnel)
    Bandwidth,
    /// Any other broadcast
    Other,
}

/// A parsed status together with the action that carried it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusEvent {
    pub status: Status,
    pub source: SourceAction,
}

impl StatusEvent {
    pub fn new(status: Status, source: SourceAction) -> Self {
        Self { status, source }
    }

    /// A status that must be applied even if unchanged
    pub fn forced(status: Status) -> Self {
        Self::new(status, SourceAction::ExplicitQuery)
    }
}

/// Debounced status tracker
///
/// Owned by the dispatcher; never shared across threads.
#[derive(Debug, Default)]
pub struct StatusMachine {
    current: Option<Status>,
}

impl StatusMachine {
    /// Create a tracker with no known status
    pub fn new() -> Self {
        Self { current: None }
    }

    /// Current status, `None` until the first accepted event
    pub fn current(&self) -> Option<Status> {
        self.current
    }

    /// Apply an event.
    ///
    /// Returns the new status if the transition was accepted and listeners
    /// must be told about it.
    pub fn apply(&mut self, event: StatusEvent) -> Option<Status> {
        let accepted = match (event.source, self.current, event.status) {
            (SourceAction::ExplicitQuery, _, _) => true,
            (source, Some(Status::Starting), Status::On) => {
                if source != SourceAction::Bandwidth {
                    debug!("Holding STARTING until traffic is observed");
                }
                source == SourceAction::Bandwidth
            }
            (_, current, new) => current != Some(new),
        };

        if accepted {
            debug!("Status {:?} -> {}", self.current, event.status);
            self.current = Some(event.status);
            Some(event.status)
        } else {
            None
        }
    }
}
