//! Unit status and its transition table

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of a unit (container)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Record persisted, runtime container created but never started
    #[default]
    Created,

    /// Build container running a deploy
    Building,

    /// Long-lived container started, not yet reported healthy
    Starting,

    /// Reported healthy by the unit agent
    Started,

    /// Explicitly stopped
    Stopped,

    /// A runtime operation failed
    Error,
}

/// Rejected status transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid status transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: Status,
    pub to: Status,
}

impl Status {
    pub const ALL: [Status; 6] = [
        Status::Created,
        Status::Building,
        Status::Starting,
        Status::Started,
        Status::Stopped,
        Status::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Created => "created",
            Status::Building => "building",
            Status::Starting => "starting",
            Status::Started => "started",
            Status::Stopped => "stopped",
            Status::Error => "error",
        }
    }

    /// Whether reaching this status counts as a successful status update
    pub fn is_successful(&self) -> bool {
        matches!(self, Status::Starting | Status::Started)
    }

    /// Whether a unit in this status may receive routed traffic
    pub fn is_available(&self) -> bool {
        matches!(self, Status::Starting | Status::Started)
    }

    /// Check a transition against the table
    pub fn can_transition_to(&self, next: Status) -> bool {
        match (self, next) {
            // Any state may fail
            (_, Status::Error) => true,

            // From Created
            (Status::Created, Status::Building) => true,
            (Status::Created, Status::Starting) => true,
            (Status::Created, Status::Stopped) => true,

            // From Building
            (Status::Building, Status::Starting) => true,
            (Status::Building, Status::Stopped) => true,

            // From Starting
            (Status::Starting, Status::Started) => true,
            (Status::Starting, Status::Stopped) => true,

            // From Started (the agent re-reports started periodically)
            (Status::Started, Status::Started) => true,
            (Status::Started, Status::Starting) => true,
            (Status::Started, Status::Stopped) => true,

            // From Stopped
            (Status::Stopped, Status::Starting) => true,

            // From Error
            (Status::Error, Status::Starting) => true,
            (Status::Error, Status::Stopped) => true,

            _ => false,
        }
    }

    /// Validate a transition, returning the new status
    pub fn transition(self, next: Status) -> Result<Status, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "created" => Ok(Status::Created),
            "building" => Ok(Status::Building),
            "starting" => Ok(Status::Starting),
            "started" => Ok(Status::Started),
            "stopped" => Ok(Status::Stopped),
            "error" => Ok(Status::Error),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }
}
