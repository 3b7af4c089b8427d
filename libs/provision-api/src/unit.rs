//! Public view of a provisioned container

use serde::{Deserialize, Serialize};

use crate::status::Status;

/// A unit as exposed to the API layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    /// Runtime container id
    pub name: String,

    /// Owning application
    pub app_name: String,

    /// Platform the unit runs
    #[serde(rename = "type")]
    pub unit_type: String,

    /// Current status
    pub status: Status,

    /// Host address of the node running the unit
    pub ip: String,
}

impl Unit {
    /// Whether the unit may receive routed traffic
    pub fn available(&self) -> bool {
        self.status.is_available()
    }
}
