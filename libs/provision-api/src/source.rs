//! Deploy source input

use serde::{Deserialize, Serialize};

/// Where a deploy takes the application's code from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DeploySource {
    /// A revision of the app's git repository
    Git { version: String },

    /// A tarball downloaded from a URL
    Archive { url: String },
}

impl DeploySource {
    pub fn kind(&self) -> &'static str {
        match self {
            DeploySource::Git { .. } => "git",
            DeploySource::Archive { .. } => "archive",
        }
    }
}
