//! Runtime nodes

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Metadata key holding the pool a node belongs to
pub const POOL_KEY: &str = "pool";

/// A container runtime endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub address: String,

    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Node {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            metadata: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn pool(&self) -> Option<&str> {
        self.metadata.get(POOL_KEY).map(String::as_str)
    }
}
