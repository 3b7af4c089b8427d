//! Application models

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Env var holding the address of the control plane
pub const HOST_ENV: &str = "SHIPYARD_HOST";

/// Env var holding the app's API token
pub const TOKEN_ENV: &str = "SHIPYARD_APP_TOKEN";

/// An application as seen by the provisioner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    /// Unique app name
    pub name: String,

    /// Platform the app is built on, e.g. `python`
    pub platform: String,

    /// Pool the app's containers are placed in when segregated
    #[serde(default)]
    pub pool: Option<String>,

    /// Memory limit in bytes, unlimited when zero
    #[serde(default)]
    pub memory: i64,

    /// Swap allowed on top of the memory limit, in bytes
    #[serde(default)]
    pub swap: i64,

    #[serde(default)]
    pub cpu_share: i64,

    /// Environment variables set on the app
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl App {
    pub fn new(name: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            platform: platform.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    #[must_use]
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn env_var(&self, name: &str) -> Option<&str> {
        self.env.get(name).map(String::as_str)
    }

    /// Memory plus swap, the limit handed to the runtime
    pub fn memory_swap(&self) -> i64 {
        self.memory + self.swap
    }
}
