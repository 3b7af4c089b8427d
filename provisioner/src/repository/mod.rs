//! Source hosting
//!
//! The provisioner only asks the source hosting service where an app's git
//! repository lives.

mod http;

pub use http::HttpRepository;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::errors::{ProvisionError, Result};

#[async_trait]
pub trait Repository: Send + Sync {
    /// Read-only git URL of an app's repository
    async fn git_url(&self, app_name: &str) -> Result<String>;
}

/// Repository answering from a fixed table of URLs
#[derive(Debug, Default, Clone)]
pub struct StaticRepository {
    urls: HashMap<String, String>,
}

impl StaticRepository {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_url(mut self, app_name: impl Into<String>, url: impl Into<String>) -> Self {
        self.urls.insert(app_name.into(), url.into());
        self
    }
}

#[async_trait]
impl Repository for StaticRepository {
    async fn git_url(&self, app_name: &str) -> Result<String> {
        self.urls
            .get(app_name)
            .cloned()
            .ok_or_else(|| ProvisionError::RepositoryError(format!("no repository for {}", app_name)))
    }
}
