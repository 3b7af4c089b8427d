//! HTTP client for the source hosting service

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error};

use super::Repository;
use crate::errors::{ProvisionError, Result};

#[derive(Debug, Deserialize)]
struct RepositoryInfo {
    git_url: String,
}

/// Source hosting service reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpRepository {
    client: Client,
    base_url: String,
}

impl HttpRepository {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Repository for HttpRepository {
    async fn git_url(&self, app_name: &str) -> Result<String> {
        let url = format!("{}/repository/{}", self.base_url, app_name);
        debug!("GET {}", url);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Repository lookup failed: {} - {}", status, body);
            return Err(ProvisionError::RepositoryError(format!("{}: {}", status, body)));
        }

        let info: RepositoryInfo = response.json().await?;
        Ok(info.git_url)
    }
}
