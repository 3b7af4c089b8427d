//! Router binding
//!
//! The router maps an app name to the addresses of its serving containers.
//! Routes are added when a container starts and removed when it is removed.

mod memory;

pub use memory::MemoryRouter;

use async_trait::async_trait;
use thiserror::Error;

/// Errors reported by the router
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("router backend not found: {0}")]
    BackendNotFound(String),

    #[error("router backend already exists: {0}")]
    BackendExists(String),

    #[error("route not found: {0}")]
    RouteNotFound(String),

    #[error("router unavailable: {0}")]
    Unavailable(String),
}

impl RouterError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RouterError::BackendNotFound(_) | RouterError::RouteNotFound(_)
        )
    }
}

/// Backend registration service
#[async_trait]
pub trait Router: Send + Sync {
    async fn add_backend(&self, app_name: &str) -> Result<(), RouterError>;

    async fn remove_backend(&self, app_name: &str) -> Result<(), RouterError>;

    async fn add_route(&self, app_name: &str, address: &str) -> Result<(), RouterError>;

    async fn remove_route(&self, app_name: &str, address: &str) -> Result<(), RouterError>;

    async fn has_route(&self, app_name: &str, address: &str) -> Result<bool, RouterError>;
}
