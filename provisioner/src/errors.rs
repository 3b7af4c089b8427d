//! Error types for the provisioner

use provision_api::TransitionError;
use thiserror::Error;

use crate::router::RouterError;
use crate::runtime::RuntimeError;

/// Main error type for the provisioner
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Error reported by the container runtime, passed through untouched
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("not found: {0}")]
    NotFound(String),

    /// A command run through exec exited with a non-zero code
    #[error("exec exited with code {code}")]
    ExecFailed { code: i64 },

    /// The build container exited with a non-zero code
    #[error("build exited with status {code}")]
    BuildFailed { code: i64 },

    #[error("no eligible nodes for pool {0:?}")]
    NoEligibleNodes(Option<String>),

    #[error("missing configuration: {0}")]
    ConfigMissing(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Repository error: {0}")]
    RepositoryError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProvisionError {
    /// Whether the error means the target is already gone
    pub fn is_not_found(&self) -> bool {
        match self {
            ProvisionError::NotFound(_) => true,
            ProvisionError::Runtime(e) => e.is_not_found(),
            _ => false,
        }
    }
}

impl From<anyhow::Error> for ProvisionError {
    fn from(err: anyhow::Error) -> Self {
        ProvisionError::Internal(err.to_string())
    }
}

pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;
