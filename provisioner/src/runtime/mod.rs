//! Container runtime clients
//!
//! A [`RuntimeClient`] talks to exactly one runtime node. The cluster layer
//! decides which node an operation lands on and hands the call to the client
//! built for that node by a [`ClientFactory`].

pub mod docker;
pub mod memory;
pub mod pty;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Output sink for streamed runtime output
pub type OutputSink<'a> = &'a mut (dyn AsyncWrite + Send + Unpin);

/// Input source for interactive sessions
pub type InputSource<'a> = &'a mut (dyn AsyncRead + Send + Unpin);

/// Errors reported by a runtime node
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("no such container: {0}")]
    NoSuchContainer(String),

    #[error("no such image: {0}")]
    NoSuchImage(String),

    #[error("runtime API error: {0}")]
    Api(String),

    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RuntimeError::NoSuchContainer(_) | RuntimeError::NoSuchImage(_)
        )
    }
}

/// Restart policy applied when a container is started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    #[default]
    No,
    Always,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartPolicy::No => "",
            RestartPolicy::Always => "always",
        }
    }
}

/// Options passed to the start call
#[derive(Debug, Clone, Default)]
pub struct HostConfig {
    pub restart_policy: RestartPolicy,
}

/// Options for creating a container
#[derive(Debug, Clone, Default)]
pub struct CreateContainerOptions {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,

    /// Process user inside the container, runtime default when `None`
    pub user: Option<String>,

    /// Memory limit in bytes, unlimited when zero
    pub memory: i64,

    /// Memory plus swap limit in bytes, unlimited when zero
    pub memory_swap: i64,

    pub cpu_shares: i64,

    /// Internal port published to an ephemeral host port
    pub exposed_port: Option<String>,

    pub env: Vec<(String, String)>,
}

/// Subset of the runtime's container inspection used by the provisioner
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInspect {
    pub id: String,
    pub running: bool,
    pub exit_code: i64,
    pub ip_address: String,

    /// Published ports, keyed by `<port>/tcp`, valued by host port
    pub ports: HashMap<String, String>,
}

impl ContainerInspect {
    /// Host port bound to the given internal port, if any
    pub fn host_port(&self, port: &str) -> Option<&str> {
        self.ports
            .get(&format!("{}/tcp", port))
            .map(String::as_str)
            .filter(|p| !p.is_empty())
    }
}

/// Terminal dimensions for interactive shells
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtySpec {
    pub width: u16,
    pub height: u16,
    pub term: String,
}

impl Default for PtySpec {
    fn default() -> Self {
        Self {
            width: 80,
            height: 24,
            term: "xterm-256color".to_string(),
        }
    }
}

/// Registry credentials used when pushing images
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryAuth {
    pub username: String,
    pub password: SecretString,
}

/// Client for a single runtime node
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Node address this client talks to
    fn address(&self) -> &str;

    /// Check that the node answers
    async fn ping(&self) -> Result<(), RuntimeError>;

    async fn pull_image(&self, image: &str, output: OutputSink<'_>) -> Result<(), RuntimeError>;

    /// Create a container, returning its runtime id
    async fn create_container(&self, opts: &CreateContainerOptions)
        -> Result<String, RuntimeError>;

    async fn start_container(&self, id: &str, host_config: &HostConfig)
        -> Result<(), RuntimeError>;

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError>;

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect, RuntimeError>;

    /// Block until the container exits, returning its exit code
    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError>;

    /// Follow the container's output until it exits
    async fn attach(&self, id: &str, output: OutputSink<'_>) -> Result<(), RuntimeError>;

    /// Write the container's output so far
    async fn logs(&self, id: &str, output: OutputSink<'_>) -> Result<(), RuntimeError>;

    /// Commit a container to `repository:tag`, returning the image id
    async fn commit(&self, id: &str, repository: &str, tag: &str) -> Result<String, RuntimeError>;

    async fn push_image(
        &self,
        name: &str,
        tag: &str,
        auth: Option<&RegistryAuth>,
        output: OutputSink<'_>,
    ) -> Result<(), RuntimeError>;

    async fn remove_image(&self, name: &str) -> Result<(), RuntimeError>;

    /// Run a command inside a running container, returning its exit code
    async fn exec(
        &self,
        id: &str,
        cmd: &[String],
        stdout: OutputSink<'_>,
        stderr: OutputSink<'_>,
    ) -> Result<i64, RuntimeError>;

    /// Interactive shell inside a running container
    async fn shell(
        &self,
        id: &str,
        stdin: InputSource<'_>,
        stdout: OutputSink<'_>,
        stderr: OutputSink<'_>,
        pty: &PtySpec,
    ) -> Result<(), RuntimeError>;
}

/// Builds runtime clients for node addresses
pub trait ClientFactory: Send + Sync {
    fn client(&self, address: &str) -> Arc<dyn RuntimeClient>;
}

/// Split an image reference into repository and tag
///
/// The tag separator is the last `:` after the last `/`, so registry ports
/// are kept in the repository part.
pub fn split_image(image: &str) -> (&str, &str) {
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], &image[name_start + i + 1..]),
        None => (image, ""),
    }
}
