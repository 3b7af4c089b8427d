//! Settings file management

use std::path::PathBuf;

use serde::{Deserialize, Deserializer};

use crate::errors::{ProvisionError, Result};
use crate::logs::LogLevel;
use crate::runtime::RegistryAuth;

/// Provisioner settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log output configuration
    #[serde(default)]
    pub log: LogSettings,

    /// Container runtime configuration
    #[serde(default)]
    pub docker: DockerSettings,

    /// Source hosting service
    #[serde(default)]
    pub repository: RepositorySettings,
}

fn default_true() -> bool {
    true
}

/// Log output settings
#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    /// Write logs to stdout
    #[serde(default = "default_true")]
    pub stdout: bool,

    /// Emit JSON lines instead of plain text
    #[serde(default)]
    pub json: bool,

    /// Directory for daily rolling log files, disabled when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            stdout: true,
            json: false,
            log_dir: None,
        }
    }
}

/// Container runtime settings
#[derive(Debug, Clone, Deserialize)]
pub struct DockerSettings {
    /// Registry prepended to every image name
    #[serde(default)]
    pub registry: Option<String>,

    /// Credentials used when pushing to the registry
    #[serde(default)]
    pub registry_auth: Option<RegistryAuth>,

    /// Namespace of every image name
    #[serde(default = "default_namespace")]
    pub repository_namespace: String,

    /// Command run inside build containers
    #[serde(default = "default_deploy_cmd")]
    pub deploy_cmd: String,

    #[serde(default)]
    pub run_cmd: RunCmdSettings,

    #[serde(default)]
    pub ssh: SshSettings,

    /// Node addresses of the shared cluster
    #[serde(default)]
    pub servers: Vec<String>,

    /// Place containers on nodes of the app's pool only
    #[serde(default)]
    pub segregate: bool,

    #[serde(default)]
    pub cluster: ClusterSettings,

    /// Agent wrapping every command run in an app container
    #[serde(default = "default_unit_agent")]
    pub unit_agent: String,

    /// Path of the docker CLI
    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,

    /// Grace period given to a container before it is killed on stop
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
}

fn default_namespace() -> String {
    "shipyard".to_string()
}

fn default_deploy_cmd() -> String {
    "/var/lib/shipyard/deploy".to_string()
}

fn default_unit_agent() -> String {
    "shipyard_unit_agent".to_string()
}

fn default_docker_bin() -> String {
    "docker".to_string()
}

fn default_stop_timeout() -> u64 {
    10
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            registry: None,
            registry_auth: None,
            repository_namespace: default_namespace(),
            deploy_cmd: default_deploy_cmd(),
            run_cmd: RunCmdSettings::default(),
            ssh: SshSettings::default(),
            servers: Vec::new(),
            segregate: false,
            cluster: ClusterSettings::default(),
            unit_agent: default_unit_agent(),
            docker_bin: default_docker_bin(),
            stop_timeout_secs: default_stop_timeout(),
        }
    }
}

impl DockerSettings {
    /// Registry prefix, ignoring an empty value
    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref().filter(|r| !r.is_empty())
    }

    /// Internal port exposed by app containers
    pub fn internal_port(&self) -> Result<&str> {
        self.run_cmd
            .port
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ProvisionError::ConfigMissing("docker.run_cmd.port".to_string()))
    }

    /// Address of the cluster metadata store
    pub fn cluster_storage_url(&self) -> Result<&str> {
        self.cluster
            .storage
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProvisionError::ConfigMissing("docker.cluster.storage".to_string()))
    }
}

/// Command run by long-lived app containers
#[derive(Debug, Clone, Deserialize)]
pub struct RunCmdSettings {
    #[serde(default = "default_run_bin")]
    pub bin: String,

    /// Internal port, given either as a string or as a number
    #[serde(default, deserialize_with = "deserialize_port")]
    pub port: Option<String>,
}

fn default_run_bin() -> String {
    "/var/lib/shipyard/start".to_string()
}

impl Default for RunCmdSettings {
    fn default() -> Self {
        Self {
            bin: default_run_bin(),
            port: None,
        }
    }
}

fn deserialize_port<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u64),
        Text(String),
    }

    Ok(Option::<Port>::deserialize(deserializer)?.map(|port| match port {
        Port::Number(n) => n.to_string(),
        Port::Text(s) => s,
    }))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SshSettings {
    /// User processes run as inside app containers
    #[serde(default)]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterSettings {
    /// URL of the node metadata store, required when segregated
    #[serde(default)]
    pub storage: Option<String>,
}

/// Source hosting service settings
#[derive(Debug, Clone, Deserialize)]
pub struct RepositorySettings {
    #[serde(default = "default_repository_url")]
    pub base_url: String,
}

fn default_repository_url() -> String {
    "http://localhost:8000".to_string()
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            base_url: default_repository_url(),
        }
    }
}
