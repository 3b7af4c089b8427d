//! Cluster metadata storage
//!
//! Remembers which node holds which container and image, and keeps the node
//! registry used by segregated clusters.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::info;
use url::Url;

use super::node::Node;
use crate::errors::{ProvisionError, Result};
use crate::settings::DockerSettings;

/// Storage used when none is configured
const DEFAULT_STORAGE_URL: &str = "memory://";

/// Backend for cluster metadata
#[async_trait]
pub trait ClusterStorage: Send + Sync {
    /// Register a node, replacing any node with the same address
    async fn store_node(&self, node: &Node) -> Result<()>;

    async fn retrieve_nodes(&self) -> Result<Vec<Node>>;

    async fn remove_node(&self, address: &str) -> Result<()>;

    /// Record the node a container lives on
    async fn store_container(&self, container_id: &str, address: &str) -> Result<()>;

    /// Node a container lives on, `NotFound` when unknown
    async fn retrieve_container(&self, container_id: &str) -> Result<String>;

    async fn remove_container(&self, container_id: &str) -> Result<()>;

    /// Record that a node holds an image
    async fn store_image(&self, image: &str, address: &str) -> Result<()>;

    /// Nodes holding an image, empty when none
    async fn retrieve_image(&self, image: &str) -> Result<Vec<String>>;

    async fn remove_image(&self, image: &str) -> Result<()>;
}

/// In-memory cluster storage
#[derive(Debug, Default)]
pub struct MemoryClusterStorage {
    nodes: RwLock<Vec<Node>>,
    containers: RwLock<HashMap<String, String>>,
    images: RwLock<HashMap<String, HashSet<String>>>,
}

impl MemoryClusterStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> ProvisionError {
    ProvisionError::StorageError("lock poisoned".to_string())
}

#[async_trait]
impl ClusterStorage for MemoryClusterStorage {
    async fn store_node(&self, node: &Node) -> Result<()> {
        let mut nodes = self.nodes.write().map_err(|_| poisoned())?;
        nodes.retain(|n| n.address != node.address);
        nodes.push(node.clone());
        Ok(())
    }

    async fn retrieve_nodes(&self) -> Result<Vec<Node>> {
        let nodes = self.nodes.read().map_err(|_| poisoned())?;
        Ok(nodes.clone())
    }

    async fn remove_node(&self, address: &str) -> Result<()> {
        let mut nodes = self.nodes.write().map_err(|_| poisoned())?;
        let before = nodes.len();
        nodes.retain(|n| n.address != address);
        if nodes.len() == before {
            return Err(ProvisionError::NotFound(format!("node {}", address)));
        }
        Ok(())
    }

    async fn store_container(&self, container_id: &str, address: &str) -> Result<()> {
        let mut containers = self.containers.write().map_err(|_| poisoned())?;
        containers.insert(container_id.to_string(), address.to_string());
        Ok(())
    }

    async fn retrieve_container(&self, container_id: &str) -> Result<String> {
        let containers = self.containers.read().map_err(|_| poisoned())?;
        containers
            .get(container_id)
            .cloned()
            .ok_or_else(|| ProvisionError::NotFound(format!("container {}", container_id)))
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        let mut containers = self.containers.write().map_err(|_| poisoned())?;
        containers.remove(container_id);
        Ok(())
    }

    async fn store_image(&self, image: &str, address: &str) -> Result<()> {
        let mut images = self.images.write().map_err(|_| poisoned())?;
        images
            .entry(image.to_string())
            .or_default()
            .insert(address.to_string());
        Ok(())
    }

    async fn retrieve_image(&self, image: &str) -> Result<Vec<String>> {
        let images = self.images.read().map_err(|_| poisoned())?;
        let mut addresses: Vec<String> = images
            .get(image)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        addresses.sort();
        Ok(addresses)
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        let mut images = self.images.write().map_err(|_| poisoned())?;
        images.remove(image);
        Ok(())
    }
}

/// Build the cluster storage named in the settings
///
/// Segregated clusters read their nodes from the storage, so a storage URL is
/// required for them.
pub fn build_cluster_storage(settings: &DockerSettings) -> Result<Arc<dyn ClusterStorage>> {
    let address = if settings.segregate {
        settings.cluster_storage_url()?
    } else {
        settings
            .cluster
            .storage
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_STORAGE_URL)
    };

    let url = Url::parse(address)
        .map_err(|e| ProvisionError::ConfigError(format!("invalid cluster storage URL: {e}")))?;

    match url.scheme() {
        "memory" => {
            info!("Using in-memory cluster storage");
            Ok(Arc::new(MemoryClusterStorage::new()))
        }
        scheme => Err(ProvisionError::ConfigError(format!(
            "unsupported cluster storage: {}",
            scheme
        ))),
    }
}
