//! Node cluster
//!
//! A [`Cluster`] is a fixed set of eligible nodes. Every container and image
//! operation is executed against exactly one of them: placement goes through
//! the scheduler, and later operations on a container are routed to the node
//! recorded for it in the cluster storage.

pub mod node;
pub mod scheduler;
pub mod storage;

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::errors::{ProvisionError, Result};
use crate::runtime::{
    ClientFactory, ContainerInspect, CreateContainerOptions, HostConfig, InputSource,
    OutputSink, PtySpec, RegistryAuth, RuntimeClient,
};

pub use node::Node;
pub use scheduler::{RoundRobin, Scheduler};
pub use storage::{build_cluster_storage, ClusterStorage, MemoryClusterStorage};

/// A set of runtime nodes operations are routed to
#[derive(Clone)]
pub struct Cluster {
    nodes: Vec<Node>,
    pool: Option<String>,
    storage: Arc<dyn ClusterStorage>,
    factory: Arc<dyn ClientFactory>,
    scheduler: Arc<dyn Scheduler>,
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("nodes", &self.nodes)
            .field("pool", &self.pool)
            .field("scheduler", &self.scheduler.name())
            .finish()
    }
}

impl Cluster {
    pub fn new(
        nodes: Vec<Node>,
        pool: Option<String>,
        storage: Arc<dyn ClusterStorage>,
        factory: Arc<dyn ClientFactory>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            nodes,
            pool,
            storage,
            factory,
            scheduler,
        }
    }

    /// Eligible nodes
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Pool the nodes were filtered by, `None` for a shared cluster
    pub fn pool(&self) -> Option<&str> {
        self.pool.as_deref()
    }

    pub fn storage(&self) -> &Arc<dyn ClusterStorage> {
        &self.storage
    }

    /// Client for an arbitrary node address
    pub fn client(&self, address: &str) -> Arc<dyn RuntimeClient> {
        self.factory.client(address)
    }

    /// Pick a node for new work, preferring nodes that already hold `image`
    async fn schedule(&self, image: &str) -> Result<&Node> {
        let holders = self.storage.retrieve_image(image).await?;
        let preferred: Vec<Node> = self
            .nodes
            .iter()
            .filter(|n| holders.contains(&n.address))
            .cloned()
            .collect();

        let selected = if preferred.is_empty() {
            self.scheduler.select(&self.nodes)
        } else {
            self.scheduler
                .select(&preferred)
                .and_then(|p| self.nodes.iter().find(|n| n.address == p.address))
        };
        selected.ok_or_else(|| ProvisionError::NoEligibleNodes(self.pool.clone()))
    }

    /// Client for the node a container was placed on
    async fn container_client(&self, id: &str) -> Result<Arc<dyn RuntimeClient>> {
        let address = self.storage.retrieve_container(id).await?;
        Ok(self.factory.client(&address))
    }

    /// Create a container, returning its id and the address of its node
    pub async fn create_container(&self, opts: &CreateContainerOptions) -> Result<(String, String)> {
        let node = self.schedule(&opts.image).await?;
        debug!("Creating container {} on {}", opts.name, node.address);

        let id = self
            .factory
            .client(&node.address)
            .create_container(opts)
            .await?;
        self.storage.store_container(&id, &node.address).await?;
        Ok((id, node.address.clone()))
    }

    pub async fn start_container(&self, id: &str, host_config: &HostConfig) -> Result<()> {
        let client = self.container_client(id).await?;
        debug!("Starting container {} on {}", id, client.address());
        client.start_container(id, host_config).await?;
        Ok(())
    }

    pub async fn stop_container(&self, id: &str, timeout: Duration) -> Result<()> {
        let client = self.container_client(id).await?;
        debug!("Stopping container {} on {}", id, client.address());
        client.stop_container(id, timeout).await?;
        Ok(())
    }

    /// Remove a container and forget its location
    ///
    /// The location is forgotten as well when the node no longer knows the
    /// container; the not-found error is still returned.
    pub async fn remove_container(&self, id: &str) -> Result<()> {
        let client = self.container_client(id).await?;
        debug!("Removing container {} from {}", id, client.address());
        match client.remove_container(id).await {
            Ok(()) => self.storage.remove_container(id).await,
            Err(e) if e.is_not_found() => {
                self.storage.remove_container(id).await?;
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn inspect_container(&self, id: &str) -> Result<ContainerInspect> {
        let client = self.container_client(id).await?;
        Ok(client.inspect_container(id).await?)
    }

    pub async fn wait_container(&self, id: &str) -> Result<i64> {
        let client = self.container_client(id).await?;
        Ok(client.wait_container(id).await?)
    }

    pub async fn attach(&self, id: &str, output: OutputSink<'_>) -> Result<()> {
        let client = self.container_client(id).await?;
        client.attach(id, output).await?;
        Ok(())
    }

    pub async fn logs(&self, id: &str, output: OutputSink<'_>) -> Result<()> {
        let client = self.container_client(id).await?;
        client.logs(id, output).await?;
        Ok(())
    }

    /// Commit a container into `repository:tag` on the container's node
    pub async fn commit(&self, id: &str, repository: &str, tag: &str) -> Result<String> {
        let client = self.container_client(id).await?;
        debug!("Committing {} to {}:{} on {}", id, repository, tag, client.address());
        let image_id = client.commit(id, repository, tag).await?;

        let name = if tag.is_empty() {
            repository.to_string()
        } else {
            format!("{}:{}", repository, tag)
        };
        self.storage.store_image(&name, client.address()).await?;
        Ok(image_id)
    }

    /// Pull an image onto a node, returning the node address
    pub async fn pull_image(&self, image: &str, output: OutputSink<'_>) -> Result<String> {
        let node = self.schedule(image).await?;
        debug!("Pulling {} on {}", image, node.address);
        self.factory
            .client(&node.address)
            .pull_image(image, output)
            .await?;
        self.storage.store_image(image, &node.address).await?;
        Ok(node.address.clone())
    }

    /// Push an image from a node holding it
    pub async fn push_image(
        &self,
        name: &str,
        tag: &str,
        auth: Option<&RegistryAuth>,
        output: OutputSink<'_>,
    ) -> Result<()> {
        let full = if tag.is_empty() {
            name.to_string()
        } else {
            format!("{}:{}", name, tag)
        };
        let holders = self.storage.retrieve_image(&full).await?;
        let address = holders
            .first()
            .ok_or_else(|| ProvisionError::NotFound(format!("image {}", full)))?;

        debug!("Pushing {} from {}", full, address);
        self.factory
            .client(address)
            .push_image(name, tag, auth, output)
            .await?;
        Ok(())
    }

    /// Remove an image from every node holding it
    pub async fn remove_image(&self, image: &str) -> Result<()> {
        let holders = self.storage.retrieve_image(image).await?;
        if holders.is_empty() {
            return Err(ProvisionError::NotFound(format!("image {}", image)));
        }
        for address in &holders {
            debug!("Removing image {} from {}", image, address);
            self.factory.client(address).remove_image(image).await?;
        }
        self.storage.remove_image(image).await
    }

    pub async fn exec(
        &self,
        id: &str,
        cmd: &[String],
        stdout: OutputSink<'_>,
        stderr: OutputSink<'_>,
    ) -> Result<i64> {
        let client = self.container_client(id).await?;
        debug!("Running {:?} in {}", cmd, id);
        Ok(client.exec(id, cmd, stdout, stderr).await?)
    }

    pub async fn shell(
        &self,
        id: &str,
        stdin: InputSource<'_>,
        stdout: OutputSink<'_>,
        stderr: OutputSink<'_>,
        pty: &PtySpec,
    ) -> Result<()> {
        let client = self.container_client(id).await?;
        client.shell(id, stdin, stdout, stderr, pty).await?;
        Ok(())
    }
}
