//! Persistence for container records and deploy counters
//!
//! Every operation touches a single document; there are no multi-document
//! transactions.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::container::Container;
use crate::errors::Result;

/// Collection of container records, keyed by container id
#[async_trait]
pub trait ContainerStore: Send + Sync {
    /// Insert a new record, failing when the id is taken
    async fn insert(&self, container: &Container) -> Result<()>;

    /// Record for a container id, `NotFound` when absent
    async fn find(&self, id: &str) -> Result<Container>;

    /// Records owned by an app, in insertion order
    async fn find_by_app(&self, app_name: &str) -> Result<Vec<Container>>;

    /// Overwrite an existing record
    async fn update(&self, container: &Container) -> Result<()>;

    /// Delete a record, `NotFound` when absent
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Per-app count of successful deploys
#[async_trait]
pub trait DeployCounter: Send + Sync {
    async fn deploys(&self, app_name: &str) -> Result<u64>;

    /// Record one more successful deploy, returning the new count
    async fn increment(&self, app_name: &str) -> Result<u64>;
}
