//! In-memory store for tests and local setups.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{ContainerStore, DeployCounter};
use crate::container::Container;
use crate::errors::{ProvisionError, Result};

/// In-memory container and deploy store
///
/// Data is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    containers: RwLock<Vec<Container>>,
    deploys: RwLock<HashMap<String, u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of container records
    pub fn len(&self) -> usize {
        self.containers.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> ProvisionError {
    ProvisionError::StorageError("lock poisoned".to_string())
}

#[async_trait]
impl ContainerStore for MemoryStore {
    async fn insert(&self, container: &Container) -> Result<()> {
        let mut containers = self.containers.write().map_err(|_| poisoned())?;
        if containers.iter().any(|c| c.id == container.id) {
            return Err(ProvisionError::StorageError(format!(
                "container {} already exists",
                container.id
            )));
        }
        containers.push(container.clone());
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Container> {
        let containers = self.containers.read().map_err(|_| poisoned())?;
        containers
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| ProvisionError::NotFound(format!("container {}", id)))
    }

    async fn find_by_app(&self, app_name: &str) -> Result<Vec<Container>> {
        let containers = self.containers.read().map_err(|_| poisoned())?;
        Ok(containers
            .iter()
            .filter(|c| c.app_name == app_name)
            .cloned()
            .collect())
    }

    async fn update(&self, container: &Container) -> Result<()> {
        let mut containers = self.containers.write().map_err(|_| poisoned())?;
        let record = containers
            .iter_mut()
            .find(|c| c.id == container.id)
            .ok_or_else(|| ProvisionError::NotFound(format!("container {}", container.id)))?;
        *record = container.clone();
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut containers = self.containers.write().map_err(|_| poisoned())?;
        let index = containers
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| ProvisionError::NotFound(format!("container {}", id)))?;
        containers.remove(index);
        Ok(())
    }
}

#[async_trait]
impl DeployCounter for MemoryStore {
    async fn deploys(&self, app_name: &str) -> Result<u64> {
        let deploys = self.deploys.read().map_err(|_| poisoned())?;
        Ok(deploys.get(app_name).copied().unwrap_or(0))
    }

    async fn increment(&self, app_name: &str) -> Result<u64> {
        let mut deploys = self.deploys.write().map_err(|_| poisoned())?;
        let count = deploys.entry(app_name.to_string()).or_insert(0);
        *count += 1;
        Ok(*count)
    }
}
