//! In-memory router

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use super::{Router, RouterError};

#[derive(Debug, Default)]
pub struct MemoryRouter {
    backends: RwLock<HashMap<String, Vec<String>>>,
    failures: RwLock<HashSet<String>>,
}

impl MemoryRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call to `op` fail as unavailable
    pub fn prepare_failure(&self, op: &str) {
        self.failures
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(op.to_string());
    }

    pub fn reset_failure(&self, op: &str) {
        self.failures
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(op);
    }

    pub fn has_backend(&self, app_name: &str) -> bool {
        self.backends
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(app_name)
    }

    /// Routes of an app, in the order they were added
    pub fn routes(&self, app_name: &str) -> Vec<String> {
        self.backends
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(app_name)
            .cloned()
            .unwrap_or_default()
    }

    fn check(&self, op: &str) -> Result<(), RouterError> {
        let failures = self.failures.read().unwrap_or_else(|e| e.into_inner());
        if failures.contains(op) {
            return Err(RouterError::Unavailable(format!("{} failed", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl Router for MemoryRouter {
    async fn add_backend(&self, app_name: &str) -> Result<(), RouterError> {
        self.check("add_backend")?;
        let mut backends = self.backends.write().unwrap_or_else(|e| e.into_inner());
        if backends.contains_key(app_name) {
            return Err(RouterError::BackendExists(app_name.to_string()));
        }
        backends.insert(app_name.to_string(), Vec::new());
        Ok(())
    }

    async fn remove_backend(&self, app_name: &str) -> Result<(), RouterError> {
        self.check("remove_backend")?;
        let mut backends = self.backends.write().unwrap_or_else(|e| e.into_inner());
        backends
            .remove(app_name)
            .map(|_| ())
            .ok_or_else(|| RouterError::BackendNotFound(app_name.to_string()))
    }

    async fn add_route(&self, app_name: &str, address: &str) -> Result<(), RouterError> {
        self.check("add_route")?;
        let mut backends = self.backends.write().unwrap_or_else(|e| e.into_inner());
        let routes = backends
            .get_mut(app_name)
            .ok_or_else(|| RouterError::BackendNotFound(app_name.to_string()))?;
        if !routes.iter().any(|r| r == address) {
            routes.push(address.to_string());
        }
        Ok(())
    }

    async fn remove_route(&self, app_name: &str, address: &str) -> Result<(), RouterError> {
        self.check("remove_route")?;
        let mut backends = self.backends.write().unwrap_or_else(|e| e.into_inner());
        let routes = backends
            .get_mut(app_name)
            .ok_or_else(|| RouterError::BackendNotFound(app_name.to_string()))?;
        let index = routes
            .iter()
            .position(|r| r == address)
            .ok_or_else(|| RouterError::RouteNotFound(address.to_string()))?;
        routes.remove(index);
        Ok(())
    }

    async fn has_route(&self, app_name: &str, address: &str) -> Result<bool, RouterError> {
        self.check("has_route")?;
        let backends = self.backends.read().unwrap_or_else(|e| e.into_inner());
        Ok(backends
            .get(app_name)
            .map(|routes| routes.iter().any(|r| r == address))
            .unwrap_or(false))
    }
}
