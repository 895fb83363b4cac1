//! Named store handles (primary, secondary, ...)

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::handle::{HandleStatus, ResourceHandle, StoreConnector};
use crate::types::WardenError;

/// Name of the handle every deployment is expected to register
pub const PRIMARY: &str = "primary";

/// Registry of independently managed handles keyed by connection name
pub struct PoolRegistry<S: StoreConnector> {
    handles: DashMap<String, Arc<ResourceHandle<S>>>,
}

impl<S: StoreConnector> PoolRegistry<S> {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
        }
    }

    /// Register a handle under its own name, replacing any previous one
    pub fn register(&self, handle: ResourceHandle<S>) -> Arc<ResourceHandle<S>> {
        let name = handle.name().to_string();
        let handle = Arc::new(handle);
        if self.handles.insert(name.clone(), Arc::clone(&handle)).is_some() {
            warn!(connection = %name, "Replaced existing connection pool registration");
        } else {
            info!(connection = %name, "Connection pool configured");
        }
        handle
    }

    pub fn get(&self, name: &str) -> Option<Arc<ResourceHandle<S>>> {
        self.handles.get(name).map(|h| Arc::clone(h.value()))
    }

    pub fn primary(&self) -> Option<Arc<ResourceHandle<S>>> {
        self.get(PRIMARY)
    }

    /// Initialize every handle. Failures are logged and returned per name;
    /// the failing handles stay uninitialized and retry on next access.
    pub async fn initialize_all(&self) -> Vec<(String, WardenError)> {
        let mut failures = Vec::new();

        for handle in self.snapshot() {
            match handle.initialize().await {
                Ok(_) => info!(connection = %handle.name(), "Initialized connection pool"),
                Err(e) => {
                    warn!(connection = %handle.name(), error = %e, "Connection pool unavailable at startup");
                    failures.push((handle.name().to_string(), e));
                }
            }
        }

        failures
    }

    /// Status of every handle, ordered by name
    pub async fn statuses(&self) -> Vec<HandleStatus> {
        let mut statuses = Vec::new();
        for handle in self.snapshot() {
            statuses.push(handle.status().await);
        }
        statuses
    }

    pub async fn close_all(&self) {
        for handle in self.snapshot() {
            handle.close().await;
        }
    }

    /// Clone the handles out so no map guard is held across an await
    fn snapshot(&self) -> Vec<Arc<ResourceHandle<S>>> {
        let mut handles: Vec<_> = self.handles.iter().map(|e| Arc::clone(e.value())).collect();
        handles.sort_by(|a, b| a.name().cmp(b.name()));
        handles
    }
}

impl<S: StoreConnector> Default for PoolRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}
