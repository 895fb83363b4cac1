//! MongoDB connector for resource handles
//!
//! Builds a driver `Client` from a URI plus `PoolConfig`, probes it with the
//! `ping` admin command, and shuts it down on close. The driver owns the
//! actual connection pool; this only configures its bounds.

use async_trait::async_trait;
use bson::doc;
use mongodb::{options::ClientOptions, Client};
use tracing::{debug, info};

use super::handle::{ResourceHandle, StoreConnector};
use super::pool::PoolConfig;
use crate::types::{Result, WardenError};

/// Handle type used by the binary for MongoDB
pub type MongoHandle = ResourceHandle<MongoConnector>;

/// Connector that produces pooled MongoDB clients
#[derive(Debug, Clone)]
pub struct MongoConnector {
    app_name: String,
}

impl MongoConnector {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }

    /// Driver options with the pool bounds applied on top of the URI
    pub async fn client_options(&self, uri: &str, pool: &PoolConfig) -> Result<ClientOptions> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| WardenError::Configuration(format!("Invalid MongoDB URI: {}", e)))?;

        options.app_name = Some(self.app_name.clone());
        options.max_pool_size = Some(pool.max_pool_size);
        options.min_pool_size = Some(pool.min_pool_size);
        options.max_idle_time = Some(pool.max_idle_time);
        options.server_selection_timeout = Some(pool.server_selection_timeout);
        options.connect_timeout = Some(pool.connect_timeout);
        options.retry_writes = Some(pool.retry_writes);
        options.retry_reads = Some(pool.retry_reads);

        Ok(options)
    }
}

impl Default for MongoConnector {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_NAME"))
    }
}

#[async_trait]
impl StoreConnector for MongoConnector {
    type Client = Client;

    async fn construct(&self, uri: &str, pool: &PoolConfig) -> Result<Client> {
        let options = self.client_options(uri, pool).await?;

        info!(
            hosts = options.hosts.len(),
            max_pool_size = pool.max_pool_size,
            min_pool_size = pool.min_pool_size,
            "Creating MongoDB client"
        );

        Client::with_options(options)
            .map_err(|e| WardenError::Connectivity(format!("Failed to create MongoDB client: {}", e)))
    }

    async fn ping(&self, client: &Client) -> Result<()> {
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| WardenError::Connectivity(format!("MongoDB ping failed: {}", e)))?;

        debug!("MongoDB ping succeeded");
        Ok(())
    }

    async fn close(&self, client: Client) {
        client.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    // Probing a live server needs a running MongoDB instance; only the
    // option mapping is covered here.

    #[tokio::test]
    async fn test_pool_bounds_applied_to_options() {
        let connector = MongoConnector::new("tag-warden-test");
        let pool = PoolConfig {
            max_pool_size: 40,
            min_pool_size: 4,
            server_selection_timeout: Duration::from_secs(2),
            retry_writes: false,
            ..Default::default()
        };

        let options = connector
            .client_options("mongodb://localhost:27017", &pool)
            .await
            .unwrap();

        assert_eq!(options.app_name.as_deref(), Some("tag-warden-test"));
        assert_eq!(options.max_pool_size, Some(40));
        assert_eq!(options.min_pool_size, Some(4));
        assert_eq!(options.server_selection_timeout, Some(Duration::from_secs(2)));
        assert_eq!(options.retry_writes, Some(false));
        assert_eq!(options.retry_reads, Some(true));
    }

    #[tokio::test]
    async fn test_invalid_uri_is_configuration_error() {
        let connector = MongoConnector::default();
        let err = connector
            .client_options("not-a-mongo-uri", &PoolConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::Configuration(_)));
    }
}
