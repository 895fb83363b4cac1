//! Pool bounds and timeouts for a store client

use std::time::Duration;

use crate::types::{Result, WardenError};

/// Default interval between liveness probes of a ready handle
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Immutable pool configuration, supplied once when a handle is built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum connections held by the client pool
    pub max_pool_size: u32,
    /// Connections kept open even when idle
    pub min_pool_size: u32,
    /// Idle connections older than this are closed
    pub max_idle_time: Duration,
    /// How long to wait for a suitable server before failing an operation
    pub server_selection_timeout: Duration,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Upper bound on a single round trip, used as the probe deadline
    pub socket_timeout: Duration,
    pub retry_writes: bool,
    pub retry_reads: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 100,
            min_pool_size: 10,
            max_idle_time: Duration::from_millis(30_000),
            server_selection_timeout: Duration::from_millis(5_000),
            connect_timeout: Duration::from_millis(10_000),
            socket_timeout: Duration::from_millis(20_000),
            retry_writes: true,
            retry_reads: true,
        }
    }
}

impl PoolConfig {
    /// Check the bounds invariant (min <= max) and that every timeout is positive
    pub fn validate(&self) -> Result<()> {
        if self.max_pool_size == 0 {
            return Err(WardenError::Configuration(
                "max pool size must be greater than zero".to_string(),
            ));
        }

        if self.min_pool_size > self.max_pool_size {
            return Err(WardenError::Configuration(format!(
                "min pool size ({}) exceeds max pool size ({})",
                self.min_pool_size, self.max_pool_size
            )));
        }

        let timeouts = [
            ("max idle time", self.max_idle_time),
            ("server selection timeout", self.server_selection_timeout),
            ("connect timeout", self.connect_timeout),
            ("socket timeout", self.socket_timeout),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(WardenError::Configuration(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PoolConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_pool_size, 100);
        assert_eq!(config.min_pool_size, 10);
        assert!(config.retry_writes && config.retry_reads);
    }

    #[test]
    fn test_min_above_max_rejected() {
        let config = PoolConfig {
            min_pool_size: 20,
            max_pool_size: 10,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, WardenError::Configuration(_)));
        assert!(err.to_string().contains("min pool size"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = PoolConfig {
            connect_timeout: Duration::ZERO,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("connect timeout"));
    }

    #[test]
    fn test_equal_bounds_allowed() {
        let config = PoolConfig {
            min_pool_size: 5,
            max_pool_size: 5,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
