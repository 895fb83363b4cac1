//! Lazily-initialized, health-gated handle to a shared store client
//!
//! A `ResourceHandle` owns at most one client built by a `StoreConnector`.
//! The client is constructed on first use, probed before it is handed out,
//! and re-probed whenever the last successful probe is older than the
//! health-check interval.
//!
//! ## Concurrency
//!
//! - Callers that find the handle `Ready` inside the staleness window only
//!   take the shared read lock and never wait on each other.
//! - Initialization, re-probing and closing are serialized by a per-handle
//!   transition mutex. Callers queued behind it re-check the state once they
//!   get the lock, so N concurrent first-time callers cause one construction
//!   and one probe.
//! - Every finished attempt bumps an attempt counter. A caller that queued
//!   behind an attempt that failed gets that failure instead of starting its
//!   own, so an outage costs one probe per wave of callers.
//! - The state lock is never held across a network call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::health::{HandleState, HealthMonitor, ProbeOutcome};
use super::pool::{PoolConfig, DEFAULT_HEALTH_CHECK_INTERVAL};
use crate::types::{Result, WardenError};

/// Builds, probes and tears down clients for one kind of store
///
/// Implementations must not retry inside `ping`; retry policy belongs to
/// whoever calls `ResourceHandle::get_client` again.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Shared client object. Cloning must be cheap and share the same pool.
    type Client: Clone + Send + Sync + 'static;

    /// Construct a client bound by the pool configuration
    async fn construct(&self, uri: &str, pool: &PoolConfig) -> Result<Self::Client>;

    /// Minimal round trip proving the store is reachable
    async fn ping(&self, client: &Self::Client) -> Result<()>;

    /// Release the client and its connections
    async fn close(&self, client: Self::Client);
}

struct HandleInner<C> {
    state: HandleState,
    client: Option<C>,
    /// Monotonic time of the last successful probe
    last_check: Option<Instant>,
    /// Wall-clock time of the last successful probe, for status reporting
    last_healthy_at: Option<DateTime<Utc>>,
    /// Completed initialization or probe attempts
    attempts: u64,
    /// Error of the most recent attempt, `None` if it succeeded
    last_failure: Option<String>,
}

impl<C> HandleInner<C> {
    fn new() -> Self {
        Self {
            state: HandleState::Uninitialized,
            client: None,
            last_check: None,
            last_healthy_at: None,
            attempts: 0,
            last_failure: None,
        }
    }

    /// Drop the client and its health history, keeping attempt bookkeeping
    fn reset(&mut self, state: HandleState) -> Option<C> {
        self.state = state;
        self.last_check = None;
        self.last_healthy_at = None;
        self.client.take()
    }

    fn finish_attempt(&mut self, failure: Option<String>) {
        self.attempts += 1;
        self.last_failure = failure;
    }

    /// The failure of an attempt that completed after `seen` was read
    fn failure_since(&self, seen: u64) -> Option<WardenError> {
        if self.attempts == seen {
            return None;
        }
        self.last_failure.clone().map(WardenError::Connectivity)
    }
}

/// Point-in-time view of a handle for logs and health endpoints
#[derive(Debug, Clone, Serialize)]
pub struct HandleStatus {
    pub name: String,
    pub state: HandleState,
    pub last_healthy_at: Option<DateTime<Utc>>,
    pub health_check_interval_secs: u64,
}

/// Health-gated owner of a single store client
pub struct ResourceHandle<S: StoreConnector> {
    name: String,
    uri: String,
    pool: PoolConfig,
    monitor: HealthMonitor,
    connector: S,
    inner: RwLock<HandleInner<S::Client>>,
    transition: Mutex<()>,
}

impl<S: StoreConnector> ResourceHandle<S> {
    /// Create an uninitialized handle. Nothing connects until first use.
    pub fn new(
        name: impl Into<String>,
        uri: impl Into<String>,
        pool: PoolConfig,
        connector: S,
    ) -> Result<Self> {
        pool.validate()?;

        Ok(Self {
            name: name.into(),
            uri: uri.into(),
            pool,
            monitor: HealthMonitor::new(DEFAULT_HEALTH_CHECK_INTERVAL),
            connector,
            inner: RwLock::new(HandleInner::new()),
            transition: Mutex::new(()),
        })
    }

    /// Shorten the staleness window so tests can cross it quickly
    #[cfg(test)]
    pub(crate) fn with_health_check_interval(mut self, interval: std::time::Duration) -> Self {
        self.monitor = HealthMonitor::new(interval);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool_config(&self) -> &PoolConfig {
        &self.pool
    }

    pub async fn state(&self) -> HandleState {
        self.inner.read().await.state
    }

    pub async fn status(&self) -> HandleStatus {
        let inner = self.inner.read().await;
        HandleStatus {
            name: self.name.clone(),
            state: inner.state,
            last_healthy_at: inner.last_healthy_at,
            health_check_interval_secs: self.monitor.interval().as_secs(),
        }
    }

    /// Construct and probe the client if there is none.
    ///
    /// While `Ready` this returns the existing client without probing. A
    /// `Degraded` handle is re-probed.
    pub async fn initialize(&self) -> Result<S::Client> {
        let seen = self.inner.read().await.attempts;
        let _guard = self.transition.lock().await;

        let existing = {
            let inner = self.inner.read().await;
            if inner.state == HandleState::Ready {
                if let Some(client) = &inner.client {
                    return Ok(client.clone());
                }
            }
            if let Some(e) = inner.failure_since(seen) {
                return Err(e);
            }
            inner.client.clone()
        };

        match existing {
            Some(client) => self.probe_locked(client).await,
            None => self.initialize_locked().await,
        }
    }

    /// Get a client that passed a probe within the staleness window.
    ///
    /// Initializes on first use. A failed probe returns `Connectivity` and
    /// leaves the handle `Degraded`; the next call probes again.
    pub async fn get_client(&self) -> Result<S::Client> {
        let (fresh, seen) = self.fresh_client().await;
        if let Some(client) = fresh {
            return Ok(client);
        }

        let _guard = self.transition.lock().await;

        // Another caller may have initialized or probed while we waited
        let existing = {
            let inner = self.inner.read().await;
            if let Some(client) = self.fresh_in(&inner) {
                return Ok(client);
            }
            if let Some(e) = inner.failure_since(seen) {
                debug!(connection = %self.name, "Sharing result of the attempt that just failed");
                return Err(e);
            }
            inner.client.clone()
        };

        match existing {
            Some(client) => self.probe_locked(client).await,
            None => self.initialize_locked().await,
        }
    }

    /// Release the client. Safe to call repeatedly; a later `get_client`
    /// starts from scratch.
    pub async fn close(&self) {
        let _guard = self.transition.lock().await;

        let client = self.inner.write().await.reset(HandleState::Closed);

        match client {
            Some(client) => {
                self.connector.close(client).await;
                info!(connection = %self.name, "Store connection pool closed");
            }
            None => debug!(connection = %self.name, "Store connection pool already closed"),
        }
    }

    /// Client inside the staleness window, with the attempt count it was read at
    async fn fresh_client(&self) -> (Option<S::Client>, u64) {
        let inner = self.inner.read().await;
        (self.fresh_in(&inner), inner.attempts)
    }

    fn fresh_in(&self, inner: &HandleInner<S::Client>) -> Option<S::Client> {
        if inner.state != HandleState::Ready {
            return None;
        }
        if self.monitor.probe_due(Instant::now(), inner.last_check) {
            return None;
        }
        inner.client.clone()
    }

    /// Caller must hold the transition lock
    async fn initialize_locked(&self) -> Result<S::Client> {
        self.inner.write().await.state = HandleState::Initializing;
        info!(connection = %self.name, "Initializing store connection pool");

        let client = match self.connector.construct(&self.uri, &self.pool).await {
            Ok(client) => client,
            Err(e) => {
                let mut inner = self.inner.write().await;
                inner.state = HandleState::Uninitialized;
                inner.finish_attempt(Some(failure_message(&e)));
                error!(connection = %self.name, error = %e, "Failed to construct store client");
                return Err(e);
            }
        };

        if let Err(e) = self.ping(&client).await {
            // Do not keep a client that never proved reachable
            self.connector.close(client).await;
            {
                let mut inner = self.inner.write().await;
                inner.reset(HandleState::Uninitialized);
                inner.finish_attempt(Some(failure_message(&e)));
            }
            error!(connection = %self.name, error = %e, "Initial health check failed");
            return Err(e);
        }

        let mut inner = self.inner.write().await;
        inner.state = HandleState::Ready;
        inner.client = Some(client.clone());
        inner.last_check = Some(Instant::now());
        inner.last_healthy_at = Some(Utc::now());
        inner.finish_attempt(None);
        info!(connection = %self.name, "Store connection pool initialized");

        Ok(client)
    }

    /// Caller must hold the transition lock
    async fn probe_locked(&self, client: S::Client) -> Result<S::Client> {
        let result = self.ping(&client).await;
        let outcome = if result.is_ok() {
            ProbeOutcome::Healthy
        } else {
            ProbeOutcome::Failed
        };

        let mut inner = self.inner.write().await;
        let (state, last_check) = self
            .monitor
            .after_probe(outcome, Instant::now(), inner.last_check);
        inner.state = state;
        inner.last_check = last_check;

        match result {
            Ok(()) => {
                inner.last_healthy_at = Some(Utc::now());
                inner.finish_attempt(None);
                debug!(connection = %self.name, "Store health check passed");
                Ok(client)
            }
            Err(e) => {
                inner.finish_attempt(Some(failure_message(&e)));
                warn!(connection = %self.name, error = %e, "Store health check failed, handle degraded");
                Err(e)
            }
        }
    }

    /// Probe bounded by the socket timeout. Every failure is a connectivity failure.
    async fn ping(&self, client: &S::Client) -> Result<()> {
        match tokio::time::timeout(self.pool.socket_timeout, self.connector.ping(client)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(WardenError::Connectivity(msg))) => Err(WardenError::Connectivity(msg)),
            Ok(Err(e)) => Err(WardenError::Connectivity(format!(
                "health check failed for {}: {}",
                self.name, e
            ))),
            Err(_) => Err(WardenError::Connectivity(format!(
                "health check for {} timed out after {:?}",
                self.name, self.pool.socket_timeout
            ))),
        }
    }
}

fn failure_message(e: &WardenError) -> String {
    match e {
        WardenError::Connectivity(msg) => msg.clone(),
        other => other.to_string(),
    }
}
