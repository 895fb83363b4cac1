//! Store handle management
//!
//! Pooled, health-checked access to the backing store. Query logic lives
//! with the features that need it; this module only owns client lifecycle.

pub mod handle;
pub mod health;
pub mod mongo;
pub mod pool;
pub mod registry;

pub use handle::{HandleStatus, ResourceHandle, StoreConnector};
pub use health::{HandleState, HealthMonitor, ProbeOutcome};
pub use mongo::{MongoConnector, MongoHandle};
pub use pool::{PoolConfig, DEFAULT_HEALTH_CHECK_INTERVAL};
pub use registry::{PoolRegistry, PRIMARY};
