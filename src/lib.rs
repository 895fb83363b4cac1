//! Tag Warden - server tag role sync for Discord guilds
//!
//! Periodically grants a configured role to guild members who display the
//! configured server tag and revokes it from those who no longer do.
//!
//! ## Components
//!
//! - **db**: health-checked, lazily initialized MongoDB handles
//! - **membership**: provider and mutator seams, Discord REST adapter
//! - **reconcile**: delta computation and the periodic reconciliation loop
//! - **lifecycle**: readiness gate and cooperative stop signal

pub mod config;
pub mod db;
pub mod lifecycle;
pub mod membership;
pub mod reconcile;
pub mod types;

pub use config::Args;
pub use types::{Result, WardenError};
