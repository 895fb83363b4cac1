//! Tag role reconciliation
//!
//! Keeps a configured role assigned to exactly the members whose profile
//! shows the configured server tag, in every scope the bot can see.

pub mod applier;
pub mod delta;
pub mod settings;
pub mod tracker;

pub use applier::{ApplyReport, DeltaApplier};
pub use delta::{compute_delta, Delta, Observation, TagFact};
pub use settings::{ActiveSettings, SettingsProvider, StaticSettings, TagTrackerSettings};
pub use tracker::{LoopHandle, LoopOptions, ReconciliationLoop, TickOutcome, TickReport};
