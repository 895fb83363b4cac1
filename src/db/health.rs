//! Liveness bookkeeping for store handles
//!
//! Pure decisions only: whether a probe is due, and what state a probe
//! outcome leads to. The handle performs the probe itself on the calling
//! path, so nothing here owns a thread or a timer.

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Lifecycle state of a resource handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleState {
    /// No client has been constructed yet
    Uninitialized,
    /// A client is being constructed and probed
    Initializing,
    /// Last probe succeeded within the staleness window
    Ready,
    /// Client exists but the most recent probe failed
    Degraded,
    /// Client released; the next acquisition starts over
    Closed,
}

/// Result of a single liveness probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy,
    Failed,
}

/// Decides when a probe is due and classifies its result
#[derive(Debug, Clone, Copy)]
pub struct HealthMonitor {
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// A probe is due when none has ever succeeded or the last success is
    /// strictly older than the interval.
    pub fn probe_due(&self, now: Instant, last_check: Option<Instant>) -> bool {
        match last_check {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.interval,
        }
    }

    /// State and last-check timestamp after a probe finishes at `now`.
    /// Failures keep the previous timestamp.
    pub fn after_probe(
        &self,
        outcome: ProbeOutcome,
        now: Instant,
        last_check: Option<Instant>,
    ) -> (HandleState, Option<Instant>) {
        match outcome {
            ProbeOutcome::Healthy => (HandleState::Ready, Some(now)),
            ProbeOutcome::Failed => (HandleState::Degraded, last_check),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_due_without_history() {
        let monitor = HealthMonitor::new(Duration::from_secs(30));
        assert!(monitor.probe_due(Instant::now(), None));
    }

    #[test]
    fn test_probe_due_respects_interval() {
        let monitor = HealthMonitor::new(Duration::from_secs(30));
        let last = Instant::now();

        assert!(!monitor.probe_due(last + Duration::from_secs(10), Some(last)));
        assert!(!monitor.probe_due(last + Duration::from_secs(30), Some(last)));
        assert!(monitor.probe_due(last + Duration::from_secs(31), Some(last)));
    }

    #[test]
    fn test_after_probe_transitions() {
        let monitor = HealthMonitor::new(Duration::from_secs(30));
        let earlier = Instant::now();
        let now = earlier + Duration::from_secs(45);

        let (state, last) = monitor.after_probe(ProbeOutcome::Healthy, now, Some(earlier));
        assert_eq!(state, HandleState::Ready);
        assert_eq!(last, Some(now));

        let (state, last) = monitor.after_probe(ProbeOutcome::Failed, now, Some(earlier));
        assert_eq!(state, HandleState::Degraded);
        assert_eq!(last, Some(earlier));
    }
}
