//! Server tag reconciliation loop
//!
//! On every tick:
//!
//! 1. Read tag tracker settings; disabled or incomplete settings end the tick
//! 2. List scopes and reconcile them with bounded concurrency
//! 3. Per scope: check the target role exists, then walk member pages. Each
//!    page is observed, turned into a delta and applied before the next
//!    page is fetched.
//!
//! Ticks never overlap. The stop signal is checked before a scope starts and
//! between pages, so the page being applied always finishes.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::applier::{ApplyReport, DeltaApplier};
use super::delta::{compute_delta, Observation, TagFact};
use super::settings::{ActiveSettings, SettingsProvider};
use crate::lifecycle::{ReadinessGate, StopSignal};
use crate::membership::{Member, MembershipProvider, RoleMutator, Scope};
use crate::types::WardenError;

/// Scheduling and rate tunables
#[derive(Debug, Clone)]
pub struct LoopOptions {
    /// Time between tick starts
    pub period: Duration,
    /// Scopes reconciled at the same time
    pub scope_concurrency: usize,
    /// Role mutations in flight per scope
    pub mutation_concurrency: usize,
    /// Leave bot accounts alone
    pub skip_bots: bool,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(300),
            scope_concurrency: 2,
            mutation_concurrency: 4,
            skip_bots: true,
        }
    }
}

/// Counters for a completed tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub scopes_processed: usize,
    pub scopes_skipped: usize,
    /// Scopes abandoned part way through because a member page failed
    pub scopes_incomplete: usize,
    pub pages: usize,
    pub page_errors: usize,
    pub members_seen: usize,
    pub bots_skipped: usize,
    /// Members whose tag lookup failed this tick
    pub unknown_facts: usize,
    pub granted: usize,
    pub revoked: usize,
    pub failed: usize,
    /// Stop was requested before every scope finished
    pub cancelled: bool,
}

impl TickReport {
    pub fn changes(&self) -> usize {
        self.granted + self.revoked
    }

    fn absorb(&mut self, scope: ScopeReport) {
        match scope.status {
            ScopeStatus::Processed => self.scopes_processed += 1,
            ScopeStatus::Skipped => self.scopes_skipped += 1,
            ScopeStatus::Incomplete => self.scopes_incomplete += 1,
            ScopeStatus::Cancelled => {}
        }
        self.cancelled |= scope.cancelled || scope.status == ScopeStatus::Cancelled;
        self.pages += scope.pages;
        self.page_errors += scope.page_errors;
        self.members_seen += scope.members_seen;
        self.bots_skipped += scope.bots_skipped;
        self.unknown_facts += scope.unknown_facts;
        self.granted += scope.applied.granted;
        self.revoked += scope.applied.revoked;
        self.failed += scope.applied.failed;
    }
}

/// How a tick ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Disabled,
    /// Enabled but missing the tag or role; nothing was touched
    Misconfigured(String),
    /// A previous tick was still running
    Overlapped,
    /// Scopes could not be listed
    Failed(String),
    Completed(TickReport),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ScopeStatus {
    #[default]
    Processed,
    Skipped,
    Incomplete,
    Cancelled,
}

#[derive(Debug, Default)]
struct ScopeReport {
    status: ScopeStatus,
    cancelled: bool,
    pages: usize,
    page_errors: usize,
    members_seen: usize,
    bots_skipped: usize,
    unknown_facts: usize,
    applied: ApplyReport,
}

impl ScopeReport {
    fn with_status(status: ScopeStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }
}

/// Periodic reconciliation of the tag role across all scopes
pub struct ReconciliationLoop {
    provider: Arc<dyn MembershipProvider>,
    settings: Arc<dyn SettingsProvider>,
    applier: DeltaApplier,
    options: LoopOptions,
    stop: StopSignal,
    tick_guard: Mutex<()>,
}

impl ReconciliationLoop {
    pub fn new(
        provider: Arc<dyn MembershipProvider>,
        mutator: Arc<dyn RoleMutator>,
        settings: Arc<dyn SettingsProvider>,
        options: LoopOptions,
    ) -> Self {
        Self {
            provider,
            settings,
            applier: DeltaApplier::new(mutator, options.mutation_concurrency),
            options,
            stop: StopSignal::new(),
            tick_guard: Mutex::new(()),
        }
    }

    /// Share an externally owned stop signal
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn options(&self) -> &LoopOptions {
        &self.options
    }

    /// Spawn the scheduler. The first tick runs once `readiness` opens.
    pub fn start(self: Arc<Self>, readiness: ReadinessGate) -> LoopHandle {
        info!(
            period_secs = self.options.period.as_secs(),
            scope_concurrency = self.options.scope_concurrency,
            mutation_concurrency = self.options.mutation_concurrency,
            "Starting tag tracker"
        );

        let stop = self.stop.clone();
        let tracker = Arc::clone(&self);
        let join = tokio::spawn(async move {
            tokio::select! {
                _ = readiness.wait_ready() => {}
                _ = tracker.stop.stopped() => {
                    info!("Tag tracker stopped before host became ready");
                    return;
                }
            }

            let period = tracker.options.period;
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = tracker.stop.stopped() => break,
                }

                let started = Instant::now();
                let outcome = tracker.run_once().await;
                log_outcome(&outcome, started.elapsed());

                if started.elapsed() >= period {
                    warn!(
                        elapsed_secs = started.elapsed().as_secs(),
                        period_secs = period.as_secs(),
                        "Tag check overran its period, missed ticks skipped"
                    );
                }

                if tracker.stop.is_stopped() {
                    break;
                }
            }

            info!("Tag tracker stopped");
        });

        LoopHandle { stop, join }
    }

    /// Run one tick now. Returns `Overlapped` if a tick is already running.
    pub async fn run_once(&self) -> TickOutcome {
        let Ok(_guard) = self.tick_guard.try_lock() else {
            warn!("Previous tag check still running, skipping this tick");
            return TickOutcome::Overlapped;
        };

        info!("Starting tag check");

        let active = match self.settings.tag_tracker().resolve() {
            Ok(Some(active)) => active,
            Ok(None) => {
                info!("Tag tracker is disabled in the configuration");
                return TickOutcome::Disabled;
            }
            Err(e) => {
                warn!(error = %e, "Aborting tag check");
                return TickOutcome::Misconfigured(e.to_string());
            }
        };

        let scopes = match self.provider.list_scopes().await {
            Ok(scopes) => scopes,
            Err(e) => {
                error!(error = %e, "Failed to list guilds, skipping tag check");
                return TickOutcome::Failed(e.to_string());
            }
        };

        let active = &active;
        let scope_reports: Vec<ScopeReport> = stream::iter(scopes)
            .map(|scope| self.reconcile_scope(scope, active))
            .buffer_unordered(self.options.scope_concurrency.max(1))
            .collect()
            .await;

        let mut report = TickReport::default();
        for scope in scope_reports {
            report.absorb(scope);
        }

        info!(
            scopes = report.scopes_processed,
            incomplete = report.scopes_incomplete,
            granted = report.granted,
            revoked = report.revoked,
            failed = report.failed,
            "Tag check finished"
        );
        TickOutcome::Completed(report)
    }

    async fn reconcile_scope(&self, scope: Scope, active: &ActiveSettings) -> ScopeReport {
        if self.stop.is_stopped() {
            debug!(scope = %scope.id, "Stop requested, not starting scope");
            return ScopeReport::with_status(ScopeStatus::Cancelled);
        }

        match self.provider.scope_has_role(&scope, active.role_id).await {
            Ok(true) => {}
            Ok(false) => {
                let e = WardenError::RoleNotFound {
                    scope: scope.name.clone(),
                    role: active.role_id.to_string(),
                };
                warn!(scope = %scope.id, error = %e, "Skipping guild");
                return ScopeReport::with_status(ScopeStatus::Skipped);
            }
            Err(e) => {
                warn!(scope = %scope.id, error = %e, "Could not resolve tag role, skipping guild");
                return ScopeReport::with_status(ScopeStatus::Skipped);
            }
        }

        info!(scope = %scope.id, name = %scope.name, "Checking tags in guild");

        let mut report = ScopeReport::default();
        let mut cursor = None;

        loop {
            let page = match self.provider.fetch_members_page(&scope, cursor.as_ref()).await {
                Ok(page) => page,
                Err(e) => {
                    error!(scope = %scope.id, error = %e, "Failed to fetch member page, abandoning guild for this tick");
                    report.page_errors += 1;
                    report.status = ScopeStatus::Incomplete;
                    break;
                }
            };
            report.pages += 1;

            let observations = self.observe(&page.members, active, &mut report).await;
            let delta = compute_delta(&observations, &active.server_tag);
            if !delta.is_empty() {
                let applied = self.applier.apply(&scope, active.role_id, &delta).await;
                report.applied.add(applied);
            }

            match page.next {
                Some(next) if self.stop.is_stopped() => {
                    debug!(scope = %scope.id, cursor = %next.0, "Stop requested between pages");
                    report.cancelled = true;
                    break;
                }
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        report
    }

    /// Look up each member's tag. Lookups run one at a time within a page.
    async fn observe(
        &self,
        members: &[Member],
        active: &ActiveSettings,
        report: &mut ScopeReport,
    ) -> Vec<Observation> {
        let mut observations = Vec::with_capacity(members.len());

        for member in members {
            report.members_seen += 1;
            if member.is_bot && self.options.skip_bots {
                report.bots_skipped += 1;
                continue;
            }

            let fact = match self.provider.fetch_member_profile(member.id).await {
                Ok(profile) => TagFact::Known(profile.tag),
                Err(WardenError::MemberNotFound(_)) => {
                    warn!(member = %member.id, name = %member.name, "Could not fetch user profile, skipping");
                    TagFact::Unknown
                }
                Err(e) if e.is_per_member() => {
                    warn!(member = %member.id, name = %member.name, error = %e, "Tag lookup failed, leaving member unchanged");
                    TagFact::Unknown
                }
                Err(e) => {
                    error!(member = %member.id, name = %member.name, error = %e, "Error while checking tag");
                    TagFact::Unknown
                }
            };

            if fact == TagFact::Unknown {
                report.unknown_facts += 1;
            }

            observations.push(Observation {
                member: member.id,
                has_role: member.has_role(active.role_id),
                fact,
            });
        }

        observations
    }
}

fn log_outcome(outcome: &TickOutcome, elapsed: Duration) {
    match outcome {
        TickOutcome::Completed(report) => debug!(
            elapsed_ms = elapsed.as_millis() as u64,
            members = report.members_seen,
            unknown = report.unknown_facts,
            cancelled = report.cancelled,
            "Tag tick complete"
        ),
        other => debug!(outcome = ?other, "Tag tick ended early"),
    }
}

/// Owned handle to a running loop
pub struct LoopHandle {
    stop: StopSignal,
    join: JoinHandle<()>,
}

impl LoopHandle {
    /// Request a cooperative stop
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Stop and wait for the in-flight page to finish
    pub async fn stop_and_join(self) {
        self.stop.stop();
        if let Err(e) = self.join.await {
            error!(error = %e, "Tag tracker task failed");
        }
    }
}
