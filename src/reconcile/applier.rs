//! Applies a delta with per-member error isolation
//!
//! Every grant and revoke is attempted independently with a bounded number
//! in flight. Failures are logged and counted; nothing is rolled back, the
//! next tick recomputes and repairs whatever was left behind.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::delta::Delta;
use crate::membership::{MemberId, RoleId, RoleMutator, Scope};

/// Counts from applying one delta
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub granted: usize,
    pub revoked: usize,
    pub failed: usize,
}

impl ApplyReport {
    pub fn add(&mut self, other: ApplyReport) {
        self.granted += other.granted;
        self.revoked += other.revoked;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Copy)]
enum Change {
    Grant(MemberId),
    Revoke(MemberId),
}

/// Applies grant/revoke sets through a `RoleMutator`
pub struct DeltaApplier {
    mutator: Arc<dyn RoleMutator>,
    concurrency: usize,
}

impl DeltaApplier {
    pub fn new(mutator: Arc<dyn RoleMutator>, concurrency: usize) -> Self {
        Self {
            mutator,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn apply(&self, scope: &Scope, role: RoleId, delta: &Delta) -> ApplyReport {
        let changes: Vec<Change> = delta
            .grant
            .iter()
            .map(|m| Change::Grant(*m))
            .chain(delta.revoke.iter().map(|m| Change::Revoke(*m)))
            .collect();

        let results: Vec<(Change, crate::types::Result<()>)> = stream::iter(changes)
            .map(|change| {
                let mutator = Arc::clone(&self.mutator);
                let scope = scope.clone();
                async move {
                    let result = match change {
                        Change::Grant(member) => mutator.grant_role(&scope, member, role).await,
                        Change::Revoke(member) => mutator.revoke_role(&scope, member, role).await,
                    };
                    (change, result)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = ApplyReport::default();
        for (change, result) in results {
            match (change, result) {
                (Change::Grant(member), Ok(())) => {
                    report.granted += 1;
                    info!(scope = %scope.id, member = %member, role = %role, "Granted tag role");
                }
                (Change::Revoke(member), Ok(())) => {
                    report.revoked += 1;
                    info!(scope = %scope.id, member = %member, role = %role, "Revoked tag role");
                }
                (Change::Grant(member), Err(e)) => {
                    report.failed += 1;
                    warn!(scope = %scope.id, member = %member, error = %e, "Failed to grant tag role");
                }
                (Change::Revoke(member), Err(e)) => {
                    report.failed += 1;
                    warn!(scope = %scope.id, member = %member, error = %e, "Failed to revoke tag role");
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::{InMemoryDirectory, Member, ScopeId};
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const GUILD: ScopeId = ScopeId(1);
    const ROLE: RoleId = RoleId(500);

    #[tokio::test]
    async fn test_failure_does_not_block_other_members() {
        let dir = Arc::new(
            InMemoryDirectory::new()
                .with_scope(Scope::new(GUILD, "guild"), [ROLE])
                .with_member(GUILD, Member::new(1u64, "m1"))
                .with_member(GUILD, Member::new(2u64, "m2").with_role(ROLE))
                .with_failing_mutation(MemberId(1)),
        );
        let applier = DeltaApplier::new(dir.clone(), 2);

        let delta = Delta {
            grant: BTreeSet::from([MemberId(1)]),
            revoke: BTreeSet::from([MemberId(2)]),
        };
        let report = applier.apply(&Scope::new(GUILD, "guild"), ROLE, &delta).await;

        assert_eq!(
            report,
            ApplyReport {
                granted: 0,
                revoked: 1,
                failed: 1
            }
        );
        assert!(dir.member_roles(GUILD, MemberId(2)).await.unwrap().is_empty());
    }

    /// Mutator that succeeds slowly and records the most calls seen in flight
    #[derive(Default)]
    struct SlowMutator {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl SlowMutator {
        async fn call(&self) -> crate::types::Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl RoleMutator for SlowMutator {
        async fn grant_role(&self, _: &Scope, _: MemberId, _: RoleId) -> crate::types::Result<()> {
            self.call().await
        }

        async fn revoke_role(&self, _: &Scope, _: MemberId, _: RoleId) -> crate::types::Result<()> {
            self.call().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutations_in_flight_are_bounded() {
        let mutator = Arc::new(SlowMutator::default());
        let applier = DeltaApplier::new(mutator.clone(), 3);

        let delta = Delta {
            grant: (1..=7u64).map(MemberId).collect(),
            revoke: (8..=10u64).map(MemberId).collect(),
        };
        let report = applier.apply(&Scope::new(GUILD, "guild"), ROLE, &delta).await;

        assert_eq!(report.granted, 7);
        assert_eq!(report.revoked, 3);
        assert_eq!(mutator.calls.load(Ordering::SeqCst), 10);
        assert_eq!(mutator.peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_empty_delta_makes_no_calls() {
        let dir = Arc::new(InMemoryDirectory::new().with_scope(Scope::new(GUILD, "guild"), [ROLE]));
        let applier = DeltaApplier::new(dir.clone(), 0);

        let report = applier
            .apply(&Scope::new(GUILD, "guild"), ROLE, &Delta::default())
            .await;
        assert_eq!(report, ApplyReport::default());
        assert!(dir.mutations().await.is_empty());
    }

    #[test]
    fn test_report_add() {
        let mut total = ApplyReport::default();
        total.add(ApplyReport {
            granted: 2,
            revoked: 1,
            failed: 0,
        });
        total.add(ApplyReport {
            granted: 0,
            revoked: 0,
            failed: 3,
        });
        assert_eq!(total.granted, 2);
        assert_eq!(total.failed, 3);
    }
}
