//! In-process membership directory
//!
//! Implements both `MembershipProvider` and `RoleMutator` over plain maps so
//! the reconciliation loop can run without a chat platform. Pages are cut by
//! member id, like Discord's `after` cursor.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use tokio::sync::RwLock;

use super::{
    Member, MemberCursor, MemberId, MemberPage, MemberProfile, MembershipProvider, RoleId,
    RoleMutator, Scope, ScopeId,
};
use crate::types::{Result, WardenError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Grant,
    Revoke,
}

/// A role change the directory accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub scope: ScopeId,
    pub member: MemberId,
    pub role: RoleId,
    pub kind: MutationKind,
}

#[derive(Debug, Clone)]
enum ProfileEntry {
    Known(Option<String>),
    LookupFails,
}

struct ScopeEntry {
    scope: Scope,
    roles: HashSet<RoleId>,
    members: BTreeMap<MemberId, Member>,
}

#[derive(Default)]
struct DirectoryState {
    scopes: Vec<ScopeEntry>,
    profiles: HashMap<MemberId, ProfileEntry>,
    failing_mutations: HashSet<MemberId>,
    mutations: Vec<MutationRecord>,
    profile_lookups: usize,
}

impl DirectoryState {
    fn scope(&self, id: ScopeId) -> Option<&ScopeEntry> {
        self.scopes.iter().find(|s| s.scope.id == id)
    }

    fn scope_mut(&mut self, id: ScopeId) -> Option<&mut ScopeEntry> {
        self.scopes.iter_mut().find(|s| s.scope.id == id)
    }
}

/// Map-backed directory of scopes, members and profiles
pub struct InMemoryDirectory {
    state: RwLock<DirectoryState>,
    page_size: usize,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(DirectoryState::default()),
            page_size: 1000,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Add a scope with the roles that exist in it
    pub fn with_scope(mut self, scope: Scope, roles: impl IntoIterator<Item = RoleId>) -> Self {
        self.state.get_mut().scopes.push(ScopeEntry {
            scope,
            roles: roles.into_iter().collect(),
            members: BTreeMap::new(),
        });
        self
    }

    /// Add a member to an existing scope. Unknown scopes are ignored.
    pub fn with_member(mut self, scope: ScopeId, member: Member) -> Self {
        if let Some(entry) = self.state.get_mut().scope_mut(scope) {
            entry.members.insert(member.id, member);
        }
        self
    }

    pub fn with_profile(mut self, member: MemberId, tag: Option<&str>) -> Self {
        self.state
            .get_mut()
            .profiles
            .insert(member, ProfileEntry::Known(tag.map(str::to_string)));
        self
    }

    /// Profile lookups for this member fail with a transient error
    pub fn with_failing_lookup(mut self, member: MemberId) -> Self {
        self.state
            .get_mut()
            .profiles
            .insert(member, ProfileEntry::LookupFails);
        self
    }

    /// Grants and revokes for this member are rejected
    pub fn with_failing_mutation(mut self, member: MemberId) -> Self {
        self.state.get_mut().failing_mutations.insert(member);
        self
    }

    pub async fn set_profile(&self, member: MemberId, tag: Option<&str>) {
        self.state
            .write()
            .await
            .profiles
            .insert(member, ProfileEntry::Known(tag.map(str::to_string)));
    }

    pub async fn clear_failing_mutations(&self) {
        self.state.write().await.failing_mutations.clear();
    }

    pub async fn member_roles(&self, scope: ScopeId, member: MemberId) -> Option<HashSet<RoleId>> {
        let state = self.state.read().await;
        state
            .scope(scope)
            .and_then(|s| s.members.get(&member))
            .map(|m| m.roles.clone())
    }

    pub async fn mutations(&self) -> Vec<MutationRecord> {
        self.state.read().await.mutations.clone()
    }

    pub async fn profile_lookups(&self) -> usize {
        self.state.read().await.profile_lookups
    }

    async fn mutate(
        &self,
        scope: &Scope,
        member: MemberId,
        role: RoleId,
        kind: MutationKind,
    ) -> Result<()> {
        let mut state = self.state.write().await;

        if state.failing_mutations.contains(&member) {
            return Err(WardenError::Mutation {
                member: member.to_string(),
                reason: "missing permissions".to_string(),
            });
        }

        let entry = state
            .scope_mut(scope.id)
            .ok_or_else(|| WardenError::ScopeNotFound(scope.id.to_string()))?;
        if !entry.roles.contains(&role) {
            return Err(WardenError::RoleNotFound {
                scope: scope.id.to_string(),
                role: role.to_string(),
            });
        }
        let target = entry
            .members
            .get_mut(&member)
            .ok_or_else(|| WardenError::Mutation {
                member: member.to_string(),
                reason: "not a member of this scope".to_string(),
            })?;

        match kind {
            MutationKind::Grant => target.roles.insert(role),
            MutationKind::Revoke => target.roles.remove(&role),
        };

        state.mutations.push(MutationRecord {
            scope: scope.id,
            member,
            role,
            kind,
        });
        Ok(())
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MembershipProvider for InMemoryDirectory {
    async fn list_scopes(&self) -> Result<Vec<Scope>> {
        let state = self.state.read().await;
        Ok(state.scopes.iter().map(|s| s.scope.clone()).collect())
    }

    async fn scope_has_role(&self, scope: &Scope, role: RoleId) -> Result<bool> {
        let state = self.state.read().await;
        let entry = state
            .scope(scope.id)
            .ok_or_else(|| WardenError::ScopeNotFound(scope.id.to_string()))?;
        Ok(entry.roles.contains(&role))
    }

    async fn fetch_members_page(
        &self,
        scope: &Scope,
        cursor: Option<&MemberCursor>,
    ) -> Result<MemberPage> {
        let after = match cursor {
            Some(c) => Some(
                c.0.parse::<u64>()
                    .map(MemberId)
                    .map_err(|_| WardenError::Internal(format!("Invalid cursor: {}", c.0)))?,
            ),
            None => None,
        };

        let state = self.state.read().await;
        let entry = state
            .scope(scope.id)
            .ok_or_else(|| WardenError::ScopeNotFound(scope.id.to_string()))?;

        let lower = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        let mut remaining = entry.members.range((lower, Bound::Unbounded));
        let members: Vec<Member> = remaining
            .by_ref()
            .take(self.page_size)
            .map(|(_, m)| m.clone())
            .collect();

        let next = match (remaining.next(), members.last()) {
            (Some(_), Some(last)) => Some(MemberCursor(last.id.to_string())),
            _ => None,
        };

        Ok(MemberPage { members, next })
    }

    async fn fetch_member_profile(&self, member: MemberId) -> Result<MemberProfile> {
        let mut state = self.state.write().await;
        state.profile_lookups += 1;

        match state.profiles.get(&member) {
            Some(ProfileEntry::Known(tag)) => Ok(MemberProfile { tag: tag.clone() }),
            Some(ProfileEntry::LookupFails) => Err(WardenError::MemberLookup {
                member: member.to_string(),
                reason: "profile service unavailable".to_string(),
            }),
            None => Err(WardenError::MemberNotFound(member.to_string())),
        }
    }
}

#[async_trait]
impl RoleMutator for InMemoryDirectory {
    async fn grant_role(&self, scope: &Scope, member: MemberId, role: RoleId) -> Result<()> {
        self.mutate(scope, member, role, MutationKind::Grant).await
    }

    async fn revoke_role(&self, scope: &Scope, member: MemberId, role: RoleId) -> Result<()> {
        self.mutate(scope, member, role, MutationKind::Revoke).await
    }
}
