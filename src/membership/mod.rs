//! Membership facts and role mutation seams
//!
//! The reconciliation loop only sees these traits. `discord` talks to the
//! Discord REST API, paced by `pacing`; `memory` is an in-process directory
//! for tests and dry runs.

pub mod discord;
pub mod memory;
pub mod pacing;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::types::Result;

pub use discord::{DiscordClient, DiscordConfig};
pub use memory::InMemoryDirectory;

macro_rules! snowflake_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

snowflake_id!(
    /// Guild (tenant) identifier
    ScopeId
);
snowflake_id!(
    /// User identifier, shared between guild membership and profiles
    MemberId
);
snowflake_id!(RoleId);

/// One independently reconciled partition, e.g. a guild
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub id: ScopeId,
    pub name: String,
}

impl Scope {
    pub fn new(id: impl Into<ScopeId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A member as listed in a scope's membership feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    pub is_bot: bool,
    pub roles: HashSet<RoleId>,
}

impl Member {
    pub fn new(id: impl Into<MemberId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_bot: false,
            roles: HashSet::new(),
        }
    }

    pub fn with_role(mut self, role: RoleId) -> Self {
        self.roles.insert(role);
        self
    }

    pub fn bot(mut self) -> Self {
        self.is_bot = true;
        self
    }

    pub fn has_role(&self, role: RoleId) -> bool {
        self.roles.contains(&role)
    }
}

/// Opaque position in a membership feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberCursor(pub String);

/// One page of a membership feed. `next` is `None` on the last page.
#[derive(Debug, Clone, Default)]
pub struct MemberPage {
    pub members: Vec<Member>,
    pub next: Option<MemberCursor>,
}

/// Externally reported facts about a user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberProfile {
    /// Server tag the user currently displays, if any
    pub tag: Option<String>,
}

/// Read access to scopes, members and profiles
#[async_trait]
pub trait MembershipProvider: Send + Sync {
    async fn list_scopes(&self) -> Result<Vec<Scope>>;

    /// Whether `role` still exists in `scope`
    async fn scope_has_role(&self, scope: &Scope, role: RoleId) -> Result<bool>;

    async fn fetch_members_page(
        &self,
        scope: &Scope,
        cursor: Option<&MemberCursor>,
    ) -> Result<MemberPage>;

    /// Returns `WardenError::MemberNotFound` when the profile does not exist
    async fn fetch_member_profile(&self, member: MemberId) -> Result<MemberProfile>;
}

/// Capability to change role assignment. Each call fails independently.
#[async_trait]
pub trait RoleMutator: Send + Sync {
    async fn grant_role(&self, scope: &Scope, member: MemberId, role: RoleId) -> Result<()>;

    async fn revoke_role(&self, scope: &Scope, member: MemberId, role: RoleId) -> Result<()>;
}
