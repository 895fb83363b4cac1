//! Delta computation
//!
//! Pure: given what each member currently holds and what the membership
//! provider reports about them, decide who gains and who loses the role.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::membership::MemberId;

/// What the provider reported about a member's tag this tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagFact {
    /// Lookup succeeded; `None` means no tag is displayed
    Known(Option<String>),
    /// Lookup failed. Never treated as "no tag".
    Unknown,
}

impl TagFact {
    /// `Some(true)` when the tag equals `server_tag` exactly (case-sensitive),
    /// `None` when the fact is unknown.
    pub fn matches(&self, server_tag: &str) -> Option<bool> {
        match self {
            Self::Known(tag) => Some(tag.as_deref() == Some(server_tag)),
            Self::Unknown => None,
        }
    }
}

/// One member's current role state and reported fact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub member: MemberId,
    pub has_role: bool,
    pub fact: TagFact,
}

/// Role changes needed for one scope. The two sets are disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Delta {
    pub grant: BTreeSet<MemberId>,
    pub revoke: BTreeSet<MemberId>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.grant.is_empty() && self.revoke.is_empty()
    }

    pub fn len(&self) -> usize {
        self.grant.len() + self.revoke.len()
    }
}

/// grant = tagged members without the role, revoke = untagged members with
/// it. Members with an unknown fact land in neither set.
pub fn compute_delta<'a>(
    observations: impl IntoIterator<Item = &'a Observation>,
    server_tag: &str,
) -> Delta {
    let mut delta = Delta::default();

    for obs in observations {
        match (obs.fact.matches(server_tag), obs.has_role) {
            (Some(true), false) => {
                delta.grant.insert(obs.member);
            }
            (Some(false), true) => {
                delta.revoke.insert(obs.member);
            }
            _ => {}
        }
    }

    delta
}
