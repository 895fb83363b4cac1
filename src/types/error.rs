//! Error types for tag-warden
//!
//! Failures that touch a single unit of work (one member, one scope) are
//! contained by the caller that owns that unit. Store connectivity failures
//! propagate to whoever asked for the client.

/// Main error type for tag-warden operations
#[derive(Debug, thiserror::Error)]
pub enum WardenError {
    /// Store unreachable or liveness probe failed
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Reconciliation enabled without the settings it needs, or invalid pool bounds
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Scope not found: {0}")]
    ScopeNotFound(String),

    #[error("Role {role} not found in scope {scope}")]
    RoleNotFound { scope: String, role: String },

    /// The membership provider has no profile for this member
    #[error("Member not found: {0}")]
    MemberNotFound(String),

    /// Transient failure while looking up a member's external facts
    #[error("Member lookup failed for {member}: {reason}")]
    MemberLookup { member: String, reason: String },

    /// Grant or revoke failed for one member
    #[error("Role mutation failed for {member}: {reason}")]
    Mutation { member: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WardenError {
    /// Whether this error only concerns one member and should be contained there
    pub fn is_per_member(&self) -> bool {
        matches!(
            self,
            Self::MemberNotFound(_) | Self::MemberLookup { .. } | Self::Mutation { .. }
        )
    }
}

impl From<mongodb::error::Error> for WardenError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Connectivity(err.to_string())
    }
}

impl From<reqwest::Error> for WardenError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<serde_json::Error> for WardenError {
    fn from(err: serde_json::Error) -> Self {
        Self::Http(format!("JSON error: {}", err))
    }
}

/// Result type alias for tag-warden operations
pub type Result<T> = std::result::Result<T, WardenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_member_classification() {
        assert!(WardenError::MemberNotFound("1".into()).is_per_member());
        assert!(WardenError::Mutation {
            member: "1".into(),
            reason: "forbidden".into()
        }
        .is_per_member());
        assert!(!WardenError::Connectivity("down".into()).is_per_member());
        assert!(!WardenError::ScopeNotFound("g".into()).is_per_member());
    }

    #[test]
    fn test_display_includes_context() {
        let err = WardenError::RoleNotFound {
            scope: "guild-1".into(),
            role: "42".into(),
        };
        assert_eq!(err.to_string(), "Role 42 not found in scope guild-1");
    }
}
