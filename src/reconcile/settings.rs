//! Runtime settings for the tag tracker
//!
//! Settings are read once per tick through `SettingsProvider`, so a host
//! with a live settings source can change them without restarting the loop.

use serde::{Deserialize, Serialize};

use crate::membership::RoleId;
use crate::types::{Result, WardenError};

/// Tag tracker settings as the host provides them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagTrackerSettings {
    pub enabled: bool,
    /// Server tag that earns the role, matched exactly
    pub server_tag: Option<String>,
    pub role_id: Option<RoleId>,
}

/// Settings that passed validation for one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSettings {
    pub server_tag: String,
    pub role_id: RoleId,
}

impl TagTrackerSettings {
    /// `Ok(None)` when disabled. Enabled without a tag or role is a
    /// `Configuration` error; a role id of 0 counts as missing.
    pub fn resolve(&self) -> Result<Option<ActiveSettings>> {
        if !self.enabled {
            return Ok(None);
        }

        let server_tag = self
            .server_tag
            .as_deref()
            .filter(|tag| !tag.is_empty())
            .ok_or_else(|| WardenError::Configuration("server tag is not configured".to_string()))?;

        let role_id = self
            .role_id
            .filter(|role| role.0 != 0)
            .ok_or_else(|| WardenError::Configuration("tag role id is not configured".to_string()))?;

        Ok(Some(ActiveSettings {
            server_tag: server_tag.to_string(),
            role_id,
        }))
    }
}

/// Read-only source of tag tracker settings
pub trait SettingsProvider: Send + Sync {
    fn tag_tracker(&self) -> TagTrackerSettings;
}

/// Fixed snapshot taken at startup
#[derive(Debug, Clone)]
pub struct StaticSettings(pub TagTrackerSettings);

impl SettingsProvider for StaticSettings {
    fn tag_tracker(&self) -> TagTrackerSettings {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled(tag: Option<&str>, role: Option<u64>) -> TagTrackerSettings {
        TagTrackerSettings {
            enabled: true,
            server_tag: tag.map(str::to_string),
            role_id: role.map(RoleId),
        }
    }

    #[test]
    fn test_disabled_resolves_to_none() {
        let settings = TagTrackerSettings {
            enabled: false,
            ..enabled(Some("WARD"), Some(1))
        };
        assert_eq!(settings.resolve().unwrap(), None);
    }

    #[test]
    fn test_missing_values_are_configuration_errors() {
        for settings in [
            enabled(None, Some(1)),
            enabled(Some(""), Some(1)),
            enabled(Some("WARD"), None),
            enabled(Some("WARD"), Some(0)),
        ] {
            assert!(matches!(settings.resolve(), Err(WardenError::Configuration(_))));
        }
    }

    #[test]
    fn test_complete_settings_resolve() {
        let active = enabled(Some("WARD"), Some(7)).resolve().unwrap().unwrap();
        assert_eq!(active.server_tag, "WARD");
        assert_eq!(active.role_id, RoleId(7));
    }
}
