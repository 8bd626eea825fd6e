//! Authorization settings that vary per deployment.

use serde::{Deserialize, Deserializer, Serialize};

use crate::{AuthError, PolicyCatalog, PolicyKey};

/// Which global policy gates role assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentProfile {
    /// Role assignment is an admin-panel capability (`admin.panel`).
    #[default]
    AdminPanel,
    /// Role assignment has a dedicated grant (`users.assign_role`).
    AssignRole,
}

impl DeploymentProfile {
    pub fn assign_role_policy(&self) -> PolicyKey {
        match self {
            DeploymentProfile::AdminPanel => PolicyKey::from_static("admin.panel"),
            DeploymentProfile::AssignRole => PolicyKey::from_static("users.assign_role"),
        }
    }
}

impl core::str::FromStr for DeploymentProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin_panel" => Ok(DeploymentProfile::AdminPanel),
            "assign_role" => Ok(DeploymentProfile::AssignRole),
            other => Err(format!(
                "unknown deployment profile '{other}' (expected admin_panel or assign_role)"
            )),
        }
    }
}

/// Longest staleness window a snapshot may carry (30 days).
pub const MAX_SNAPSHOT_TTL_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub profile: DeploymentProfile,
    /// Global policy required to create or delete roles.
    #[serde(deserialize_with = "catalog_key")]
    pub role_admin_policy: PolicyKey,
    /// Upper bound of the snapshot staleness window; should not exceed the
    /// session lifetime of the carrier.
    pub snapshot_ttl_secs: u64,
    /// Org traversal stops descending past this depth.
    pub max_org_depth: usize,
}

impl AuthConfig {
    pub fn assign_role_policy(&self) -> PolicyKey {
        self.profile.assign_role_policy()
    }

    /// Checks the configured policy keys against the catalog.
    ///
    /// Deserialization already does this; call it for configs built in code.
    pub fn validate(&self) -> Result<(), AuthError> {
        let catalog = PolicyCatalog::global();
        catalog.ensure_known(&self.role_admin_policy)?;
        catalog.ensure_known(&self.assign_role_policy())
    }

    /// Clamped to [`MAX_SNAPSHOT_TTL_SECS`].
    pub fn snapshot_ttl(&self) -> chrono::Duration {
        let secs = self.snapshot_ttl_secs.min(MAX_SNAPSHOT_TTL_SECS);
        chrono::Duration::seconds(secs as i64)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            profile: DeploymentProfile::AdminPanel,
            role_admin_policy: PolicyKey::from_static("admin.panel"),
            snapshot_ttl_secs: 8 * 60 * 60,
            max_org_depth: 64,
        }
    }
}

fn catalog_key<'de, D>(deserializer: D) -> Result<PolicyKey, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    PolicyCatalog::global()
        .validate_key(raw.trim())
        .map_err(serde::de::Error::custom)
}
