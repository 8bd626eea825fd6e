//! Configuration loading from the process environment.
//!
//! Missing variables fall back to defaults; present-but-invalid values are
//! errors so a typo never silently changes authorization behavior.

use thiserror::Error;

use workforce_auth::{AuthConfig, DeploymentProfile, PolicyCatalog};

pub const PROFILE_ENV: &str = "WORKFORCE_PROFILE";
pub const ROLE_ADMIN_POLICY_ENV: &str = "WORKFORCE_ROLE_ADMIN_POLICY";
pub const SNAPSHOT_TTL_ENV: &str = "WORKFORCE_SNAPSHOT_TTL_SECS";
pub const MAX_ORG_DEPTH_ENV: &str = "WORKFORCE_MAX_ORG_DEPTH";
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";
pub const PERSISTENT_STORES_ENV: &str = "USE_PERSISTENT_STORES";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: {detail}")]
    Invalid { var: &'static str, detail: String },

    #[error("USE_PERSISTENT_STORES is set but DATABASE_URL is missing")]
    MissingDatabaseUrl,
}

impl ConfigError {
    fn invalid(var: &'static str, detail: impl Into<String>) -> Self {
        ConfigError::Invalid {
            var,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InfraConfig {
    pub auth: AuthConfig,
    /// `Some` only when persistent stores are enabled.
    pub database_url: Option<String>,
}

impl InfraConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let mut auth = AuthConfig::default();

        if let Some(raw) = get(PROFILE_ENV) {
            auth.profile = raw
                .parse::<DeploymentProfile>()
                .map_err(|e| ConfigError::invalid(PROFILE_ENV, e))?;
        }

        if let Some(raw) = get(ROLE_ADMIN_POLICY_ENV) {
            auth.role_admin_policy = PolicyCatalog::global()
                .validate_key(raw.trim())
                .map_err(|e| ConfigError::invalid(ROLE_ADMIN_POLICY_ENV, e.to_string()))?;
        }

        if let Some(raw) = get(SNAPSHOT_TTL_ENV) {
            let secs: u64 = raw
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid(SNAPSHOT_TTL_ENV, format!("{e}")))?;
            if secs == 0 {
                return Err(ConfigError::invalid(SNAPSHOT_TTL_ENV, "must be positive"));
            }
            auth.snapshot_ttl_secs = secs;
        }

        if let Some(raw) = get(MAX_ORG_DEPTH_ENV) {
            let depth: usize = raw
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid(MAX_ORG_DEPTH_ENV, format!("{e}")))?;
            if depth == 0 {
                return Err(ConfigError::invalid(MAX_ORG_DEPTH_ENV, "must be positive"));
            }
            auth.max_org_depth = depth;
        }

        let persistent = match get(PERSISTENT_STORES_ENV) {
            Some(raw) => parse_flag(&raw)
                .ok_or_else(|| ConfigError::invalid(PERSISTENT_STORES_ENV, "expected a boolean"))?,
            None => false,
        };

        let database_url = if persistent {
            Some(get(DATABASE_URL_ENV).ok_or(ConfigError::MissingDatabaseUrl)?)
        } else {
            None
        };

        Ok(Self { auth, database_url })
    }

    pub fn persistent(&self) -> bool {
        self.database_url.is_some()
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<InfraConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        InfraConfig::from_lookup(|var| map.get(var).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.auth, AuthConfig::default());
        assert!(!cfg.persistent());
    }

    #[test]
    fn reads_every_auth_setting() {
        let cfg = load(&[
            (PROFILE_ENV, "assign_role"),
            (ROLE_ADMIN_POLICY_ENV, "roles.create"),
            (SNAPSHOT_TTL_ENV, "3600"),
            (MAX_ORG_DEPTH_ENV, "12"),
        ])
        .unwrap();
        assert_eq!(cfg.auth.profile, DeploymentProfile::AssignRole);
        assert_eq!(cfg.auth.role_admin_policy.as_str(), "roles.create");
        assert_eq!(cfg.auth.snapshot_ttl_secs, 3600);
        assert_eq!(cfg.auth.max_org_depth, 12);
    }

    #[test]
    fn invalid_values_are_errors() {
        assert!(matches!(
            load(&[(PROFILE_ENV, "superuser")]),
            Err(ConfigError::Invalid { var: PROFILE_ENV, .. })
        ));
        assert!(load(&[(ROLE_ADMIN_POLICY_ENV, "admin.pannel")]).is_err());
        assert!(load(&[(SNAPSHOT_TTL_ENV, "eight hours")]).is_err());
        assert!(load(&[(MAX_ORG_DEPTH_ENV, "0")]).is_err());
        assert!(load(&[(PERSISTENT_STORES_ENV, "maybe")]).is_err());
    }

    #[test]
    fn persistence_requires_a_database_url() {
        assert_eq!(
            load(&[(PERSISTENT_STORES_ENV, "true")]),
            Err(ConfigError::MissingDatabaseUrl)
        );
        let cfg = load(&[
            (PERSISTENT_STORES_ENV, "1"),
            (DATABASE_URL_ENV, "postgres://localhost/workforce"),
        ])
        .unwrap();
        assert!(cfg.persistent());

        let off = load(&[(DATABASE_URL_ENV, "postgres://localhost/workforce")]).unwrap();
        assert!(!off.persistent());
    }
}
