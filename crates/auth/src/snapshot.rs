//! Session-time authorization snapshot.
//!
//! A snapshot is computed once when a session is issued and is the only truth
//! consulted at request time. It records the `policy_version` it was derived
//! from; a newer live version means the carrier must re-derive it. Nothing
//! revokes outstanding snapshots proactively.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use workforce_core::{OrgUnitId, UserId};

use crate::hierarchy::OrgHierarchyResolver;
use crate::manager::{ManagerInfo, ManagerScopeResolver, ManagerScopes};
use crate::resolver::PolicyResolver;
use crate::store::{IdentityStore, ManagerAssignmentStore};
use crate::{AuthConfig, AuthError, PolicyKey};

/// Immutable per-session authorization state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSnapshot {
    pub user_id: UserId,
    /// Effective (active-only) policy keys.
    pub policies: BTreeSet<PolicyKey>,
    /// Empty for bypass users, who are not confined to a subtree.
    pub accessible_org_unit_ids: BTreeSet<OrgUnitId>,
    pub is_super_admin: bool,
    pub has_bypass_role: bool,
    pub is_manager: bool,
    pub manager_scopes: Option<ManagerScopes>,
    pub issued_at_version: u64,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AuthSnapshot {
    /// Super admins and bypass-role holders skip every request-time check.
    pub fn bypasses_checks(&self) -> bool {
        self.is_super_admin || self.has_bypass_role
    }

    pub fn has_policy(&self, key: &PolicyKey) -> bool {
        self.policies.contains(key)
    }

    pub fn can_access_org_unit(&self, org_unit_id: OrgUnitId) -> bool {
        self.bypasses_checks() || self.accessible_org_unit_ids.contains(&org_unit_id)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot has expired")]
    Expired,

    #[error("snapshot not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid snapshot time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("snapshot is stale (issued at policy version {issued}, live version {live})")]
    Stale { issued: u64, live: u64 },
}

/// Check a snapshot against the clock and the user's live policy version.
///
/// Callers decide when to fetch `live_version`; the request-time guard itself
/// never does.
pub fn validate_snapshot(
    snapshot: &AuthSnapshot,
    live_version: u64,
    now: DateTime<Utc>,
) -> Result<(), SnapshotError> {
    if snapshot.expires_at <= snapshot.issued_at {
        return Err(SnapshotError::InvalidTimeWindow);
    }
    if now < snapshot.issued_at {
        return Err(SnapshotError::NotYetValid);
    }
    if now >= snapshot.expires_at {
        return Err(SnapshotError::Expired);
    }
    if live_version != snapshot.issued_at_version {
        return Err(SnapshotError::Stale {
            issued: snapshot.issued_at_version,
            live: live_version,
        });
    }
    Ok(())
}

/// Builds snapshots at session issuance.
pub struct SnapshotIssuer<S, M> {
    identity: S,
    managers: M,
    config: AuthConfig,
}

impl<S, M> SnapshotIssuer<S, M>
where
    S: IdentityStore,
    M: ManagerAssignmentStore,
{
    pub fn new(identity: S, managers: M, config: AuthConfig) -> Self {
        Self {
            identity,
            managers,
            config,
        }
    }

    /// `Ok(None)` when the user does not exist.
    pub async fn issue(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthSnapshot>, AuthError> {
        let Some(user) = self.identity.find_user(user_id).await? else {
            return Ok(None);
        };

        let resolved = PolicyResolver::new(&self.identity).resolve(user_id).await?;
        let has_bypass_role = resolved.has_bypass_role();

        let accessible_org_unit_ids = match user.org_unit_id {
            Some(home) if !user.is_super_admin && !has_bypass_role => {
                OrgHierarchyResolver::new(&self.identity, self.config.max_org_depth)
                    .subtree_ids(home)
                    .await?
                    .into_iter()
                    .collect()
            }
            _ => BTreeSet::new(),
        };

        let manager = match &user.employee_card_no {
            Some(card_no) => {
                ManagerScopeResolver::new(&self.managers)
                    .manager_info(card_no)
                    .await?
            }
            None => ManagerInfo::not_a_manager(),
        };

        let snapshot = AuthSnapshot {
            user_id,
            policies: resolved.effective,
            accessible_org_unit_ids,
            is_super_admin: user.is_super_admin,
            has_bypass_role,
            is_manager: manager.is_manager,
            manager_scopes: manager.scopes,
            issued_at_version: user.policy_version,
            issued_at: now,
            expires_at: now + self.config.snapshot_ttl(),
        };

        tracing::debug!(
            user_id = %user_id,
            policies = snapshot.policies.len(),
            org_units = snapshot.accessible_org_unit_ids.len(),
            version = snapshot.issued_at_version,
            "issued auth snapshot"
        );

        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn snapshot(now: DateTime<Utc>, version: u64) -> AuthSnapshot {
        AuthSnapshot {
            user_id: UserId::new(),
            policies: BTreeSet::new(),
            accessible_org_unit_ids: BTreeSet::new(),
            is_super_admin: false,
            has_bypass_role: false,
            is_manager: false,
            manager_scopes: None,
            issued_at_version: version,
            issued_at: now,
            expires_at: now + Duration::hours(1),
        }
    }

    #[test]
    fn fresh_snapshot_is_valid() {
        let now = Utc::now();
        assert_eq!(validate_snapshot(&snapshot(now, 3), 3, now), Ok(()));
    }

    #[test]
    fn version_bump_makes_snapshot_stale() {
        let now = Utc::now();
        assert_eq!(
            validate_snapshot(&snapshot(now, 3), 4, now),
            Err(SnapshotError::Stale { issued: 3, live: 4 })
        );
    }

    #[test]
    fn expiry_and_clock_skew_are_rejected() {
        let now = Utc::now();
        let snap = snapshot(now, 1);
        assert_eq!(
            validate_snapshot(&snap, 1, now + Duration::hours(2)),
            Err(SnapshotError::Expired)
        );
        assert_eq!(
            validate_snapshot(&snap, 1, now - Duration::minutes(1)),
            Err(SnapshotError::NotYetValid)
        );

        let mut inverted = snap.clone();
        inverted.expires_at = inverted.issued_at;
        assert_eq!(
            validate_snapshot(&inverted, 1, now),
            Err(SnapshotError::InvalidTimeWindow)
        );
    }

    #[test]
    fn org_access_is_read_from_snapshot() {
        let now = Utc::now();
        let unit = OrgUnitId::new();
        let mut snap = snapshot(now, 0);
        assert!(!snap.can_access_org_unit(unit));

        snap.accessible_org_unit_ids.insert(unit);
        assert!(snap.can_access_org_unit(unit));

        let mut admin = snapshot(now, 0);
        admin.is_super_admin = true;
        assert!(admin.can_access_org_unit(OrgUnitId::new()));
    }

    #[test]
    fn snapshot_survives_serialization() {
        let now = Utc::now();
        let mut snap = snapshot(now, 5);
        snap.policies.insert(PolicyKey::parse("attendance.view").unwrap());
        let encoded = serde_json::to_string(&snap).unwrap();
        let decoded: AuthSnapshot = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, snap);
    }
}
