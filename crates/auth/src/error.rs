//! Decision outcomes and the error taxonomy.
//!
//! Expected denials are *values* ([`Decision`]); only configuration mistakes and
//! infrastructure faults surface as [`AuthError`].

use serde::Serialize;
use thiserror::Error;

use crate::PolicyKey;
use crate::store::StoreError;

/// Closed set of denial reasons.
///
/// The snake_case strings are a public contract that callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    UserNotFound,
    TargetUserNotFound,
    AssignerNotFound,
    MissingPolicy,
    MissingAssignRolePolicy,
    OrgOutOfScope,
    TargetUserOutOfScope,
    PrivilegeEscalationPrevention,
    RoleNotFound,
    PolicyNotFound,
    PolicyInactive,
    InvalidPolicyKey,
    RoleInUse,
}

impl DenialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialKind::UserNotFound => "user_not_found",
            DenialKind::TargetUserNotFound => "target_user_not_found",
            DenialKind::AssignerNotFound => "assigner_not_found",
            DenialKind::MissingPolicy => "missing_policy",
            DenialKind::MissingAssignRolePolicy => "missing_assign_role_policy",
            DenialKind::OrgOutOfScope => "org_out_of_scope",
            DenialKind::TargetUserOutOfScope => "target_user_out_of_scope",
            DenialKind::PrivilegeEscalationPrevention => "privilege_escalation_prevention",
            DenialKind::RoleNotFound => "role_not_found",
            DenialKind::PolicyNotFound => "policy_not_found",
            DenialKind::PolicyInactive => "policy_inactive",
            DenialKind::InvalidPolicyKey => "invalid_policy_key",
            DenialKind::RoleInUse => "role_in_use",
        }
    }
}

impl core::fmt::Display for DenialKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged outcome of every authorization question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialKind>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_policies: Vec<PolicyKey>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            missing_policies: Vec::new(),
        }
    }

    pub fn deny(reason: DenialKind) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            missing_policies: Vec::new(),
        }
    }

    /// Denial that names the grants the actor lacks (sorted, deduplicated).
    pub fn deny_missing(
        reason: DenialKind,
        missing: impl IntoIterator<Item = PolicyKey>,
    ) -> Self {
        let mut missing: Vec<PolicyKey> = missing.into_iter().collect();
        missing.sort();
        missing.dedup();
        Self {
            allowed: false,
            reason: Some(reason),
            missing_policies: missing,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    pub fn reason_str(&self) -> Option<&'static str> {
        self.reason.map(|r| r.as_str())
    }
}

/// Faults that are not decisions.
#[derive(Debug, Error)]
pub enum AuthError {
    /// A caller named a policy outside the catalog. Programmer error.
    #[error("invalid policy key '{key}': {detail}")]
    InvalidPolicyKey { key: String, detail: String },

    #[error("policy requirement must name at least one policy")]
    EmptyRequirement,

    /// Store unreachable or returned unusable data; deny the request, retry later.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    pub fn invalid_key(key: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidPolicyKey {
            key: key.into(),
            detail: detail.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::Store(e) if e.is_retryable())
    }
}
