//! Role assignment guard and the service that applies guarded assignments.
//!
//! # Invariant
//! An assigner can never grant a global capability they do not hold
//! themselves, and can only touch users inside their own org subtree.
//! Org-scoped policies are exempt from the capability comparison because the
//! subtree check already confines them.

use std::collections::BTreeSet;

use serde_json::json;

use workforce_core::{RoleId, UserId};

use crate::hierarchy::OrgHierarchyResolver;
use crate::resolver::{PolicyResolver, ResolvedPolicies};
use crate::store::{AuditEvent, AuditSink, IdentityStore, RoleAssignmentStore, StoreError};
use crate::{AuthConfig, AuthError, Decision, DenialKind, PolicyCatalog, PolicyKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Assign,
    Remove,
}

impl Operation {
    fn as_str(&self) -> &'static str {
        match self {
            Operation::Assign => "assign",
            Operation::Remove => "remove",
        }
    }
}

/// Outcome of the checks shared by assignment and removal.
enum Gate {
    Deny(Decision),
    SuperAdmin,
    Passed { assigner_grants: BTreeSet<PolicyKey> },
}

pub struct RoleAssignmentGuard<S, A> {
    store: S,
    audit: A,
    config: AuthConfig,
}

impl<S, A> RoleAssignmentGuard<S, A>
where
    S: IdentityStore,
    A: AuditSink,
{
    pub fn new(store: S, audit: A, config: AuthConfig) -> Self {
        Self {
            store,
            audit,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn audit(&self) -> &A {
        &self.audit
    }

    pub async fn can_assign_role(
        &self,
        assigner_id: UserId,
        target_id: UserId,
        role_id: RoleId,
    ) -> Result<Decision, AuthError> {
        let assigner_grants = match self
            .gate(Operation::Assign, assigner_id, target_id, role_id)
            .await?
        {
            Gate::Deny(decision) => return Ok(decision),
            Gate::SuperAdmin => return Ok(Decision::allow()),
            Gate::Passed { assigner_grants } => assigner_grants,
        };

        let Some(role) = self.store.find_role(role_id).await? else {
            return Ok(Decision::deny(DenialKind::RoleNotFound));
        };

        let catalog = PolicyCatalog::global();
        let role_grants = if role.is_bypass() {
            catalog.global_keys()
        } else {
            PolicyResolver::new(&self.store)
                .role_effective_policies(role.id)
                .await?
        };

        let (_org_scoped, global) = catalog.partition(role_grants.iter());
        let missing: Vec<PolicyKey> = global.difference(&assigner_grants).cloned().collect();

        if !missing.is_empty() {
            tracing::warn!(
                assigner_id = %assigner_id,
                target_id = %target_id,
                role = %role.name,
                missing = ?missing,
                "role assignment blocked: privilege escalation"
            );
            return Ok(Decision::deny_missing(
                DenialKind::PrivilegeEscalationPrevention,
                missing,
            ));
        }

        Ok(Decision::allow())
    }

    /// Removal never widens access, so only the actor/target checks apply.
    pub async fn can_remove_role(
        &self,
        assigner_id: UserId,
        target_id: UserId,
        role_id: RoleId,
    ) -> Result<Decision, AuthError> {
        match self
            .gate(Operation::Remove, assigner_id, target_id, role_id)
            .await?
        {
            Gate::Deny(decision) => Ok(decision),
            Gate::SuperAdmin | Gate::Passed { .. } => Ok(Decision::allow()),
        }
    }

    async fn gate(
        &self,
        operation: Operation,
        assigner_id: UserId,
        target_id: UserId,
        role_id: RoleId,
    ) -> Result<Gate, AuthError> {
        let Some(assigner) = self.store.find_user(assigner_id).await? else {
            return Ok(Gate::Deny(Decision::deny(DenialKind::AssignerNotFound)));
        };

        if assigner.is_super_admin {
            tracing::info!(
                assigner_id = %assigner_id,
                target_id = %target_id,
                role_id = %role_id,
                operation = operation.as_str(),
                "super admin bypassed role assignment checks"
            );
            self.audit.record(
                AuditEvent::new(assigner_id, "role_assignment.super_admin_bypass")
                    .target(target_id)
                    .payload(json!({
                        "operation": operation.as_str(),
                        "role_id": role_id,
                    })),
            );
            return Ok(Gate::SuperAdmin);
        }

        let resolved = PolicyResolver::new(&self.store).resolve(assigner_id).await?;
        let assigner_grants = grants_of(&resolved);

        let required = self.config.assign_role_policy();
        if !assigner_grants.contains(&required) {
            return Ok(Gate::Deny(Decision::deny_missing(
                DenialKind::MissingAssignRolePolicy,
                [required],
            )));
        }

        let Some(target) = self.store.find_user(target_id).await? else {
            return Ok(Gate::Deny(Decision::deny(DenialKind::TargetUserNotFound)));
        };

        if let (Some(assigner_unit), Some(target_unit)) = (assigner.org_unit_id, target.org_unit_id)
        {
            let in_scope = OrgHierarchyResolver::new(&self.store, self.config.max_org_depth)
                .contains(assigner_unit, target_unit)
                .await?;
            if !in_scope {
                return Ok(Gate::Deny(Decision::deny(DenialKind::TargetUserOutOfScope)));
            }
        }

        Ok(Gate::Passed { assigner_grants })
    }
}

/// Capabilities an assigner can hand out.
///
/// A system bypass role carries every catalog policy.
fn grants_of(resolved: &ResolvedPolicies) -> BTreeSet<PolicyKey> {
    if resolved.has_bypass_role() {
        let catalog = PolicyCatalog::global();
        let mut all: BTreeSet<PolicyKey> =
            catalog.definitions().into_iter().map(|d| d.key.clone()).collect();
        all.extend(resolved.effective.iter().cloned());
        all
    } else {
        resolved.effective.clone()
    }
}

/// Result of a guarded role change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleChange {
    pub decision: Decision,
    /// The target's policy version after the change, when one was written.
    pub policy_version: Option<u64>,
}

impl RoleChange {
    fn denied(decision: Decision) -> Self {
        Self {
            decision,
            policy_version: None,
        }
    }
}

/// Applies role changes only after the guard allows them.
pub struct RoleAssignmentService<S, A> {
    guard: RoleAssignmentGuard<S, A>,
}

impl<S, A> RoleAssignmentService<S, A>
where
    S: IdentityStore + RoleAssignmentStore,
    A: AuditSink,
{
    pub fn new(store: S, audit: A, config: AuthConfig) -> Self {
        Self {
            guard: RoleAssignmentGuard::new(store, audit, config),
        }
    }

    pub fn guard(&self) -> &RoleAssignmentGuard<S, A> {
        &self.guard
    }

    /// Guarded full replacement of the target's role set.
    pub async fn assign_role(
        &self,
        assigner_id: UserId,
        target_id: UserId,
        role_id: RoleId,
    ) -> Result<RoleChange, AuthError> {
        let decision = self
            .guard
            .can_assign_role(assigner_id, target_id, role_id)
            .await?;
        if !decision.allowed {
            return Ok(RoleChange::denied(decision));
        }

        let version = match self.guard.store().replace_roles(target_id, role_id).await {
            Ok(version) => version,
            Err(StoreError::UserNotFound(_)) => {
                return Ok(RoleChange::denied(Decision::deny(
                    DenialKind::TargetUserNotFound,
                )));
            }
            Err(StoreError::RoleNotFound(_)) => {
                return Ok(RoleChange::denied(Decision::deny(DenialKind::RoleNotFound)));
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            assigner_id = %assigner_id,
            target_id = %target_id,
            role_id = %role_id,
            policy_version = version,
            "role assigned"
        );
        self.guard.audit().record(
            AuditEvent::new(assigner_id, "user.role_assigned")
                .target(target_id)
                .payload(json!({ "role_id": role_id, "policy_version": version })),
        );

        Ok(RoleChange {
            decision,
            policy_version: Some(version),
        })
    }

    pub async fn remove_role(
        &self,
        assigner_id: UserId,
        target_id: UserId,
        role_id: RoleId,
    ) -> Result<RoleChange, AuthError> {
        let decision = self
            .guard
            .can_remove_role(assigner_id, target_id, role_id)
            .await?;
        if !decision.allowed {
            return Ok(RoleChange::denied(decision));
        }

        let version = match self.guard.store().remove_role(target_id, role_id).await {
            Ok(version) => version,
            Err(StoreError::UserNotFound(_)) => {
                return Ok(RoleChange::denied(Decision::deny(
                    DenialKind::TargetUserNotFound,
                )));
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(version) = version {
            tracing::info!(
                assigner_id = %assigner_id,
                target_id = %target_id,
                role_id = %role_id,
                policy_version = version,
                "role removed"
            );
            self.guard.audit().record(
                AuditEvent::new(assigner_id, "user.role_removed")
                    .target(target_id)
                    .payload(json!({ "role_id": role_id, "policy_version": version })),
            );
        }

        Ok(RoleChange {
            decision,
            policy_version: version,
        })
    }
}
