//! Role reference-data administration.

use std::collections::HashMap;

use serde_json::json;

use workforce_core::{PolicyId, RoleId, UserId};

use crate::resolver::PolicyResolver;
use crate::store::{AuditEvent, AuditSink, IdentityStore, RoleDeletion, RoleStore};
use crate::{AuthConfig, AuthError, Decision, DenialKind, PolicyCatalog, PolicyKey, Role};

/// Input for [`RoleAdministration::create_role`].
#[derive(Debug, Clone)]
pub struct NewRole {
    pub name: String,
    pub description: Option<String>,
    pub policy_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleCreation {
    pub decision: Decision,
    pub role_id: Option<RoleId>,
}

pub struct RoleAdministration<S, A> {
    store: S,
    audit: A,
    config: AuthConfig,
}

impl<S, A> RoleAdministration<S, A>
where
    S: IdentityStore + RoleStore,
    A: AuditSink,
{
    pub fn new(store: S, audit: A, config: AuthConfig) -> Self {
        Self {
            store,
            audit,
            config,
        }
    }

    /// Create a standard role over existing, active catalog policies.
    ///
    /// Keys here are user input: a malformed key is an `invalid_policy_key`
    /// denial and a well-formed key outside the catalog is `policy_not_found`.
    /// A taken role name surfaces as `StoreError::Conflict`.
    pub async fn create_role(
        &self,
        actor_id: UserId,
        new_role: NewRole,
    ) -> Result<RoleCreation, AuthError> {
        if let Some(denied) = self.check_actor(actor_id).await? {
            return Ok(RoleCreation {
                decision: denied,
                role_id: None,
            });
        }

        let catalog = PolicyCatalog::global();
        let mut keys: Vec<PolicyKey> = Vec::with_capacity(new_role.policy_keys.len());
        for raw in &new_role.policy_keys {
            let key = match PolicyKey::parse(raw.trim()) {
                Ok(key) => key,
                Err(e) => {
                    tracing::debug!(
                        actor_id = %actor_id,
                        key = %raw,
                        error = %e,
                        "role creation denied: malformed policy key"
                    );
                    return Ok(RoleCreation {
                        decision: Decision::deny(DenialKind::InvalidPolicyKey),
                        role_id: None,
                    });
                }
            };
            if !catalog.contains(&key) {
                return Ok(RoleCreation {
                    decision: Decision::deny_missing(DenialKind::PolicyNotFound, [key]),
                    role_id: None,
                });
            }
            keys.push(key);
        }
        keys.sort();
        keys.dedup();

        let rows = self.store.find_policies_by_keys(&keys).await?;
        let by_key: HashMap<&PolicyKey, _> = rows.iter().map(|p| (&p.key, p)).collect();

        let mut policy_ids: Vec<PolicyId> = Vec::with_capacity(keys.len());
        for key in &keys {
            let Some(policy) = by_key.get(key) else {
                return Ok(RoleCreation {
                    decision: Decision::deny_missing(DenialKind::PolicyNotFound, [key.clone()]),
                    role_id: None,
                });
            };
            if !policy.is_active {
                return Ok(RoleCreation {
                    decision: Decision::deny_missing(DenialKind::PolicyInactive, [key.clone()]),
                    role_id: None,
                });
            }
            policy_ids.push(policy.id);
        }

        let mut role = Role::new(new_role.name.trim());
        role.description = new_role.description;
        let role_id = role.id;
        let role_name = role.name.clone();

        self.store.insert_role(role, policy_ids).await?;

        tracing::info!(actor_id = %actor_id, role_id = %role_id, role = %role_name, "role created");
        self.audit.record(
            AuditEvent::new(actor_id, "role.created")
                .target(role_id)
                .payload(json!({ "name": role_name, "policies": keys })),
        );

        Ok(RoleCreation {
            decision: Decision::allow(),
            role_id: Some(role_id),
        })
    }

    pub async fn delete_role(&self, actor_id: UserId, role_id: RoleId) -> Result<Decision, AuthError> {
        if let Some(denied) = self.check_actor(actor_id).await? {
            return Ok(denied);
        }

        match self.store.delete_role_if_unassigned(role_id).await? {
            RoleDeletion::Deleted => {
                tracing::info!(actor_id = %actor_id, role_id = %role_id, "role deleted");
                self.audit
                    .record(AuditEvent::new(actor_id, "role.deleted").target(role_id));
                Ok(Decision::allow())
            }
            RoleDeletion::NotFound => Ok(Decision::deny(DenialKind::RoleNotFound)),
            RoleDeletion::InUse { holders } => {
                tracing::debug!(role_id = %role_id, holders, "role deletion blocked: role in use");
                Ok(Decision::deny(DenialKind::RoleInUse))
            }
        }
    }

    async fn check_actor(&self, actor_id: UserId) -> Result<Option<Decision>, AuthError> {
        let Some(actor) = self.store.find_user(actor_id).await? else {
            return Ok(Some(Decision::deny(DenialKind::UserNotFound)));
        };
        if actor.is_super_admin {
            return Ok(None);
        }

        let resolved = PolicyResolver::new(&self.store).resolve(actor_id).await?;
        if resolved.has_bypass_role() || resolved.grants(&self.config.role_admin_policy) {
            return Ok(None);
        }

        Ok(Some(Decision::deny_missing(
            DenialKind::MissingPolicy,
            [self.config.role_admin_policy.clone()],
        )))
    }
}
