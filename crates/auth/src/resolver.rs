//! Policy resolution: which keys a user's roles carry.
//!
//! Two views exist on purpose. *Held* keys include deactivated policies and
//! serve audit and role-ownership questions. *Effective* keys are active only
//! and are the sole input to grant decisions.

use std::collections::BTreeSet;

use workforce_core::{RoleId, UserId};

use crate::store::{IdentityStore, StoreError};
use crate::{Policy, PolicyKey, Role};

/// A user's roles together with both policy views.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedPolicies {
    pub roles: Vec<Role>,
    pub held: BTreeSet<PolicyKey>,
    pub effective: BTreeSet<PolicyKey>,
}

impl ResolvedPolicies {
    pub fn has_bypass_role(&self) -> bool {
        self.roles.iter().any(Role::is_bypass)
    }

    pub fn grants(&self, key: &PolicyKey) -> bool {
        self.effective.contains(key)
    }
}

/// Fold policy rows into `(held, effective)`.
pub fn fold_policies<'a, I>(rows: I) -> (BTreeSet<PolicyKey>, BTreeSet<PolicyKey>)
where
    I: IntoIterator<Item = &'a Policy>,
{
    let mut held = BTreeSet::new();
    let mut effective = BTreeSet::new();
    for policy in rows {
        held.insert(policy.key.clone());
        if policy.is_active {
            effective.insert(policy.key.clone());
        }
    }
    (held, effective)
}

pub struct PolicyResolver<'a, S> {
    store: &'a S,
}

impl<'a, S> PolicyResolver<'a, S>
where
    S: IdentityStore,
{
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, user_id: UserId) -> Result<ResolvedPolicies, StoreError> {
        let roles = self.store.find_roles_for_user(user_id).await?;

        let mut rows: Vec<Policy> = Vec::new();
        for role in &roles {
            rows.extend(self.store.find_policies_for_role(role.id).await?);
        }

        let (held, effective) = fold_policies(&rows);
        tracing::debug!(
            user_id = %user_id,
            roles = roles.len(),
            held = held.len(),
            effective = effective.len(),
            "resolved user policies"
        );

        Ok(ResolvedPolicies {
            roles,
            held,
            effective,
        })
    }

    pub async fn effective_policies(&self, user_id: UserId) -> Result<BTreeSet<PolicyKey>, StoreError> {
        Ok(self.resolve(user_id).await?.effective)
    }

    pub async fn held_policies(&self, user_id: UserId) -> Result<BTreeSet<PolicyKey>, StoreError> {
        Ok(self.resolve(user_id).await?.held)
    }

    /// Active keys carried by a single role.
    pub async fn role_effective_policies(
        &self,
        role_id: RoleId,
    ) -> Result<BTreeSet<PolicyKey>, StoreError> {
        let rows = self.store.find_policies_for_role(role_id).await?;
        Ok(fold_policies(&rows).1)
    }
}
