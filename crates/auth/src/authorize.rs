//! Authorization decision engine.
//!
//! Answers "may user U perform action A against org unit T?" from live store
//! data. Checks run in a fixed order and short-circuit:
//!
//! 1. super-admin flag
//! 2. system bypass role
//! 3. action among the user's effective policies
//! 4. target org unit inside the user's subtree
//!
//! Anything missing or ambiguous denies.

use std::collections::HashSet;

use serde::Serialize;

use workforce_core::{OrgUnitId, UserId};

use crate::hierarchy::OrgHierarchyResolver;
use crate::resolver::{PolicyResolver, ResolvedPolicies};
use crate::store::IdentityStore;
use crate::{AuthConfig, AuthError, Decision, DenialKind, PolicyCatalog, PolicyKey, User};

/// One question for [`DecisionEngine::authorize_batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    pub action: PolicyKey,
    pub target_org_unit_id: Option<OrgUnitId>,
}

impl AccessRequest {
    pub fn new(action: PolicyKey) -> Self {
        Self {
            action,
            target_org_unit_id: None,
        }
    }

    pub fn against(mut self, target: OrgUnitId) -> Self {
        self.target_org_unit_id = Some(target);
        self
    }
}

/// Everything the engine loaded about the acting user.
///
/// The subtree is fetched on first use and reused for the rest of a batch.
struct PrincipalState {
    user: User,
    policies: ResolvedPolicies,
    subtree: Option<HashSet<OrgUnitId>>,
}

/// Detailed explanation of an authorization decision (audit/debug views).
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub user_id: UserId,
    pub action: PolicyKey,
    pub target_org_unit_id: Option<OrgUnitId>,
    pub decision: Decision,
    pub is_super_admin: bool,
    pub has_bypass_role: bool,
    pub roles: Vec<String>,
    pub effective_policies: Vec<PolicyKey>,
    /// Present once the engine had to resolve the user's subtree.
    pub accessible_org_unit_ids: Option<Vec<OrgUnitId>>,
}

pub struct DecisionEngine<S> {
    store: S,
    config: AuthConfig,
}

impl<S> DecisionEngine<S>
where
    S: IdentityStore,
{
    pub fn new(store: S, config: AuthConfig) -> Self {
        Self { store, config }
    }

    fn catalog(&self) -> &'static PolicyCatalog {
        PolicyCatalog::global()
    }

    /// Decide a single request.
    ///
    /// `Err` only for catalog misuse or store faults; callers deny on `Err`.
    pub async fn authorize(
        &self,
        user_id: UserId,
        action: &PolicyKey,
        target_org_unit_id: Option<OrgUnitId>,
    ) -> Result<Decision, AuthError> {
        self.catalog().ensure_known(action)?;

        let Some(mut principal) = self.load(user_id).await? else {
            tracing::debug!(user_id = %user_id, action = %action, "deny: user not found");
            return Ok(Decision::deny(DenialKind::UserNotFound));
        };

        self.decide(&mut principal, action, target_org_unit_id).await
    }

    /// Decide several requests for one user, loading the user once.
    pub async fn authorize_batch(
        &self,
        user_id: UserId,
        requests: &[AccessRequest],
    ) -> Result<Vec<Decision>, AuthError> {
        for request in requests {
            self.catalog().ensure_known(&request.action)?;
        }

        let Some(mut principal) = self.load(user_id).await? else {
            return Ok(requests
                .iter()
                .map(|_| Decision::deny(DenialKind::UserNotFound))
                .collect());
        };

        let mut decisions = Vec::with_capacity(requests.len());
        for request in requests {
            decisions.push(
                self.decide(&mut principal, &request.action, request.target_org_unit_id)
                    .await?,
            );
        }
        Ok(decisions)
    }

    pub async fn explain(
        &self,
        user_id: UserId,
        action: &PolicyKey,
        target_org_unit_id: Option<OrgUnitId>,
    ) -> Result<AuthorizationExplanation, AuthError> {
        self.catalog().ensure_known(action)?;

        let Some(mut principal) = self.load(user_id).await? else {
            return Ok(AuthorizationExplanation {
                user_id,
                action: action.clone(),
                target_org_unit_id,
                decision: Decision::deny(DenialKind::UserNotFound),
                is_super_admin: false,
                has_bypass_role: false,
                roles: Vec::new(),
                effective_policies: Vec::new(),
                accessible_org_unit_ids: None,
            });
        };

        let decision = self
            .decide(&mut principal, action, target_org_unit_id)
            .await?;

        let accessible_org_unit_ids = principal.subtree.as_ref().map(|s| {
            let mut ids: Vec<OrgUnitId> = s.iter().copied().collect();
            ids.sort();
            ids
        });

        Ok(AuthorizationExplanation {
            user_id,
            action: action.clone(),
            target_org_unit_id,
            decision,
            is_super_admin: principal.user.is_super_admin,
            has_bypass_role: principal.policies.has_bypass_role(),
            roles: principal.policies.roles.iter().map(|r| r.name.clone()).collect(),
            effective_policies: principal.policies.effective.iter().cloned().collect(),
            accessible_org_unit_ids,
        })
    }

    async fn load(&self, user_id: UserId) -> Result<Option<PrincipalState>, AuthError> {
        let Some(user) = self.store.find_user(user_id).await? else {
            return Ok(None);
        };
        let policies = PolicyResolver::new(&self.store).resolve(user_id).await?;
        Ok(Some(PrincipalState {
            user,
            policies,
            subtree: None,
        }))
    }

    async fn decide(
        &self,
        principal: &mut PrincipalState,
        action: &PolicyKey,
        target: Option<OrgUnitId>,
    ) -> Result<Decision, AuthError> {
        let user_id = principal.user.id;

        if principal.user.is_super_admin {
            tracing::debug!(user_id = %user_id, action = %action, "allow: super admin");
            return Ok(Decision::allow());
        }

        if principal.policies.has_bypass_role() {
            tracing::debug!(user_id = %user_id, action = %action, "allow: system bypass role");
            return Ok(Decision::allow());
        }

        if !principal.policies.grants(action) {
            tracing::debug!(user_id = %user_id, action = %action, "deny: missing policy");
            return Ok(Decision::deny_missing(
                DenialKind::MissingPolicy,
                [action.clone()],
            ));
        }

        if let (Some(target), Some(home)) = (target, principal.user.org_unit_id) {
            if principal.subtree.is_none() {
                let subtree = OrgHierarchyResolver::new(&self.store, self.config.max_org_depth)
                    .subtree_ids(home)
                    .await?;
                principal.subtree = Some(subtree);
            }

            let in_scope = principal
                .subtree
                .as_ref()
                .is_some_and(|s| s.contains(&target));
            if !in_scope {
                tracing::debug!(
                    user_id = %user_id,
                    action = %action,
                    target = %target,
                    "deny: target org unit out of scope"
                );
                return Ok(Decision::deny(DenialKind::OrgOutOfScope));
            }
        }

        tracing::debug!(user_id = %user_id, action = %action, "allow");
        Ok(Decision::allow())
    }
}
