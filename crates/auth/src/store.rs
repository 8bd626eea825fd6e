//! Collaborator contracts consumed by the authorization subsystem.
//!
//! Adapters live in `workforce-infra`; this crate only states what it needs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use workforce_core::{EmployeeCardNo, OrgUnitId, PolicyId, RoleId, UserId};

use crate::{ManagerAssignment, OrgUnit, Policy, PolicyKey, Role, User};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("user not found: {0}")]
    UserNotFound(UserId),

    #[error("role not found: {0}")]
    RoleNotFound(RoleId),

    /// The write would violate a uniqueness rule (e.g. a duplicate role name).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A row could not be decoded (e.g. malformed policy key in storage).
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Read access to users, roles, policies and the org tree.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn find_roles_for_user(&self, id: UserId) -> Result<Vec<Role>, StoreError>;

    async fn find_role(&self, id: RoleId) -> Result<Option<Role>, StoreError>;

    /// Every policy row attached to the role, active or not.
    async fn find_policies_for_role(&self, id: RoleId) -> Result<Vec<Policy>, StoreError>;

    /// Direct children only.
    async fn find_org_children(&self, unit_id: OrgUnitId) -> Result<Vec<OrgUnit>, StoreError>;
}

/// Writes to the user/role association.
///
/// Implementations must make each call atomic and serialize concurrent calls
/// for the same user.
#[async_trait]
pub trait RoleAssignmentStore: Send + Sync {
    /// Delete every role of the user, insert `role_id`, bump `policy_version`.
    ///
    /// Returns the new policy version.
    async fn replace_roles(&self, user_id: UserId, role_id: RoleId) -> Result<u64, StoreError>;

    /// Remove one held role and bump `policy_version`.
    ///
    /// Returns `None` (and leaves the version alone) when the role was not held.
    async fn remove_role(&self, user_id: UserId, role_id: RoleId)
    -> Result<Option<u64>, StoreError>;
}

/// Outcome of [`RoleStore::delete_role_if_unassigned`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleDeletion {
    Deleted,
    NotFound,
    InUse { holders: u64 },
}

/// Role and policy reference-data administration.
#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn list_policies(&self) -> Result<Vec<Policy>, StoreError>;

    async fn find_policies_by_keys(&self, keys: &[PolicyKey]) -> Result<Vec<Policy>, StoreError>;

    async fn insert_role(&self, role: Role, policy_ids: Vec<PolicyId>) -> Result<(), StoreError>;

    /// Check-and-delete in one atomic step.
    async fn delete_role_if_unassigned(&self, role_id: RoleId) -> Result<RoleDeletion, StoreError>;
}

/// The `emp_manager` table.
#[async_trait]
pub trait ManagerAssignmentStore: Send + Sync {
    /// All rows for the card number, extinct ones included.
    async fn find_manager_assignments(
        &self,
        card_no: &EmployeeCardNo,
    ) -> Result<Vec<ManagerAssignment>, StoreError>;
}

/// Audit record written after privileged operations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub actor_id: UserId,
    pub action: String,
    pub target_id: Option<String>,
    pub payload: JsonValue,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(actor_id: UserId, action: impl Into<String>) -> Self {
        Self {
            actor_id,
            action: action.into(),
            target_id: None,
            payload: JsonValue::Null,
            occurred_at: Utc::now(),
        }
    }

    pub fn target(mut self, target: impl ToString) -> Self {
        self.target_id = Some(target.to_string());
        self
    }

    pub fn payload(mut self, payload: JsonValue) -> Self {
        self.payload = payload;
        self
    }
}

/// Fire-and-forget audit writer.
///
/// `record` never fails from the caller's point of view; sinks swallow and
/// log their own errors so no decision waits on them.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

#[async_trait]
impl<T> IdentityStore for Arc<T>
where
    T: IdentityStore + ?Sized,
{
    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        (**self).find_user(id).await
    }

    async fn find_roles_for_user(&self, id: UserId) -> Result<Vec<Role>, StoreError> {
        (**self).find_roles_for_user(id).await
    }

    async fn find_role(&self, id: RoleId) -> Result<Option<Role>, StoreError> {
        (**self).find_role(id).await
    }

    async fn find_policies_for_role(&self, id: RoleId) -> Result<Vec<Policy>, StoreError> {
        (**self).find_policies_for_role(id).await
    }

    async fn find_org_children(&self, unit_id: OrgUnitId) -> Result<Vec<OrgUnit>, StoreError> {
        (**self).find_org_children(unit_id).await
    }
}

#[async_trait]
impl<T> RoleAssignmentStore for Arc<T>
where
    T: RoleAssignmentStore + ?Sized,
{
    async fn replace_roles(&self, user_id: UserId, role_id: RoleId) -> Result<u64, StoreError> {
        (**self).replace_roles(user_id, role_id).await
    }

    async fn remove_role(
        &self,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<Option<u64>, StoreError> {
        (**self).remove_role(user_id, role_id).await
    }
}

#[async_trait]
impl<T> RoleStore for Arc<T>
where
    T: RoleStore + ?Sized,
{
    async fn list_policies(&self) -> Result<Vec<Policy>, StoreError> {
        (**self).list_policies().await
    }

    async fn find_policies_by_keys(&self, keys: &[PolicyKey]) -> Result<Vec<Policy>, StoreError> {
        (**self).find_policies_by_keys(keys).await
    }

    async fn insert_role(&self, role: Role, policy_ids: Vec<PolicyId>) -> Result<(), StoreError> {
        (**self).insert_role(role, policy_ids).await
    }

    async fn delete_role_if_unassigned(&self, role_id: RoleId) -> Result<RoleDeletion, StoreError> {
        (**self).delete_role_if_unassigned(role_id).await
    }
}

#[async_trait]
impl<T> ManagerAssignmentStore for Arc<T>
where
    T: ManagerAssignmentStore + ?Sized,
{
    async fn find_manager_assignments(
        &self,
        card_no: &EmployeeCardNo,
    ) -> Result<Vec<ManagerAssignment>, StoreError> {
        (**self).find_manager_assignments(card_no).await
    }
}

impl<T> AuditSink for Arc<T>
where
    T: AuditSink + ?Sized,
{
    fn record(&self, event: AuditEvent) {
        (**self).record(event)
    }
}
