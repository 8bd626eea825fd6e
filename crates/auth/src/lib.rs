//! `workforce-auth`: policy-based authorization for the workforce platform.
//!
//! This crate is decoupled from HTTP and storage: it reads users, roles,
//! policies and the org tree through the traits in [`store`], and answers with
//! [`Decision`] values. Expected denials are never errors.
//!
//! Layers:
//! - [`catalog`]: the fixed, code-owned set of policy keys
//! - [`authorize`]: live per-action decisions
//! - [`assignment`]: guarded role assignment (privilege escalation prevention)
//! - [`snapshot`] and [`guard`]: session-time state and request-time checks

pub mod admin;
pub mod assignment;
pub mod authorize;
pub mod catalog;
pub mod config;
pub mod error;
pub mod guard;
pub mod hierarchy;
pub mod manager;
pub mod permissions;
pub mod resolver;
pub mod roles;
pub mod snapshot;
pub mod store;
pub mod user;

pub use admin::{NewRole, RoleAdministration, RoleCreation};
pub use assignment::{RoleAssignmentGuard, RoleAssignmentService, RoleChange};
pub use authorize::{AccessRequest, AuthorizationExplanation, DecisionEngine};
pub use catalog::{CatalogReport, PolicyCatalog, PolicyDefinition, PolicyScope};
pub use config::{AuthConfig, DeploymentProfile, MAX_SNAPSHOT_TTL_SECS};
pub use error::{AuthError, Decision, DenialKind};
pub use guard::{LazyPolicyGuard, PolicyGuard, PolicyRequirement};
pub use hierarchy::{OrgHierarchyResolver, Subtree};
pub use manager::{ManagerInfo, ManagerScopeResolver, ManagerScopes};
pub use permissions::{Policy, PolicyKey, PolicyKeyError};
pub use resolver::{PolicyResolver, ResolvedPolicies};
pub use roles::{Role, RoleKind};
pub use snapshot::{AuthSnapshot, SnapshotError, SnapshotIssuer, validate_snapshot};
pub use store::{
    AuditEvent, AuditSink, IdentityStore, ManagerAssignmentStore, RoleAssignmentStore,
    RoleDeletion, RoleStore, StoreError,
};
pub use user::{ManagerAssignment, OrgUnit, User};
