use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, Utc};

use workforce_auth::{
    AuthConfig, AuthError, DenialKind, ManagerAssignment, NewRole, OrgUnit, PolicyGuard, PolicyKey, Role,
    RoleAdministration, RoleAssignmentService, RoleStore, SnapshotError, SnapshotIssuer, StoreError,
    User,
    validate_snapshot,
};
use workforce_core::{DepartmentId, DesignationId, EmployeeCardNo, OrgUnitId};
use workforce_infra::{InMemoryAuditSink, InMemoryDirectory};

fn key(raw: &str) -> PolicyKey {
    PolicyKey::parse(raw).unwrap()
}

fn card(raw: &str) -> EmployeeCardNo {
    EmployeeCardNo::new(raw).unwrap()
}

fn issuer(dir: &Arc<InMemoryDirectory>) -> SnapshotIssuer<Arc<InMemoryDirectory>, Arc<InMemoryDirectory>> {
    SnapshotIssuer::new(dir.clone(), dir.clone(), AuthConfig::default())
}

#[tokio::test]
async fn snapshot_captures_policies_subtree_and_version() {
    let dir = Arc::new(InMemoryDirectory::with_catalog());
    let zone = OrgUnit::root("Zone");
    let store = OrgUnit::child_of(&zone, "Store");
    let zone_id = dir.add_org_unit(zone).unwrap();
    let store_id = dir.add_org_unit(store).unwrap();
    let other = dir.add_org_unit(OrgUnit::root("Elsewhere")).unwrap();

    let user = dir.add_user(User::new("Lead", "lead@example.com").in_org_unit(zone_id)).unwrap();
    let role = dir
        .add_role(Role::new("Lead"), &["attendance.view", "attendance.approve"])
        .unwrap();
    dir.grant_role(user, role).unwrap();

    let now = Utc::now();
    let snapshot = issuer(&dir).issue(user, now).await.unwrap().unwrap();

    assert_eq!(
        snapshot.policies,
        BTreeSet::from([key("attendance.approve"), key("attendance.view")])
    );
    assert_eq!(
        snapshot.accessible_org_unit_ids,
        BTreeSet::from([zone_id, store_id])
    );
    assert!(snapshot.can_access_org_unit(store_id));
    assert!(!snapshot.can_access_org_unit(other));
    assert_eq!(snapshot.issued_at_version, 0);
    assert_eq!(snapshot.expires_at - snapshot.issued_at, Duration::hours(8));
    assert!(!snapshot.is_manager);
    assert_eq!(validate_snapshot(&snapshot, 0, now), Ok(()));
}

#[tokio::test]
async fn missing_user_gets_no_snapshot() {
    let dir = Arc::new(InMemoryDirectory::new());
    let result = issuer(&dir)
        .issue(workforce_core::UserId::new(), Utc::now())
        .await
        .unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn role_change_makes_outstanding_snapshot_stale() {
    let dir = Arc::new(InMemoryDirectory::with_catalog());
    let admin = dir.add_user(User::new("Admin", "admin@example.com").super_admin()).unwrap();
    let user = dir.add_user(User::new("Clerk", "clerk@example.com")).unwrap();
    let clerk = dir.add_role(Role::new("Clerk"), &["tickets.view"]).unwrap();
    let resolver = dir.add_role(Role::new("Resolver"), &["tickets.resolve"]).unwrap();
    dir.grant_role(user, clerk).unwrap();

    let now = Utc::now();
    let snapshot = issuer(&dir).issue(user, now).await.unwrap().unwrap();

    let service = RoleAssignmentService::new(
        dir.clone(),
        Arc::new(InMemoryAuditSink::new()),
        AuthConfig::default(),
    );
    let change = service.assign_role(admin, user, resolver).await.unwrap();
    let live = change.policy_version.unwrap();

    assert_eq!(
        validate_snapshot(&snapshot, live, now),
        Err(SnapshotError::Stale { issued: 0, live: 1 })
    );

    // The stale snapshot still answers from its own contents until replaced.
    let guard = PolicyGuard::require_one("tickets.resolve").unwrap();
    assert!(!guard.check(&snapshot).allowed);

    let fresh = issuer(&dir).issue(user, now).await.unwrap().unwrap();
    assert_eq!(fresh.issued_at_version, 1);
    assert!(guard.check(&fresh).allowed);
    assert!(!fresh.has_policy(&key("tickets.view")));
}

#[tokio::test]
async fn request_guard_reads_only_the_snapshot() {
    let dir = Arc::new(InMemoryDirectory::with_catalog());
    let user = dir.add_user(User::new("Sales", "sales@example.com")).unwrap();
    let role = dir
        .add_role(Role::new("Sales"), &["sales.view", "sales.report.view"])
        .unwrap();
    dir.grant_role(user, role).unwrap();
    let snapshot = issuer(&dir).issue(user, Utc::now()).await.unwrap().unwrap();

    // Drop every live grant; the guard must not notice.
    dir.set_policy_active(&key("sales.view"), false).unwrap();
    drop(dir);

    let view = PolicyGuard::require_all(["sales.view", "sales.report.view"]).unwrap();
    assert!(view.check(&snapshot).allowed);

    let export = PolicyGuard::require_all(["sales.view", "sales.report.export"]).unwrap();
    let denied = export.check(&snapshot);
    assert_eq!(denied.reason, Some(DenialKind::MissingPolicy));
    assert_eq!(denied.missing_policies, vec![key("sales.report.export")]);
}

#[tokio::test]
async fn bypass_users_get_unconfined_snapshots() {
    let dir = Arc::new(InMemoryDirectory::with_catalog());
    let unit = dir.add_org_unit(OrgUnit::root("HQ")).unwrap();
    let ceo = dir.add_user(User::new("Ceo", "ceo@example.com").in_org_unit(unit)).unwrap();
    let bypass = dir.add_role(Role::system_bypass("CEO"), &[]).unwrap();
    dir.grant_role(ceo, bypass).unwrap();

    let snapshot = issuer(&dir).issue(ceo, Utc::now()).await.unwrap().unwrap();
    assert!(snapshot.has_bypass_role);
    assert!(snapshot.accessible_org_unit_ids.is_empty());
    assert!(snapshot.can_access_org_unit(OrgUnitId::new()));
    assert!(PolicyGuard::require_one("sync.run").unwrap().check(&snapshot).allowed);
}

#[tokio::test]
async fn manager_scope_is_attached_to_the_snapshot() {
    let dir = Arc::new(InMemoryDirectory::with_catalog());
    let unit = dir.add_org_unit(OrgUnit::root("Branch")).unwrap();
    let manager = dir.add_user(
        User::new("Mgr", "mgr@example.com").with_card_no(card("E-100")),
    )
    .unwrap();
    let former = dir.add_user(
        User::new("Former", "former@example.com").with_card_no(card("E-200")),
    )
    .unwrap();

    dir.add_manager_assignment(ManagerAssignment {
        manager_card_no: card("E-100"),
        department_id: Some(DepartmentId(7)),
        org_unit_id: None,
        designation_id: None,
        is_extinct: false,
    })
    .unwrap();
    dir.add_manager_assignment(ManagerAssignment {
        manager_card_no: card("E-100"),
        department_id: None,
        org_unit_id: Some(unit),
        designation_id: None,
        is_extinct: false,
    })
    .unwrap();
    dir.add_manager_assignment(ManagerAssignment {
        manager_card_no: card("E-100"),
        department_id: None,
        org_unit_id: None,
        designation_id: Some(DesignationId(3)),
        is_extinct: true,
    })
    .unwrap();
    dir.add_manager_assignment(ManagerAssignment {
        manager_card_no: card("E-200"),
        department_id: Some(DepartmentId(1)),
        org_unit_id: None,
        designation_id: None,
        is_extinct: true,
    })
    .unwrap();

    let snapshot = issuer(&dir).issue(manager, Utc::now()).await.unwrap().unwrap();
    assert!(snapshot.is_manager);
    let scopes = snapshot.manager_scopes.unwrap();
    assert_eq!(scopes.department_ids, Some(BTreeSet::from([DepartmentId(7)])));
    assert_eq!(scopes.org_unit_ids, Some(BTreeSet::from([unit])));
    assert_eq!(scopes.designation_ids, None);

    let former = issuer(&dir).issue(former, Utc::now()).await.unwrap().unwrap();
    assert!(!former.is_manager);
    assert_eq!(former.manager_scopes, None);
}

fn admin_service(
    dir: &Arc<InMemoryDirectory>,
) -> (
    RoleAdministration<Arc<InMemoryDirectory>, Arc<InMemoryAuditSink>>,
    Arc<InMemoryAuditSink>,
) {
    let audit = Arc::new(InMemoryAuditSink::new());
    (
        RoleAdministration::new(dir.clone(), audit.clone(), AuthConfig::default()),
        audit,
    )
}

fn new_role(name: &str, keys: &[&str]) -> NewRole {
    NewRole {
        name: name.to_string(),
        description: None,
        policy_keys: keys.iter().map(|k| k.to_string()).collect(),
    }
}

#[tokio::test]
async fn roles_are_created_from_active_catalog_policies() {
    let dir = Arc::new(InMemoryDirectory::with_catalog());
    let admin = dir.add_user(User::new("Admin", "admin@example.com").super_admin()).unwrap();
    let (admin_svc, audit) = admin_service(&dir);

    let created = admin_svc
        .create_role(admin, new_role("Supervisor", &["attendance.view", "attendance.approve"]))
        .await
        .unwrap();
    assert!(created.decision.allowed);
    let role_id = created.role_id.unwrap();
    assert_eq!(audit.actions(), vec!["role.created"]);

    let policies = workforce_auth::PolicyResolver::new(&dir)
        .role_effective_policies(role_id)
        .await
        .unwrap();
    assert_eq!(policies.len(), 2);

    let unknown = admin_svc
        .create_role(admin, new_role("Typo", &["attendance.veiw"]))
        .await
        .unwrap();
    assert_eq!(unknown.decision.reason, Some(DenialKind::PolicyNotFound));
    assert_eq!(unknown.decision.missing_policies, vec![key("attendance.veiw")]);
    assert_eq!(unknown.role_id, None);

    dir.set_policy_active(&key("claims.approve"), false).unwrap();
    let inactive = admin_svc
        .create_role(admin, new_role("Approver", &["claims.approve"]))
        .await
        .unwrap();
    assert_eq!(inactive.decision.reason, Some(DenialKind::PolicyInactive));
    assert_eq!(inactive.decision.missing_policies, vec![key("claims.approve")]);
}

#[tokio::test]
async fn malformed_policy_keys_are_invalid_not_missing() {
    let dir = Arc::new(InMemoryDirectory::with_catalog());
    let admin = dir.add_user(User::new("Admin", "admin@example.com").super_admin()).unwrap();
    let (admin_svc, audit) = admin_service(&dir);

    let denied = admin_svc
        .create_role(admin, new_role("Viewer", &["attendance.view", "Attendance View"]))
        .await
        .unwrap();
    assert_eq!(denied.decision.reason, Some(DenialKind::InvalidPolicyKey));
    assert!(denied.decision.missing_policies.is_empty());
    assert_eq!(denied.role_id, None);
    assert!(audit.actions().is_empty());
}

#[tokio::test]
async fn duplicate_role_names_are_a_permanent_conflict() {
    let dir = Arc::new(InMemoryDirectory::with_catalog());
    let admin = dir.add_user(User::new("Admin", "admin@example.com").super_admin()).unwrap();
    let (admin_svc, audit) = admin_service(&dir);

    let first = admin_svc
        .create_role(admin, new_role("Supervisor", &["attendance.view"]))
        .await
        .unwrap();
    assert!(first.decision.allowed);

    let err = admin_svc
        .create_role(admin, new_role("Supervisor", &["attendance.approve"]))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Store(StoreError::Conflict(_))));
    assert!(!err.is_retryable());
    assert_eq!(audit.actions(), vec!["role.created"]);
}

#[tokio::test]
async fn unpersisted_catalog_policy_cannot_be_granted() {
    let dir = Arc::new(InMemoryDirectory::new());
    let admin = dir.add_user(User::new("Admin", "admin@example.com").super_admin()).unwrap();
    let (admin_svc, _) = admin_service(&dir);

    let denied = admin_svc
        .create_role(admin, new_role("Viewer", &["dashboard.view"]))
        .await
        .unwrap();
    assert_eq!(denied.decision.reason, Some(DenialKind::PolicyNotFound));
    assert_eq!(denied.decision.missing_policies, vec![key("dashboard.view")]);
}

#[tokio::test]
async fn role_administration_requires_the_admin_policy() {
    let dir = Arc::new(InMemoryDirectory::with_catalog());
    let clerk = dir.add_user(User::new("Clerk", "clerk@example.com")).unwrap();
    let role = dir.add_role(Role::new("Clerk"), &["roles.view"]).unwrap();
    dir.grant_role(clerk, role).unwrap();
    let (admin_svc, audit) = admin_service(&dir);

    let denied = admin_svc
        .create_role(clerk, new_role("Sneaky", &["audit.view"]))
        .await
        .unwrap();
    assert_eq!(denied.decision.reason, Some(DenialKind::MissingPolicy));
    assert_eq!(denied.decision.missing_policies, vec![key("admin.panel")]);

    let ghost = admin_svc
        .delete_role(workforce_core::UserId::new(), role)
        .await
        .unwrap();
    assert_eq!(ghost.reason, Some(DenialKind::UserNotFound));
    assert!(audit.events().is_empty());
}

#[tokio::test]
async fn roles_in_use_cannot_be_deleted() {
    let dir = Arc::new(InMemoryDirectory::with_catalog());
    let admin = dir.add_user(User::new("Admin", "admin@example.com").super_admin()).unwrap();
    let holder = dir.add_user(User::new("Holder", "holder@example.com")).unwrap();
    let role = dir.add_role(Role::new("Temp"), &["tickets.view"]).unwrap();
    dir.grant_role(holder, role).unwrap();

    let (admin_svc, audit) = admin_service(&dir);
    let blocked = admin_svc.delete_role(admin, role).await.unwrap();
    assert_eq!(blocked.reason, Some(DenialKind::RoleInUse));

    let service = RoleAssignmentService::new(dir.clone(), audit.clone(), AuthConfig::default());
    assert!(service.remove_role(admin, holder, role).await.unwrap().decision.allowed);

    assert!(admin_svc.delete_role(admin, role).await.unwrap().allowed);
    assert_eq!(
        admin_svc.delete_role(admin, role).await.unwrap().reason,
        Some(DenialKind::RoleNotFound)
    );
    assert!(audit.actions().contains(&"role.deleted".to_string()));
}

#[tokio::test]
async fn reconcile_reports_drift_between_rows_and_catalog() {
    let dir = InMemoryDirectory::with_catalog();
    dir.set_policy_active(&key("sync.run"), false).unwrap();
    dir.add_policy(workforce_auth::Policy::new(key("payroll.run"))).unwrap();

    let policies = dir.list_policies().await.unwrap();
    let report = workforce_auth::PolicyCatalog::global().reconcile(&policies);
    assert_eq!(report.unknown, vec![key("payroll.run")]);
    assert_eq!(report.inactive, vec![key("sync.run")]);
    assert!(report.unpersisted.is_empty());
    assert!(!report.is_healthy());
}
