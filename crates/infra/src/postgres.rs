//! Postgres-backed directory.
//!
//! ## Error Mapping
//!
//! | SQLx Error | StoreError | Scenario |
//! |------------|------------|----------|
//! | Database `23503` (foreign key) | `Corrupt` | role/policy reference points nowhere |
//! | Decode / ColumnDecode / ColumnNotFound | `Corrupt` | schema drift or bad row |
//! | PoolClosed / PoolTimedOut / Io / Tls | `Unavailable` | retryable infrastructure fault |
//! | Other | `Unavailable` | |
//!
//! ## Concurrency
//!
//! `replace_roles` and `remove_role` lock the user row (`FOR UPDATE`) for the
//! whole transaction, so concurrent replacements for one user serialize and
//! the last committer wins. `replace_roles` also takes `FOR SHARE` on the role
//! row, which conflicts with the `FOR UPDATE` taken by
//! `delete_role_if_unassigned`, so a role is never deleted while an
//! assignment to it commits.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use workforce_auth::{
    IdentityStore, ManagerAssignment, ManagerAssignmentStore, OrgUnit, Policy, PolicyKey, Role,
    RoleAssignmentStore, RoleDeletion, RoleKind, RoleStore, StoreError, User,
};
use workforce_core::{
    DepartmentId, DesignationId, EmployeeCardNo, OrgUnitId, PolicyId, RoleId, UserId,
};

/// DDL for every table the directory reads and writes.
pub const SCHEMA: &str = include_str!("../schema/authorization.sql");

#[derive(Debug, Clone)]
pub struct PostgresDirectory {
    pool: Arc<PgPool>,
}

impl PostgresDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create missing tables. Statements are idempotent.
    #[instrument(skip(self), err)]
    pub async fn apply_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("apply_schema", e))?;
        Ok(())
    }

    async fn begin(&self, operation: &str) -> Result<Transaction<'_, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }
}

async fn lock_user(
    tx: &mut Transaction<'_, Postgres>,
    user_id: UserId,
) -> Result<(), StoreError> {
    let row = sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_user", e))?;
    match row {
        Some(_) => Ok(()),
        None => Err(StoreError::UserNotFound(user_id)),
    }
}

async fn bump_policy_version(
    tx: &mut Transaction<'_, Postgres>,
    user_id: UserId,
) -> Result<u64, StoreError> {
    let row = sqlx::query(
        r#"
        UPDATE users
        SET policy_version = policy_version + 1
        WHERE id = $1
        RETURNING policy_version
        "#,
    )
    .bind(user_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("bump_policy_version", e))?;

    let version: i64 = row
        .try_get("policy_version")
        .map_err(|e| map_sqlx_error("bump_policy_version", e))?;
    to_version(version)
}

#[async_trait]
impl IdentityStore for PostgresDirectory {
    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, email, employee_card_no, is_super_admin, org_unit_id, policy_version
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_user", e))?;

        row.map(|row| User::try_from(decode::<UserRow>("find_user", &row)?))
            .transpose()
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn find_roles_for_user(&self, id: UserId) -> Result<Vec<Role>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.name, r.description, r.kind
            FROM roles r
            JOIN user_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = $1
            ORDER BY r.name
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_roles_for_user", e))?;

        rows.iter()
            .map(|row| Role::try_from(decode::<RoleRow>("find_roles_for_user", row)?))
            .collect()
    }

    #[instrument(skip(self), fields(role_id = %id), err)]
    async fn find_role(&self, id: RoleId) -> Result<Option<Role>, StoreError> {
        let row = sqlx::query("SELECT id, name, description, kind FROM roles WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_role", e))?;

        row.map(|row| Role::try_from(decode::<RoleRow>("find_role", &row)?))
            .transpose()
    }

    #[instrument(skip(self), fields(role_id = %id), err)]
    async fn find_policies_for_role(&self, id: RoleId) -> Result<Vec<Policy>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.key, p.is_active
            FROM policies p
            JOIN role_policies rp ON rp.policy_id = p.id
            WHERE rp.role_id = $1
            ORDER BY p.key
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_policies_for_role", e))?;

        rows.iter()
            .map(|row| Policy::try_from(decode::<PolicyRow>("find_policies_for_role", row)?))
            .collect()
    }

    #[instrument(skip(self), fields(org_unit_id = %unit_id), err)]
    async fn find_org_children(&self, unit_id: OrgUnitId) -> Result<Vec<OrgUnit>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, parent_id, name FROM org_units WHERE parent_id = $1 ORDER BY id",
        )
        .bind(unit_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_org_children", e))?;

        rows.iter()
            .map(|row| decode::<OrgUnitRow>("find_org_children", row).map(OrgUnit::from))
            .collect()
    }
}

#[async_trait]
impl RoleAssignmentStore for PostgresDirectory {
    #[instrument(skip(self), fields(user_id = %user_id, role_id = %role_id), err)]
    async fn replace_roles(&self, user_id: UserId, role_id: RoleId) -> Result<u64, StoreError> {
        let mut tx = self.begin("replace_roles").await?;

        lock_user(&mut tx, user_id).await?;

        let role = sqlx::query("SELECT id FROM roles WHERE id = $1 FOR SHARE")
            .bind(role_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("replace_roles", e))?;
        if role.is_none() {
            return Err(StoreError::RoleNotFound(role_id));
        }

        sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("replace_roles", e))?;

        sqlx::query("INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2)")
            .bind(user_id.as_uuid())
            .bind(role_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("replace_roles", e))?;

        let version = bump_policy_version(&mut tx, user_id).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(version)
    }

    #[instrument(skip(self), fields(user_id = %user_id, role_id = %role_id), err)]
    async fn remove_role(
        &self,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<Option<u64>, StoreError> {
        let mut tx = self.begin("remove_role").await?;

        lock_user(&mut tx, user_id).await?;

        let removed = sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2")
            .bind(user_id.as_uuid())
            .bind(role_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("remove_role", e))?
            .rows_affected();

        if removed == 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback_transaction", e))?;
            return Ok(None);
        }

        let version = bump_policy_version(&mut tx, user_id).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(Some(version))
    }
}

#[async_trait]
impl RoleStore for PostgresDirectory {
    #[instrument(skip(self), err)]
    async fn list_policies(&self) -> Result<Vec<Policy>, StoreError> {
        let rows = sqlx::query("SELECT id, key, is_active FROM policies ORDER BY key")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_policies", e))?;

        rows.iter()
            .map(|row| Policy::try_from(decode::<PolicyRow>("list_policies", row)?))
            .collect()
    }

    #[instrument(skip(self), fields(key_count = keys.len()), err)]
    async fn find_policies_by_keys(&self, keys: &[PolicyKey]) -> Result<Vec<Policy>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let raw: Vec<String> = keys.iter().map(|k| k.as_str().to_owned()).collect();

        let rows = sqlx::query("SELECT id, key, is_active FROM policies WHERE key = ANY($1)")
            .bind(&raw)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_policies_by_keys", e))?;

        rows.iter()
            .map(|row| Policy::try_from(decode::<PolicyRow>("find_policies_by_keys", row)?))
            .collect()
    }

    #[instrument(skip(self, role, policy_ids), fields(role_id = %role.id), err)]
    async fn insert_role(&self, role: Role, policy_ids: Vec<PolicyId>) -> Result<(), StoreError> {
        let mut tx = self.begin("insert_role").await?;

        sqlx::query("INSERT INTO roles (id, name, description, kind) VALUES ($1, $2, $3, $4)")
            .bind(role.id.as_uuid())
            .bind(&role.name)
            .bind(&role.description)
            .bind(kind_str(role.kind))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_role", e))?;

        let ids: Vec<Uuid> = policy_ids.iter().map(|id| *id.as_uuid()).collect();
        sqlx::query(
            r#"
            INSERT INTO role_policies (role_id, policy_id)
            SELECT $1, UNNEST($2::uuid[])
            "#,
        )
        .bind(role.id.as_uuid())
        .bind(&ids)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_role_policies", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(role_id = %role_id), err)]
    async fn delete_role_if_unassigned(&self, role_id: RoleId) -> Result<RoleDeletion, StoreError> {
        let mut tx = self.begin("delete_role").await?;

        let role = sqlx::query("SELECT id FROM roles WHERE id = $1 FOR UPDATE")
            .bind(role_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;
        if role.is_none() {
            return Ok(RoleDeletion::NotFound);
        }

        let holders: i64 = sqlx::query("SELECT COUNT(*) AS holders FROM user_roles WHERE role_id = $1")
            .bind(role_id.as_uuid())
            .fetch_one(&mut *tx)
            .await
            .and_then(|row| row.try_get("holders"))
            .map_err(|e| map_sqlx_error("delete_role", e))?;
        if holders > 0 {
            return Ok(RoleDeletion::InUse {
                holders: holders as u64,
            });
        }

        sqlx::query("DELETE FROM role_policies WHERE role_id = $1")
            .bind(role_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;
        sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(role_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(RoleDeletion::Deleted)
    }
}

#[async_trait]
impl ManagerAssignmentStore for PostgresDirectory {
    #[instrument(skip(self), fields(card_no = %card_no), err)]
    async fn find_manager_assignments(
        &self,
        card_no: &EmployeeCardNo,
    ) -> Result<Vec<ManagerAssignment>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT manager_card_no, department_id, org_unit_id, designation_id, is_extinct
            FROM emp_manager
            WHERE manager_card_no = $1
            "#,
        )
        .bind(card_no.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_manager_assignments", e))?;

        rows.iter()
            .map(|row| {
                ManagerAssignment::try_from(decode::<ManagerRow>("find_manager_assignments", row)?)
            })
            .collect()
    }
}

fn decode<'r, T>(operation: &str, row: &'r PgRow) -> Result<T, StoreError>
where
    T: FromRow<'r, PgRow>,
{
    T::from_row(row).map_err(|e| map_sqlx_error(operation, e))
}

fn to_version(raw: i64) -> Result<u64, StoreError> {
    u64::try_from(raw).map_err(|_| StoreError::Corrupt(format!("negative policy_version {raw}")))
}

fn kind_str(kind: RoleKind) -> &'static str {
    match kind {
        RoleKind::Standard => "standard",
        RoleKind::SystemBypass => "system_bypass",
    }
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            classify_database_error(db_err.code().as_deref(), msg)
        }
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::TypeNotFound { .. } => {
            StoreError::Corrupt(format!("decode error in {}: {}", operation, err))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Constraint violations are permanent; everything else is treated as a
/// transient server fault.
fn classify_database_error(code: Option<&str>, msg: String) -> StoreError {
    match code {
        // unique_violation
        Some("23505") => StoreError::Conflict(msg),
        // foreign_key_violation
        Some("23503") => StoreError::Corrupt(msg),
        _ => StoreError::Unavailable(msg),
    }
}

// SQLx row types

#[derive(Debug)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    employee_card_no: Option<String>,
    is_super_admin: bool,
    org_unit_id: Option<Uuid>,
    policy_version: i64,
}

impl<'r> FromRow<'r, PgRow> for UserRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(UserRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            employee_card_no: row.try_get("employee_card_no")?,
            is_super_admin: row.try_get("is_super_admin")?,
            org_unit_id: row.try_get("org_unit_id")?,
            policy_version: row.try_get("policy_version")?,
        })
    }
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        // Blank card numbers exist in imported HR data; treat them as absent.
        let employee_card_no = row
            .employee_card_no
            .filter(|raw| !raw.trim().is_empty())
            .map(EmployeeCardNo::new)
            .transpose()
            .map_err(|e| StoreError::Corrupt(format!("user {}: {}", row.id, e)))?;

        Ok(User {
            id: UserId::from_uuid(row.id),
            name: row.name,
            email: row.email,
            employee_card_no,
            is_super_admin: row.is_super_admin,
            org_unit_id: row.org_unit_id.map(OrgUnitId::from_uuid),
            policy_version: to_version(row.policy_version)?,
        })
    }
}

#[derive(Debug)]
struct RoleRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    kind: String,
}

impl<'r> FromRow<'r, PgRow> for RoleRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(RoleRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            kind: row.try_get("kind")?,
        })
    }
}

impl TryFrom<RoleRow> for Role {
    type Error = StoreError;

    fn try_from(row: RoleRow) -> Result<Self, Self::Error> {
        let kind = match row.kind.as_str() {
            "standard" => RoleKind::Standard,
            "system_bypass" => RoleKind::SystemBypass,
            other => {
                return Err(StoreError::Corrupt(format!(
                    "role {}: unknown kind '{other}'",
                    row.id
                )));
            }
        };
        Ok(Role {
            id: RoleId::from_uuid(row.id),
            name: row.name,
            description: row.description,
            kind,
        })
    }
}

#[derive(Debug)]
struct PolicyRow {
    id: Uuid,
    key: String,
    is_active: bool,
}

impl<'r> FromRow<'r, PgRow> for PolicyRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(PolicyRow {
            id: row.try_get("id")?,
            key: row.try_get("key")?,
            is_active: row.try_get("is_active")?,
        })
    }
}

impl TryFrom<PolicyRow> for Policy {
    type Error = StoreError;

    fn try_from(row: PolicyRow) -> Result<Self, Self::Error> {
        let key = PolicyKey::parse(&row.key)
            .map_err(|e| StoreError::Corrupt(format!("policy {}: key '{}': {e}", row.id, row.key)))?;
        Ok(Policy {
            id: PolicyId::from_uuid(row.id),
            key,
            is_active: row.is_active,
        })
    }
}

#[derive(Debug)]
struct OrgUnitRow {
    id: Uuid,
    parent_id: Option<Uuid>,
    name: String,
}

impl<'r> FromRow<'r, PgRow> for OrgUnitRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(OrgUnitRow {
            id: row.try_get("id")?,
            parent_id: row.try_get("parent_id")?,
            name: row.try_get("name")?,
        })
    }
}

impl From<OrgUnitRow> for OrgUnit {
    fn from(row: OrgUnitRow) -> Self {
        OrgUnit {
            id: OrgUnitId::from_uuid(row.id),
            parent_id: row.parent_id.map(OrgUnitId::from_uuid),
            name: row.name,
        }
    }
}

#[derive(Debug)]
struct ManagerRow {
    manager_card_no: String,
    department_id: Option<i64>,
    org_unit_id: Option<Uuid>,
    designation_id: Option<i64>,
    is_extinct: bool,
}

impl<'r> FromRow<'r, PgRow> for ManagerRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ManagerRow {
            manager_card_no: row.try_get("manager_card_no")?,
            department_id: row.try_get("department_id")?,
            org_unit_id: row.try_get("org_unit_id")?,
            designation_id: row.try_get("designation_id")?,
            is_extinct: row.try_get("is_extinct")?,
        })
    }
}

impl TryFrom<ManagerRow> for ManagerAssignment {
    type Error = StoreError;

    fn try_from(row: ManagerRow) -> Result<Self, Self::Error> {
        let manager_card_no = EmployeeCardNo::new(row.manager_card_no)
            .map_err(|e| StoreError::Corrupt(format!("emp_manager row: {e}")))?;
        Ok(ManagerAssignment {
            manager_card_no,
            department_id: row.department_id.map(DepartmentId),
            org_unit_id: row.org_unit_id.map(OrgUnitId::from_uuid),
            designation_id: row.designation_id.map(DesignationId),
            is_extinct: row.is_extinct,
        })
    }
}
