//! In-memory directory for tests and local development.
//!
//! One `RwLock` guards the whole state, so every write (role replacement,
//! role deletion) is atomic with respect to every read.

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use workforce_auth::{
    IdentityStore, ManagerAssignment, ManagerAssignmentStore, OrgUnit, Policy, PolicyCatalog,
    PolicyKey, Role, RoleAssignmentStore, RoleDeletion, RoleStore, StoreError, User,
};
use workforce_core::{EmployeeCardNo, Entity, OrgUnitId, PolicyId, RoleId, UserId};

#[derive(Debug, Default)]
struct DirectoryState {
    users: HashMap<UserId, User>,
    roles: HashMap<RoleId, Role>,
    policies: HashMap<PolicyId, Policy>,
    role_policies: HashMap<RoleId, BTreeSet<PolicyId>>,
    user_roles: HashMap<UserId, Vec<RoleId>>,
    org_units: HashMap<OrgUnitId, OrgUnit>,
    manager_assignments: Vec<ManagerAssignment>,
}

impl DirectoryState {
    fn policy_by_key(&self, key: &PolicyKey) -> Option<&Policy> {
        self.policies.values().find(|p| &p.key == key)
    }

    fn seed_catalog(&mut self) {
        for definition in PolicyCatalog::global().definitions() {
            if self.policy_by_key(&definition.key).is_none() {
                index(&mut self.policies, Policy::new(definition.key.clone()));
            }
        }
    }

    fn holders_of(&self, role_id: RoleId) -> u64 {
        self.user_roles
            .values()
            .filter(|roles| roles.contains(&role_id))
            .count() as u64
    }
}

fn index<E>(map: &mut HashMap<E::Id, E>, entity: E) -> E::Id
where
    E: Entity,
    E::Id: Copy + Eq + Hash,
{
    let id = *entity.id();
    map.insert(id, entity);
    id
}

/// Users, roles, policies, org units and manager rows held in memory.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    state: RwLock<DirectoryState>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A directory with one active policy row per catalog key.
    pub fn with_catalog() -> Self {
        let mut state = DirectoryState::default();
        state.seed_catalog();
        Self {
            state: RwLock::new(state),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, DirectoryState>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Unavailable("directory lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, DirectoryState>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Unavailable("directory lock poisoned".into()))
    }

    /// Insert an active row for every catalog key not yet persisted.
    pub fn seed_catalog(&self) -> Result<(), StoreError> {
        self.write()?.seed_catalog();
        Ok(())
    }

    pub fn add_user(&self, user: User) -> Result<UserId, StoreError> {
        Ok(index(&mut self.write()?.users, user))
    }

    pub fn add_org_unit(&self, unit: OrgUnit) -> Result<OrgUnitId, StoreError> {
        Ok(index(&mut self.write()?.org_units, unit))
    }

    pub fn add_policy(&self, policy: Policy) -> Result<PolicyId, StoreError> {
        Ok(index(&mut self.write()?.policies, policy))
    }

    /// Add a role carrying the given keys, creating missing policy rows.
    pub fn add_role(&self, role: Role, keys: &[&str]) -> Result<RoleId, StoreError> {
        let mut state = self.write()?;
        let mut attached = BTreeSet::new();
        for raw in keys {
            let key = PolicyKey::parse(raw)
                .map_err(|e| StoreError::Corrupt(format!("policy key '{raw}': {e}")))?;
            let existing = state.policy_by_key(&key).map(|p| p.id);
            let policy_id = match existing {
                Some(id) => id,
                None => index(&mut state.policies, Policy::new(key)),
            };
            attached.insert(policy_id);
        }
        let role_id = index(&mut state.roles, role);
        state.role_policies.insert(role_id, attached);
        Ok(role_id)
    }

    /// Attach a role without touching `policy_version` (fixture seeding).
    pub fn grant_role(&self, user_id: UserId, role_id: RoleId) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let roles = state.user_roles.entry(user_id).or_default();
        if !roles.contains(&role_id) {
            roles.push(role_id);
        }
        Ok(())
    }

    pub fn add_manager_assignment(&self, row: ManagerAssignment) -> Result<(), StoreError> {
        self.write()?.manager_assignments.push(row);
        Ok(())
    }

    /// Flip `is_active` on the row with this key; `false` when no row exists.
    pub fn set_policy_active(&self, key: &PolicyKey, active: bool) -> Result<bool, StoreError> {
        let mut state = self.write()?;
        Ok(match state.policies.values_mut().find(|p| &p.key == key) {
            Some(policy) => {
                policy.is_active = active;
                true
            }
            None => false,
        })
    }

    pub fn policy_id(&self, key: &PolicyKey) -> Option<PolicyId> {
        self.state.read().ok()?.policy_by_key(key).map(|p| p.id)
    }

    pub fn role_ids_of(&self, user_id: UserId) -> Vec<RoleId> {
        self.state
            .read()
            .ok()
            .and_then(|state| state.user_roles.get(&user_id).cloned())
            .unwrap_or_default()
    }

    pub fn policy_version_of(&self, user_id: UserId) -> Option<u64> {
        self.state
            .read()
            .ok()?
            .users
            .get(&user_id)
            .map(|u| u.policy_version)
    }
}

#[async_trait]
impl IdentityStore for InMemoryDirectory {
    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.read()?.users.get(&id).cloned())
    }

    async fn find_roles_for_user(&self, id: UserId) -> Result<Vec<Role>, StoreError> {
        let state = self.read()?;
        let Some(role_ids) = state.user_roles.get(&id) else {
            return Ok(Vec::new());
        };
        Ok(role_ids
            .iter()
            .filter_map(|role_id| state.roles.get(role_id).cloned())
            .collect())
    }

    async fn find_role(&self, id: RoleId) -> Result<Option<Role>, StoreError> {
        Ok(self.read()?.roles.get(&id).cloned())
    }

    async fn find_policies_for_role(&self, id: RoleId) -> Result<Vec<Policy>, StoreError> {
        let state = self.read()?;
        let Some(policy_ids) = state.role_policies.get(&id) else {
            return Ok(Vec::new());
        };
        Ok(policy_ids
            .iter()
            .filter_map(|policy_id| state.policies.get(policy_id).cloned())
            .collect())
    }

    async fn find_org_children(&self, unit_id: OrgUnitId) -> Result<Vec<OrgUnit>, StoreError> {
        let state = self.read()?;
        let mut children: Vec<OrgUnit> = state
            .org_units
            .values()
            .filter(|unit| unit.parent_id == Some(unit_id))
            .cloned()
            .collect();
        children.sort_by_key(|unit| unit.id);
        Ok(children)
    }
}

#[async_trait]
impl RoleAssignmentStore for InMemoryDirectory {
    async fn replace_roles(&self, user_id: UserId, role_id: RoleId) -> Result<u64, StoreError> {
        let mut state = self.write()?;
        if !state.roles.contains_key(&role_id) {
            return Err(StoreError::RoleNotFound(role_id));
        }
        let Some(user) = state.users.get_mut(&user_id) else {
            return Err(StoreError::UserNotFound(user_id));
        };
        user.policy_version += 1;
        let version = user.policy_version;
        state.user_roles.insert(user_id, vec![role_id]);
        Ok(version)
    }

    async fn remove_role(
        &self,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<Option<u64>, StoreError> {
        let mut state = self.write()?;
        if !state.users.contains_key(&user_id) {
            return Err(StoreError::UserNotFound(user_id));
        }

        let held = match state.user_roles.get_mut(&user_id) {
            Some(roles) => {
                let before = roles.len();
                roles.retain(|r| *r != role_id);
                roles.len() != before
            }
            None => false,
        };
        if !held {
            return Ok(None);
        }

        let Some(user) = state.users.get_mut(&user_id) else {
            return Err(StoreError::UserNotFound(user_id));
        };
        user.policy_version += 1;
        Ok(Some(user.policy_version))
    }
}

#[async_trait]
impl RoleStore for InMemoryDirectory {
    async fn list_policies(&self) -> Result<Vec<Policy>, StoreError> {
        let mut policies: Vec<Policy> = self.read()?.policies.values().cloned().collect();
        policies.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(policies)
    }

    async fn find_policies_by_keys(&self, keys: &[PolicyKey]) -> Result<Vec<Policy>, StoreError> {
        let state = self.read()?;
        Ok(keys
            .iter()
            .filter_map(|key| state.policy_by_key(key).cloned())
            .collect())
    }

    async fn insert_role(&self, role: Role, policy_ids: Vec<PolicyId>) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state.roles.values().any(|existing| existing.name == role.name) {
            return Err(StoreError::Conflict(format!(
                "role name '{}' already exists",
                role.name
            )));
        }
        if let Some(unknown) = policy_ids.iter().find(|id| !state.policies.contains_key(*id)) {
            return Err(StoreError::Corrupt(format!(
                "role '{}' references unknown policy {unknown}",
                role.name
            )));
        }
        let role_id = index(&mut state.roles, role);
        state
            .role_policies
            .insert(role_id, policy_ids.into_iter().collect());
        Ok(())
    }

    async fn delete_role_if_unassigned(&self, role_id: RoleId) -> Result<RoleDeletion, StoreError> {
        let mut state = self.write()?;
        if !state.roles.contains_key(&role_id) {
            return Ok(RoleDeletion::NotFound);
        }
        let holders = state.holders_of(role_id);
        if holders > 0 {
            return Ok(RoleDeletion::InUse { holders });
        }
        state.roles.remove(&role_id);
        state.role_policies.remove(&role_id);
        Ok(RoleDeletion::Deleted)
    }
}

#[async_trait]
impl ManagerAssignmentStore for InMemoryDirectory {
    async fn find_manager_assignments(
        &self,
        card_no: &EmployeeCardNo,
    ) -> Result<Vec<ManagerAssignment>, StoreError> {
        Ok(self
            .read()?
            .manager_assignments
            .iter()
            .filter(|row| &row.manager_card_no == card_no)
            .cloned()
            .collect())
    }
}
