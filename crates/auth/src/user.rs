//! Identity records the authorization subsystem reads.
//!
//! These are plain data carriers; their lifecycle (creation, profile edits,
//! imports) belongs to the surrounding platform.

use serde::{Deserialize, Serialize};

use workforce_core::{DepartmentId, DesignationId, EmployeeCardNo, Entity, OrgUnitId, UserId};

/// A platform user as seen by authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub employee_card_no: Option<EmployeeCardNo>,
    /// Unconditional bypass of every check.
    pub is_super_admin: bool,
    pub org_unit_id: Option<OrgUnitId>,
    /// Bumped whenever the user's role set changes; invalidates snapshots.
    pub policy_version: u64,
}

impl User {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            name: name.into(),
            email: email.into().trim().to_lowercase(),
            employee_card_no: None,
            is_super_admin: false,
            org_unit_id: None,
            policy_version: 0,
        }
    }

    pub fn in_org_unit(mut self, org_unit_id: OrgUnitId) -> Self {
        self.org_unit_id = Some(org_unit_id);
        self
    }

    pub fn with_card_no(mut self, card_no: EmployeeCardNo) -> Self {
        self.employee_card_no = Some(card_no);
        self
    }

    pub fn super_admin(mut self) -> Self {
        self.is_super_admin = true;
        self
    }
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Node of the organizational tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgUnit {
    pub id: OrgUnitId,
    pub parent_id: Option<OrgUnitId>,
    pub name: String,
}

impl OrgUnit {
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            id: OrgUnitId::new(),
            parent_id: None,
            name: name.into(),
        }
    }

    pub fn child_of(parent: &OrgUnit, name: impl Into<String>) -> Self {
        Self {
            id: OrgUnitId::new(),
            parent_id: Some(parent.id),
            name: name.into(),
        }
    }
}

impl Entity for OrgUnit {
    type Id = OrgUnitId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// One `emp_manager` row: a slice of the scope a manager oversees.
///
/// Every `None` dimension leaves that axis unconstrained for this row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerAssignment {
    pub manager_card_no: EmployeeCardNo,
    pub department_id: Option<DepartmentId>,
    pub org_unit_id: Option<OrgUnitId>,
    pub designation_id: Option<DesignationId>,
    pub is_extinct: bool,
}
