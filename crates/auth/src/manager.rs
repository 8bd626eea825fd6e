//! Manager scope derived from `emp_manager` rows.
//!
//! Manager scope is informational context attached to a session. It is not a
//! policy and the decision engine never reads it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use workforce_core::{DepartmentId, DesignationId, EmployeeCardNo, OrgUnitId};

use crate::ManagerAssignment;
use crate::store::{ManagerAssignmentStore, StoreError};

/// Union of a manager's scope rows, one optional set per axis.
///
/// `None` means no row constrains that axis (unconstrained), which is not the
/// same as an empty set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerScopes {
    pub department_ids: Option<BTreeSet<DepartmentId>>,
    pub designation_ids: Option<BTreeSet<DesignationId>>,
    pub org_unit_ids: Option<BTreeSet<OrgUnitId>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerInfo {
    pub is_manager: bool,
    pub scopes: Option<ManagerScopes>,
}

impl ManagerInfo {
    pub fn not_a_manager() -> Self {
        Self::default()
    }
}

fn collect_axis<T, I>(values: I) -> Option<BTreeSet<T>>
where
    T: Ord,
    I: IntoIterator<Item = Option<T>>,
{
    let set: BTreeSet<T> = values.into_iter().flatten().collect();
    if set.is_empty() { None } else { Some(set) }
}

/// Fold assignment rows, skipping extinct ones.
pub fn fold_assignments(rows: &[ManagerAssignment]) -> ManagerInfo {
    let live: Vec<&ManagerAssignment> = rows.iter().filter(|r| !r.is_extinct).collect();
    if live.is_empty() {
        return ManagerInfo::not_a_manager();
    }

    ManagerInfo {
        is_manager: true,
        scopes: Some(ManagerScopes {
            department_ids: collect_axis(live.iter().map(|r| r.department_id)),
            designation_ids: collect_axis(live.iter().map(|r| r.designation_id)),
            org_unit_ids: collect_axis(live.iter().map(|r| r.org_unit_id)),
        }),
    }
}

pub struct ManagerScopeResolver<'a, M> {
    store: &'a M,
}

impl<'a, M> ManagerScopeResolver<'a, M>
where
    M: ManagerAssignmentStore,
{
    pub fn new(store: &'a M) -> Self {
        Self { store }
    }

    pub async fn manager_info(&self, card_no: &EmployeeCardNo) -> Result<ManagerInfo, StoreError> {
        let rows = self.store.find_manager_assignments(card_no).await?;
        let info = fold_assignments(&rows);
        tracing::debug!(
            card_no = %card_no,
            rows = rows.len(),
            is_manager = info.is_manager,
            "resolved manager scope"
        );
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card() -> EmployeeCardNo {
        EmployeeCardNo::new("E-100").unwrap()
    }

    fn row(
        department: Option<i64>,
        designation: Option<i64>,
        org_unit: Option<OrgUnitId>,
        extinct: bool,
    ) -> ManagerAssignment {
        ManagerAssignment {
            manager_card_no: card(),
            department_id: department.map(DepartmentId),
            org_unit_id: org_unit,
            designation_id: designation.map(DesignationId),
            is_extinct: extinct,
        }
    }

    #[test]
    fn no_rows_means_not_a_manager() {
        assert_eq!(fold_assignments(&[]), ManagerInfo::not_a_manager());
    }

    #[test]
    fn extinct_rows_are_ignored() {
        let info = fold_assignments(&[row(Some(1), None, None, true)]);
        assert!(!info.is_manager);
        assert!(info.scopes.is_none());
    }

    #[test]
    fn unconstrained_axis_is_none_not_empty() {
        let info = fold_assignments(&[row(Some(7), None, None, false)]);
        let scopes = info.scopes.unwrap();
        assert!(info.is_manager);
        assert_eq!(scopes.department_ids, Some(BTreeSet::from([DepartmentId(7)])));
        assert_eq!(scopes.designation_ids, None);
        assert_eq!(scopes.org_unit_ids, None);
    }

    #[test]
    fn rows_union_per_axis() {
        let unit = OrgUnitId::new();
        let info = fold_assignments(&[
            row(Some(1), Some(10), None, false),
            row(Some(2), None, Some(unit), false),
            row(Some(1), Some(11), None, false),
            row(Some(99), None, None, true),
        ]);
        let scopes = info.scopes.unwrap();
        assert_eq!(
            scopes.department_ids,
            Some(BTreeSet::from([DepartmentId(1), DepartmentId(2)]))
        );
        assert_eq!(
            scopes.designation_ids,
            Some(BTreeSet::from([DesignationId(10), DesignationId(11)]))
        );
        assert_eq!(scopes.org_unit_ids, Some(BTreeSet::from([unit])));
    }
}
