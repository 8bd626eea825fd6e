//! Org-unit subtree resolution.

use std::collections::{HashSet, VecDeque};

use workforce_core::OrgUnitId;

use crate::store::{IdentityStore, StoreError};

/// Result of a subtree walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subtree {
    pub ids: HashSet<OrgUnitId>,
    /// Some units below the depth limit were not visited.
    pub truncated: bool,
}

/// Resolves the set of org units beneath (and including) a given unit.
pub struct OrgHierarchyResolver<'a, S> {
    store: &'a S,
    max_depth: usize,
}

impl<'a, S> OrgHierarchyResolver<'a, S>
where
    S: IdentityStore,
{
    pub fn new(store: &'a S, max_depth: usize) -> Self {
        Self { store, max_depth }
    }

    /// Transitive closure over `parent_id`, self included.
    pub async fn subtree_ids(&self, unit_id: OrgUnitId) -> Result<HashSet<OrgUnitId>, StoreError> {
        Ok(self.subtree(unit_id).await?.ids)
    }

    /// Like [`subtree_ids`](Self::subtree_ids), also reporting whether the
    /// depth limit cut off any units.
    ///
    /// A visited set makes the walk terminate on cyclic data, and the depth
    /// limit bounds it on pathological trees.
    pub async fn subtree(&self, unit_id: OrgUnitId) -> Result<Subtree, StoreError> {
        let mut visited: HashSet<OrgUnitId> = HashSet::new();
        let mut queue: VecDeque<(OrgUnitId, usize)> = VecDeque::new();
        let mut truncated = false;

        visited.insert(unit_id);
        queue.push_back((unit_id, 0));

        while let Some((current, depth)) = queue.pop_front() {
            let children = self.store.find_org_children(current).await?;

            if depth >= self.max_depth {
                // Leaves at the limit lose nothing.
                if !children.is_empty() {
                    truncated = true;
                    tracing::warn!(
                        org_unit = %current,
                        max_depth = self.max_depth,
                        "org hierarchy deeper than configured limit; truncating subtree"
                    );
                }
                continue;
            }

            for child in children {
                if visited.insert(child.id) {
                    queue.push_back((child.id, depth + 1));
                } else {
                    tracing::warn!(
                        org_unit = %child.id,
                        parent = %current,
                        "org unit reached twice; hierarchy contains a cycle"
                    );
                }
            }
        }

        Ok(Subtree {
            ids: visited,
            truncated,
        })
    }

    pub async fn contains(
        &self,
        root: OrgUnitId,
        candidate: OrgUnitId,
    ) -> Result<bool, StoreError> {
        if root == candidate {
            return Ok(true);
        }
        Ok(self.subtree_ids(root).await?.contains(&candidate))
    }
}
