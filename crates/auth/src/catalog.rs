//! The authoritative policy catalog.
//!
//! Every policy key the platform understands is declared exactly once in
//! [`DEFINITIONS`], together with its scope class. Guards, validation and the
//! role-assignment escalation check all read this one table.

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use serde::Serialize;

use crate::{AuthError, Policy, PolicyKey};

/// How far a policy's effect reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyScope {
    /// Effect is confined to the holder's org-unit subtree.
    OrgScoped,
    /// System-wide effect regardless of org unit.
    Global,
}

/// One catalog entry.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyDefinition {
    pub key: PolicyKey,
    pub scope: PolicyScope,
    pub description: &'static str,
}

impl PolicyDefinition {
    pub fn category(&self) -> &str {
        self.key.resource()
    }
}

use self::PolicyScope::{Global, OrgScoped};

const DEFINITIONS: &[(&str, PolicyScope, &str)] = &[
    // Attendance
    ("attendance.view", OrgScoped, "View attendance records"),
    ("attendance.mark", OrgScoped, "Mark own or team attendance"),
    ("attendance.edit", OrgScoped, "Correct attendance records"),
    ("attendance.approve", OrgScoped, "Approve attendance regularization"),
    // Sales reporting
    ("sales.view", OrgScoped, "View sales entries"),
    ("sales.create", OrgScoped, "Submit sales entries"),
    ("sales.edit", OrgScoped, "Edit sales entries"),
    ("sales.report.view", OrgScoped, "View sales reports"),
    ("sales.report.export", OrgScoped, "Export sales reports"),
    // Claims
    ("claims.view", OrgScoped, "View expense claims"),
    ("claims.create", OrgScoped, "File expense claims"),
    ("claims.approve", OrgScoped, "Approve expense claims"),
    // Help tickets
    ("tickets.view", OrgScoped, "View help tickets"),
    ("tickets.create", OrgScoped, "Raise help tickets"),
    ("tickets.resolve", OrgScoped, "Resolve help tickets"),
    // People
    ("users.view", OrgScoped, "View user profiles"),
    ("users.create", OrgScoped, "Create users"),
    ("users.edit", OrgScoped, "Edit user profiles"),
    ("users.assign_role", Global, "Assign or revoke user roles"),
    ("dashboard.view", OrgScoped, "View operational dashboards"),
    ("managers.view", OrgScoped, "View manager assignments"),
    // Administration
    ("admin.panel", Global, "Access the administration panel"),
    ("roles.view", Global, "View roles and their policies"),
    ("roles.create", Global, "Create roles"),
    ("roles.edit", Global, "Edit role policies"),
    ("roles.delete", Global, "Delete unassigned roles"),
    ("policies.view", Global, "View the policy catalog"),
    ("org_units.view", Global, "View the organizational tree"),
    ("org_units.manage", Global, "Restructure the organizational tree"),
    ("audit.view", Global, "Read the audit log"),
    ("sync.run", Global, "Trigger data import and sync jobs"),
];

static BUILTIN: LazyLock<PolicyCatalog> = LazyLock::new(PolicyCatalog::builtin);

/// Queryable view over the catalog table.
#[derive(Debug, Clone)]
pub struct PolicyCatalog {
    entries: HashMap<PolicyKey, PolicyDefinition>,
}

/// Result of comparing persisted policy rows against the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogReport {
    /// Persisted keys the catalog does not define.
    pub unknown: Vec<PolicyKey>,
    /// Catalog keys with no persisted row.
    pub unpersisted: Vec<PolicyKey>,
    /// Catalog keys whose persisted row is deactivated.
    pub inactive: Vec<PolicyKey>,
}

impl CatalogReport {
    /// Unknown keys are fatal; missing or inactive rows only reduce what roles can grant.
    pub fn is_healthy(&self) -> bool {
        self.unknown.is_empty()
    }
}

impl PolicyCatalog {
    /// Process-wide catalog instance.
    pub fn global() -> &'static PolicyCatalog {
        &BUILTIN
    }

    fn builtin() -> Self {
        let entries = DEFINITIONS
            .iter()
            .map(|&(key, scope, description)| {
                let key = PolicyKey::from_static(key);
                (
                    key.clone(),
                    PolicyDefinition {
                        key,
                        scope,
                        description,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &PolicyKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &PolicyKey) -> Option<&PolicyDefinition> {
        self.entries.get(key)
    }

    pub fn scope(&self, key: &PolicyKey) -> Option<PolicyScope> {
        self.entries.get(key).map(|d| d.scope)
    }

    pub fn is_org_scoped(&self, key: &PolicyKey) -> bool {
        self.scope(key) == Some(PolicyScope::OrgScoped)
    }

    /// Definitions sorted by key.
    pub fn definitions(&self) -> Vec<&PolicyDefinition> {
        let mut defs: Vec<&PolicyDefinition> = self.entries.values().collect();
        defs.sort_by(|a, b| a.key.cmp(&b.key));
        defs
    }

    pub fn global_keys(&self) -> BTreeSet<PolicyKey> {
        self.entries
            .values()
            .filter(|d| d.scope == PolicyScope::Global)
            .map(|d| d.key.clone())
            .collect()
    }

    /// Parse `raw` and require it to be a catalog key.
    pub fn validate_key(&self, raw: &str) -> Result<PolicyKey, AuthError> {
        let key = PolicyKey::parse(raw).map_err(|e| AuthError::invalid_key(raw, e.to_string()))?;
        self.ensure_known(&key)?;
        Ok(key)
    }

    pub fn ensure_known(&self, key: &PolicyKey) -> Result<(), AuthError> {
        if self.contains(key) {
            Ok(())
        } else {
            Err(AuthError::invalid_key(key.as_str(), "not in policy catalog"))
        }
    }

    /// Split keys into `(org_scoped, global)`.
    ///
    /// Keys the catalog does not know land in the global bucket.
    pub fn partition<'a, I>(&self, keys: I) -> (BTreeSet<PolicyKey>, BTreeSet<PolicyKey>)
    where
        I: IntoIterator<Item = &'a PolicyKey>,
    {
        let mut org_scoped = BTreeSet::new();
        let mut global = BTreeSet::new();
        for key in keys {
            match self.scope(key) {
                Some(PolicyScope::OrgScoped) => {
                    org_scoped.insert(key.clone());
                }
                Some(PolicyScope::Global) => {
                    global.insert(key.clone());
                }
                None => {
                    tracing::warn!(policy = %key, "policy not in catalog; treating as global");
                    global.insert(key.clone());
                }
            }
        }
        (org_scoped, global)
    }

    pub fn reconcile(&self, policies: &[Policy]) -> CatalogReport {
        let mut report = CatalogReport::default();
        let mut persisted: BTreeSet<&PolicyKey> = BTreeSet::new();

        for policy in policies {
            persisted.insert(&policy.key);
            if !self.contains(&policy.key) {
                report.unknown.push(policy.key.clone());
            } else if !policy.is_active {
                report.inactive.push(policy.key.clone());
            }
        }

        for def in self.definitions() {
            if !persisted.contains(&def.key) {
                report.unpersisted.push(def.key.clone());
            }
        }

        report.unknown.sort();
        report.unknown.dedup();
        report.inactive.sort();
        report.inactive.dedup();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: &str) -> PolicyKey {
        PolicyKey::parse(raw).unwrap()
    }

    #[test]
    fn builtin_keys_are_well_formed_and_unique() {
        for (raw, _, _) in DEFINITIONS {
            assert!(PolicyKey::parse(raw).is_ok(), "malformed catalog key {raw}");
        }
        assert_eq!(PolicyCatalog::global().len(), DEFINITIONS.len());
    }

    #[test]
    fn classifies_scopes() {
        let catalog = PolicyCatalog::global();
        assert!(catalog.is_org_scoped(&key("attendance.view")));
        assert_eq!(catalog.scope(&key("roles.edit")), Some(PolicyScope::Global));
        assert_eq!(catalog.scope(&key("weather.view")), None);
    }

    #[test]
    fn validate_key_rejects_typos_and_unknown_keys() {
        let catalog = PolicyCatalog::global();
        assert!(catalog.validate_key("claims.approve").is_ok());
        assert!(matches!(
            catalog.validate_key("claims.aprove"),
            Err(AuthError::InvalidPolicyKey { .. })
        ));
        assert!(matches!(
            catalog.validate_key("Claims"),
            Err(AuthError::InvalidPolicyKey { .. })
        ));
    }

    #[test]
    fn partition_puts_unknown_keys_in_global() {
        let catalog = PolicyCatalog::global();
        let keys = [key("sales.view"), key("roles.view"), key("legacy.thing")];
        let (org, global) = catalog.partition(keys.iter());
        assert_eq!(org.into_iter().collect::<Vec<_>>(), vec![key("sales.view")]);
        assert!(global.contains(&key("roles.view")));
        assert!(global.contains(&key("legacy.thing")));
    }

    #[test]
    fn reconcile_reports_drift() {
        let catalog = PolicyCatalog::global();
        let mut inactive = Policy::new(key("sync.run"));
        inactive.is_active = false;
        let rows = vec![
            Policy::new(key("attendance.view")),
            Policy::new(key("legacy.thing")),
            inactive,
        ];

        let report = catalog.reconcile(&rows);
        assert_eq!(report.unknown, vec![key("legacy.thing")]);
        assert_eq!(report.inactive, vec![key("sync.run")]);
        assert!(report.unpersisted.contains(&key("claims.approve")));
        assert!(!report.unpersisted.contains(&key("attendance.view")));
        assert!(!report.is_healthy());
    }

    #[test]
    fn category_is_leading_segment() {
        let catalog = PolicyCatalog::global();
        let def = catalog.get(&key("sales.report.export")).unwrap();
        assert_eq!(def.category(), "sales");
    }
}
