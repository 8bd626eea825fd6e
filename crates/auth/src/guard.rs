//! Request-time policy guard.
//!
//! Guards are built once (at startup or first use) and then evaluated against
//! the caller's [`AuthSnapshot`] on every request. Key validation happens at
//! construction, so a typo in a guard definition fails loudly instead of
//! silently denying. Evaluation never touches a store.

use std::sync::OnceLock;

use crate::{AuthError, AuthSnapshot, Decision, DenialKind, PolicyCatalog, PolicyKey};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyRequirement {
    /// Every listed policy must be held.
    All(Vec<PolicyKey>),
    /// At least one listed policy must be held.
    Any(Vec<PolicyKey>),
    One(PolicyKey),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyGuard {
    requirement: PolicyRequirement,
}

fn validate_all<I, K>(keys: I) -> Result<Vec<PolicyKey>, AuthError>
where
    I: IntoIterator<Item = K>,
    K: AsRef<str>,
{
    let catalog = PolicyCatalog::global();
    let mut validated = Vec::new();
    for raw in keys {
        validated.push(catalog.validate_key(raw.as_ref())?);
    }
    if validated.is_empty() {
        return Err(AuthError::EmptyRequirement);
    }
    validated.sort();
    validated.dedup();
    Ok(validated)
}

impl PolicyGuard {
    pub fn require_all<I, K>(keys: I) -> Result<Self, AuthError>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        Ok(Self {
            requirement: PolicyRequirement::All(validate_all(keys)?),
        })
    }

    pub fn require_any<I, K>(keys: I) -> Result<Self, AuthError>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        Ok(Self {
            requirement: PolicyRequirement::Any(validate_all(keys)?),
        })
    }

    pub fn require_one(key: &str) -> Result<Self, AuthError> {
        let key = PolicyCatalog::global().validate_key(key)?;
        Ok(Self {
            requirement: PolicyRequirement::One(key),
        })
    }

    pub fn requirement(&self) -> &PolicyRequirement {
        &self.requirement
    }

    pub fn check(&self, snapshot: &AuthSnapshot) -> Decision {
        if snapshot.bypasses_checks() {
            return Decision::allow();
        }

        let decision = match &self.requirement {
            PolicyRequirement::All(keys) => {
                let missing: Vec<PolicyKey> = keys
                    .iter()
                    .filter(|k| !snapshot.has_policy(k))
                    .cloned()
                    .collect();
                if missing.is_empty() {
                    Decision::allow()
                } else {
                    Decision::deny_missing(DenialKind::MissingPolicy, missing)
                }
            }
            PolicyRequirement::Any(keys) => {
                if keys.iter().any(|k| snapshot.has_policy(k)) {
                    Decision::allow()
                } else {
                    Decision::deny_missing(DenialKind::MissingPolicy, keys.iter().cloned())
                }
            }
            PolicyRequirement::One(key) => {
                if snapshot.has_policy(key) {
                    Decision::allow()
                } else {
                    Decision::deny_missing(DenialKind::MissingPolicy, [key.clone()])
                }
            }
        };

        if !decision.allowed {
            tracing::debug!(
                user_id = %snapshot.user_id,
                missing = ?decision.missing_policies,
                "request denied by policy guard"
            );
        }
        decision
    }
}

#[derive(Debug, Clone, Copy)]
enum GuardSource {
    All(&'static [&'static str]),
    Any(&'static [&'static str]),
    One(&'static str),
}

/// A guard declared in a `static`, validated on first use and cached.
///
/// ```ignore
/// static APPROVE_CLAIMS: LazyPolicyGuard = LazyPolicyGuard::one("claims.approve");
/// let decision = APPROVE_CLAIMS.check(&snapshot)?;
/// ```
#[derive(Debug)]
pub struct LazyPolicyGuard {
    source: GuardSource,
    cell: OnceLock<PolicyGuard>,
}

impl LazyPolicyGuard {
    pub const fn all(keys: &'static [&'static str]) -> Self {
        Self {
            source: GuardSource::All(keys),
            cell: OnceLock::new(),
        }
    }

    pub const fn any(keys: &'static [&'static str]) -> Self {
        Self {
            source: GuardSource::Any(keys),
            cell: OnceLock::new(),
        }
    }

    pub const fn one(key: &'static str) -> Self {
        Self {
            source: GuardSource::One(key),
            cell: OnceLock::new(),
        }
    }

    /// Validate (once) and return the guard.
    ///
    /// A failed validation is not cached; every use reports it again.
    pub fn get(&self) -> Result<&PolicyGuard, AuthError> {
        if let Some(guard) = self.cell.get() {
            return Ok(guard);
        }

        let guard = match self.source {
            GuardSource::All(keys) => PolicyGuard::require_all(keys)?,
            GuardSource::Any(keys) => PolicyGuard::require_any(keys)?,
            GuardSource::One(key) => PolicyGuard::require_one(key)?,
        };
        Ok(self.cell.get_or_init(|| guard))
    }

    pub fn check(&self, snapshot: &AuthSnapshot) -> Result<Decision, AuthError> {
        Ok(self.get()?.check(snapshot))
    }
}
