use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use workforce_core::{Entity, PolicyId};

/// Policy key, the public wire name of a permission grant.
///
/// Keys are `{resource}.{action}` or `{resource}.{subresource}.{action}`:
/// two or three dot-separated lowercase segments, each matching
/// `[a-z][a-z0-9_-]*`. A well-formed key is not necessarily a *known* key;
/// membership is decided by the [`crate::PolicyCatalog`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PolicyKey(Cow<'static, str>);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyKeyError {
    #[error("policy key must have 2 or 3 segments, found {0}")]
    SegmentCount(usize),

    #[error("invalid policy key segment '{0}'")]
    InvalidSegment(String),
}

impl PolicyKey {
    pub fn parse(raw: &str) -> Result<Self, PolicyKeyError> {
        check_format(raw)?;
        Ok(Self(Cow::Owned(raw.to_string())))
    }

    /// Catalog keys are checked by the catalog's own tests, not at runtime.
    pub(crate) const fn from_static(raw: &'static str) -> Self {
        Self(Cow::Borrowed(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading segment, e.g. `attendance` for `attendance.view`.
    pub fn resource(&self) -> &str {
        self.0.split('.').next().unwrap_or_default()
    }

    /// Trailing segment, e.g. `view` for `sales.report.view`.
    pub fn action(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or_default()
    }
}

fn check_format(raw: &str) -> Result<(), PolicyKeyError> {
    let segments: Vec<&str> = raw.split('.').collect();
    if !(2..=3).contains(&segments.len()) {
        return Err(PolicyKeyError::SegmentCount(segments.len()));
    }

    for segment in segments {
        let mut chars = segment.chars();
        let head_ok = chars.next().is_some_and(|c| c.is_ascii_lowercase());
        let tail_ok =
            chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
        if !head_ok || !tail_ok {
            return Err(PolicyKeyError::InvalidSegment(segment.to_string()));
        }
    }

    Ok(())
}

impl TryFrom<String> for PolicyKey {
    type Error = PolicyKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        check_format(&value)?;
        Ok(Self(Cow::Owned(value)))
    }
}

impl From<PolicyKey> for String {
    fn from(value: PolicyKey) -> Self {
        value.0.into_owned()
    }
}

impl core::str::FromStr for PolicyKey {
    type Err = PolicyKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl core::fmt::Display for PolicyKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted policy row. Deactivation is the only lifecycle change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub key: PolicyKey,
    pub is_active: bool,
}

impl Policy {
    pub fn new(key: PolicyKey) -> Self {
        Self {
            id: PolicyId::new(),
            key,
            is_active: true,
        }
    }
}

impl Entity for Policy {
    type Id = PolicyId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn accepts_two_and_three_segment_keys() {
        assert!(PolicyKey::parse("attendance.view").is_ok());
        assert!(PolicyKey::parse("sales.report.view").is_ok());
        assert!(PolicyKey::parse("users.assign_role").is_ok());
        assert!(PolicyKey::parse("org-units.view").is_ok());
    }

    #[test]
    fn rejects_malformed_keys() {
        assert_eq!(
            PolicyKey::parse("attendance"),
            Err(PolicyKeyError::SegmentCount(1))
        );
        assert_eq!(
            PolicyKey::parse("a.b.c.d"),
            Err(PolicyKeyError::SegmentCount(4))
        );
        assert!(matches!(
            PolicyKey::parse("Attendance.view"),
            Err(PolicyKeyError::InvalidSegment(_))
        ));
        assert!(matches!(
            PolicyKey::parse("attendance..view"),
            Err(PolicyKeyError::InvalidSegment(_))
        ));
        assert!(matches!(
            PolicyKey::parse("1sales.view"),
            Err(PolicyKeyError::InvalidSegment(_))
        ));
    }

    #[test]
    fn exposes_resource_and_action() {
        let key = PolicyKey::parse("sales.report.export").unwrap();
        assert_eq!(key.resource(), "sales");
        assert_eq!(key.action(), "export");
    }

    #[test]
    fn deserialization_validates_format() {
        let ok: PolicyKey = serde_json::from_str("\"claims.approve\"").unwrap();
        assert_eq!(ok.as_str(), "claims.approve");
        assert!(serde_json::from_str::<PolicyKey>("\"CLAIMS\"").is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: every string built from 2-3 well-formed segments parses.
        #[test]
        fn generated_well_formed_keys_parse(
            segments in prop::collection::vec("[a-z][a-z0-9_-]{0,8}", 2..=3)
        ) {
            let raw = segments.join(".");
            prop_assert!(PolicyKey::parse(&raw).is_ok());
        }

        /// Property: keys containing an uppercase letter never parse.
        #[test]
        fn uppercase_keys_never_parse(resource in "[A-Z][a-z]{0,6}", action in "[a-z]{1,6}") {
            let raw = format!("{resource}.{action}");
            prop_assert!(PolicyKey::parse(&raw).is_err());
        }
    }
}
