use serde::{Deserialize, Serialize};

use workforce_core::{Entity, RoleId};

/// Whether a role is an ordinary policy bundle or the top-level bypass role.
///
/// The bypass role is identified by this marker, never by its display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    #[default]
    Standard,
    /// Non-revocable system role that passes every decision check.
    SystemBypass,
}

/// A named bundle of policies assignable to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub description: Option<String>,
    pub kind: RoleKind,
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: RoleId::new(),
            name: name.into(),
            description: None,
            kind: RoleKind::Standard,
        }
    }

    pub fn system_bypass(name: impl Into<String>) -> Self {
        Self {
            kind: RoleKind::SystemBypass,
            ..Self::new(name)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_bypass(&self) -> bool {
        self.kind == RoleKind::SystemBypass
    }
}

impl Entity for Role {
    type Id = RoleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.name)
    }
}
