//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Users, roles, policies and org units are entities: two rows with the same
/// id are the same record regardless of their other attributes.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
