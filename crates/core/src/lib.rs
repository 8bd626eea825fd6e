//! `workforce-core`: identity and error primitives shared by the workforce crates.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{DepartmentId, DesignationId, EmployeeCardNo, OrgUnitId, PolicyId, RoleId, UserId};
