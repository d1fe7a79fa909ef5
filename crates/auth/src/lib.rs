//! `verdict-auth`: role-based half of the authorization engine.
//!
//! This crate is intentionally decoupled from storage: callers hand in a
//! resolved [`PrincipalRoles`] snapshot and get pure answers back.

pub mod authorize;
pub mod hierarchy;
pub mod permissions;
pub mod principal;
pub mod rbac;
pub mod roles;

pub use authorize::{
    AuthorizationExplanation, AuthzError, DenialKind, DenialReason, PrincipalState, authorize,
    explain_authorization,
};
pub use hierarchy::HierarchyRules;
pub use permissions::{
    Permission, PermissionDefinition, ScopeMatching, UNIVERSAL_WILDCARD, WILDCARD, matches,
    matches_with,
};
pub use principal::{ActiveBusinessRole, PrincipalRoles};
pub use rbac::{PermissionSet, RbacAggregator};
pub use roles::{BusinessRole, BusinessVertical, FLOOR_LEVEL, Role, SUPER_ADMIN_LEVEL, UserBusinessRoleBinding};
