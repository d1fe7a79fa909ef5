//! Storage, wiring and services for the access-control engine.
//!
//! [`VerdictEngine`] assembles one set of [`Stores`] behind the access
//! service (RBAC plus ABAC decisions) and the role, attribute and policy
//! administration services.

pub mod access;
pub mod attributes;
pub mod bootstrap;
pub mod config;
pub mod engine;
pub mod policy_admin;
pub mod resolve;
pub mod roles;
pub mod store;


pub use access::{AccessDecision, AccessReason, AccessService, required_permission};
pub use attributes::AttributeAdministration;
pub use bootstrap::{BootstrapPlan, BootstrapReport};
pub use config::EngineConfig;
pub use engine::{Stores, VerdictEngine};
pub use policy_admin::{ApprovalOutcome, ChangeOutcome, PolicyAdministration, PolicyHistory};
pub use resolve::resolve_context;
pub use roles::RoleAdministration;
