//! Storage boundary for roles, attributes, policies, audit and governance.
//!
//! The traits make no storage assumptions; the in-memory implementations are
//! what tests and single-process deployments use.

pub mod in_memory;
pub mod traits;

pub use in_memory::{
    InMemoryAttributeStore, InMemoryEvaluationLog, InMemoryGovernanceStore, InMemoryPolicyStore,
    InMemoryRoleDirectory,
};
pub use traits::{
    AttributeStore, EvaluationLog, GovernanceStore, PolicyStore, RoleDirectory, StoreError,
    VoteOutcome,
};
