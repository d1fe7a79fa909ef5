//! `verdict-policy`: attribute-based half of the authorization engine.
//!
//! Pure: policies and a resolved [`EvaluationContext`] go in, a [`Decision`]
//! comes out. Loading policies and attribute values is the caller's job.

pub mod attribute;
pub mod audit;
pub mod condition;
pub mod context;
pub mod engine;
pub mod evaluator;
pub mod pattern;
pub mod policy;

pub use attribute::{
    AttrValue, Attribute, AttributeCategory, AttributeDataType, ResourceAttributeValue,
    UserAttributeValue,
};
pub use audit::PolicyEvaluation;
pub use condition::{
    Condition, ConditionNode, ConditionValue, LogicalOp, MAX_CONDITION_DEPTH, Operator,
};
pub use context::{AttributeMap, EvaluationContext};
pub use engine::{
    Decision, DecisionReason, PolicyMatch, PolicyRequest, PolicySimulation, PolicyTrace, decide,
    simulate,
};
pub use evaluator::{ConditionTrace, evaluate, evaluate_traced};
pub use policy::{Effect, Policy, PolicyStatus};
