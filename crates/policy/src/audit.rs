use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use verdict_core::{DomainError, DomainResult, EvaluationId, PolicyId, UserId, VerticalId};

use crate::{Decision, Effect, EvaluationContext, PolicyRequest};

/// Append-only audit record of one access decision.
///
/// Fields are private and there are no setters: once built, a record can only
/// be read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEvaluation {
    id: EvaluationId,
    policy_id: Option<PolicyId>,
    matched_policy_ids: Vec<PolicyId>,
    principal: UserId,
    action: String,
    resource_type: String,
    resource_id: Option<String>,
    vertical_id: Option<VerticalId>,
    effect: Effect,
    allowed: bool,
    rbac_granted: bool,
    reason: String,
    matched_conditions: JsonValue,
    context: JsonValue,
    duration_micros: u64,
    evaluated_at: DateTime<Utc>,
}

impl PolicyEvaluation {
    /// Build the record for a final decision.
    ///
    /// `allowed` and `reason` describe the combined outcome, which may differ
    /// from the policy decision alone when RBAC decided.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        request: &PolicyRequest,
        decision: &Decision,
        ctx: &EvaluationContext,
        rbac_granted: bool,
        allowed: bool,
        reason: impl Into<String>,
        duration_micros: u64,
        evaluated_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let matched_conditions = serde_json::to_value(decision.matched_conditions())
            .map_err(|e| DomainError::invariant(format!("matched conditions are not serializable: {e}")))?;
        Ok(Self {
            id: EvaluationId::new(),
            policy_id: decision.deciding_policy.as_ref().map(|m| m.policy_id),
            matched_policy_ids: decision.matched_policies.iter().map(|m| m.policy_id).collect(),
            principal: request.principal,
            action: request.action.clone(),
            resource_type: request.resource_type.clone(),
            resource_id: request.resource_id.clone(),
            vertical_id: request.vertical_id,
            effect: if allowed { Effect::Allow } else { Effect::Deny },
            allowed,
            rbac_granted,
            reason: reason.into(),
            matched_conditions,
            context: ctx.snapshot(),
            duration_micros,
            evaluated_at,
        })
    }

    pub fn id(&self) -> EvaluationId {
        self.id
    }

    /// The policy that decided, if one did.
    pub fn policy_id(&self) -> Option<PolicyId> {
        self.policy_id
    }

    pub fn matched_policy_ids(&self) -> &[PolicyId] {
        &self.matched_policy_ids
    }

    pub fn principal(&self) -> UserId {
        self.principal
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }

    pub fn vertical_id(&self) -> Option<VerticalId> {
        self.vertical_id
    }

    pub fn effect(&self) -> Effect {
        self.effect
    }

    pub fn allowed(&self) -> bool {
        self.allowed
    }

    pub fn rbac_granted(&self) -> bool {
        self.rbac_granted
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn matched_conditions(&self) -> &JsonValue {
        &self.matched_conditions
    }

    pub fn context(&self) -> &JsonValue {
        &self.context
    }

    pub fn duration_micros(&self) -> u64 {
        self.duration_micros
    }

    pub fn evaluated_at(&self) -> DateTime<Utc> {
        self.evaluated_at
    }
}
