//! Policy decision engine: candidate selection, priority order, deny-override.

use std::cmp::Reverse;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use verdict_core::{PolicyId, UserId, VerticalId};

use crate::{ConditionTrace, Effect, EvaluationContext, Policy, evaluate_traced};

/// What is being asked: may `principal` perform `action` on a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRequest {
    pub principal: UserId,
    pub action: String,
    pub resource_type: String,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub vertical_id: Option<VerticalId>,
}

impl PolicyRequest {
    pub fn new(principal: UserId, action: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            principal,
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: None,
            vertical_id: None,
        }
    }

    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn in_vertical(mut self, vertical_id: VerticalId) -> Self {
        self.vertical_id = Some(vertical_id);
        self
    }
}

/// Machine-readable reason for a policy decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    ExplicitDeny,
    ExplicitAllow,
    /// No active policy targets the request.
    NoApplicablePolicy,
    /// Candidates existed but none of their conditions held.
    NoMatchingConditions,
}

impl DecisionReason {
    pub fn code(self) -> &'static str {
        match self {
            DecisionReason::ExplicitDeny => "explicit_deny",
            DecisionReason::ExplicitAllow => "explicit_allow",
            DecisionReason::NoApplicablePolicy => "no_applicable_policy",
            DecisionReason::NoMatchingConditions => "no_matching_conditions",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyMatch {
    pub policy_id: PolicyId,
    pub policy_name: String,
    pub effect: Effect,
    pub priority: i32,
}

impl PolicyMatch {
    fn of(policy: &Policy) -> Self {
        Self {
            policy_id: policy.id,
            policy_name: policy.name.clone(),
            effect: policy.effect,
            priority: policy.priority,
        }
    }
}

/// Evaluation record of one candidate policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyTrace {
    pub policy: PolicyMatch,
    pub matched: bool,
    pub conditions: Vec<ConditionTrace>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    /// `None` when no policy's conditions held.
    pub effect: Option<Effect>,
    /// Policies whose conditions held, in evaluation order.
    pub matched_policies: Vec<PolicyMatch>,
    pub deciding_policy: Option<PolicyMatch>,
    pub reason: DecisionReason,
    pub message: String,
    pub evaluated: Vec<PolicyTrace>,
    pub candidates: usize,
}

impl Decision {
    pub fn is_explicit_deny(&self) -> bool {
        self.reason == DecisionReason::ExplicitDeny
    }

    pub fn is_explicit_allow(&self) -> bool {
        self.reason == DecisionReason::ExplicitAllow
    }

    /// Leaves that evaluated true across every visited policy.
    pub fn matched_conditions(&self) -> Vec<&ConditionTrace> {
        self.evaluated
            .iter()
            .flat_map(|t| t.conditions.iter())
            .filter(|c| c.result)
            .collect()
    }
}

/// Decide a request against a policy set.
///
/// Candidates are walked by priority (highest first, ties by creation time
/// then id). The first matching DENY ends the walk; the first matching ALLOW
/// is held while lower priorities are scanned for a DENY. No match denies.
pub fn decide<'a, I>(policies: I, request: &PolicyRequest, ctx: &EvaluationContext, now: DateTime<Utc>) -> Decision
where
    I: IntoIterator<Item = &'a Policy>,
{
    let mut candidates: Vec<&Policy> = policies
        .into_iter()
        .filter(|p| p.is_candidate(request, now))
        .collect();
    candidates.sort_by_key(|p| (Reverse(p.priority), p.created_at, p.id));

    let mut evaluated = Vec::with_capacity(candidates.len());
    let mut matched = Vec::new();
    let mut allow: Option<PolicyMatch> = None;
    let mut deny: Option<PolicyMatch> = None;

    for policy in &candidates {
        let (holds, conditions) = evaluate_traced(&policy.conditions, ctx);
        let summary = PolicyMatch::of(policy);
        evaluated.push(PolicyTrace {
            policy: summary.clone(),
            matched: holds,
            conditions,
        });
        if !holds {
            continue;
        }
        matched.push(summary.clone());
        match policy.effect {
            Effect::Deny => {
                deny = Some(summary);
                break;
            }
            Effect::Allow if allow.is_none() => allow = Some(summary),
            Effect::Allow => {}
        }
    }

    let candidate_count = candidates.len();
    let decision = match (deny, allow) {
        (Some(deciding), _) => Decision {
            allowed: false,
            effect: Some(Effect::Deny),
            message: format!("denied by policy '{}'", deciding.policy_name),
            deciding_policy: Some(deciding),
            matched_policies: matched,
            reason: DecisionReason::ExplicitDeny,
            evaluated,
            candidates: candidate_count,
        },
        (None, Some(deciding)) => Decision {
            allowed: true,
            effect: Some(Effect::Allow),
            message: format!("allowed by policy '{}'", deciding.policy_name),
            deciding_policy: Some(deciding),
            matched_policies: matched,
            reason: DecisionReason::ExplicitAllow,
            evaluated,
            candidates: candidate_count,
        },
        (None, None) => {
            let reason = if candidate_count == 0 {
                DecisionReason::NoApplicablePolicy
            } else {
                DecisionReason::NoMatchingConditions
            };
            Decision {
                allowed: false,
                effect: None,
                message: match reason {
                    DecisionReason::NoApplicablePolicy => "no policy applies to this request".to_string(),
                    _ => format!("none of {candidate_count} candidate policies matched"),
                },
                deciding_policy: None,
                matched_policies: matched,
                reason,
                evaluated,
                candidates: candidate_count,
            }
        }
    };

    tracing::debug!(
        principal = %request.principal,
        action = %request.action,
        resource_type = %request.resource_type,
        candidates = decision.candidates,
        reason = decision.reason.code(),
        deciding_policy = ?decision.deciding_policy.as_ref().map(|m| m.policy_id),
        "policy decision"
    );
    decision
}

/// Result of dry-running a single policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicySimulation {
    pub policy: PolicyMatch,
    /// Whether the policy would be selected as a candidate right now.
    pub applicable: bool,
    pub conditions_hold: bool,
    /// The effect the policy would contribute, if it applies and holds.
    pub effect: Option<Effect>,
    pub conditions: Vec<ConditionTrace>,
}

/// Evaluate one policy against a supplied context without recording anything.
///
/// Conditions are evaluated even when the policy is not a candidate (a draft,
/// say), so authors can test before activating.
pub fn simulate(policy: &Policy, request: &PolicyRequest, ctx: &EvaluationContext, now: DateTime<Utc>) -> PolicySimulation {
    let applicable = policy.is_candidate(request, now);
    let (conditions_hold, conditions) = evaluate_traced(&policy.conditions, ctx);
    PolicySimulation {
        policy: PolicyMatch::of(policy),
        applicable,
        conditions_hold,
        effect: (policy.targets(request) && conditions_hold).then_some(policy.effect),
        conditions,
    }
}
