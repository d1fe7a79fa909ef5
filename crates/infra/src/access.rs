//! Access decisions: RBAC and attribute policies combined.
//!
//! Precedence is fixed:
//!
//! 1. a matching policy DENY denies, whatever roles say;
//! 2. a matching policy ALLOW allows, even without an RBAC grant;
//! 3. otherwise the RBAC grant decides, and no grant denies.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::instrument;

use verdict_auth::{
    AuthorizationExplanation, AuthzError, Permission, PrincipalRoles, RbacAggregator, authorize,
    explain_authorization,
};
use verdict_core::{CancellationToken, Clock, DomainError, DomainResult, EvaluationId, UserId, VerticalId};
use verdict_policy::{Decision, EvaluationContext, PolicyEvaluation, PolicyRequest, decide};

use crate::config::EngineConfig;
use crate::resolve::resolve_context;
use crate::store::{AttributeStore, EvaluationLog, PolicyStore, RoleDirectory};

/// Machine-readable outcome of the combined check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessReason {
    PolicyDeny,
    PolicyAllow,
    RbacGrant,
    NoPermission,
}

impl AccessReason {
    pub fn code(self) -> &'static str {
        match self {
            AccessReason::PolicyDeny => "policy_deny",
            AccessReason::PolicyAllow => "policy_allow",
            AccessReason::RbacGrant => "rbac_grant",
            AccessReason::NoPermission => "no_permission",
        }
    }

    /// Combine an RBAC answer with a policy decision.
    pub fn combine(rbac_granted: bool, decision: &Decision) -> Self {
        if decision.is_explicit_deny() {
            AccessReason::PolicyDeny
        } else if decision.is_explicit_allow() {
            AccessReason::PolicyAllow
        } else if rbac_granted {
            AccessReason::RbacGrant
        } else {
            AccessReason::NoPermission
        }
    }

    pub fn allows(self) -> bool {
        matches!(self, AccessReason::PolicyAllow | AccessReason::RbacGrant)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: AccessReason,
    pub message: String,
    /// Permission checked against the principal's roles.
    pub required_permission: String,
    pub rbac_granted: bool,
    pub policy: Decision,
    /// Id of the audit record, when one was written.
    pub evaluation_id: Option<EvaluationId>,
}

/// The permission a request needs from RBAC.
///
/// Actions already shaped like `resource:action` are used as-is; bare verbs
/// are qualified with the resource type.
pub fn required_permission(request: &PolicyRequest) -> String {
    if request.action.contains(':') {
        request.action.clone()
    } else {
        format!("{}:{}", request.resource_type, request.action)
    }
}

pub struct AccessService {
    roles: Arc<dyn RoleDirectory>,
    attributes: Arc<dyn AttributeStore>,
    policies: Arc<dyn PolicyStore>,
    evaluations: Arc<dyn EvaluationLog>,
    clock: Arc<dyn Clock>,
    rbac: RbacAggregator,
    record_evaluations: bool,
}

impl AccessService {
    pub fn new(
        roles: Arc<dyn RoleDirectory>,
        attributes: Arc<dyn AttributeStore>,
        policies: Arc<dyn PolicyStore>,
        evaluations: Arc<dyn EvaluationLog>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            roles,
            attributes,
            policies,
            evaluations,
            clock,
            rbac: config.rbac(),
            record_evaluations: config.record_evaluations,
        }
    }

    pub fn rbac(&self) -> &RbacAggregator {
        &self.rbac
    }

    pub fn principal(&self, user_id: UserId) -> DomainResult<PrincipalRoles> {
        Ok(self.roles.principal_roles(user_id)?)
    }

    pub fn has_permission(&self, user_id: UserId, permission: &str) -> DomainResult<bool> {
        let principal = self.principal(user_id)?;
        Ok(self.rbac.has_permission(&principal, permission))
    }

    pub fn has_permission_in_vertical(&self, user_id: UserId, permission: &str, vertical_id: VerticalId) -> DomainResult<bool> {
        let principal = self.principal(user_id)?;
        Ok(self.rbac.has_permission_in_vertical(&principal, permission, vertical_id))
    }

    pub fn can_assign_role(&self, user_id: UserId, target_level: u8) -> DomainResult<bool> {
        let principal = self.principal(user_id)?;
        Ok(self.rbac.hierarchy.can_assign(&principal, target_level))
    }

    pub fn explain_permission(&self, user_id: UserId, permission: &Permission) -> DomainResult<AuthorizationExplanation> {
        let principal = self.principal(user_id)?;
        Ok(explain_authorization(&self.rbac, &principal, permission))
    }

    /// RBAC-only guard over the principal's stored roles.
    pub fn authorize(&self, user_id: UserId, permission: &Permission) -> DomainResult<()> {
        let principal = self.principal(user_id)?;
        authorize(&self.rbac, &principal, permission).map_err(|AuthzError::Forbidden(p)| {
            DomainError::forbidden(format!("missing permission '{p}'"))
        })
    }

    /// Decide a request. Denials are decisions, not errors; errors come only
    /// from storage failures and cancellation.
    #[instrument(
        skip(self, supplied, cancel),
        fields(principal = %request.principal, action = %request.action, resource_type = %request.resource_type),
        err
    )]
    pub fn evaluate(
        &self,
        request: &PolicyRequest,
        supplied: EvaluationContext,
        cancel: &CancellationToken,
    ) -> DomainResult<AccessDecision> {
        let started = Instant::now();
        let now = self.clock.now();

        cancel.check()?;
        let principal = self.principal(request.principal)?;
        let permission = required_permission(request);
        let rbac_granted = self.rbac.grants_request(&principal, &permission, request.vertical_id);

        let ctx = resolve_context(self.attributes.as_ref(), request, supplied, now, cancel)?;

        cancel.check()?;
        let policies = self.policies.active_at(now)?;
        let decision = decide(&policies, request, &ctx, now);

        let reason = AccessReason::combine(rbac_granted, &decision);
        let allowed = reason.allows();
        let message = match reason {
            AccessReason::PolicyDeny | AccessReason::PolicyAllow => decision.message.clone(),
            AccessReason::RbacGrant => format!("granted by role permission '{permission}'"),
            AccessReason::NoPermission => {
                format!("missing permission '{permission}' and no policy allows the request")
            }
        };

        let evaluation_id = if self.record_evaluations {
            let duration_micros = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
            let record = PolicyEvaluation::record(
                request,
                &decision,
                &ctx,
                rbac_granted,
                allowed,
                reason.code(),
                duration_micros,
                now,
            )?;
            let id = record.id();
            self.evaluations.append(record)?;
            Some(id)
        } else {
            None
        };

        tracing::debug!(
            allowed,
            reason = reason.code(),
            rbac_granted,
            policy_reason = decision.reason.code(),
            matched = decision.matched_policies.len(),
            "access decision"
        );

        Ok(AccessDecision {
            allowed,
            reason,
            message,
            required_permission: permission,
            rbac_granted,
            policy: decision,
            evaluation_id,
        })
    }

    /// Like [`evaluate`](Self::evaluate) but turns a denial into
    /// [`DomainError::Forbidden`].
    pub fn require(
        &self,
        request: &PolicyRequest,
        supplied: EvaluationContext,
        cancel: &CancellationToken,
    ) -> DomainResult<AccessDecision> {
        let decision = self.evaluate(request, supplied, cancel)?;
        if decision.allowed {
            Ok(decision)
        } else {
            Err(DomainError::forbidden(decision.message))
        }
    }
}
