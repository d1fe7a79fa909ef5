//! Policy lifecycle and governance.
//!
//! Drafts are edited directly. Edits to active or critical policies, and
//! every activation, deactivation or archive, are matched against the
//! approval workflows first: when one matches, the proposed state is
//! snapshotted and held in an approval request until the quorum is reached.
//! Without a matching workflow the change applies immediately. Every
//! transition lands in the change log.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::instrument;

use verdict_core::{
    Aggregate, ApprovalRequestId, Clock, DomainError, DomainResult, PolicyId, UserId,
};
use verdict_governance::{
    ApprovalCommand, ApprovalStatus, ChangeAction, PolicyApproval, PolicyApprovalRequest,
    PolicyApprovalWorkflow, PolicyChangeLog, PolicyVersion, RequestType, SubmitRequest, can_approve,
    diff_policies, select_workflow,
};
use verdict_policy::{
    AttributeDataType, EvaluationContext, Policy, PolicyRequest, PolicySimulation, PolicyStatus, simulate,
};

use crate::config::EngineConfig;
use crate::store::{AttributeStore, GovernanceStore, PolicyStore, RoleDirectory, VoteOutcome};

/// What happened to a requested change.
#[derive(Debug, Clone)]
pub enum ChangeOutcome {
    Applied(Policy),
    PendingApproval(PolicyApprovalRequest),
}

impl ChangeOutcome {
    pub fn applied(&self) -> Option<&Policy> {
        match self {
            ChangeOutcome::Applied(policy) => Some(policy),
            ChangeOutcome::PendingApproval(_) => None,
        }
    }

    pub fn pending(&self) -> Option<&PolicyApprovalRequest> {
        match self {
            ChangeOutcome::PendingApproval(request) => Some(request),
            ChangeOutcome::Applied(_) => None,
        }
    }
}

/// Result of a vote: the request after the vote and the policy state it
/// put in force, if the vote resolved it as approved.
#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    pub request: PolicyApprovalRequest,
    pub applied: Option<Policy>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyHistory {
    pub versions: Vec<PolicyVersion>,
    pub changes: Vec<PolicyChangeLog>,
    pub approvals: Vec<PolicyApproval>,
}

pub struct PolicyAdministration {
    policies: Arc<dyn PolicyStore>,
    attributes: Arc<dyn AttributeStore>,
    governance: Arc<dyn GovernanceStore>,
    roles: Arc<dyn RoleDirectory>,
    clock: Arc<dyn Clock>,
    max_condition_depth: usize,
}

impl PolicyAdministration {
    pub fn new(
        policies: Arc<dyn PolicyStore>,
        attributes: Arc<dyn AttributeStore>,
        governance: Arc<dyn GovernanceStore>,
        roles: Arc<dyn RoleDirectory>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            policies,
            attributes,
            governance,
            roles,
            clock,
            max_condition_depth: config.max_condition_depth,
        }
    }

    pub fn get(&self, id: PolicyId) -> DomainResult<Policy> {
        self.policies
            .get(id)?
            .ok_or_else(|| DomainError::not_found(format!("policy {id}")))
    }

    pub fn list(&self) -> DomainResult<Vec<Policy>> {
        Ok(self.policies.list()?)
    }

    pub fn define_workflow(&self, workflow: PolicyApprovalWorkflow) -> DomainResult<PolicyApprovalWorkflow> {
        workflow.validate()?;
        self.governance.put_workflow(workflow.clone())?;
        tracing::info!(workflow = %workflow.name, required = workflow.required_approvals, "approval workflow defined");
        Ok(workflow)
    }

    /// Store a new policy as a draft.
    #[instrument(skip(self, policy), fields(policy = %policy.name), err)]
    pub fn create(&self, actor: UserId, policy: Policy) -> DomainResult<Policy> {
        let now = self.clock.now();
        let mut policy = policy;
        policy.status = PolicyStatus::Draft;
        policy.version = 1;
        policy.created_by = Some(actor);
        policy.created_at = now;
        policy.updated_at = now;
        self.validate(&policy)?;

        self.policies.insert(policy.clone())?;
        self.governance
            .insert_version(PolicyVersion::snapshot_of(&policy, actor, now).with_summary("created"))?;
        self.log(
            PolicyChangeLog::new(policy.id, actor, ChangeAction::Created, now)
                .with_diff(
                    serde_json::to_value(&policy)
                        .map_err(|e| DomainError::invariant(format!("policy is not serializable: {e}")))?,
                ),
        )?;
        tracing::info!(policy_id = %policy.id, "policy created");
        Ok(policy)
    }

    /// Edit a policy. Identity, status, authorship and version are not
    /// editable through `edit`.
    #[instrument(skip(self, edit), err)]
    pub fn update<F>(&self, actor: UserId, id: PolicyId, edit: F, reason: Option<String>) -> DomainResult<ChangeOutcome>
    where
        F: FnOnce(&mut Policy),
    {
        let current = self.get(id)?;
        if current.status == PolicyStatus::Archived {
            return Err(DomainError::validation(format!("policy '{}' is archived", current.name)));
        }
        self.ensure_no_pending(id)?;

        let mut proposed = current.clone();
        edit(&mut proposed);
        proposed.id = current.id;
        proposed.status = current.status;
        proposed.created_by = current.created_by;
        proposed.created_at = current.created_at;
        proposed.version = current.version + 1;
        proposed.updated_at = self.clock.now();
        self.validate(&proposed)?;

        if current.is_active() || current.critical {
            self.route(actor, RequestType::Update, &current, proposed, reason)
        } else {
            self.apply(actor, &current, proposed, ChangeAction::Updated, reason, true)
                .map(ChangeOutcome::Applied)
        }
    }

    #[instrument(skip(self), err)]
    pub fn activate(&self, actor: UserId, id: PolicyId, reason: Option<String>) -> DomainResult<ChangeOutcome> {
        self.transition(actor, id, RequestType::Activate, PolicyStatus::Active, reason)
    }

    #[instrument(skip(self), err)]
    pub fn deactivate(&self, actor: UserId, id: PolicyId, reason: Option<String>) -> DomainResult<ChangeOutcome> {
        self.transition(actor, id, RequestType::Deactivate, PolicyStatus::Inactive, reason)
    }

    #[instrument(skip(self), err)]
    pub fn archive(&self, actor: UserId, id: PolicyId, reason: Option<String>) -> DomainResult<ChangeOutcome> {
        self.transition(actor, id, RequestType::Archive, PolicyStatus::Archived, reason)
    }

    /// Copy a policy into a new draft.
    #[instrument(skip(self), err)]
    pub fn clone_policy(&self, actor: UserId, id: PolicyId, name: &str) -> DomainResult<Policy> {
        let source = self.get(id)?;
        let now = self.clock.now();
        let mut copy = source.clone();
        copy.id = PolicyId::new();
        copy.name = name.to_string();
        copy.status = PolicyStatus::Draft;
        copy.version = 1;
        copy.created_by = Some(actor);
        copy.created_at = now;
        copy.updated_at = now;
        self.validate(&copy)?;

        self.policies.insert(copy.clone())?;
        self.governance
            .insert_version(PolicyVersion::snapshot_of(&copy, actor, now).with_summary(format!("cloned from {id}")))?;
        self.log(
            PolicyChangeLog::new(copy.id, actor, ChangeAction::Cloned, now)
                .with_diff(serde_json::json!({ "source_policy_id": id, "source_version": source.version })),
        )?;
        Ok(copy)
    }

    /// Dry-run a stored policy against a supplied context.
    pub fn test_policy(&self, id: PolicyId, request: &PolicyRequest, ctx: &EvaluationContext) -> DomainResult<PolicySimulation> {
        let policy = self.get(id)?;
        Ok(simulate(&policy, request, ctx, self.clock.now()))
    }

    /// Vote to approve. The vote that reaches the quorum puts the proposed
    /// state in force.
    #[instrument(skip(self, comment), err)]
    pub fn approve(&self, actor: UserId, request_id: ApprovalRequestId, comment: Option<String>) -> DomainResult<ApprovalOutcome> {
        self.ensure_may_vote(actor, request_id)?;
        let outcome = self.governance.cast_vote(
            request_id,
            &ApprovalCommand::Approve {
                approver: actor,
                comment,
                occurred_at: self.clock.now(),
            },
        )?;
        self.settle(actor, outcome)
    }

    #[instrument(skip(self, reason), err)]
    pub fn reject(&self, actor: UserId, request_id: ApprovalRequestId, reason: Option<String>) -> DomainResult<ApprovalOutcome> {
        self.ensure_may_vote(actor, request_id)?;
        let outcome = self.governance.cast_vote(
            request_id,
            &ApprovalCommand::Reject {
                approver: actor,
                reason,
                occurred_at: self.clock.now(),
            },
        )?;
        self.settle(actor, outcome)
    }

    /// Withdraw a pending request. Only its requester may do so.
    #[instrument(skip(self), err)]
    pub fn cancel(&self, actor: UserId, request_id: ApprovalRequestId) -> DomainResult<ApprovalOutcome> {
        let outcome = self.governance.cast_vote(
            request_id,
            &ApprovalCommand::Cancel {
                actor,
                occurred_at: self.clock.now(),
            },
        )?;
        self.settle(actor, outcome)
    }

    pub fn request(&self, request_id: ApprovalRequestId) -> DomainResult<PolicyApprovalRequest> {
        self.governance
            .request(request_id)?
            .ok_or_else(|| DomainError::not_found(format!("approval request {request_id}")))
    }

    pub fn pending_request(&self, id: PolicyId) -> DomainResult<Option<PolicyApprovalRequest>> {
        Ok(self.governance.pending_request_for(id)?)
    }

    pub fn history(&self, id: PolicyId) -> DomainResult<PolicyHistory> {
        let mut approvals = Vec::new();
        for request in self.governance.requests_for(id)? {
            approvals.extend(self.governance.approvals(request.id_typed())?);
        }
        Ok(PolicyHistory {
            versions: self.governance.versions(id)?,
            changes: self.governance.change_log(id)?,
            approvals,
        })
    }

    fn transition(
        &self,
        actor: UserId,
        id: PolicyId,
        request_type: RequestType,
        target: PolicyStatus,
        reason: Option<String>,
    ) -> DomainResult<ChangeOutcome> {
        let current = self.get(id)?;
        let allowed_from: &[PolicyStatus] = match target {
            PolicyStatus::Active => &[PolicyStatus::Draft, PolicyStatus::Inactive],
            PolicyStatus::Inactive => &[PolicyStatus::Active],
            PolicyStatus::Archived => &[PolicyStatus::Draft, PolicyStatus::Active, PolicyStatus::Inactive],
            PolicyStatus::Draft => &[],
        };
        if !allowed_from.contains(&current.status) {
            return Err(DomainError::validation(format!(
                "policy '{}' cannot move from {:?} to {:?}",
                current.name, current.status, target
            )));
        }
        self.ensure_no_pending(id)?;

        let mut proposed = current.clone();
        proposed.status = target;
        proposed.updated_at = self.clock.now();
        if target == PolicyStatus::Active {
            self.validate(&proposed)?;
        }
        self.route(actor, request_type, &current, proposed, reason)
    }

    /// Open an approval request when a workflow covers the change, otherwise
    /// apply it.
    fn route(
        &self,
        actor: UserId,
        request_type: RequestType,
        current: &Policy,
        proposed: Policy,
        reason: Option<String>,
    ) -> DomainResult<ChangeOutcome> {
        let workflows = self.governance.workflows()?;
        let workflow = select_workflow(&workflows, request_type, current)
            .or_else(|| select_workflow(&workflows, request_type, &proposed));

        let Some(workflow) = workflow else {
            let action = applied_action(request_type);
            return self
                .apply(actor, current, proposed, action, reason, request_type == RequestType::Update)
                .map(ChangeOutcome::Applied);
        };

        let now = self.clock.now();
        let version = PolicyVersion::snapshot_of(&proposed, actor, now).with_summary(format!("{request_type:?} proposal"));
        let diff = diff_policies(current, &proposed);

        let mut request = PolicyApprovalRequest::empty(ApprovalRequestId::new());
        request.execute(&ApprovalCommand::Submit(Box::new(SubmitRequest {
            policy_id: current.id,
            version_id: Some(version.id),
            workflow_id: Some(workflow.id),
            request_type,
            requested_by: actor,
            proposed,
            required_approvals: workflow.required_approvals,
            reason: reason.clone(),
            occurred_at: now,
        })))?;

        self.governance.open_request(request.clone())?;
        self.governance.insert_version(version)?;
        self.log(
            PolicyChangeLog::new(current.id, actor, ChangeAction::SubmittedForApproval, now)
                .with_diff(diff)
                .with_reason(reason),
        )?;
        tracing::info!(
            policy_id = %current.id,
            request_id = %request.id_typed(),
            workflow = %workflow.name,
            required = workflow.required_approvals,
            "change submitted for approval"
        );
        Ok(ChangeOutcome::PendingApproval(request))
    }

    fn apply(
        &self,
        actor: UserId,
        current: &Policy,
        proposed: Policy,
        action: ChangeAction,
        reason: Option<String>,
        snapshot: bool,
    ) -> DomainResult<Policy> {
        let now = self.clock.now();
        self.policies.update(proposed.clone())?;
        if snapshot {
            self.governance
                .insert_version(PolicyVersion::snapshot_of(&proposed, actor, now))?;
        }
        self.log(
            PolicyChangeLog::new(proposed.id, actor, action, now)
                .with_diff(diff_policies(current, &proposed))
                .with_reason(reason),
        )?;
        tracing::info!(policy_id = %proposed.id, action = ?action, status = ?proposed.status, "policy change applied");
        Ok(proposed)
    }

    fn settle(&self, actor: UserId, outcome: VoteOutcome) -> DomainResult<ApprovalOutcome> {
        let VoteOutcome {
            previous,
            request,
            resolved,
            ..
        } = outcome;
        let now = self.clock.now();
        let policy_id = request.policy_id();

        let applied = match resolved {
            Some(ApprovalStatus::Approved) => match self.put_in_force(actor, &request) {
                Ok(policy) => Some(policy),
                Err(err) => {
                    tracing::warn!(
                        policy_id = %policy_id,
                        request_id = %request.id_typed(),
                        error = %err,
                        "approved change could not be applied; deciding vote withdrawn"
                    );
                    self.governance.withdraw_vote(previous, actor)?;
                    return Err(err);
                }
            },
            Some(ApprovalStatus::Rejected) => {
                self.log(
                    PolicyChangeLog::new(policy_id, actor, ChangeAction::Rejected, now)
                        .with_reason(request.reason().map(str::to_string)),
                )?;
                tracing::info!(policy_id = %policy_id, request_id = %request.id_typed(), "change rejected");
                None
            }
            Some(ApprovalStatus::Cancelled) => {
                self.log(PolicyChangeLog::new(policy_id, actor, ChangeAction::Cancelled, now))?;
                None
            }
            Some(ApprovalStatus::Pending) | None => None,
        };

        Ok(ApprovalOutcome { request, applied })
    }

    /// Apply an approved proposal. On error nothing is left changed: the
    /// policy is restored if its update went through.
    fn put_in_force(&self, actor: UserId, request: &PolicyApprovalRequest) -> DomainResult<Policy> {
        let proposed = request
            .proposed()
            .cloned()
            .ok_or_else(|| DomainError::invariant("approved request carries no proposal"))?;
        let current = self.get(request.policy_id())?;
        if request.request_type() == RequestType::Update || proposed.is_active() {
            self.validate(&proposed)?;
        }

        let now = self.clock.now();
        let action = applied_action(request.request_type());
        // The version snapshot was taken when the request was opened.
        self.policies.update(proposed.clone())?;
        let logged = self
            .log(PolicyChangeLog::new(proposed.id, actor, ChangeAction::Approved, now))
            .and_then(|()| {
                self.log(
                    PolicyChangeLog::new(proposed.id, actor, action, now)
                        .with_diff(diff_policies(&current, &proposed))
                        .with_reason(request.reason().map(str::to_string)),
                )
            });
        if let Err(err) = logged {
            self.policies.update(current)?;
            return Err(err);
        }
        tracing::info!(policy_id = %proposed.id, action = ?action, status = ?proposed.status, "approved change applied");
        Ok(proposed)
    }

    fn ensure_may_vote(&self, actor: UserId, request_id: ApprovalRequestId) -> DomainResult<()> {
        let request = self.request(request_id)?;
        if !request.is_pending() {
            return Err(DomainError::conflict(format!(
                "approval request {request_id} is already {:?}",
                request.status()
            )));
        }
        if request.has_voted(actor) {
            return Err(DomainError::conflict(format!(
                "user {actor} already voted on approval request {request_id}"
            )));
        }
        let workflow_id = request
            .workflow_id()
            .ok_or_else(|| DomainError::invariant("approval request has no workflow"))?;
        let workflow = self
            .governance
            .workflows()?
            .into_iter()
            .find(|w| w.id == workflow_id)
            .ok_or_else(|| DomainError::not_found(format!("workflow {workflow_id}")))?;

        let principal = self.roles.principal_roles(actor)?;
        let votes = self.governance.approvals(request_id)?;
        if !can_approve(&principal, &request, &workflow, &votes) {
            return Err(DomainError::forbidden(format!(
                "user {actor} holds none of the approver roles of workflow '{}'",
                workflow.name
            )));
        }
        Ok(())
    }

    fn ensure_no_pending(&self, id: PolicyId) -> DomainResult<()> {
        if let Some(pending) = self.governance.pending_request_for(id)? {
            return Err(DomainError::conflict(format!(
                "policy {id} has a pending approval request {}",
                pending.id_typed()
            )));
        }
        Ok(())
    }

    fn validate(&self, policy: &Policy) -> DomainResult<()> {
        let declared: HashMap<String, AttributeDataType> = self
            .attributes
            .attributes()?
            .into_iter()
            .filter(|a| a.active)
            .map(|a| (a.name, a.data_type))
            .collect();
        policy.validate_with(self.max_condition_depth, &|path| declared.get(path).copied())
    }

    fn log(&self, entry: PolicyChangeLog) -> DomainResult<()> {
        Ok(self.governance.append_change(entry)?)
    }
}

fn applied_action(request_type: RequestType) -> ChangeAction {
    match request_type {
        RequestType::Create | RequestType::Update => ChangeAction::Updated,
        RequestType::Activate => ChangeAction::Activated,
        RequestType::Deactivate => ChangeAction::Deactivated,
        RequestType::Archive => ChangeAction::Archived,
    }
}
