//! Approval request aggregate.
//!
//! A request is opened for one proposed policy state and resolves exactly
//! once: approved when the quorum of distinct approvers is reached, rejected
//! by the first rejection, or cancelled by its requester.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use verdict_auth::PrincipalRoles;
use verdict_core::{
    Aggregate, AggregateRoot, ApprovalId, ApprovalRequestId, DomainError, PolicyId, PolicyVersionId,
    UserId, WorkflowId,
};
use verdict_policy::Policy;

use crate::{PolicyApprovalWorkflow, RequestType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Reject,
}

/// Aggregate root: PolicyApprovalRequest.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyApprovalRequest {
    id: ApprovalRequestId,
    policy_id: PolicyId,
    version_id: Option<PolicyVersionId>,
    workflow_id: Option<WorkflowId>,
    request_type: RequestType,
    requested_by: Option<UserId>,
    proposed: Option<Policy>,
    status: ApprovalStatus,
    required_approvals: u32,
    received_approvals: u32,
    voters: BTreeSet<UserId>,
    reason: Option<String>,
    created_at: Option<DateTime<Utc>>,
    resolved_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl PolicyApprovalRequest {
    /// Not-yet-opened instance; `Submit` brings it to life.
    pub fn empty(id: ApprovalRequestId) -> Self {
        Self {
            id,
            policy_id: PolicyId::default(),
            version_id: None,
            workflow_id: None,
            request_type: RequestType::Update,
            requested_by: None,
            proposed: None,
            status: ApprovalStatus::Pending,
            required_approvals: 0,
            received_approvals: 0,
            voters: BTreeSet::new(),
            reason: None,
            created_at: None,
            resolved_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ApprovalRequestId {
        self.id
    }

    pub fn policy_id(&self) -> PolicyId {
        self.policy_id
    }

    pub fn version_id(&self) -> Option<PolicyVersionId> {
        self.version_id
    }

    pub fn workflow_id(&self) -> Option<WorkflowId> {
        self.workflow_id
    }

    pub fn request_type(&self) -> RequestType {
        self.request_type
    }

    pub fn requested_by(&self) -> Option<UserId> {
        self.requested_by
    }

    /// Policy state to store once approved.
    pub fn proposed(&self) -> Option<&Policy> {
        self.proposed.as_ref()
    }

    pub fn status(&self) -> ApprovalStatus {
        self.status
    }

    pub fn required_approvals(&self) -> u32 {
        self.required_approvals
    }

    pub fn received_approvals(&self) -> u32 {
        self.received_approvals
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    pub fn is_pending(&self) -> bool {
        self.created && self.status == ApprovalStatus::Pending
    }

    pub fn is_complete(&self) -> bool {
        self.received_approvals >= self.required_approvals
    }

    pub fn has_voted(&self, user_id: UserId) -> bool {
        self.voters.contains(&user_id)
    }
}

impl AggregateRoot for PolicyApprovalRequest {
    type Id = ApprovalRequestId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub policy_id: PolicyId,
    pub version_id: Option<PolicyVersionId>,
    pub workflow_id: Option<WorkflowId>,
    pub request_type: RequestType,
    pub requested_by: UserId,
    pub proposed: Policy,
    pub required_approvals: u32,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ApprovalCommand {
    Submit(Box<SubmitRequest>),
    Approve {
        approver: UserId,
        comment: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    Reject {
        approver: UserId,
        reason: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    Cancel {
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ApprovalEvent {
    RequestSubmitted(Box<SubmitRequest>),
    ApprovalRecorded {
        approver: UserId,
        comment: Option<String>,
        received_approvals: u32,
        occurred_at: DateTime<Utc>,
    },
    RequestApproved {
        occurred_at: DateTime<Utc>,
    },
    RequestRejected {
        approver: UserId,
        reason: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    RequestCancelled {
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
}

impl ApprovalEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ApprovalEvent::RequestSubmitted(_) => "governance.approval.submitted",
            ApprovalEvent::ApprovalRecorded { .. } => "governance.approval.recorded",
            ApprovalEvent::RequestApproved { .. } => "governance.approval.approved",
            ApprovalEvent::RequestRejected { .. } => "governance.approval.rejected",
            ApprovalEvent::RequestCancelled { .. } => "governance.approval.cancelled",
        }
    }
}

impl Aggregate for PolicyApprovalRequest {
    type Command = ApprovalCommand;
    type Event = ApprovalEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ApprovalEvent::RequestSubmitted(e) => {
                self.policy_id = e.policy_id;
                self.version_id = e.version_id;
                self.workflow_id = e.workflow_id;
                self.request_type = e.request_type;
                self.requested_by = Some(e.requested_by);
                self.proposed = Some(e.proposed.clone());
                self.required_approvals = e.required_approvals;
                self.reason = e.reason.clone();
                self.created_at = Some(e.occurred_at);
                self.status = ApprovalStatus::Pending;
                self.created = true;
            }
            ApprovalEvent::ApprovalRecorded {
                approver,
                received_approvals,
                ..
            } => {
                self.voters.insert(*approver);
                self.received_approvals = *received_approvals;
            }
            ApprovalEvent::RequestApproved { occurred_at } => {
                self.status = ApprovalStatus::Approved;
                self.resolved_at = Some(*occurred_at);
            }
            ApprovalEvent::RequestRejected {
                approver,
                reason,
                occurred_at,
            } => {
                self.voters.insert(*approver);
                self.status = ApprovalStatus::Rejected;
                if reason.is_some() {
                    self.reason = reason.clone();
                }
                self.resolved_at = Some(*occurred_at);
            }
            ApprovalEvent::RequestCancelled { occurred_at, .. } => {
                self.status = ApprovalStatus::Cancelled;
                self.resolved_at = Some(*occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ApprovalCommand::Submit(cmd) => self.handle_submit(cmd),
            ApprovalCommand::Approve {
                approver,
                comment,
                occurred_at,
            } => self.handle_approve(*approver, comment.clone(), *occurred_at),
            ApprovalCommand::Reject {
                approver,
                reason,
                occurred_at,
            } => self.handle_reject(*approver, reason.clone(), *occurred_at),
            ApprovalCommand::Cancel { actor, occurred_at } => self.handle_cancel(*actor, *occurred_at),
        }
    }
}

impl PolicyApprovalRequest {
    fn ensure_open(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("approval request {}", self.id)));
        }
        if self.status != ApprovalStatus::Pending {
            return Err(DomainError::conflict(format!(
                "approval request {} is already {:?}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    fn ensure_first_vote(&self, approver: UserId) -> Result<(), DomainError> {
        if self.voters.contains(&approver) {
            return Err(DomainError::conflict(format!(
                "user {approver} already voted on approval request {}",
                self.id
            )));
        }
        Ok(())
    }

    fn handle_submit(&self, cmd: &SubmitRequest) -> Result<Vec<ApprovalEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("approval request already exists"));
        }
        if cmd.required_approvals == 0 {
            return Err(DomainError::validation("an approval request needs at least one approval"));
        }
        if cmd.proposed.id != cmd.policy_id {
            return Err(DomainError::invariant("proposed policy does not match policy_id"));
        }
        Ok(vec![ApprovalEvent::RequestSubmitted(Box::new(cmd.clone()))])
    }

    fn handle_approve(
        &self,
        approver: UserId,
        comment: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<ApprovalEvent>, DomainError> {
        self.ensure_open()?;
        self.ensure_first_vote(approver)?;

        let received_approvals = self.received_approvals.saturating_add(1);
        let mut events = vec![ApprovalEvent::ApprovalRecorded {
            approver,
            comment,
            received_approvals,
            occurred_at,
        }];
        if received_approvals >= self.required_approvals {
            events.push(ApprovalEvent::RequestApproved { occurred_at });
        }
        Ok(events)
    }

    fn handle_reject(
        &self,
        approver: UserId,
        reason: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<ApprovalEvent>, DomainError> {
        self.ensure_open()?;
        self.ensure_first_vote(approver)?;
        Ok(vec![ApprovalEvent::RequestRejected {
            approver,
            reason,
            occurred_at,
        }])
    }

    fn handle_cancel(&self, actor: UserId, occurred_at: DateTime<Utc>) -> Result<Vec<ApprovalEvent>, DomainError> {
        self.ensure_open()?;
        if self.requested_by != Some(actor) {
            return Err(DomainError::forbidden("only the requester can cancel an approval request"));
        }
        Ok(vec![ApprovalEvent::RequestCancelled { actor, occurred_at }])
    }
}

/// One recorded vote. Unique per (request, approver).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyApproval {
    pub id: ApprovalId,
    pub request_id: ApprovalRequestId,
    pub approver: UserId,
    pub decision: ApprovalDecision,
    #[serde(default)]
    pub comment: Option<String>,
    pub at: DateTime<Utc>,
}

impl PolicyApproval {
    /// The vote carried by an event, if any.
    pub fn from_event(request_id: ApprovalRequestId, event: &ApprovalEvent) -> Option<Self> {
        let (approver, decision, comment, at) = match event {
            ApprovalEvent::ApprovalRecorded {
                approver,
                comment,
                occurred_at,
                ..
            } => (*approver, ApprovalDecision::Approve, comment.clone(), *occurred_at),
            ApprovalEvent::RequestRejected {
                approver,
                reason,
                occurred_at,
            } => (*approver, ApprovalDecision::Reject, reason.clone(), *occurred_at),
            _ => return None,
        };
        Some(Self {
            id: ApprovalId::new(),
            request_id,
            approver,
            decision,
            comment,
            at,
        })
    }
}

/// May `principal` vote on `request` under `workflow`?
///
/// Advisory: the store re-checks the one-vote rule atomically when the vote
/// is cast.
pub fn can_approve(
    principal: &PrincipalRoles,
    request: &PolicyApprovalRequest,
    workflow: &PolicyApprovalWorkflow,
    votes: &[PolicyApproval],
) -> bool {
    if !request.is_pending() || request.has_voted(principal.user_id) {
        return false;
    }
    if votes
        .iter()
        .any(|v| v.request_id == request.id && v.approver == principal.user_id)
    {
        return false;
    }
    principal.role_names().iter().any(|r| workflow.allows_role(r))
}

#[cfg(test)]
mod tests {
    use super::*;
    use verdict_auth::Role;
    use verdict_policy::Effect;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn open_request(required: u32) -> (PolicyApprovalRequest, UserId) {
        let requester = UserId::new();
        let policy = Policy::new("p", Effect::Deny, 100, now());
        let mut request = PolicyApprovalRequest::empty(ApprovalRequestId::new());
        request
            .execute(&ApprovalCommand::Submit(Box::new(SubmitRequest {
                policy_id: policy.id,
                version_id: None,
                workflow_id: None,
                request_type: RequestType::Activate,
                requested_by: requester,
                proposed: policy,
                required_approvals: required,
                reason: Some("go live".to_string()),
                occurred_at: now(),
            })))
            .unwrap();
        (request, requester)
    }

    fn approve(approver: UserId) -> ApprovalCommand {
        ApprovalCommand::Approve {
            approver,
            comment: None,
            occurred_at: now(),
        }
    }

    #[test]
    fn resolves_once_quorum_is_reached() {
        let (mut request, _) = open_request(2);

        let events = request.execute(&approve(UserId::new())).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(request.status(), ApprovalStatus::Pending);

        let events = request.execute(&approve(UserId::new())).unwrap();
        assert!(matches!(events.last(), Some(ApprovalEvent::RequestApproved { .. })));
        assert_eq!(request.status(), ApprovalStatus::Approved);
        assert!(request.is_complete());

        let late = request.execute(&approve(UserId::new()));
        assert!(matches!(late, Err(DomainError::Conflict(_))));
        assert_eq!(request.received_approvals(), 2);
    }

    #[test]
    fn duplicate_vote_is_a_conflict() {
        let (mut request, _) = open_request(3);
        let approver = UserId::new();
        request.execute(&approve(approver)).unwrap();
        assert!(matches!(request.execute(&approve(approver)), Err(DomainError::Conflict(_))));
        assert_eq!(request.received_approvals(), 1);
    }

    #[test]
    fn single_rejection_resolves_immediately() {
        let (mut request, _) = open_request(3);
        request.execute(&approve(UserId::new())).unwrap();
        request
            .execute(&ApprovalCommand::Reject {
                approver: UserId::new(),
                reason: Some("too broad".to_string()),
                occurred_at: now(),
            })
            .unwrap();
        assert_eq!(request.status(), ApprovalStatus::Rejected);
        assert_eq!(request.reason(), Some("too broad"));
        assert!(request.execute(&approve(UserId::new())).is_err());
    }

    #[test]
    fn only_requester_may_cancel() {
        let (mut request, requester) = open_request(1);
        let stranger = ApprovalCommand::Cancel {
            actor: UserId::new(),
            occurred_at: now(),
        };
        assert!(matches!(request.execute(&stranger), Err(DomainError::Forbidden(_))));
        request
            .execute(&ApprovalCommand::Cancel {
                actor: requester,
                occurred_at: now(),
            })
            .unwrap();
        assert_eq!(request.status(), ApprovalStatus::Cancelled);
    }

    #[test]
    fn votes_on_unopened_request_are_not_found() {
        let request = PolicyApprovalRequest::empty(ApprovalRequestId::new());
        assert!(matches!(request.handle(&approve(UserId::new())), Err(DomainError::NotFound(_))));
    }

    #[test]
    fn votes_are_derived_from_events() {
        let (mut request, _) = open_request(1);
        let approver = UserId::new();
        let events = request.execute(&approve(approver)).unwrap();
        let votes: Vec<PolicyApproval> = events
            .iter()
            .filter_map(|e| PolicyApproval::from_event(request.id_typed(), e))
            .collect();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].approver, approver);
        assert_eq!(votes[0].decision, ApprovalDecision::Approve);
    }

    #[test]
    fn can_approve_requires_role_and_first_vote() {
        let (mut request, _) = open_request(2);
        let workflow =
            PolicyApprovalWorkflow::new("w", [RequestType::Activate], ["compliance_officer"], 2, now()).unwrap();

        let officer = PrincipalRoles::new(UserId::new())
            .with_global_role(Role::new("compliance_officer", 2));
        let clerk = PrincipalRoles::new(UserId::new()).with_global_role(Role::new("clerk", 4));

        assert!(can_approve(&officer, &request, &workflow, &[]));
        assert!(!can_approve(&clerk, &request, &workflow, &[]));

        request.execute(&approve(officer.user_id)).unwrap();
        assert!(!can_approve(&officer, &request, &workflow, &[]));
    }
}
