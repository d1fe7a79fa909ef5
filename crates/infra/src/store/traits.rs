use chrono::{DateTime, Utc};
use thiserror::Error;

use verdict_auth::{
    BusinessRole, BusinessVertical, PermissionDefinition, PrincipalRoles, Role, UserBusinessRoleBinding,
};
use verdict_core::{
    ApprovalRequestId, AttributeId, BusinessRoleId, DomainError, DomainResult, PolicyId, RoleId, UserId,
    VerticalId,
};
use verdict_governance::{
    ApprovalCommand, ApprovalEvent, ApprovalStatus, PolicyApproval, PolicyApprovalRequest,
    PolicyApprovalWorkflow, PolicyChangeLog, PolicyVersion,
};
use verdict_policy::{Attribute, Policy, PolicyEvaluation, ResourceAttributeValue, UserAttributeValue};

/// Storage error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub(crate) fn poisoned<T>(_: std::sync::PoisonError<T>) -> Self {
        StoreError::Storage("lock poisoned".to_string())
    }
}

impl From<StoreError> for DomainError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(what) => DomainError::NotFound(what),
            StoreError::Conflict(msg) => DomainError::Conflict(msg),
            StoreError::Storage(msg) => DomainError::invariant(format!("storage failure: {msg}")),
        }
    }
}

/// Roles, verticals, business roles and user bindings.
pub trait RoleDirectory: Send + Sync {
    fn put_permission(&self, permission: PermissionDefinition) -> Result<(), StoreError>;

    fn permissions(&self) -> Result<Vec<PermissionDefinition>, StoreError>;

    fn put_role(&self, role: Role) -> Result<(), StoreError>;

    fn role(&self, id: RoleId) -> Result<Option<Role>, StoreError>;

    fn role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError>;

    fn put_vertical(&self, vertical: BusinessVertical) -> Result<(), StoreError>;

    fn vertical(&self, id: VerticalId) -> Result<Option<BusinessVertical>, StoreError>;

    fn vertical_by_code(&self, code: &str) -> Result<Option<BusinessVertical>, StoreError>;

    fn put_business_role(&self, role: BusinessRole) -> Result<(), StoreError>;

    fn business_role(&self, id: BusinessRoleId) -> Result<Option<BusinessRole>, StoreError>;

    fn business_role_by_name(&self, vertical_id: VerticalId, name: &str) -> Result<Option<BusinessRole>, StoreError>;

    /// Bind `user_id` to a global role, replacing any previous one.
    fn set_global_role(&self, user_id: UserId, role_id: RoleId) -> Result<(), StoreError>;

    fn clear_global_role(&self, user_id: UserId) -> Result<(), StoreError>;

    fn global_role_of(&self, user_id: UserId) -> Result<Option<Role>, StoreError>;

    fn global_role_holders(&self, role_id: RoleId) -> Result<Vec<UserId>, StoreError>;

    /// Insert a binding unless an active one for the same (user, role) exists,
    /// in which case the existing binding is returned.
    fn insert_binding(&self, binding: UserBusinessRoleBinding) -> Result<UserBusinessRoleBinding, StoreError>;

    /// Deactivate the active binding for (user, role). Returns whether one existed.
    fn deactivate_binding(&self, user_id: UserId, role_id: BusinessRoleId) -> Result<bool, StoreError>;

    fn bindings_of(&self, user_id: UserId) -> Result<Vec<UserBusinessRoleBinding>, StoreError>;

    /// Resolve the role snapshot the RBAC functions work on.
    ///
    /// Bindings whose business role no longer exists are skipped.
    fn principal_roles(&self, user_id: UserId) -> Result<PrincipalRoles, StoreError> {
        let mut principal = PrincipalRoles::new(user_id);
        if let Some(role) = self.global_role_of(user_id)? {
            principal = principal.with_global_role(role);
        }
        for binding in self.bindings_of(user_id)? {
            if !binding.active {
                continue;
            }
            if let Some(role) = self.business_role(binding.business_role_id)? {
                principal = principal.with_business_role(binding, role);
            }
        }
        Ok(principal)
    }
}

/// Attribute catalogue and time-bounded attribute values.
pub trait AttributeStore: Send + Sync {
    /// Insert or replace a definition. Names are unique.
    fn put_attribute(&self, attribute: Attribute) -> Result<(), StoreError>;

    fn attribute(&self, id: AttributeId) -> Result<Option<Attribute>, StoreError>;

    fn attribute_by_name(&self, name: &str) -> Result<Option<Attribute>, StoreError>;

    fn attributes(&self) -> Result<Vec<Attribute>, StoreError>;

    fn add_user_value(&self, value: UserAttributeValue) -> Result<(), StoreError>;

    fn add_resource_value(&self, value: ResourceAttributeValue) -> Result<(), StoreError>;

    /// Values effective at `now`, oldest first.
    fn effective_user_values(&self, user_id: UserId, now: DateTime<Utc>) -> Result<Vec<UserAttributeValue>, StoreError>;

    /// Values effective at `now`, oldest first.
    fn effective_resource_values(
        &self,
        resource_type: &str,
        resource_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ResourceAttributeValue>, StoreError>;
}

pub trait PolicyStore: Send + Sync {
    fn insert(&self, policy: Policy) -> Result<(), StoreError>;

    /// Replace an existing policy.
    fn update(&self, policy: Policy) -> Result<(), StoreError>;

    fn get(&self, id: PolicyId) -> Result<Option<Policy>, StoreError>;

    fn list(&self) -> Result<Vec<Policy>, StoreError>;

    /// Active policies whose validity window contains `now`.
    fn active_at(&self, now: DateTime<Utc>) -> Result<Vec<Policy>, StoreError>;
}

/// Append-only decision log: no update or delete path.
pub trait EvaluationLog: Send + Sync {
    fn append(&self, record: PolicyEvaluation) -> Result<(), StoreError>;

    /// Most recent first.
    fn recent(&self, limit: usize) -> Result<Vec<PolicyEvaluation>, StoreError>;

    fn for_principal(&self, user_id: UserId) -> Result<Vec<PolicyEvaluation>, StoreError>;
}

/// Result of casting a vote.
#[derive(Debug, Clone)]
pub struct VoteOutcome {
    /// The request as it stood before the command.
    pub previous: PolicyApprovalRequest,
    pub request: PolicyApprovalRequest,
    pub events: Vec<ApprovalEvent>,
    /// Set only for the one call that moved the request out of `Pending`.
    pub resolved: Option<ApprovalStatus>,
}

/// Versions, workflows, approval requests, votes and the change log.
pub trait GovernanceStore: Send + Sync {
    fn insert_version(&self, version: PolicyVersion) -> Result<(), StoreError>;

    fn versions(&self, policy_id: PolicyId) -> Result<Vec<PolicyVersion>, StoreError>;

    fn put_workflow(&self, workflow: PolicyApprovalWorkflow) -> Result<(), StoreError>;

    fn workflows(&self) -> Result<Vec<PolicyApprovalWorkflow>, StoreError>;

    /// Store a freshly submitted request. At most one pending request may
    /// exist per policy.
    fn open_request(&self, request: PolicyApprovalRequest) -> Result<(), StoreError>;

    fn request(&self, id: ApprovalRequestId) -> Result<Option<PolicyApprovalRequest>, StoreError>;

    fn pending_request_for(&self, policy_id: PolicyId) -> Result<Option<PolicyApprovalRequest>, StoreError>;

    fn requests_for(&self, policy_id: PolicyId) -> Result<Vec<PolicyApprovalRequest>, StoreError>;

    /// Run an approve, reject or cancel command against a request.
    ///
    /// The (request, approver) uniqueness check, the aggregate transition, the
    /// vote insert and the counter update happen in one critical section.
    fn cast_vote(&self, id: ApprovalRequestId, command: &ApprovalCommand) -> DomainResult<VoteOutcome>;

    /// Undo a vote whose resolution could not be carried out: the request is
    /// restored to `previous` and `voter`'s vote record is dropped.
    fn withdraw_vote(&self, previous: PolicyApprovalRequest, voter: UserId) -> Result<(), StoreError>;

    fn approvals(&self, id: ApprovalRequestId) -> Result<Vec<PolicyApproval>, StoreError>;

    fn append_change(&self, entry: PolicyChangeLog) -> Result<(), StoreError>;

    fn change_log(&self, policy_id: PolicyId) -> Result<Vec<PolicyChangeLog>, StoreError>;
}
