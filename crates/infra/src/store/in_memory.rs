//! In-memory stores for tests and single-process deployments.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use verdict_auth::{
    BusinessRole, BusinessVertical, PermissionDefinition, Role, UserBusinessRoleBinding,
};
use verdict_core::{
    Aggregate, ApprovalRequestId, AttributeId, BusinessRoleId, DomainError, DomainResult, PolicyId,
    RoleId, UserId, VerticalId,
};
use verdict_governance::{
    ApprovalCommand, ApprovalStatus, PolicyApproval, PolicyApprovalRequest, PolicyApprovalWorkflow,
    PolicyChangeLog, PolicyVersion,
};
use verdict_policy::{Attribute, Policy, PolicyEvaluation, ResourceAttributeValue, UserAttributeValue};

use super::traits::{
    AttributeStore, EvaluationLog, GovernanceStore, PolicyStore, RoleDirectory, StoreError, VoteOutcome,
};

// ─────────────────────────────────────────────────────────────────────────────
// Roles
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct RoleTables {
    permissions: Vec<PermissionDefinition>,
    roles: HashMap<RoleId, Role>,
    verticals: HashMap<VerticalId, BusinessVertical>,
    business_roles: HashMap<BusinessRoleId, BusinessRole>,
    global_roles: HashMap<UserId, RoleId>,
    bindings: Vec<UserBusinessRoleBinding>,
}

#[derive(Debug, Default)]
pub struct InMemoryRoleDirectory {
    tables: RwLock<RoleTables>,
}

impl InMemoryRoleDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl RoleDirectory for InMemoryRoleDirectory {
    fn put_permission(&self, permission: PermissionDefinition) -> Result<(), StoreError> {
        let mut t = self.tables.write().map_err(StoreError::poisoned)?;
        match t.permissions.iter_mut().find(|p| p.name == permission.name) {
            Some(existing) => *existing = permission,
            None => t.permissions.push(permission),
        }
        Ok(())
    }

    fn permissions(&self) -> Result<Vec<PermissionDefinition>, StoreError> {
        Ok(self.tables.read().map_err(StoreError::poisoned)?.permissions.clone())
    }

    fn put_role(&self, role: Role) -> Result<(), StoreError> {
        let mut t = self.tables.write().map_err(StoreError::poisoned)?;
        if t.roles.values().any(|r| r.name == role.name && r.id != role.id) {
            return Err(StoreError::Conflict(format!("role '{}' already exists", role.name)));
        }
        t.roles.insert(role.id, role);
        Ok(())
    }

    fn role(&self, id: RoleId) -> Result<Option<Role>, StoreError> {
        Ok(self.tables.read().map_err(StoreError::poisoned)?.roles.get(&id).cloned())
    }

    fn role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError> {
        let t = self.tables.read().map_err(StoreError::poisoned)?;
        Ok(t.roles.values().find(|r| r.name == name).cloned())
    }

    fn put_vertical(&self, vertical: BusinessVertical) -> Result<(), StoreError> {
        let mut t = self.tables.write().map_err(StoreError::poisoned)?;
        if t.verticals.values().any(|v| v.code == vertical.code && v.id != vertical.id) {
            return Err(StoreError::Conflict(format!("vertical '{}' already exists", vertical.code)));
        }
        t.verticals.insert(vertical.id, vertical);
        Ok(())
    }

    fn vertical(&self, id: VerticalId) -> Result<Option<BusinessVertical>, StoreError> {
        Ok(self.tables.read().map_err(StoreError::poisoned)?.verticals.get(&id).cloned())
    }

    fn vertical_by_code(&self, code: &str) -> Result<Option<BusinessVertical>, StoreError> {
        let t = self.tables.read().map_err(StoreError::poisoned)?;
        Ok(t.verticals.values().find(|v| v.code == code).cloned())
    }

    fn put_business_role(&self, role: BusinessRole) -> Result<(), StoreError> {
        let mut t = self.tables.write().map_err(StoreError::poisoned)?;
        if !t.verticals.contains_key(&role.vertical_id) {
            return Err(StoreError::NotFound(format!("vertical {}", role.vertical_id)));
        }
        if t
            .business_roles
            .values()
            .any(|r| r.vertical_id == role.vertical_id && r.name == role.name && r.id != role.id)
        {
            return Err(StoreError::Conflict(format!(
                "business role '{}' already exists in vertical {}",
                role.name, role.vertical_id
            )));
        }
        t.business_roles.insert(role.id, role);
        Ok(())
    }

    fn business_role(&self, id: BusinessRoleId) -> Result<Option<BusinessRole>, StoreError> {
        Ok(self
            .tables
            .read()
            .map_err(StoreError::poisoned)?
            .business_roles
            .get(&id)
            .cloned())
    }

    fn business_role_by_name(&self, vertical_id: VerticalId, name: &str) -> Result<Option<BusinessRole>, StoreError> {
        let t = self.tables.read().map_err(StoreError::poisoned)?;
        Ok(t.business_roles
            .values()
            .find(|r| r.vertical_id == vertical_id && r.name == name)
            .cloned())
    }

    fn set_global_role(&self, user_id: UserId, role_id: RoleId) -> Result<(), StoreError> {
        let mut t = self.tables.write().map_err(StoreError::poisoned)?;
        if !t.roles.contains_key(&role_id) {
            return Err(StoreError::NotFound(format!("role {role_id}")));
        }
        t.global_roles.insert(user_id, role_id);
        Ok(())
    }

    fn clear_global_role(&self, user_id: UserId) -> Result<(), StoreError> {
        self.tables
            .write()
            .map_err(StoreError::poisoned)?
            .global_roles
            .remove(&user_id);
        Ok(())
    }

    fn global_role_of(&self, user_id: UserId) -> Result<Option<Role>, StoreError> {
        let t = self.tables.read().map_err(StoreError::poisoned)?;
        Ok(t.global_roles.get(&user_id).and_then(|id| t.roles.get(id)).cloned())
    }

    fn global_role_holders(&self, role_id: RoleId) -> Result<Vec<UserId>, StoreError> {
        let t = self.tables.read().map_err(StoreError::poisoned)?;
        let mut holders: Vec<UserId> = t
            .global_roles
            .iter()
            .filter(|(_, r)| **r == role_id)
            .map(|(u, _)| *u)
            .collect();
        holders.sort();
        Ok(holders)
    }

    fn insert_binding(&self, binding: UserBusinessRoleBinding) -> Result<UserBusinessRoleBinding, StoreError> {
        let mut t = self.tables.write().map_err(StoreError::poisoned)?;
        if !t.business_roles.contains_key(&binding.business_role_id) {
            return Err(StoreError::NotFound(format!("business role {}", binding.business_role_id)));
        }
        if let Some(existing) = t.bindings.iter().find(|b| {
            b.active && b.user_id == binding.user_id && b.business_role_id == binding.business_role_id
        }) {
            return Ok(existing.clone());
        }
        t.bindings.push(binding.clone());
        Ok(binding)
    }

    fn deactivate_binding(&self, user_id: UserId, role_id: BusinessRoleId) -> Result<bool, StoreError> {
        let mut t = self.tables.write().map_err(StoreError::poisoned)?;
        let mut found = false;
        for b in t
            .bindings
            .iter_mut()
            .filter(|b| b.active && b.user_id == user_id && b.business_role_id == role_id)
        {
            b.active = false;
            found = true;
        }
        Ok(found)
    }

    fn bindings_of(&self, user_id: UserId) -> Result<Vec<UserBusinessRoleBinding>, StoreError> {
        let t = self.tables.read().map_err(StoreError::poisoned)?;
        Ok(t.bindings.iter().filter(|b| b.user_id == user_id).cloned().collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Attributes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct AttributeTables {
    definitions: HashMap<AttributeId, Attribute>,
    user_values: Vec<UserAttributeValue>,
    resource_values: Vec<ResourceAttributeValue>,
}

#[derive(Debug, Default)]
pub struct InMemoryAttributeStore {
    tables: RwLock<AttributeTables>,
}

impl InMemoryAttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl AttributeStore for InMemoryAttributeStore {
    fn put_attribute(&self, attribute: Attribute) -> Result<(), StoreError> {
        let mut t = self.tables.write().map_err(StoreError::poisoned)?;
        if t
            .definitions
            .values()
            .any(|a| a.name == attribute.name && a.id != attribute.id)
        {
            return Err(StoreError::Conflict(format!("attribute '{}' already exists", attribute.name)));
        }
        t.definitions.insert(attribute.id, attribute);
        Ok(())
    }

    fn attribute(&self, id: AttributeId) -> Result<Option<Attribute>, StoreError> {
        Ok(self
            .tables
            .read()
            .map_err(StoreError::poisoned)?
            .definitions
            .get(&id)
            .cloned())
    }

    fn attribute_by_name(&self, name: &str) -> Result<Option<Attribute>, StoreError> {
        let t = self.tables.read().map_err(StoreError::poisoned)?;
        Ok(t.definitions.values().find(|a| a.name == name).cloned())
    }

    fn attributes(&self) -> Result<Vec<Attribute>, StoreError> {
        let t = self.tables.read().map_err(StoreError::poisoned)?;
        let mut all: Vec<Attribute> = t.definitions.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    fn add_user_value(&self, value: UserAttributeValue) -> Result<(), StoreError> {
        let mut t = self.tables.write().map_err(StoreError::poisoned)?;
        if !t.definitions.contains_key(&value.attribute_id) {
            return Err(StoreError::NotFound(format!("attribute {}", value.attribute_id)));
        }
        t.user_values.push(value);
        Ok(())
    }

    fn add_resource_value(&self, value: ResourceAttributeValue) -> Result<(), StoreError> {
        let mut t = self.tables.write().map_err(StoreError::poisoned)?;
        if !t.definitions.contains_key(&value.attribute_id) {
            return Err(StoreError::NotFound(format!("attribute {}", value.attribute_id)));
        }
        t.resource_values.push(value);
        Ok(())
    }

    fn effective_user_values(&self, user_id: UserId, now: DateTime<Utc>) -> Result<Vec<UserAttributeValue>, StoreError> {
        let t = self.tables.read().map_err(StoreError::poisoned)?;
        Ok(t.user_values
            .iter()
            .filter(|v| v.user_id == user_id && v.is_effective(now))
            .cloned()
            .collect())
    }

    fn effective_resource_values(
        &self,
        resource_type: &str,
        resource_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ResourceAttributeValue>, StoreError> {
        let t = self.tables.read().map_err(StoreError::poisoned)?;
        Ok(t.resource_values
            .iter()
            .filter(|v| v.resource_type == resource_type && v.resource_id == resource_id && v.is_effective(now))
            .cloned()
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Policies
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemoryPolicyStore {
    policies: RwLock<HashMap<PolicyId, Policy>>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl PolicyStore for InMemoryPolicyStore {
    fn insert(&self, policy: Policy) -> Result<(), StoreError> {
        let mut policies = self.policies.write().map_err(StoreError::poisoned)?;
        if policies.contains_key(&policy.id) {
            return Err(StoreError::Conflict(format!("policy {} already exists", policy.id)));
        }
        policies.insert(policy.id, policy);
        Ok(())
    }

    fn update(&self, policy: Policy) -> Result<(), StoreError> {
        let mut policies = self.policies.write().map_err(StoreError::poisoned)?;
        match policies.get_mut(&policy.id) {
            Some(slot) => {
                *slot = policy;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("policy {}", policy.id))),
        }
    }

    fn get(&self, id: PolicyId) -> Result<Option<Policy>, StoreError> {
        Ok(self.policies.read().map_err(StoreError::poisoned)?.get(&id).cloned())
    }

    fn list(&self) -> Result<Vec<Policy>, StoreError> {
        let policies = self.policies.read().map_err(StoreError::poisoned)?;
        let mut all: Vec<Policy> = policies.values().cloned().collect();
        all.sort_by_key(|p| (p.created_at, p.id));
        Ok(all)
    }

    fn active_at(&self, now: DateTime<Utc>) -> Result<Vec<Policy>, StoreError> {
        let policies = self.policies.read().map_err(StoreError::poisoned)?;
        Ok(policies
            .values()
            .filter(|p| p.is_active() && p.validity.contains(now))
            .cloned()
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Evaluation log
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemoryEvaluationLog {
    records: RwLock<Vec<PolicyEvaluation>>,
}

impl InMemoryEvaluationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EvaluationLog for InMemoryEvaluationLog {
    fn append(&self, record: PolicyEvaluation) -> Result<(), StoreError> {
        self.records.write().map_err(StoreError::poisoned)?.push(record);
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<PolicyEvaluation>, StoreError> {
        let records = self.records.read().map_err(StoreError::poisoned)?;
        Ok(records.iter().rev().take(limit).cloned().collect())
    }

    fn for_principal(&self, user_id: UserId) -> Result<Vec<PolicyEvaluation>, StoreError> {
        let records = self.records.read().map_err(StoreError::poisoned)?;
        Ok(records.iter().filter(|r| r.principal() == user_id).cloned().collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Governance
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct GovernanceTables {
    versions: Vec<PolicyVersion>,
    workflows: HashMap<verdict_core::WorkflowId, PolicyApprovalWorkflow>,
    requests: HashMap<ApprovalRequestId, PolicyApprovalRequest>,
    approvals: Vec<PolicyApproval>,
    /// Uniqueness index over (request, approver).
    voters: HashSet<(ApprovalRequestId, UserId)>,
    change_log: Vec<PolicyChangeLog>,
}

/// All governance tables sit behind one lock so a vote is a single critical
/// section.
#[derive(Debug, Default)]
pub struct InMemoryGovernanceStore {
    tables: RwLock<GovernanceTables>,
}

impl InMemoryGovernanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn voter_of(command: &ApprovalCommand) -> Option<UserId> {
    match command {
        ApprovalCommand::Approve { approver, .. } | ApprovalCommand::Reject { approver, .. } => Some(*approver),
        ApprovalCommand::Submit(_) | ApprovalCommand::Cancel { .. } => None,
    }
}

impl GovernanceStore for InMemoryGovernanceStore {
    fn insert_version(&self, version: PolicyVersion) -> Result<(), StoreError> {
        self.tables.write().map_err(StoreError::poisoned)?.versions.push(version);
        Ok(())
    }

    fn versions(&self, policy_id: PolicyId) -> Result<Vec<PolicyVersion>, StoreError> {
        let t = self.tables.read().map_err(StoreError::poisoned)?;
        Ok(t.versions.iter().filter(|v| v.policy_id == policy_id).cloned().collect())
    }

    fn put_workflow(&self, workflow: PolicyApprovalWorkflow) -> Result<(), StoreError> {
        self.tables
            .write()
            .map_err(StoreError::poisoned)?
            .workflows
            .insert(workflow.id, workflow);
        Ok(())
    }

    fn workflows(&self) -> Result<Vec<PolicyApprovalWorkflow>, StoreError> {
        let t = self.tables.read().map_err(StoreError::poisoned)?;
        Ok(t.workflows.values().cloned().collect())
    }

    fn open_request(&self, request: PolicyApprovalRequest) -> Result<(), StoreError> {
        let mut t = self.tables.write().map_err(StoreError::poisoned)?;
        let id = request.id_typed();
        if t.requests.contains_key(&id) {
            return Err(StoreError::Conflict(format!("approval request {id} already exists")));
        }
        if t
            .requests
            .values()
            .any(|r| r.policy_id() == request.policy_id() && r.is_pending())
        {
            return Err(StoreError::Conflict(format!(
                "policy {} already has a pending approval request",
                request.policy_id()
            )));
        }
        t.requests.insert(id, request);
        Ok(())
    }

    fn request(&self, id: ApprovalRequestId) -> Result<Option<PolicyApprovalRequest>, StoreError> {
        Ok(self.tables.read().map_err(StoreError::poisoned)?.requests.get(&id).cloned())
    }

    fn pending_request_for(&self, policy_id: PolicyId) -> Result<Option<PolicyApprovalRequest>, StoreError> {
        let t = self.tables.read().map_err(StoreError::poisoned)?;
        Ok(t.requests
            .values()
            .find(|r| r.policy_id() == policy_id && r.is_pending())
            .cloned())
    }

    fn requests_for(&self, policy_id: PolicyId) -> Result<Vec<PolicyApprovalRequest>, StoreError> {
        let t = self.tables.read().map_err(StoreError::poisoned)?;
        let mut found: Vec<PolicyApprovalRequest> = t
            .requests
            .values()
            .filter(|r| r.policy_id() == policy_id)
            .cloned()
            .collect();
        found.sort_by_key(|r| (r.created_at(), r.id_typed()));
        Ok(found)
    }

    fn cast_vote(&self, id: ApprovalRequestId, command: &ApprovalCommand) -> DomainResult<VoteOutcome> {
        let mut guard = self.tables.write().map_err(StoreError::poisoned)?;
        let t = &mut *guard;

        let request = t
            .requests
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found(format!("approval request {id}")))?;

        let voter = voter_of(command);
        if let Some(voter) = voter {
            if t.voters.contains(&(id, voter)) {
                return Err(DomainError::conflict(format!(
                    "user {voter} already voted on approval request {id}"
                )));
            }
        }

        let was_pending = request.is_pending();
        let previous = request.clone();
        // Work on a copy so a failed command leaves the stored request untouched.
        let mut next = request.clone();
        let events = next.execute(command)?;

        if let Some(voter) = voter {
            t.voters.insert((id, voter));
        }
        t.approvals
            .extend(events.iter().filter_map(|e| PolicyApproval::from_event(id, e)));

        let resolved = (was_pending && next.status() != ApprovalStatus::Pending).then_some(next.status());
        *request = next.clone();

        Ok(VoteOutcome {
            previous,
            request: next,
            events,
            resolved,
        })
    }

    fn withdraw_vote(&self, previous: PolicyApprovalRequest, voter: UserId) -> Result<(), StoreError> {
        let mut t = self.tables.write().map_err(StoreError::poisoned)?;
        let id = previous.id_typed();
        if !t.requests.contains_key(&id) {
            return Err(StoreError::NotFound(format!("approval request {id}")));
        }
        t.voters.remove(&(id, voter));
        t.approvals.retain(|a| !(a.request_id == id && a.approver == voter));
        t.requests.insert(id, previous);
        Ok(())
    }

    fn approvals(&self, id: ApprovalRequestId) -> Result<Vec<PolicyApproval>, StoreError> {
        let t = self.tables.read().map_err(StoreError::poisoned)?;
        Ok(t.approvals.iter().filter(|a| a.request_id == id).cloned().collect())
    }

    fn append_change(&self, entry: PolicyChangeLog) -> Result<(), StoreError> {
        self.tables.write().map_err(StoreError::poisoned)?.change_log.push(entry);
        Ok(())
    }

    fn change_log(&self, policy_id: PolicyId) -> Result<Vec<PolicyChangeLog>, StoreError> {
        let t = self.tables.read().map_err(StoreError::poisoned)?;
        Ok(t.change_log
            .iter()
            .filter(|e| e.policy_id() == policy_id)
            .cloned()
            .collect())
    }
}
