use std::cmp::Reverse;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use verdict_core::{DomainError, DomainResult, VerticalId, WorkflowId};
use verdict_policy::Policy;

/// Kind of change an approval request covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Create,
    Update,
    Activate,
    Deactivate,
    Archive,
}

/// Who must approve which policy changes, and how many of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyApprovalWorkflow {
    pub id: WorkflowId,
    pub name: String,
    pub request_types: Vec<RequestType>,
    /// `None` covers policies in every vertical.
    #[serde(default)]
    pub vertical_id: Option<VerticalId>,
    /// Only applies to policies flagged critical.
    #[serde(default)]
    pub critical_only: bool,
    pub approver_roles: Vec<String>,
    pub required_approvals: u32,
    #[serde(default)]
    pub priority: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl PolicyApprovalWorkflow {
    pub fn new<I, S>(
        name: impl Into<String>,
        request_types: impl IntoIterator<Item = RequestType>,
        approver_roles: I,
        required_approvals: u32,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let workflow = Self {
            id: WorkflowId::new(),
            name: name.into(),
            request_types: request_types.into_iter().collect(),
            vertical_id: None,
            critical_only: false,
            approver_roles: approver_roles.into_iter().map(Into::into).collect(),
            required_approvals,
            priority: 0,
            active: true,
            created_at,
        };
        workflow.validate()?;
        Ok(workflow)
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn in_vertical(mut self, vertical_id: VerticalId) -> Self {
        self.vertical_id = Some(vertical_id);
        self
    }

    pub fn critical_only(mut self) -> Self {
        self.critical_only = true;
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("workflow name cannot be empty"));
        }
        if self.request_types.is_empty() {
            return Err(DomainError::validation(format!(
                "workflow '{}' must cover at least one request type",
                self.name
            )));
        }
        if self.approver_roles.is_empty() {
            return Err(DomainError::validation(format!(
                "workflow '{}' must name at least one approver role",
                self.name
            )));
        }
        if self.required_approvals == 0 {
            return Err(DomainError::validation(format!(
                "workflow '{}' must require at least one approval",
                self.name
            )));
        }
        Ok(())
    }

    pub fn covers(&self, request_type: RequestType, policy: &Policy) -> bool {
        self.active
            && self.request_types.contains(&request_type)
            && (self.vertical_id.is_none() || self.vertical_id == policy.vertical_id)
            && (!self.critical_only || policy.critical)
    }

    pub fn allows_role(&self, role_name: &str) -> bool {
        self.approver_roles.iter().any(|r| r == role_name)
    }
}

/// Pick the workflow governing a change: highest priority wins, then the
/// oldest definition.
pub fn select_workflow<'a, I>(workflows: I, request_type: RequestType, policy: &Policy) -> Option<&'a PolicyApprovalWorkflow>
where
    I: IntoIterator<Item = &'a PolicyApprovalWorkflow>,
{
    workflows
        .into_iter()
        .filter(|w| w.covers(request_type, policy))
        .min_by_key(|w| (Reverse(w.priority), w.created_at, w.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use verdict_policy::Effect;

    fn workflow(name: &str, priority: i32) -> PolicyApprovalWorkflow {
        PolicyApprovalWorkflow::new(name, [RequestType::Update], ["compliance"], 2, Utc::now())
            .unwrap()
            .with_priority(priority)
    }

    #[test]
    fn highest_priority_match_wins() {
        let policy = Policy::new("p", Effect::Deny, 1, Utc::now());
        let flows = [workflow("low", 1), workflow("high", 10)];
        let chosen = select_workflow(&flows, RequestType::Update, &policy).unwrap();
        assert_eq!(chosen.name, "high");
        assert!(select_workflow(&flows, RequestType::Archive, &policy).is_none());
    }

    #[test]
    fn ties_prefer_oldest() {
        let policy = Policy::new("p", Effect::Deny, 1, Utc::now());
        let mut old = workflow("old", 5);
        old.created_at -= Duration::days(3);
        let flows = [workflow("new", 5), old];
        assert_eq!(select_workflow(&flows, RequestType::Update, &policy).unwrap().name, "old");
    }

    #[test]
    fn scoping_by_vertical_and_criticality() {
        let vertical = VerticalId::new();
        let policy = Policy::new("p", Effect::Deny, 1, Utc::now());
        let scoped = workflow("scoped", 1).in_vertical(vertical);
        let critical = workflow("critical", 1).critical_only();

        assert!(!scoped.covers(RequestType::Update, &policy));
        assert!(scoped.covers(RequestType::Update, &policy.clone().in_vertical(vertical)));
        assert!(!critical.covers(RequestType::Update, &policy));
        assert!(critical.covers(RequestType::Update, &policy.critical()));
    }

    #[test]
    fn inactive_workflow_never_matches() {
        let policy = Policy::new("p", Effect::Deny, 1, Utc::now());
        let mut w = workflow("w", 1);
        w.active = false;
        assert!(select_workflow([&w], RequestType::Update, &policy).is_none());
    }

    #[test]
    fn validation() {
        assert!(PolicyApprovalWorkflow::new("w", [RequestType::Update], ["compliance"], 0, Utc::now()).is_err());
        assert!(PolicyApprovalWorkflow::new("w", [RequestType::Update], Vec::<String>::new(), 1, Utc::now()).is_err());
        assert!(PolicyApprovalWorkflow::new("w", Vec::<RequestType>::new(), ["compliance"], 1, Utc::now()).is_err());
    }
}
