use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use verdict_core::{DomainError, DomainResult, PolicyId, UserId, ValidityWindow, VerticalId};

use crate::{AttributeDataType, ConditionNode, PolicyRequest};

/// Entry matching any action or resource type.
pub const ANY: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    Draft,
    Active,
    Inactive,
    Archived,
}

/// An ABAC rule: when `conditions` hold for a targeted request, apply `effect`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub effect: Effect,
    /// Higher is evaluated first.
    pub priority: i32,
    pub status: PolicyStatus,
    /// `None` applies in every vertical.
    #[serde(default)]
    pub vertical_id: Option<VerticalId>,
    #[serde(default)]
    pub conditions: ConditionNode,
    pub actions: Vec<String>,
    pub resources: Vec<String>,
    #[serde(default)]
    pub validity: ValidityWindow,
    /// Every change to a critical policy needs approval, even while inactive.
    #[serde(default)]
    pub critical: bool,
    pub version: u32,
    #[serde(default)]
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Policy {
    /// New draft policy. Activation goes through the administration service.
    pub fn new(name: impl Into<String>, effect: Effect, priority: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: PolicyId::new(),
            name: name.into(),
            description: None,
            effect,
            priority,
            status: PolicyStatus::Draft,
            vertical_id: None,
            conditions: ConditionNode::always(),
            actions: Vec::new(),
            resources: Vec::new(),
            validity: ValidityWindow::always(),
            critical: false,
            version: 1,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_conditions(mut self, conditions: ConditionNode) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions = actions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources = resources.into_iter().map(Into::into).collect();
        self
    }

    pub fn in_vertical(mut self, vertical_id: VerticalId) -> Self {
        self.vertical_id = Some(vertical_id);
        self
    }

    pub fn with_validity(mut self, validity: ValidityWindow) -> Self {
        self.validity = validity;
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn created_by(mut self, user_id: UserId) -> Self {
        self.created_by = Some(user_id);
        self
    }

    /// Bypasses governance; for tests and in-process fixtures.
    pub fn activated(mut self) -> Self {
        self.status = PolicyStatus::Active;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == PolicyStatus::Active
    }

    /// Structural validation.
    pub fn validate(&self, max_depth: usize) -> DomainResult<()> {
        self.validate_with(max_depth, &|_| None)
    }

    /// Validation including literal types against the attribute catalogue.
    pub fn validate_with(
        &self,
        max_depth: usize,
        declared_type: &dyn Fn(&str) -> Option<AttributeDataType>,
    ) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("policy name cannot be empty"));
        }
        if self.actions.is_empty() || self.actions.iter().any(|a| a.trim().is_empty()) {
            return Err(DomainError::validation(format!(
                "policy '{}' must target at least one non-empty action (use \"*\" for any)",
                self.name
            )));
        }
        if self.resources.is_empty() || self.resources.iter().any(|r| r.trim().is_empty()) {
            return Err(DomainError::validation(format!(
                "policy '{}' must target at least one non-empty resource type (use \"*\" for any)",
                self.name
            )));
        }
        self.validity.validate()?;
        self.conditions.validate_with(max_depth, declared_type)
    }

    /// Does the request fall inside this policy's action, resource and vertical scope?
    pub fn targets(&self, request: &PolicyRequest) -> bool {
        let vertical_ok = match self.vertical_id {
            None => true,
            Some(v) => request.vertical_id == Some(v),
        };
        vertical_ok
            && list_covers(&self.actions, &request.action)
            && list_covers(&self.resources, &request.resource_type)
    }

    /// Active, inside its validity window, and targeting the request.
    pub fn is_candidate(&self, request: &PolicyRequest, now: DateTime<Utc>) -> bool {
        self.is_active() && self.validity.contains(now) && self.targets(request)
    }
}

fn list_covers(list: &[String], value: &str) -> bool {
    list.iter().any(|entry| entry == ANY || entry == value)
}
