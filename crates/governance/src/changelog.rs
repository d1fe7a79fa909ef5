use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use verdict_core::{ChangeLogId, PolicyId, UserId};
use verdict_policy::Policy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Created,
    Updated,
    Cloned,
    SubmittedForApproval,
    Approved,
    Rejected,
    Cancelled,
    Activated,
    Deactivated,
    Archived,
}

/// Immutable trail entry for one policy transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyChangeLog {
    id: ChangeLogId,
    policy_id: PolicyId,
    actor: UserId,
    action: ChangeAction,
    diff: JsonValue,
    reason: Option<String>,
    at: DateTime<Utc>,
}

impl PolicyChangeLog {
    pub fn new(policy_id: PolicyId, actor: UserId, action: ChangeAction, at: DateTime<Utc>) -> Self {
        Self {
            id: ChangeLogId::new(),
            policy_id,
            actor,
            action,
            diff: JsonValue::Object(Map::new()),
            reason: None,
            at,
        }
    }

    pub fn with_diff(mut self, diff: JsonValue) -> Self {
        self.diff = diff;
        self
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    pub fn id(&self) -> ChangeLogId {
        self.id
    }

    pub fn policy_id(&self) -> PolicyId {
        self.policy_id
    }

    pub fn actor(&self) -> UserId {
        self.actor
    }

    pub fn action(&self) -> ChangeAction {
        self.action
    }

    pub fn diff(&self) -> &JsonValue {
        &self.diff
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn at(&self) -> DateTime<Utc> {
        self.at
    }
}

// Bookkeeping fields that change on every write.
const IGNORED_FIELDS: [&str; 1] = ["updated_at"];

/// Field-level diff: `{"field": {"from": .., "to": ..}}` for each changed field.
pub fn diff_policies(before: &Policy, after: &Policy) -> JsonValue {
    let as_map = |p: &Policy| match serde_json::to_value(p) {
        Ok(JsonValue::Object(map)) => map,
        _ => Map::new(),
    };
    let before = as_map(before);
    let after = as_map(after);

    let mut diff = Map::new();
    for (field, new_value) in &after {
        if IGNORED_FIELDS.contains(&field.as_str()) {
            continue;
        }
        let old_value = before.get(field).cloned().unwrap_or(JsonValue::Null);
        if &old_value != new_value {
            diff.insert(
                field.clone(),
                serde_json::json!({ "from": old_value, "to": new_value }),
            );
        }
    }
    JsonValue::Object(diff)
}
