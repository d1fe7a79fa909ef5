use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use verdict_core::{PolicyId, PolicyVersionId, UserId};
use verdict_policy::Policy;

/// Immutable snapshot of a policy as it was (or is proposed to be) at one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyVersion {
    pub id: PolicyVersionId,
    pub policy_id: PolicyId,
    pub version: u32,
    pub snapshot: Policy,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub summary: Option<String>,
}

impl PolicyVersion {
    pub fn snapshot_of(policy: &Policy, created_by: UserId, created_at: DateTime<Utc>) -> Self {
        Self {
            id: PolicyVersionId::new(),
            policy_id: policy.id,
            version: policy.version,
            snapshot: policy.clone(),
            created_by,
            created_at,
            summary: None,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verdict_policy::Effect;

    #[test]
    fn snapshot_copies_policy_version() {
        let now = Utc::now();
        let mut policy = Policy::new("p", Effect::Allow, 1, now);
        policy.version = 3;
        let v = PolicyVersion::snapshot_of(&policy, UserId::new(), now).with_summary("raise threshold");
        assert_eq!(v.version, 3);
        assert_eq!(v.policy_id, policy.id);
        assert_eq!(v.snapshot, policy);
        assert_eq!(v.summary.as_deref(), Some("raise threshold"));
    }
}
