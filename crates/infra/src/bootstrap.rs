//! Startup seeding.
//!
//! A [`BootstrapPlan`] is a JSON document applied through the same
//! administration services as runtime writes, so seeded data passes the same
//! validation. Applying a plan twice is a no-op for entries that already
//! exist (matched by name or code).

use std::path::Path;

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use verdict_auth::{BusinessRole, BusinessVertical, Role};
use verdict_core::{UserId, ValidityWindow, VerticalId};
use verdict_governance::{PolicyApprovalWorkflow, RequestType};
use verdict_policy::{Attribute, AttributeDataType, ConditionNode, Effect, Policy};

use crate::engine::VerdictEngine;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapPlan {
    pub permissions: Vec<PermissionSeed>,
    pub roles: Vec<RoleSeed>,
    /// User bound to the super-admin role when nobody holds it yet.
    pub super_admin: Option<UserId>,
    pub verticals: Vec<VerticalSeed>,
    pub business_roles: Vec<BusinessRoleSeed>,
    pub attributes: Vec<AttributeSeed>,
    pub policies: Vec<PolicySeed>,
    pub workflows: Vec<WorkflowSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionSeed {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleSeed {
    pub name: String,
    pub level: u8,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerticalSeed {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessRoleSeed {
    /// Vertical code.
    pub vertical: String,
    pub name: String,
    pub level: u8,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeSeed {
    pub name: String,
    pub data_type: AttributeDataType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub allowed_values: Vec<String>,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySeed {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub effect: Effect,
    #[serde(default)]
    pub priority: i32,
    pub actions: Vec<String>,
    pub resources: Vec<String>,
    /// Tagged or legacy condition JSON; absent means "always".
    #[serde(default)]
    pub conditions: Option<JsonValue>,
    #[serde(default)]
    pub vertical: Option<String>,
    #[serde(default)]
    pub validity: ValidityWindow,
    #[serde(default)]
    pub critical: bool,
    #[serde(default)]
    pub activate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSeed {
    pub name: String,
    pub request_types: Vec<RequestType>,
    pub approver_roles: Vec<String>,
    pub required_approvals: u32,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub vertical: Option<String>,
    #[serde(default)]
    pub critical_only: bool,
}

/// Counts of entries created by one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    pub permissions: usize,
    pub roles: usize,
    pub verticals: usize,
    pub business_roles: usize,
    pub attributes: usize,
    pub policies: usize,
    pub workflows: usize,
}

impl BootstrapPlan {
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).context("invalid bootstrap plan")
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read bootstrap plan from {}", path.display()))?;
        Self::from_json(&raw)
    }

    /// Apply the plan. Policies are authored by `actor`; workflows are
    /// installed last so seeded activations are not held for approval.
    pub fn apply(&self, engine: &VerdictEngine, actor: UserId) -> anyhow::Result<BootstrapReport> {
        let mut report = BootstrapReport::default();
        let stores = engine.stores();

        for seed in &self.permissions {
            engine
                .roles()
                .define_permission(&seed.name, seed.description.as_deref())
                .with_context(|| format!("permission '{}'", seed.name))?;
            report.permissions += 1;
        }

        for seed in &self.roles {
            if stores.roles.role_by_name(&seed.name)?.is_some() {
                continue;
            }
            let role = Role::new(&seed.name, seed.level).with_permissions(seed.permissions.iter().cloned());
            engine.roles().create_role(role).with_context(|| format!("role '{}'", seed.name))?;
            report.roles += 1;
        }

        if let Some(user) = self.super_admin {
            engine.roles().install_super_admin(user).context("super-admin")?;
        }

        for seed in &self.verticals {
            if stores.roles.vertical_by_code(&seed.code)?.is_some() {
                continue;
            }
            engine
                .roles()
                .create_vertical(BusinessVertical::new(&seed.code, &seed.name))
                .with_context(|| format!("vertical '{}'", seed.code))?;
            report.verticals += 1;
        }

        for seed in &self.business_roles {
            let vertical_id = self.vertical_id(engine, &seed.vertical)?;
            if stores.roles.business_role_by_name(vertical_id, &seed.name)?.is_some() {
                continue;
            }
            let role = BusinessRole::new(vertical_id, &seed.name, seed.level)
                .with_permissions(seed.permissions.iter().cloned());
            engine
                .roles()
                .create_business_role(role)
                .with_context(|| format!("business role '{}/{}'", seed.vertical, seed.name))?;
            report.business_roles += 1;
        }

        for seed in &self.attributes {
            if stores.attributes.attribute_by_name(&seed.name)?.is_some() {
                continue;
            }
            let mut attribute = Attribute::new(&seed.name, seed.data_type)
                .with_context(|| format!("attribute '{}'", seed.name))?
                .with_allowed_values(seed.allowed_values.iter().cloned())
                .with_range(seed.min_value, seed.max_value);
            attribute.description = seed.description.clone();
            engine
                .attributes()
                .define_attribute(attribute)
                .with_context(|| format!("attribute '{}'", seed.name))?;
            report.attributes += 1;
        }

        let existing: Vec<String> = engine.policies().list()?.into_iter().map(|p| p.name).collect();
        for seed in &self.policies {
            if existing.contains(&seed.name) {
                continue;
            }
            let policy = self
                .policy(engine, seed)
                .with_context(|| format!("policy '{}'", seed.name))?;
            let created = engine.policies().create(actor, policy)?;
            if seed.activate {
                engine
                    .policies()
                    .activate(actor, created.id, Some("bootstrap".to_string()))
                    .with_context(|| format!("activating policy '{}'", seed.name))?;
            }
            report.policies += 1;
        }

        let workflows: Vec<String> = stores.governance.workflows()?.into_iter().map(|w| w.name).collect();
        for seed in &self.workflows {
            if workflows.contains(&seed.name) {
                continue;
            }
            let mut workflow = PolicyApprovalWorkflow::new(
                &seed.name,
                seed.request_types.iter().copied(),
                seed.approver_roles.iter().cloned(),
                seed.required_approvals,
                engine.now(),
            )
            .with_context(|| format!("workflow '{}'", seed.name))?
            .with_priority(seed.priority);
            if let Some(code) = &seed.vertical {
                workflow = workflow.in_vertical(self.vertical_id(engine, code)?);
            }
            if seed.critical_only {
                workflow = workflow.critical_only();
            }
            engine.policies().define_workflow(workflow)?;
            report.workflows += 1;
        }

        tracing::info!(
            permissions = report.permissions,
            roles = report.roles,
            verticals = report.verticals,
            business_roles = report.business_roles,
            attributes = report.attributes,
            policies = report.policies,
            workflows = report.workflows,
            "bootstrap applied"
        );
        Ok(report)
    }

    fn vertical_id(&self, engine: &VerdictEngine, code: &str) -> anyhow::Result<VerticalId> {
        engine
            .stores()
            .roles
            .vertical_by_code(code)?
            .map(|v| v.id)
            .ok_or_else(|| anyhow!("unknown vertical '{code}'"))
    }

    fn policy(&self, engine: &VerdictEngine, seed: &PolicySeed) -> anyhow::Result<Policy> {
        let mut policy = Policy::new(&seed.name, seed.effect, seed.priority, engine.now())
            .with_actions(seed.actions.iter().cloned())
            .with_resources(seed.resources.iter().cloned())
            .with_validity(seed.validity);
        if let Some(conditions) = &seed.conditions {
            policy = policy.with_conditions(ConditionNode::parse(conditions)?);
        }
        if let Some(description) = &seed.description {
            policy = policy.with_description(description);
        }
        if let Some(code) = &seed.vertical {
            policy = policy.in_vertical(self.vertical_id(engine, code)?);
        }
        if seed.critical {
            policy = policy.critical();
        }
        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use verdict_core::{CancellationToken, FixedClock};
    use verdict_policy::{EvaluationContext, PolicyRequest};

    use crate::access::AccessReason;
    use crate::config::EngineConfig;

    const PLAN: &str = r#"{
        "permissions": [{"name": "purchase:approve"}, {"name": "purchase:create"}],
        "roles": [{"name": "super_admin", "level": 0}],
        "verticals": [{"code": "retail", "name": "Retail"}],
        "business_roles": [
            {"vertical": "retail", "name": "manager", "level": 2, "permissions": ["purchase:*"]}
        ],
        "attributes": [
            {"name": "resource.amount", "data_type": "float"},
            {"name": "environment.hour", "data_type": "integer", "min_value": 0, "max_value": 23}
        ],
        "policies": [{
            "name": "after-hours large purchases",
            "effect": "DENY",
            "priority": 100,
            "actions": ["purchase:approve"],
            "resources": ["purchase"],
            "activate": true,
            "conditions": {
                "operator": "AND",
                "conditions": [
                    {"attribute": "resource.amount", "operator": ">", "value": 100000},
                    {"operator": "OR", "conditions": [
                        {"attribute": "environment.hour", "operator": "<", "value": 9},
                        {"attribute": "environment.hour", "operator": ">=", "value": 17}
                    ]}
                ]
            }
        }],
        "workflows": [{
            "name": "compliance",
            "request_types": ["update", "activate"],
            "approver_roles": ["super_admin"],
            "required_approvals": 1
        }]
    }"#;

    fn engine() -> VerdictEngine {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 4, 20, 0, 0).unwrap()));
        VerdictEngine::in_memory(EngineConfig::default(), clock)
    }

    #[test]
    fn plan_seeds_through_admin_services() {
        let engine = engine();
        let mut plan = BootstrapPlan::from_json(PLAN).unwrap();
        let root = UserId::new();
        plan.super_admin = Some(root);

        let report = plan.apply(&engine, root).unwrap();
        assert_eq!(report.roles, 1);
        assert_eq!(report.business_roles, 1);
        assert_eq!(report.policies, 1);
        assert_eq!(report.workflows, 1);

        let policies = engine.policies().list().unwrap();
        assert!(policies[0].is_active());

        let request = PolicyRequest::new(UserId::new(), "purchase:approve", "purchase");
        let ctx = EvaluationContext::new().with_resource("amount", 150_000);
        let decision = engine.access().evaluate(&request, ctx, &CancellationToken::new()).unwrap();
        assert_eq!(decision.reason, AccessReason::PolicyDeny);
    }

    #[test]
    fn reapplying_is_a_no_op() {
        let engine = engine();
        let plan = BootstrapPlan::from_json(PLAN).unwrap();
        let root = UserId::new();
        plan.apply(&engine, root).unwrap();
        let second = plan.apply(&engine, root).unwrap();
        assert_eq!(second.roles, 0);
        assert_eq!(second.policies, 0);
        assert_eq!(second.workflows, 0);
        assert_eq!(engine.policies().list().unwrap().len(), 1);
    }

    #[test]
    fn invalid_entries_fail_with_context() {
        let engine = engine();
        let plan = BootstrapPlan::from_json(
            r#"{"business_roles": [{"vertical": "nowhere", "name": "x", "level": 2}]}"#,
        )
        .unwrap();
        let err = plan.apply(&engine, UserId::new()).unwrap_err();
        assert!(err.to_string().contains("nowhere"));

        let bad_role = BootstrapPlan::from_json(r#"{"roles": [{"name": "intern", "level": 9}]}"#).unwrap();
        assert!(bad_role.apply(&engine, UserId::new()).is_err());
    }
}
