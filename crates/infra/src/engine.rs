//! Wiring: one set of stores shared by the access service and the
//! administration services.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use verdict_core::{Clock, SystemClock};

use crate::access::AccessService;
use crate::attributes::AttributeAdministration;
use crate::config::EngineConfig;
use crate::policy_admin::PolicyAdministration;
use crate::roles::RoleAdministration;
use crate::store::{
    AttributeStore, EvaluationLog, GovernanceStore, InMemoryAttributeStore, InMemoryEvaluationLog,
    InMemoryGovernanceStore, InMemoryPolicyStore, InMemoryRoleDirectory, PolicyStore, RoleDirectory,
};

#[derive(Clone)]
pub struct Stores {
    pub roles: Arc<dyn RoleDirectory>,
    pub attributes: Arc<dyn AttributeStore>,
    pub policies: Arc<dyn PolicyStore>,
    pub evaluations: Arc<dyn EvaluationLog>,
    pub governance: Arc<dyn GovernanceStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            roles: InMemoryRoleDirectory::arc(),
            attributes: InMemoryAttributeStore::arc(),
            policies: InMemoryPolicyStore::arc(),
            evaluations: InMemoryEvaluationLog::arc(),
            governance: InMemoryGovernanceStore::arc(),
        }
    }
}

pub struct VerdictEngine {
    config: EngineConfig,
    stores: Stores,
    access: AccessService,
    roles: RoleAdministration,
    attributes: AttributeAdministration,
    policies: PolicyAdministration,
    clock: Arc<dyn Clock>,
}

impl VerdictEngine {
    pub fn new(config: EngineConfig, stores: Stores, clock: Arc<dyn Clock>) -> Self {
        let access = AccessService::new(
            stores.roles.clone(),
            stores.attributes.clone(),
            stores.policies.clone(),
            stores.evaluations.clone(),
            clock.clone(),
            &config,
        );
        let roles = RoleAdministration::new(stores.roles.clone(), clock.clone(), &config);
        let attributes = AttributeAdministration::new(stores.attributes.clone());
        let policies = PolicyAdministration::new(
            stores.policies.clone(),
            stores.attributes.clone(),
            stores.governance.clone(),
            stores.roles.clone(),
            clock.clone(),
            &config,
        );
        tracing::debug!(
            super_admin_role = %config.super_admin_role,
            floor_level = config.floor_level,
            scope_matching = ?config.scope_matching,
            record_evaluations = config.record_evaluations,
            "engine assembled"
        );
        Self {
            config,
            stores,
            access,
            roles,
            attributes,
            policies,
            clock,
        }
    }

    pub fn in_memory(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(config, Stores::in_memory(), clock)
    }

    /// In-memory engine configured from `VERDICT_*` variables on the wall clock.
    pub fn from_env() -> Self {
        Self::in_memory(EngineConfig::from_env(), Arc::new(SystemClock))
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn access(&self) -> &AccessService {
        &self.access
    }

    pub fn roles(&self) -> &RoleAdministration {
        &self.roles
    }

    pub fn attributes(&self) -> &AttributeAdministration {
        &self.attributes
    }

    pub fn policies(&self) -> &PolicyAdministration {
        &self.policies
    }

    pub fn evaluations(&self) -> &dyn EvaluationLog {
        self.stores.evaluations.as_ref()
    }
}
