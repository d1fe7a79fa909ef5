//! Engine configuration.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use verdict_auth::{FLOOR_LEVEL, HierarchyRules, RbacAggregator, ScopeMatching};
use verdict_policy::MAX_CONDITION_DEPTH;

pub const ENV_SUPER_ADMIN_ROLE: &str = "VERDICT_SUPER_ADMIN_ROLE";
pub const ENV_FLOOR_LEVEL: &str = "VERDICT_FLOOR_LEVEL";
pub const ENV_SCOPE_MATCHING: &str = "VERDICT_SCOPE_MATCHING";
pub const ENV_RECORD_EVALUATIONS: &str = "VERDICT_RECORD_EVALUATIONS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub super_admin_role: String,
    pub floor_level: u8,
    pub scope_matching: ScopeMatching,
    /// Write a `PolicyEvaluation` for every access decision.
    pub record_evaluations: bool,
    pub max_condition_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            super_admin_role: "super_admin".to_string(),
            floor_level: FLOOR_LEVEL,
            scope_matching: ScopeMatching::Ignore,
            record_evaluations: true,
            max_condition_depth: MAX_CONDITION_DEPTH,
        }
    }
}

impl EngineConfig {
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(raw).context("invalid engine configuration")?;
        config.check()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration from {}", path.display()))?;
        Self::from_json(&raw)
    }

    /// Defaults overridden by `VERDICT_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`. Invalid values are logged and ignored.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(role) = lookup(ENV_SUPER_ADMIN_ROLE) {
            if role.trim().is_empty() {
                tracing::warn!("{ENV_SUPER_ADMIN_ROLE} is empty; keeping '{}'", self.super_admin_role);
            } else {
                self.super_admin_role = role;
            }
        }

        if let Some(raw) = lookup(ENV_FLOOR_LEVEL) {
            match raw.parse::<u8>() {
                Ok(level) if level >= 1 => self.floor_level = level,
                _ => tracing::warn!("{ENV_FLOOR_LEVEL}='{raw}' is not a level >= 1; keeping {}", self.floor_level),
            }
        }

        if let Some(raw) = lookup(ENV_SCOPE_MATCHING) {
            match raw.to_ascii_lowercase().as_str() {
                "ignore" => self.scope_matching = ScopeMatching::Ignore,
                "compare" => self.scope_matching = ScopeMatching::Compare,
                _ => tracing::warn!("{ENV_SCOPE_MATCHING}='{raw}' is not 'ignore' or 'compare'; keeping default"),
            }
        }

        if let Some(raw) = lookup(ENV_RECORD_EVALUATIONS) {
            match raw.parse::<bool>() {
                Ok(flag) => self.record_evaluations = flag,
                Err(_) => tracing::warn!("{ENV_RECORD_EVALUATIONS}='{raw}' is not a boolean; keeping default"),
            }
        }

        self
    }

    pub fn hierarchy(&self) -> HierarchyRules {
        HierarchyRules {
            super_admin_role: self.super_admin_role.clone(),
            floor_level: self.floor_level,
        }
    }

    pub fn rbac(&self) -> RbacAggregator {
        RbacAggregator::new(self.hierarchy(), self.scope_matching)
    }

    fn check(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.super_admin_role.trim().is_empty(), "super_admin_role cannot be empty");
        anyhow::ensure!(self.floor_level >= 1, "floor_level must be at least 1");
        anyhow::ensure!(self.max_condition_depth >= 1, "max_condition_depth must be at least 1");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_preserve_scope_looseness() {
        let config = EngineConfig::default();
        assert_eq!(config.scope_matching, ScopeMatching::Ignore);
        assert_eq!(config.floor_level, 5);
        assert!(config.record_evaluations);
        assert_eq!(config.rbac().hierarchy.super_admin_role, "super_admin");
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = EngineConfig::from_json(r#"{"scope_matching":"compare","floor_level":7}"#).unwrap();
        assert_eq!(config.scope_matching, ScopeMatching::Compare);
        assert_eq!(config.floor_level, 7);
        assert_eq!(config.super_admin_role, "super_admin");
    }

    #[test]
    fn json_rejects_invalid_values() {
        assert!(EngineConfig::from_json(r#"{"floor_level":0}"#).is_err());
        assert!(EngineConfig::from_json(r#"{"super_admin_role":" "}"#).is_err());
        assert!(EngineConfig::from_json("not json").is_err());
    }

    #[test]
    fn overrides_apply_valid_values_only() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_SUPER_ADMIN_ROLE, "root"),
            (ENV_FLOOR_LEVEL, "banana"),
            (ENV_SCOPE_MATCHING, "COMPARE"),
            (ENV_RECORD_EVALUATIONS, "false"),
        ]);
        let config = EngineConfig::default().with_overrides(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.super_admin_role, "root");
        assert_eq!(config.floor_level, 5);
        assert_eq!(config.scope_matching, ScopeMatching::Compare);
        assert!(!config.record_evaluations);
    }
}
