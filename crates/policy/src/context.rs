use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use verdict_core::{DomainError, DomainResult};

use crate::{AttrValue, AttributeCategory};

/// Attribute values of one category, keyed by the name after the prefix.
pub type AttributeMap = BTreeMap<String, AttrValue>;

/// Resolved attributes a condition tree is evaluated against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationContext {
    #[serde(default)]
    pub user: AttributeMap,
    #[serde(default)]
    pub resource: AttributeMap,
    #[serde(default)]
    pub environment: AttributeMap,
    #[serde(default)]
    pub action: AttributeMap,
}

impl EvaluationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(&self, category: AttributeCategory) -> &AttributeMap {
        match category {
            AttributeCategory::User => &self.user,
            AttributeCategory::Resource => &self.resource,
            AttributeCategory::Environment => &self.environment,
            AttributeCategory::Action => &self.action,
        }
    }

    pub fn map_mut(&mut self, category: AttributeCategory) -> &mut AttributeMap {
        match category {
            AttributeCategory::User => &mut self.user,
            AttributeCategory::Resource => &mut self.resource,
            AttributeCategory::Environment => &mut self.environment,
            AttributeCategory::Action => &mut self.action,
        }
    }

    /// Set a value by full dotted path (`resource.amount`).
    pub fn set(&mut self, path: &str, value: impl Into<AttrValue>) -> DomainResult<()> {
        let (category, key) = AttributeCategory::split_path(path)
            .ok_or_else(|| DomainError::validation(format!("unknown attribute path '{path}'")))?;
        self.map_mut(category).insert(key.to_string(), value.into());
        Ok(())
    }

    /// Set a value only if nothing is present at that path yet.
    pub fn set_if_absent(&mut self, category: AttributeCategory, key: &str, value: impl Into<AttrValue>) {
        self.map_mut(category)
            .entry(key.to_string())
            .or_insert_with(|| value.into());
    }

    pub fn with_user(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.user.insert(key.to_string(), value.into());
        self
    }

    pub fn with_resource(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.resource.insert(key.to_string(), value.into());
        self
    }

    pub fn with_environment(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.environment.insert(key.to_string(), value.into());
        self
    }

    pub fn with_action(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.action.insert(key.to_string(), value.into());
        self
    }

    /// Resolve a full dotted path.
    ///
    /// `resource.meta.owner` first tries the key `meta.owner`, then walks into
    /// a JSON value stored under `meta`.
    pub fn lookup(&self, path: &str) -> Option<AttrValue> {
        let (category, key) = AttributeCategory::split_path(path)?;
        let map = self.map(category);
        if let Some(value) = map.get(key) {
            return Some(value.clone());
        }

        let mut segments = key.split('.');
        let head = segments.next()?;
        let mut current = match map.get(head)? {
            AttrValue::Json(v) => v,
            _ => return None,
        };
        for segment in segments {
            current = match current {
                JsonValue::Object(fields) => fields.get(segment)?,
                JsonValue::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(AttrValue::from_json(current))
    }

    /// JSON snapshot for audit records.
    pub fn snapshot(&self) -> JsonValue {
        let section = |map: &AttributeMap| {
            JsonValue::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
        };
        serde_json::json!({
            "user": section(&self.user),
            "resource": section(&self.resource),
            "environment": section(&self.environment),
            "action": section(&self.action),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_and_lookup_by_path() {
        let mut ctx = EvaluationContext::new();
        ctx.set("resource.amount", 150_000i64).unwrap();
        assert_eq!(ctx.lookup("resource.amount"), Some(AttrValue::Integer(150_000)));
        assert_eq!(ctx.lookup("user.amount"), None);
        assert!(ctx.set("tenant.id", "x").is_err());
    }

    #[test]
    fn lookup_walks_into_json_values() {
        let ctx = EvaluationContext::new()
            .with_resource("meta", json!({"owner": {"id": "u1"}, "tags": ["a", "b"]}));
        assert_eq!(ctx.lookup("resource.meta.owner.id"), Some(AttrValue::from("u1")));
        assert_eq!(ctx.lookup("resource.meta.tags.1"), Some(AttrValue::from("b")));
        assert_eq!(ctx.lookup("resource.meta.missing"), None);
    }

    #[test]
    fn set_if_absent_keeps_existing() {
        let mut ctx = EvaluationContext::new().with_environment("hour", 20i64);
        ctx.set_if_absent(AttributeCategory::Environment, "hour", 9i64);
        ctx.set_if_absent(AttributeCategory::Environment, "day_of_week", "monday");
        assert_eq!(ctx.environment.get("hour"), Some(&AttrValue::Integer(20)));
        assert!(ctx.environment.contains_key("day_of_week"));
    }

    #[test]
    fn snapshot_groups_by_category() {
        let ctx = EvaluationContext::new().with_user("role", "manager");
        let snap = ctx.snapshot();
        assert_eq!(snap["user"]["role"], json!("manager"));
        assert_eq!(snap["resource"], json!({}));
    }
}
