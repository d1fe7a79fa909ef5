use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use verdict_core::{DomainError, DomainResult, PermissionId};

/// Single-token wildcard: grants everything.
pub const WILDCARD: &str = "*";

/// Three-segment wildcard: grants everything.
pub const UNIVERSAL_WILDCARD: &str = "*:*:*";

/// Permission identifier.
///
/// Permissions are strings of the form `resource:action` or
/// `resource:action:scope` (e.g. `"purchase:approve"`). Single-token legacy
/// names (e.g. `"manage_users"`) are accepted but only ever match exactly.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// Build a permission after checking it is well formed.
    pub fn parse(name: impl Into<Cow<'static, str>>) -> DomainResult<Self> {
        let permission = Self(name.into());
        permission.validate()?;
        Ok(permission)
    }

    /// The universal wildcard held by super-admins.
    pub fn wildcard() -> Self {
        Self(Cow::Borrowed(WILDCARD))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self.as_str(), WILDCARD | UNIVERSAL_WILDCARD)
    }

    /// The resource segment, if this is a segmented permission.
    pub fn resource(&self) -> Option<&str> {
        let mut parts = self.as_str().split(':');
        let resource = parts.next()?;
        parts.next().map(|_| resource)
    }

    /// The action segment, if this is a segmented permission.
    pub fn action(&self) -> Option<&str> {
        self.as_str().split(':').nth(1)
    }

    /// The optional third (scope) segment.
    pub fn scope(&self) -> Option<&str> {
        self.as_str().split(':').nth(2)
    }

    /// Whether holding `self` satisfies a requirement for `required`.
    pub fn grants(&self, required: &str) -> bool {
        matches(self.as_str(), required)
    }

    pub fn validate(&self) -> DomainResult<()> {
        let name = self.as_str();
        if name.trim().is_empty() {
            return Err(DomainError::validation("permission name cannot be empty"));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(DomainError::validation(format!(
                "permission '{name}' must not contain whitespace"
            )));
        }
        let segments: Vec<&str> = name.split(':').collect();
        if segments.len() > 3 {
            return Err(DomainError::validation(format!(
                "permission '{name}' has more than three segments"
            )));
        }
        if segments.iter().any(|s| s.is_empty()) {
            return Err(DomainError::validation(format!(
                "permission '{name}' has an empty segment"
            )));
        }
        Ok(())
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Permission {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Permission {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// How the optional third segment is treated by the matcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeMatching {
    /// The scope segment is not compared: `a:b:x` satisfies `a:b:y`.
    #[default]
    Ignore,
    /// When both sides carry a scope, it must match (or be `*` on the held side).
    Compare,
}

/// Does a held permission satisfy a required one?
///
/// 1. exact equality
/// 2. held is `*` or `*:*:*`
/// 3. fewer than two segments on either side: exact match only
/// 4. resource and action segments match when equal or held is `*`
///
/// The scope segment is ignored; see [`matches_with`] for the strict variant.
pub fn matches(held: &str, required: &str) -> bool {
    matches_with(held, required, ScopeMatching::Ignore)
}

pub fn matches_with(held: &str, required: &str, scope: ScopeMatching) -> bool {
    if held == required {
        return true;
    }
    if held == WILDCARD || held == UNIVERSAL_WILDCARD {
        return true;
    }

    let held_parts: Vec<&str> = held.split(':').collect();
    let required_parts: Vec<&str> = required.split(':').collect();
    if held_parts.len() < 2 || required_parts.len() < 2 {
        return false;
    }

    let segment = |h: &str, r: &str| h == r || h == WILDCARD;
    if !segment(held_parts[0], required_parts[0]) || !segment(held_parts[1], required_parts[1]) {
        return false;
    }

    match scope {
        ScopeMatching::Ignore => true,
        ScopeMatching::Compare => match (held_parts.get(2), required_parts.get(2)) {
            (Some(h), Some(r)) => segment(h, r),
            _ => true,
        },
    }
}

/// Permission catalogue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDefinition {
    pub id: PermissionId,
    pub name: Permission,
    pub resource: String,
    pub action: String,
    pub description: Option<String>,
}

impl PermissionDefinition {
    pub fn new(name: Permission) -> DomainResult<Self> {
        name.validate()?;
        let (resource, action) = match (name.resource(), name.action()) {
            (Some(r), Some(a)) => (r.to_string(), a.to_string()),
            _ => (name.as_str().to_string(), String::new()),
        };
        Ok(Self {
            id: PermissionId::new(),
            name,
            resource,
            action,
            description: None,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn resource_wildcard_matches_any_action() {
        assert!(matches("project:*", "project:create"));
        assert!(matches("project:*", "project:delete"));
        assert!(!matches("project:*", "invoice:create"));
    }

    #[test]
    fn action_wildcard_does_not_cross_resources() {
        assert!(!matches("*:read", "project:create"));
        assert!(matches("*:read", "project:read"));
    }

    #[test]
    fn universal_wildcards_match_everything() {
        assert!(matches("*:*:*", "project:create"));
        assert!(matches("*:*:*", "legacy_token"));
        assert!(matches("*", "purchase:approve:vertical"));
    }

    #[test]
    fn legacy_tokens_match_exactly_only() {
        assert!(matches("manage_users", "manage_users"));
        assert!(!matches("manage_users", "manage_users:read"));
        assert!(!matches("project:*", "project"));
    }

    #[test]
    fn scope_segment_ignored_by_default() {
        // Known looseness kept for compatibility with existing grants.
        assert!(matches("purchase:approve:retail", "purchase:approve:wholesale"));
        assert!(matches("purchase:approve:retail", "purchase:approve"));
        assert!(matches("purchase:approve", "purchase:approve:retail"));
    }

    #[test]
    fn scope_segment_compared_when_configured() {
        let strict = ScopeMatching::Compare;
        assert!(!matches_with(
            "purchase:approve:retail",
            "purchase:approve:wholesale",
            strict
        ));
        assert!(matches_with("purchase:approve:*", "purchase:approve:wholesale", strict));
        assert!(matches_with("purchase:approve", "purchase:approve:wholesale", strict));
        assert!(matches_with("purchase:approve:retail", "purchase:approve", strict));
    }

    #[test]
    fn validate_rejects_malformed_names() {
        assert!(Permission::parse("").is_err());
        assert!(Permission::parse("a::b").is_err());
        assert!(Permission::parse("a:b:c:d").is_err());
        assert!(Permission::parse("a b:c").is_err());
        assert!(Permission::parse("purchase:approve").is_ok());
        assert!(Permission::parse("manage_users").is_ok());
    }

    #[test]
    fn segments_are_exposed() {
        let p = Permission::new("purchase:approve:retail");
        assert_eq!(p.resource(), Some("purchase"));
        assert_eq!(p.action(), Some("approve"));
        assert_eq!(p.scope(), Some("retail"));

        let legacy = Permission::new("manage_users");
        assert_eq!(legacy.resource(), None);
        assert_eq!(legacy.action(), None);
    }

    #[test]
    fn definition_splits_resource_and_action() {
        let def = PermissionDefinition::new(Permission::new("purchase:approve")).unwrap();
        assert_eq!(def.resource, "purchase");
        assert_eq!(def.action, "approve");
    }

    fn segment() -> impl Strategy<Value = String> {
        "[a-z]{1,8}"
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        #[test]
        fn every_permission_matches_itself(r in segment(), a in segment()) {
            let name = format!("{r}:{a}");
            prop_assert!(matches(&name, &name));
        }

        #[test]
        fn universal_wildcard_matches_anything(r in segment(), a in segment(), s in segment()) {
            let required = format!("{r}:{a}:{s}");
            prop_assert!(matches(UNIVERSAL_WILDCARD, &required));
            prop_assert!(matches(WILDCARD, &required));
        }

        #[test]
        fn resource_wildcard_never_crosses_resources(
            r1 in segment(),
            r2 in segment(),
            a in segment(),
        ) {
            prop_assume!(r1 != r2);
            let held = format!("{r1}:*");
            let required = format!("{r2}:{a}");
            prop_assert!(!matches(&held, &required));
        }
    }
}
