//! Permission aggregation over a principal's resolved roles.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use verdict_core::VerticalId;

use crate::{HierarchyRules, Permission, PrincipalRoles, ScopeMatching, matches_with};

/// Deduplicated, ordered set of permissions.
pub type PermissionSet = BTreeSet<Permission>;

/// Unions role permissions and answers "does this principal hold X?".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RbacAggregator {
    pub hierarchy: HierarchyRules,
    #[serde(default)]
    pub scope_matching: ScopeMatching,
}

impl RbacAggregator {
    pub fn new(hierarchy: HierarchyRules, scope_matching: ScopeMatching) -> Self {
        Self {
            hierarchy,
            scope_matching,
        }
    }

    /// Every permission the principal holds.
    ///
    /// Super-admins short-circuit to the universal wildcard.
    pub fn permissions_of(&self, principal: &PrincipalRoles) -> PermissionSet {
        if self.hierarchy.is_super_admin(principal) {
            return PermissionSet::from([Permission::wildcard()]);
        }

        let mut set = PermissionSet::new();
        if let Some(role) = principal.active_global_role() {
            set.extend(role.permissions.iter().cloned());
        }
        for role in principal.active_business_roles() {
            set.extend(role.permissions.iter().cloned());
        }
        set
    }

    /// Permissions contributed by bindings in one vertical only.
    pub fn permissions_in_vertical(&self, principal: &PrincipalRoles, vertical_id: VerticalId) -> PermissionSet {
        if self.hierarchy.is_super_admin(principal) {
            return PermissionSet::from([Permission::wildcard()]);
        }
        principal
            .business_roles_in(vertical_id)
            .flat_map(|r| r.permissions.iter().cloned())
            .collect()
    }

    pub fn has_permission(&self, principal: &PrincipalRoles, required: &str) -> bool {
        self.any_matches(&self.permissions_of(principal), required)
    }

    pub fn has_permission_in_vertical(
        &self,
        principal: &PrincipalRoles,
        required: &str,
        vertical_id: VerticalId,
    ) -> bool {
        self.any_matches(&self.permissions_in_vertical(principal, vertical_id), required)
    }

    /// Permissions usable for one request: the global role, plus business
    /// roles from `vertical_id` only when the request is scoped to one.
    pub fn effective_permissions(&self, principal: &PrincipalRoles, vertical_id: Option<VerticalId>) -> PermissionSet {
        let Some(vertical_id) = vertical_id else {
            return self.permissions_of(principal);
        };
        let mut set = self.permissions_in_vertical(principal, vertical_id);
        if let Some(role) = principal.active_global_role() {
            set.extend(role.permissions.iter().cloned());
        }
        set
    }

    pub fn grants_request(&self, principal: &PrincipalRoles, required: &str, vertical_id: Option<VerticalId>) -> bool {
        self.any_matches(&self.effective_permissions(principal, vertical_id), required)
    }

    /// The held permissions that satisfy `required`.
    pub fn granting_permissions<'a>(&self, held: &'a PermissionSet, required: &str) -> Vec<&'a Permission> {
        held.iter()
            .filter(|p| matches_with(p.as_str(), required, self.scope_matching))
            .collect()
    }

    fn any_matches(&self, held: &PermissionSet, required: &str) -> bool {
        held.iter()
            .any(|p| matches_with(p.as_str(), required, self.scope_matching))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BusinessRole, Role, UserBusinessRoleBinding};
    use chrono::Utc;
    use verdict_core::UserId;

    fn aggregator() -> RbacAggregator {
        RbacAggregator::default()
    }

    #[test]
    fn super_admin_gets_wildcard_only() {
        let p = PrincipalRoles::new(UserId::new())
            .with_global_role(Role::new("super_admin", 0).with_permissions(["report:read"]));
        let perms = aggregator().permissions_of(&p);
        assert_eq!(perms.len(), 1);
        assert!(perms.iter().all(Permission::is_wildcard));
        assert!(aggregator().has_permission(&p, "anything:at_all"));
    }

    #[test]
    fn union_of_global_and_business_roles() {
        let user = UserId::new();
        let vertical = VerticalId::new();
        let buyer = BusinessRole::new(vertical, "buyer", 3)
            .with_permissions(["purchase:create", "report:read"]);
        let p = PrincipalRoles::new(user)
            .with_global_role(Role::new("staff", 4).with_permissions(["report:read", "profile:update"]))
            .with_business_role(UserBusinessRoleBinding::new(user, buyer.id, Utc::now()), buyer);

        let perms: Vec<String> = aggregator()
            .permissions_of(&p)
            .iter()
            .map(|p| p.to_string())
            .collect();
        assert_eq!(perms, vec!["profile:update", "purchase:create", "report:read"]);
    }

    #[test]
    fn same_binding_twice_does_not_duplicate() {
        let user = UserId::new();
        let role = BusinessRole::new(VerticalId::new(), "buyer", 3).with_permissions(["purchase:create"]);
        let p = PrincipalRoles::new(user)
            .with_business_role(UserBusinessRoleBinding::new(user, role.id, Utc::now()), role.clone())
            .with_business_role(UserBusinessRoleBinding::new(user, role.id, Utc::now()), role);

        assert_eq!(aggregator().permissions_of(&p).len(), 1);
    }

    #[test]
    fn vertical_restriction_excludes_other_verticals() {
        let user = UserId::new();
        let retail = VerticalId::new();
        let wholesale = VerticalId::new();
        let retail_buyer = BusinessRole::new(retail, "buyer", 3).with_permissions(["purchase:*"]);
        let p = PrincipalRoles::new(user).with_business_role(
            UserBusinessRoleBinding::new(user, retail_buyer.id, Utc::now()),
            retail_buyer,
        );

        let rbac = aggregator();
        assert!(rbac.has_permission(&p, "purchase:approve"));
        assert!(rbac.has_permission_in_vertical(&p, "purchase:approve", retail));
        assert!(!rbac.has_permission_in_vertical(&p, "purchase:approve", wholesale));
    }

    #[test]
    fn scoped_request_keeps_global_role_but_not_foreign_verticals() {
        let user = UserId::new();
        let retail = VerticalId::new();
        let wholesale = VerticalId::new();
        let retail_buyer = BusinessRole::new(retail, "buyer", 3).with_permissions(["purchase:create"]);
        let p = PrincipalRoles::new(user)
            .with_global_role(Role::new("staff", 4).with_permissions(["report:read"]))
            .with_business_role(UserBusinessRoleBinding::new(user, retail_buyer.id, Utc::now()), retail_buyer);

        let rbac = aggregator();
        assert!(rbac.grants_request(&p, "purchase:create", None));
        assert!(rbac.grants_request(&p, "purchase:create", Some(retail)));
        assert!(!rbac.grants_request(&p, "purchase:create", Some(wholesale)));
        assert!(rbac.grants_request(&p, "report:read", Some(wholesale)));
    }

    #[test]
    fn no_roles_no_permissions() {
        let p = PrincipalRoles::new(UserId::new());
        assert!(aggregator().permissions_of(&p).is_empty());
        assert!(!aggregator().has_permission(&p, "report:read"));
    }

    #[test]
    fn granting_permissions_lists_matches() {
        let held = PermissionSet::from([
            Permission::new("purchase:*"),
            Permission::new("purchase:approve"),
            Permission::new("report:read"),
        ]);
        let granting = aggregator().granting_permissions(&held, "purchase:approve");
        assert_eq!(granting.len(), 2);
    }
}
