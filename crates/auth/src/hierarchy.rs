//! Privilege-level resolution across global and business-vertical roles.
//!
//! Levels grow *downwards* in privilege: 0 is the super-admin, the floor
//! (default 5) is a principal with no roles at all.

use serde::{Deserialize, Serialize};

use crate::{FLOOR_LEVEL, PrincipalRoles, SUPER_ADMIN_LEVEL};

/// Level granted by any global role other than the super-admin.
pub const GLOBAL_ROLE_LEVEL: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyRules {
    /// Name of the distinguished global role that is treated as level 0.
    pub super_admin_role: String,
    pub floor_level: u8,
}

impl Default for HierarchyRules {
    fn default() -> Self {
        Self {
            super_admin_role: "super_admin".to_string(),
            floor_level: FLOOR_LEVEL,
        }
    }
}

impl HierarchyRules {
    pub fn is_super_admin(&self, principal: &PrincipalRoles) -> bool {
        principal
            .active_global_role()
            .is_some_and(|r| r.name == self.super_admin_role)
    }

    /// Most privileged (numerically lowest) level the principal holds.
    pub fn highest_privilege_level(&self, principal: &PrincipalRoles) -> u8 {
        if self.is_super_admin(principal) {
            return SUPER_ADMIN_LEVEL;
        }
        if principal.active_global_role().is_some() {
            return GLOBAL_ROLE_LEVEL;
        }
        principal
            .active_business_roles()
            .map(|r| r.level)
            .min()
            .unwrap_or(self.floor_level)
    }

    pub fn max_assignable_level(&self, principal: &PrincipalRoles) -> u8 {
        self.highest_privilege_level(principal).saturating_add(1)
    }

    /// A principal may only hand out levels strictly weaker than
    /// [`max_assignable_level`](Self::max_assignable_level).
    pub fn can_assign(&self, principal: &PrincipalRoles, target_level: u8) -> bool {
        target_level > self.max_assignable_level(principal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BusinessRole, Role, UserBusinessRoleBinding};
    use chrono::Utc;
    use proptest::prelude::*;
    use verdict_core::{UserId, VerticalId};

    fn with_business_levels(levels: &[u8]) -> PrincipalRoles {
        let user = UserId::new();
        let mut principal = PrincipalRoles::new(user);
        for level in levels {
            let role = BusinessRole::new(VerticalId::new(), format!("role-{level}"), *level);
            let binding = UserBusinessRoleBinding::new(user, role.id, Utc::now());
            principal = principal.with_business_role(binding, role);
        }
        principal
    }

    #[test]
    fn super_admin_is_level_zero() {
        let rules = HierarchyRules::default();
        let p = PrincipalRoles::new(UserId::new()).with_global_role(Role::new("super_admin", 0));
        assert_eq!(rules.highest_privilege_level(&p), 0);
        assert_eq!(rules.max_assignable_level(&p), 1);
        assert!(rules.can_assign(&p, 2));
        assert!(!rules.can_assign(&p, 1));
    }

    #[test]
    fn any_other_global_role_is_level_one() {
        let rules = HierarchyRules::default();
        let p = with_business_levels(&[3]).with_global_role(Role::new("admin", 4));
        assert_eq!(rules.highest_privilege_level(&p), 1);
    }

    #[test]
    fn business_roles_take_minimum_level() {
        let rules = HierarchyRules::default();
        let p = with_business_levels(&[4, 2, 3]);
        assert_eq!(rules.highest_privilege_level(&p), 2);
        assert!(rules.can_assign(&p, 4));
        assert!(!rules.can_assign(&p, 3));
    }

    #[test]
    fn no_roles_is_floor() {
        let rules = HierarchyRules::default();
        let p = PrincipalRoles::new(UserId::new());
        assert_eq!(rules.highest_privilege_level(&p), FLOOR_LEVEL);
        assert!(!rules.can_assign(&p, FLOOR_LEVEL));
    }

    #[test]
    fn custom_super_admin_name() {
        let rules = HierarchyRules {
            super_admin_role: "root".to_string(),
            floor_level: 7,
        };
        let root = PrincipalRoles::new(UserId::new()).with_global_role(Role::new("root", 0));
        let nobody = PrincipalRoles::new(UserId::new());
        assert_eq!(rules.highest_privilege_level(&root), 0);
        assert_eq!(rules.highest_privilege_level(&nobody), 7);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Boundary law: the max assignable level itself is refused, the next
        /// one down is allowed.
        #[test]
        fn assignment_boundary_law(
            levels in prop::collection::vec(1u8..=5u8, 0..4),
            global in prop::option::of(prop::sample::select(vec!["super_admin", "admin"])),
        ) {
            let rules = HierarchyRules::default();
            let mut p = with_business_levels(&levels);
            if let Some(name) = global {
                p = p.with_global_role(Role::new(name, 0));
            }
            let max = rules.max_assignable_level(&p);
            prop_assert!(!rules.can_assign(&p, max));
            prop_assert!(rules.can_assign(&p, max + 1));
        }
    }
}
