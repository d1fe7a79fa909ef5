use serde::{Deserialize, Serialize};

use verdict_core::{UserId, VerticalId};

use crate::{BusinessRole, Role, UserBusinessRoleBinding};

/// A binding joined with the business role it refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveBusinessRole {
    pub binding: UserBusinessRoleBinding,
    pub role: BusinessRole,
}

/// Fully resolved role memberships of one principal.
///
/// Construction is decoupled from storage: infra resolves a user's global
/// role and bindings and hands the snapshot to the pure RBAC functions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalRoles {
    pub user_id: UserId,
    pub global_role: Option<Role>,
    pub business_roles: Vec<ActiveBusinessRole>,
}

impl PrincipalRoles {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            global_role: None,
            business_roles: Vec::new(),
        }
    }

    pub fn with_global_role(mut self, role: Role) -> Self {
        self.global_role = Some(role);
        self
    }

    pub fn with_business_role(mut self, binding: UserBusinessRoleBinding, role: BusinessRole) -> Self {
        self.business_roles.push(ActiveBusinessRole { binding, role });
        self
    }

    /// The global role, if bound and active.
    pub fn active_global_role(&self) -> Option<&Role> {
        self.global_role.as_ref().filter(|r| r.active)
    }

    /// Business roles reachable through active bindings.
    ///
    /// A role bound twice is yielded once.
    pub fn active_business_roles(&self) -> impl Iterator<Item = &BusinessRole> + '_ {
        let mut seen = Vec::new();
        self.business_roles
            .iter()
            .filter(|b| b.binding.active && b.binding.user_id == self.user_id)
            .filter(move |b| {
                if seen.contains(&b.role.id) {
                    false
                } else {
                    seen.push(b.role.id);
                    true
                }
            })
            .map(|b| &b.role)
    }

    pub fn business_roles_in(&self, vertical_id: VerticalId) -> impl Iterator<Item = &BusinessRole> + '_ {
        self.active_business_roles()
            .filter(move |r| r.vertical_id == vertical_id)
    }

    /// Names of every active role held (global first).
    pub fn role_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .active_global_role()
            .map(|r| r.name.clone())
            .into_iter()
            .collect();
        for role in self.active_business_roles() {
            if !names.contains(&role.name) {
                names.push(role.name.clone());
            }
        }
        names
    }

    pub fn has_any_role(&self) -> bool {
        self.active_global_role().is_some() || self.active_business_roles().next().is_some()
    }
}
