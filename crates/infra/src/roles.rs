//! Role administration: the only write path for roles, verticals and
//! bindings, shared by bootstrap and runtime callers.

use std::sync::Arc;

use tracing::instrument;

use verdict_auth::{
    BusinessRole, BusinessVertical, HierarchyRules, Permission, PermissionDefinition, Role,
    UserBusinessRoleBinding,
};
use verdict_core::{BusinessRoleId, Clock, DomainError, DomainResult, RoleId, UserId};

use crate::config::EngineConfig;
use crate::store::RoleDirectory;

pub struct RoleAdministration {
    roles: Arc<dyn RoleDirectory>,
    clock: Arc<dyn Clock>,
    hierarchy: HierarchyRules,
}

impl RoleAdministration {
    pub fn new(roles: Arc<dyn RoleDirectory>, clock: Arc<dyn Clock>, config: &EngineConfig) -> Self {
        Self {
            roles,
            clock,
            hierarchy: config.hierarchy(),
        }
    }

    pub fn define_permission(&self, name: &str, description: Option<&str>) -> DomainResult<PermissionDefinition> {
        let mut definition = PermissionDefinition::new(Permission::parse(name.to_string())?)?;
        if let Some(description) = description {
            definition = definition.with_description(description);
        }
        self.roles.put_permission(definition.clone())?;
        Ok(definition)
    }

    pub fn create_role(&self, role: Role) -> DomainResult<Role> {
        role.validate(self.hierarchy.floor_level)?;
        if role.name == self.hierarchy.super_admin_role && role.level != 0 {
            return Err(DomainError::validation(format!(
                "'{}' is the super-admin role and must have level 0",
                role.name
            )));
        }
        self.roles.put_role(role.clone())?;
        tracing::info!(role = %role.name, level = role.level, "global role created");
        Ok(role)
    }

    pub fn create_vertical(&self, vertical: BusinessVertical) -> DomainResult<BusinessVertical> {
        vertical.validate()?;
        self.roles.put_vertical(vertical.clone())?;
        tracing::info!(vertical = %vertical.code, "business vertical created");
        Ok(vertical)
    }

    pub fn create_business_role(&self, role: BusinessRole) -> DomainResult<BusinessRole> {
        role.validate(self.hierarchy.floor_level)?;
        self.roles.put_business_role(role.clone())?;
        tracing::info!(role = %role.name, vertical = %role.vertical_id, level = role.level, "business role created");
        Ok(role)
    }

    /// Bind the first super-admin. Refused once anyone holds the role; later
    /// global assignments go through [`assign_global_role`](Self::assign_global_role).
    pub fn install_super_admin(&self, user_id: UserId) -> DomainResult<()> {
        let role = self
            .roles
            .role_by_name(&self.hierarchy.super_admin_role)?
            .ok_or_else(|| DomainError::not_found(format!("role '{}'", self.hierarchy.super_admin_role)))?;
        let holders = self.roles.global_role_holders(role.id)?;
        if holders.contains(&user_id) {
            return Ok(());
        }
        if !holders.is_empty() {
            return Err(DomainError::conflict("a super-admin is already installed"));
        }
        self.roles.set_global_role(user_id, role.id)?;
        tracing::info!(user = %user_id, "super-admin installed");
        Ok(())
    }

    /// Global roles are managed by super-admins only.
    #[instrument(skip(self), err)]
    pub fn assign_global_role(&self, actor: UserId, user_id: UserId, role_id: RoleId) -> DomainResult<()> {
        let principal = self.roles.principal_roles(actor)?;
        if !self.hierarchy.is_super_admin(&principal) {
            return Err(DomainError::forbidden("only a super-admin can assign global roles"));
        }
        let role = self
            .roles
            .role(role_id)?
            .ok_or_else(|| DomainError::not_found(format!("role {role_id}")))?;
        if !role.active {
            return Err(DomainError::validation(format!("role '{}' is inactive", role.name)));
        }
        self.roles.set_global_role(user_id, role_id)?;
        tracing::info!(role = %role.name, "global role assigned");
        Ok(())
    }

    /// Bind `user_id` to a business role if `actor` may hand out its level.
    /// Outside super-admins, the actor must hold a role in the same vertical.
    ///
    /// Assigning a role the user already holds returns the existing binding.
    #[instrument(skip(self), err)]
    pub fn assign_business_role(
        &self,
        actor: UserId,
        user_id: UserId,
        role_id: BusinessRoleId,
    ) -> DomainResult<UserBusinessRoleBinding> {
        let role = self.assignable(actor, role_id)?;
        let mut binding = UserBusinessRoleBinding::new(user_id, role_id, self.clock.now());
        binding.assigned_by = Some(actor);
        let stored = self.roles.insert_binding(binding)?;
        tracing::info!(role = %role.name, binding = %stored.id, "business role assigned");
        Ok(stored)
    }

    /// Returns whether an active binding was removed.
    #[instrument(skip(self), err)]
    pub fn revoke_business_role(&self, actor: UserId, user_id: UserId, role_id: BusinessRoleId) -> DomainResult<bool> {
        let role = self.assignable(actor, role_id)?;
        let removed = self.roles.deactivate_binding(user_id, role_id)?;
        if removed {
            tracing::info!(role = %role.name, "business role revoked");
        }
        Ok(removed)
    }

    fn assignable(&self, actor: UserId, role_id: BusinessRoleId) -> DomainResult<BusinessRole> {
        let role = self
            .roles
            .business_role(role_id)?
            .ok_or_else(|| DomainError::not_found(format!("business role {role_id}")))?;
        let principal = self.roles.principal_roles(actor)?;
        if !self.hierarchy.is_super_admin(&principal) && principal.business_roles_in(role.vertical_id).next().is_none() {
            return Err(DomainError::forbidden(format!(
                "roles in vertical {} are assignable only by its members or a super-admin",
                role.vertical_id
            )));
        }
        if !self.hierarchy.can_assign(&principal, role.level) {
            return Err(DomainError::forbidden(format!(
                "level {} is not assignable by a principal at level {}",
                role.level,
                self.hierarchy.highest_privilege_level(&principal)
            )));
        }
        Ok(role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use verdict_auth::RbacAggregator;
    use verdict_core::FixedClock;

    use crate::store::InMemoryRoleDirectory;

    struct Fixture {
        admin: RoleAdministration,
        dir: Arc<InMemoryRoleDirectory>,
        root: UserId,
        vertical: BusinessVertical,
    }

    fn fixture() -> Fixture {
        let dir = InMemoryRoleDirectory::arc();
        let admin = RoleAdministration::new(
            dir.clone(),
            Arc::new(FixedClock::new(Utc::now())),
            &EngineConfig::default(),
        );
        admin.create_role(Role::new("super_admin", 0)).unwrap();
        let root = UserId::new();
        admin.install_super_admin(root).unwrap();
        let vertical = admin.create_vertical(BusinessVertical::new("retail", "Retail")).unwrap();
        Fixture {
            admin,
            dir,
            root,
            vertical,
        }
    }

    #[test]
    fn super_admin_installs_once() {
        let f = fixture();
        f.admin.install_super_admin(f.root).unwrap();
        let err = f.admin.install_super_admin(UserId::new()).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn super_admin_role_must_be_level_zero() {
        let dir = InMemoryRoleDirectory::arc();
        let admin = RoleAdministration::new(dir, Arc::new(FixedClock::new(Utc::now())), &EngineConfig::default());
        assert!(admin.create_role(Role::new("super_admin", 1)).is_err());
    }

    #[test]
    fn assignment_respects_hierarchy() {
        let f = fixture();
        let manager = f
            .admin
            .create_business_role(BusinessRole::new(f.vertical.id, "manager", 2).with_permissions(["order:*"]))
            .unwrap();
        let clerk = f
            .admin
            .create_business_role(BusinessRole::new(f.vertical.id, "clerk", 4))
            .unwrap();

        let alice = UserId::new();
        f.admin.assign_business_role(f.root, alice, manager.id).unwrap();

        // alice is level 2: may assign levels above 3 only.
        let bob = UserId::new();
        f.admin.assign_business_role(alice, bob, clerk.id).unwrap();
        let err = f.admin.assign_business_role(alice, bob, manager.id).unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
    }

    #[test]
    fn assignment_stays_inside_the_actors_vertical() {
        let f = fixture();
        let wholesale = f.admin.create_vertical(BusinessVertical::new("wholesale", "Wholesale")).unwrap();
        let manager = f
            .admin
            .create_business_role(BusinessRole::new(f.vertical.id, "manager", 2))
            .unwrap();
        let foreign_clerk = f
            .admin
            .create_business_role(BusinessRole::new(wholesale.id, "clerk", 4))
            .unwrap();

        let alice = UserId::new();
        f.admin.assign_business_role(f.root, alice, manager.id).unwrap();

        let bob = UserId::new();
        let err = f.admin.assign_business_role(alice, bob, foreign_clerk.id).unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
        let err = f.admin.revoke_business_role(alice, bob, foreign_clerk.id).unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
        assert!(f.dir.principal_roles(bob).unwrap().business_roles.is_empty());

        f.admin.assign_business_role(f.root, bob, foreign_clerk.id).unwrap();
    }

    #[test]
    fn reassignment_is_idempotent() {
        let f = fixture();
        let role = f
            .admin
            .create_business_role(BusinessRole::new(f.vertical.id, "buyer", 3).with_permissions(["purchase:create"]))
            .unwrap();
        let user = UserId::new();
        let first = f.admin.assign_business_role(f.root, user, role.id).unwrap();
        let second = f.admin.assign_business_role(f.root, user, role.id).unwrap();
        assert_eq!(first.id, second.id);

        let principal = f.dir.principal_roles(user).unwrap();
        assert_eq!(principal.business_roles.len(), 1);
        assert_eq!(RbacAggregator::default().permissions_of(&principal).len(), 1);
    }

    #[test]
    fn revoke_removes_permissions() {
        let f = fixture();
        let role = f
            .admin
            .create_business_role(BusinessRole::new(f.vertical.id, "buyer", 3).with_permissions(["purchase:create"]))
            .unwrap();
        let user = UserId::new();
        f.admin.assign_business_role(f.root, user, role.id).unwrap();
        assert!(f.admin.revoke_business_role(f.root, user, role.id).unwrap());
        assert!(!f.admin.revoke_business_role(f.root, user, role.id).unwrap());
        assert!(f.dir.principal_roles(user).unwrap().business_roles.is_empty());
    }

    #[test]
    fn global_roles_need_super_admin() {
        let f = fixture();
        let auditor = f.admin.create_role(Role::new("auditor", 1).with_permissions(["report:read"])).unwrap();
        let user = UserId::new();
        let err = f.admin.assign_global_role(user, user, auditor.id).unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
        f.admin.assign_global_role(f.root, user, auditor.id).unwrap();
        assert_eq!(f.dir.global_role_of(user).unwrap().map(|r| r.name), Some("auditor".to_string()));
    }

    #[test]
    fn malformed_permission_rejected() {
        let f = fixture();
        assert!(f.admin.define_permission("order::read", None).is_err());
        let def = f.admin.define_permission("order:read", Some("read orders")).unwrap();
        assert_eq!(def.resource, "order");
        assert_eq!(def.action, "read");
    }
}
