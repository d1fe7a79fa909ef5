use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use verdict_core::{BindingId, BusinessRoleId, DomainError, DomainResult, RoleId, UserId, VerticalId};

use crate::Permission;

/// Privilege level of the distinguished super-admin role.
pub const SUPER_ADMIN_LEVEL: u8 = 0;

/// Least privileged level (principals with no roles).
pub const FLOOR_LEVEL: u8 = 5;

/// Global role used for RBAC.
///
/// Lower `level` means more privilege; level 0 is the unconstrained
/// super-admin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub level: u8,
    pub active: bool,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

impl Role {
    pub fn new(name: impl Into<String>, level: u8) -> Self {
        Self {
            id: RoleId::new(),
            name: name.into(),
            description: None,
            level,
            active: true,
            permissions: Vec::new(),
        }
    }

    pub fn with_permissions<I, P>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Permission>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self, floor_level: u8) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("role name cannot be empty"));
        }
        if self.level > floor_level {
            return Err(DomainError::validation(format!(
                "role level {} is below the floor level {floor_level}",
                self.level
            )));
        }
        for permission in &self.permissions {
            permission.validate()?;
        }
        Ok(())
    }
}

/// Isolation boundary (line of business).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessVertical {
    pub id: VerticalId,
    pub code: String,
    pub name: String,
    pub active: bool,
}

impl BusinessVertical {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: VerticalId::new(),
            code: code.into(),
            name: name.into(),
            active: true,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.code.trim().is_empty() {
            return Err(DomainError::validation("vertical code cannot be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("vertical name cannot be empty"));
        }
        Ok(())
    }
}

/// Role owned by exactly one business vertical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessRole {
    pub id: BusinessRoleId,
    pub vertical_id: VerticalId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub level: u8,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

impl BusinessRole {
    pub fn new(vertical_id: VerticalId, name: impl Into<String>, level: u8) -> Self {
        Self {
            id: BusinessRoleId::new(),
            vertical_id,
            name: name.into(),
            description: None,
            level,
            permissions: Vec::new(),
        }
    }

    pub fn with_permissions<I, P>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Permission>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    /// Business roles live strictly between the super-admin and the floor:
    /// level 0 is reserved for the global super-admin role.
    pub fn validate(&self, floor_level: u8) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("business role name cannot be empty"));
        }
        if self.level == SUPER_ADMIN_LEVEL || self.level > floor_level {
            return Err(DomainError::validation(format!(
                "business role level must be within 1..={floor_level}, got {}",
                self.level
            )));
        }
        for permission in &self.permissions {
            permission.validate()?;
        }
        Ok(())
    }
}

/// A user's membership in a business role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBusinessRoleBinding {
    pub id: BindingId,
    pub user_id: UserId,
    pub business_role_id: BusinessRoleId,
    pub active: bool,
    pub assigned_at: DateTime<Utc>,
    #[serde(default)]
    pub assigned_by: Option<UserId>,
}

impl UserBusinessRoleBinding {
    pub fn new(user_id: UserId, business_role_id: BusinessRoleId, assigned_at: DateTime<Utc>) -> Self {
        Self {
            id: BindingId::new(),
            user_id,
            business_role_id,
            active: true,
            assigned_at,
            assigned_by: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_role_level_zero_is_reserved() {
        let role = BusinessRole::new(VerticalId::new(), "owner", 0);
        assert!(role.validate(FLOOR_LEVEL).is_err());
    }

    #[test]
    fn business_role_below_floor_rejected() {
        let role = BusinessRole::new(VerticalId::new(), "intern", FLOOR_LEVEL + 1);
        assert!(role.validate(FLOOR_LEVEL).is_err());
    }

    #[test]
    fn role_with_malformed_permission_rejected() {
        let role = Role::new("auditor", 2).with_permissions(["report::read"]);
        let err = role.validate(FLOOR_LEVEL).unwrap_err();
        assert!(err.to_string().contains("empty segment"));
    }

    #[test]
    fn valid_business_role_accepted() {
        let role = BusinessRole::new(VerticalId::new(), "buyer", 3)
            .with_permissions(["purchase:create", "purchase:read"]);
        assert!(role.validate(FLOOR_LEVEL).is_ok());
        assert_eq!(role.permissions.len(), 2);
    }
}
