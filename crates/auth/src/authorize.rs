use serde::Serialize;
use thiserror::Error;

use verdict_core::UserId;

use crate::{Permission, PrincipalRoles, RbacAggregator};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// RBAC-only guard.
///
/// - No IO
/// - No panics
pub fn authorize(rbac: &RbacAggregator, principal: &PrincipalRoles, required: &Permission) -> Result<(), AuthzError> {
    if rbac.has_permission(principal, required.as_str()) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Detailed explanation of an RBAC decision.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub required_permission: String,
    pub granted: bool,
    /// Human-readable reason for the decision.
    pub reason: String,
    pub principal: PrincipalState,
    /// Held permissions that satisfied the requirement.
    pub granted_by: Vec<String>,
    pub denial_reason: Option<DenialReason>,
}

/// Current state of the principal being checked.
#[derive(Debug, Clone, Serialize)]
pub struct PrincipalState {
    pub user_id: UserId,
    pub roles: Vec<String>,
    pub privilege_level: u8,
    pub effective_permissions: Vec<String>,
    pub has_wildcard: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DenialReason {
    pub kind: DenialKind,
    pub message: String,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    NoActiveRoles,
    MissingPermission,
}

/// Explain why an RBAC check would be granted or denied.
pub fn explain_authorization(
    rbac: &RbacAggregator,
    principal: &PrincipalRoles,
    required: &Permission,
) -> AuthorizationExplanation {
    let required_str = required.as_str();
    let held = rbac.permissions_of(principal);
    let granting: Vec<String> = rbac
        .granting_permissions(&held, required_str)
        .into_iter()
        .map(|p| p.to_string())
        .collect();
    let has_wildcard = held.iter().any(Permission::is_wildcard);

    let state = PrincipalState {
        user_id: principal.user_id,
        roles: principal.role_names(),
        privilege_level: rbac.hierarchy.highest_privilege_level(principal),
        effective_permissions: held.iter().map(|p| p.to_string()).collect(),
        has_wildcard,
    };

    if !granting.is_empty() {
        let reason = if has_wildcard {
            "Principal holds the universal wildcard permission".to_string()
        } else {
            format!("Principal holds {:?} which satisfies '{}'", granting, required_str)
        };
        return AuthorizationExplanation {
            required_permission: required_str.to_string(),
            granted: true,
            reason,
            principal: state,
            granted_by: granting,
            denial_reason: None,
        };
    }

    let denial = if principal.has_any_role() {
        DenialReason {
            kind: DenialKind::MissingPermission,
            message: format!("Missing required permission: '{}'", required_str),
            suggestions: vec![
                format!("Assign a role that grants '{}'", required_str),
                match (required.resource(), required.action()) {
                    (Some(resource), Some(_)) => {
                        format!("A '{resource}:*' grant would also satisfy this requirement")
                    }
                    _ => "Legacy permissions only match exactly".to_string(),
                },
            ],
        }
    } else {
        DenialReason {
            kind: DenialKind::NoActiveRoles,
            message: "Principal holds no active global role or business role binding".to_string(),
            suggestions: vec!["Bind the principal to a role in the relevant business vertical".to_string()],
        }
    };

    AuthorizationExplanation {
        required_permission: required_str.to_string(),
        granted: false,
        reason: format!(
            "Principal does not hold '{}'. Current permissions: {:?}",
            required_str, state.effective_permissions
        ),
        principal: state,
        granted_by: Vec::new(),
        denial_reason: Some(denial),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;
    use verdict_core::UserId;

    #[test]
    fn authorize_maps_missing_permission_to_forbidden() {
        let p = PrincipalRoles::new(UserId::new())
            .with_global_role(Role::new("staff", 4).with_permissions(["report:read"]));
        let rbac = RbacAggregator::default();

        assert!(authorize(&rbac, &p, &Permission::new("report:read")).is_ok());
        assert_eq!(
            authorize(&rbac, &p, &Permission::new("report:delete")),
            Err(AuthzError::Forbidden("report:delete".to_string()))
        );
    }

    #[test]
    fn explanation_lists_granting_permissions() {
        let p = PrincipalRoles::new(UserId::new())
            .with_global_role(Role::new("staff", 4).with_permissions(["report:*"]));
        let explanation =
            explain_authorization(&RbacAggregator::default(), &p, &Permission::new("report:read"));

        assert!(explanation.granted);
        assert_eq!(explanation.granted_by, vec!["report:*".to_string()]);
        assert_eq!(explanation.principal.privilege_level, 1);
    }

    #[test]
    fn explanation_distinguishes_no_roles() {
        let p = PrincipalRoles::new(UserId::new());
        let explanation =
            explain_authorization(&RbacAggregator::default(), &p, &Permission::new("report:read"));

        assert!(!explanation.granted);
        let denial = explanation.denial_reason.unwrap();
        assert_eq!(denial.kind, DenialKind::NoActiveRoles);
    }
}
