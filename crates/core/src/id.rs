//! Strongly-typed identifiers used across the engine.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

macro_rules! uuid_newtype {
    ($(#[$meta:meta])* $t:ident, $name:literal) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(Uuid);

        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

uuid_newtype!(
    /// Identifier of a user (the principal of an authorization request).
    UserId,
    "UserId"
);
uuid_newtype!(
    /// Identifier of a global role.
    RoleId,
    "RoleId"
);
uuid_newtype!(PermissionId, "PermissionId");
uuid_newtype!(
    /// Identifier of a business vertical (line-of-business isolation boundary).
    VerticalId,
    "VerticalId"
);
uuid_newtype!(BusinessRoleId, "BusinessRoleId");
uuid_newtype!(
    /// Identifier of a user → business role binding.
    BindingId,
    "BindingId"
);
uuid_newtype!(AttributeId, "AttributeId");
uuid_newtype!(PolicyId, "PolicyId");
uuid_newtype!(PolicyVersionId, "PolicyVersionId");
uuid_newtype!(ApprovalRequestId, "ApprovalRequestId");
uuid_newtype!(ApprovalId, "ApprovalId");
uuid_newtype!(WorkflowId, "WorkflowId");
uuid_newtype!(
    /// Identifier of an append-only policy evaluation record.
    EvaluationId,
    "EvaluationId"
);
uuid_newtype!(ChangeLogId, "ChangeLogId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_display() {
        let id = PolicyId::new();
        let parsed: PolicyId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_error_names_the_type() {
        let err = "not-a-uuid".parse::<UserId>().unwrap_err();
        match err {
            DomainError::InvalidId(msg) => assert!(msg.starts_with("UserId")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
