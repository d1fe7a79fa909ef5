//! Domain error model.

use thiserror::Error;

/// Result type used across the engine.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Explainable denials are *not* errors: the decision engine always returns a
/// decision. `Forbidden` exists for callers that want to turn a DENY into an
/// error at their own boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A referenced role, policy, attribute, workflow or request is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed input (condition tree, operator, attribute value, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Duplicate vote, already-resolved request, duplicate name.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The caller's own identity could not be established.
    #[error("unauthorized")]
    Unauthorized,

    /// The decision for the caller's request is DENY.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The caller cancelled the operation before it completed.
    #[error("operation cancelled")]
    Cancelled,
}

impl DomainError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    /// Stable machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation_error",
            Self::InvariantViolation(_) => "invariant_violation",
            Self::InvalidId(_) => "invalid_id",
            Self::Conflict(_) => "conflict",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(DomainError::not_found("policy").code(), "not_found");
        assert_eq!(DomainError::validation("bad").code(), "validation_error");
        assert_eq!(DomainError::conflict("dup").code(), "conflict");
        assert_eq!(DomainError::Unauthorized.code(), "unauthorized");
        assert_eq!(DomainError::forbidden("deny").code(), "forbidden");
        assert_eq!(DomainError::Cancelled.code(), "cancelled");
    }

    #[test]
    fn display_includes_detail() {
        let err = DomainError::not_found("policy 42");
        assert_eq!(err.to_string(), "not found: policy 42");
    }
}
