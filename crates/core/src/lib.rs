//! `verdict-core`: shared building blocks for the authorization engine.
//!
//! This crate contains **pure** primitives (no infrastructure concerns):
//! identifiers, the error taxonomy, time sources and cancellation.

pub mod aggregate;
pub mod cancel;
pub mod clock;
pub mod error;
pub mod id;
pub mod window;

pub use aggregate::{Aggregate, AggregateRoot};
pub use cancel::CancellationToken;
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{
    ApprovalId, ApprovalRequestId, AttributeId, BindingId, BusinessRoleId, ChangeLogId,
    EvaluationId, PermissionId, PolicyId, PolicyVersionId, RoleId, UserId, VerticalId, WorkflowId,
};
pub use window::ValidityWindow;
