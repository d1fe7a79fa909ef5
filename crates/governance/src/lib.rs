//! `verdict-governance`: versioned policies and multi-party approval.
//!
//! Changes to active or critical policies are snapshotted as a
//! [`PolicyVersion`] and, when a workflow matches, held in a
//! [`PolicyApprovalRequest`] until enough distinct approvers sign off.
//! Pure domain logic; the infra crate supplies storage and atomicity.

pub mod approval;
pub mod changelog;
pub mod version;
pub mod workflow;

pub use approval::{
    ApprovalCommand, ApprovalDecision, ApprovalEvent, ApprovalStatus, PolicyApproval,
    PolicyApprovalRequest, SubmitRequest, can_approve,
};
pub use changelog::{ChangeAction, PolicyChangeLog, diff_policies};
pub use version::PolicyVersion;
pub use workflow::{PolicyApprovalWorkflow, RequestType, select_workflow};
