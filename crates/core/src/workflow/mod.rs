//! Approval workflow: approver resolution, workflow construction, step
//! progression and the final-approval decision.

pub mod builder;
pub mod evaluator;
pub mod progression;
pub mod resolver;

use thiserror::Error;

use crate::domain::expense::{ExpenseId, ExpenseStatus};
use crate::domain::flow::{ApprovalFlowId, ApproverType, FlowStatus};
use crate::domain::user::UserId;

pub use builder::{SkippedStep, WorkflowBuilder, WorkflowPlan};
pub use evaluator::{early_decision, is_approved, Decision};
pub use progression::{
    apply_action, progress, reevaluate, ActionOutcome, ApprovalAction, Progress, ProgressOutcome,
};
pub use resolver::{resolve, CompanyDirectory};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("no active approver resolved for required {} step {step}", approver_type.as_str())]
    NoApplicableApprover { step: u32, approver_type: ApproverType },
    #[error("approval `{}` was already {}", flow_id.0, status.as_str())]
    DuplicateApprovalAction { flow_id: ApprovalFlowId, status: FlowStatus },
    #[error("expense `{}` was already finalized as {}", expense_id.0, status.as_str())]
    ConcurrentFinalization { expense_id: ExpenseId, status: ExpenseStatus },
    #[error("no pending approval for approver `{}` on expense `{}`", approver_id.0, expense_id.0)]
    NoPendingApproval { expense_id: ExpenseId, approver_id: UserId },
    #[error(
        "approval `{}` belongs to step {step} but the expense is at step {current_step}",
        flow_id.0
    )]
    StepNotActive { flow_id: ApprovalFlowId, step: u32, current_step: u32 },
    #[error("step {step} is due in {days} days; rule steps must be due within 1..={max} days")]
    InvalidStepDueDays { step: u32, days: u32, max: u32 },
    #[error("invalid delegation: {reason}")]
    InvalidDelegation { reason: String },
    #[error("expense `{}` is {} and cannot enter approval", expense_id.0, status.as_str())]
    ExpenseNotSubmitted { expense_id: ExpenseId, status: ExpenseStatus },
}
