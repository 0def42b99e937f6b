pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod events;
pub mod rules;
pub mod workflow;

pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::company::{Company, CompanyId};
pub use domain::expense::{Expense, ExpenseCategory, ExpenseId, ExpenseStatus};
pub use domain::flow::{ApprovalFlow, ApprovalFlowId, ApproverType, FlowPriority, FlowStatus};
pub use domain::rule::{
    ApprovalRule, AutoApproveConditions, ConditionField, ConditionOperator, RuleCondition, RuleId,
    RuleType, StepDefinition,
};
pub use domain::user::{User, UserId, UserRole};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use events::{
    InMemoryEventSink, NoopEventSink, WorkflowEvent, WorkflowEventKind, WorkflowEventSink,
};
pub use rules::{RuleCache, RuleSelector};
pub use workflow::{
    ActionOutcome, ApprovalAction, CompanyDirectory, ProgressOutcome, WorkflowBuilder,
    WorkflowError, WorkflowPlan,
};
