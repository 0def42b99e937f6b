use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use claimflow_core::domain::company::{Company, CompanyId};
use claimflow_core::domain::expense::{Expense, ExpenseId, ExpenseStatus};
use claimflow_core::domain::flow::ApprovalFlow;
use claimflow_core::domain::rule::{ApprovalRule, RuleId};
use claimflow_core::domain::user::{User, UserId};
use claimflow_core::workflow::{ActionOutcome, WorkflowPlan};

mod columns;

pub mod company;
pub mod expense;
pub mod flow;
pub mod memory;
pub mod rule;
pub mod user;
pub mod workflow_store;

pub use company::SqlCompanyRepository;
pub use expense::SqlExpenseRepository;
pub use flow::SqlApprovalFlowRepository;
pub use memory::InMemoryStore;
pub use rule::SqlApprovalRuleRepository;
pub use user::SqlUserRepository;
pub use workflow_store::SqlWorkflowStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    /// An optimistic-concurrency guard did not match; the caller should reload.
    #[error("write conflict: {0}")]
    Conflict(String),
}

#[async_trait]
pub trait CompanyRepository: Send + Sync {
    async fn find_by_id(&self, id: &CompanyId) -> Result<Option<Company>, RepositoryError>;
    async fn list(&self) -> Result<Vec<Company>, RepositoryError>;
    async fn save(&self, company: Company) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;

    /// Active users of one company, ordered by id.
    async fn list_active_for_company(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<User>, RepositoryError>;

    async fn save(&self, user: User) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ExpenseRepository: Send + Sync {
    async fn find_by_id(&self, id: &ExpenseId) -> Result<Option<Expense>, RepositoryError>;

    async fn list_for_company(
        &self,
        company_id: &CompanyId,
        status: Option<ExpenseStatus>,
    ) -> Result<Vec<Expense>, RepositoryError>;

    /// Inserts a new expense; an existing id is a [`RepositoryError::Conflict`]
    /// and leaves the stored record untouched.
    async fn insert(&self, expense: Expense) -> Result<(), RepositoryError>;

    /// Inserts or replaces an expense record. Workflow state changes go
    /// through [`WorkflowStore`] instead.
    async fn save(&self, expense: Expense) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ApprovalRuleRepository: Send + Sync {
    async fn find_by_id(&self, id: &RuleId) -> Result<Option<ApprovalRule>, RepositoryError>;

    /// Rules in effect on `today`, ordered by priority then id.
    async fn list_active_for_company(
        &self,
        company_id: &CompanyId,
        today: NaiveDate,
    ) -> Result<Vec<ApprovalRule>, RepositoryError>;

    async fn list_for_company(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<ApprovalRule>, RepositoryError>;

    async fn save(&self, rule: ApprovalRule) -> Result<(), RepositoryError>;

    async fn increment_usage(&self, id: &RuleId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ApprovalFlowRepository: Send + Sync {
    /// Every row of one expense, ordered by step and then insertion.
    async fn list_for_expense(
        &self,
        expense_id: &ExpenseId,
    ) -> Result<Vec<ApprovalFlow>, RepositoryError>;

    /// Rows the approver can act on right now: pending, at the expense's
    /// current step, on an expense that is under review.
    async fn pending_for_approver(
        &self,
        approver_id: &UserId,
    ) -> Result<Vec<ApprovalFlow>, RepositoryError>;
}

/// Atomic persistence of workflow transitions.
///
/// Both operations apply all of their writes or none, and fail with
/// [`RepositoryError::Conflict`] when the stored expense no longer carries the
/// expected `state_version` or a row to update is no longer pending.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn create_workflow(&self, plan: &WorkflowPlan) -> Result<(), RepositoryError>;
    async fn commit_action(&self, outcome: &ActionOutcome) -> Result<(), RepositoryError>;
}
