//! Orchestrates submission and approver actions over the repositories.
//!
//! The core computes every transition on in-memory copies; this layer loads
//! the inputs, commits the result through [`WorkflowStore`] and retries when a
//! concurrent writer got there first.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use claimflow_core::clock::{Clock, SystemClock};
use claimflow_core::config::WorkflowConfig;
use claimflow_core::domain::company::CompanyId;
use claimflow_core::domain::expense::{Expense, ExpenseId, ExpenseStatus};
use claimflow_core::domain::flow::ApprovalFlow;
use claimflow_core::domain::rule::ApprovalRule;
use claimflow_core::domain::user::UserId;
use claimflow_core::errors::{ApplicationError, DomainError};
use claimflow_core::events::{WorkflowEvent, WorkflowEventSink};
use claimflow_core::rules::{validate_condition, RuleCache, RuleSelector};
use claimflow_core::workflow::{
    apply_action, reevaluate, ActionOutcome, ApprovalAction, CompanyDirectory, ProgressOutcome,
    SkippedStep, WorkflowBuilder, WorkflowError,
};

use crate::events::TracingEventSink;
use crate::repositories::{
    ApprovalFlowRepository, ApprovalRuleRepository, CompanyRepository, ExpenseRepository,
    InMemoryStore, RepositoryError, SqlApprovalFlowRepository, SqlApprovalRuleRepository,
    SqlCompanyRepository, SqlExpenseRepository, SqlUserRepository, SqlWorkflowStore,
    UserRepository, WorkflowStore,
};
use crate::DbPool;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("expense `{expense_id}` kept changing underneath {attempts} attempts")]
    ConflictRetriesExhausted { expense_id: String, attempts: u32 },
}

impl ServiceError {
    fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }
}

impl From<ServiceError> for ApplicationError {
    fn from(value: ServiceError) -> Self {
        match value {
            ServiceError::NotFound { .. } => Self::NotFound(value.to_string()),
            ServiceError::Workflow(error) => Self::Domain(DomainError::Workflow(error)),
            ServiceError::Repository(RepositoryError::Conflict(message)) => {
                Self::Conflict(message)
            }
            ServiceError::Repository(error) => Self::Persistence(error.to_string()),
            ServiceError::ConflictRetriesExhausted { .. } => Self::Conflict(value.to_string()),
        }
    }
}

/// Storage collaborators of the service, usually all backed by one pool.
#[derive(Clone)]
pub struct ServiceRepositories {
    pub companies: Arc<dyn CompanyRepository>,
    pub users: Arc<dyn UserRepository>,
    pub expenses: Arc<dyn ExpenseRepository>,
    pub rules: Arc<dyn ApprovalRuleRepository>,
    pub flows: Arc<dyn ApprovalFlowRepository>,
    pub store: Arc<dyn WorkflowStore>,
}

impl ServiceRepositories {
    pub fn sqlite(pool: DbPool) -> Self {
        Self {
            companies: Arc::new(SqlCompanyRepository::new(pool.clone())),
            users: Arc::new(SqlUserRepository::new(pool.clone())),
            expenses: Arc::new(SqlExpenseRepository::new(pool.clone())),
            rules: Arc::new(SqlApprovalRuleRepository::new(pool.clone())),
            flows: Arc::new(SqlApprovalFlowRepository::new(pool.clone())),
            store: Arc::new(SqlWorkflowStore::new(pool)),
        }
    }

    pub fn in_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            companies: store.clone(),
            users: store.clone(),
            expenses: store.clone(),
            rules: store.clone(),
            flows: store.clone(),
            store,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionReport {
    pub expense: Expense,
    pub flows: Vec<ApprovalFlow>,
    pub skipped: Vec<SkippedStep>,
    pub outcome: ProgressOutcome,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionReport {
    pub expense: Expense,
    pub flows: Vec<ApprovalFlow>,
    pub outcome: ProgressOutcome,
    /// False when the expense had already been finalized and nothing was written.
    pub applied: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpenseWorkflow {
    pub expense: Expense,
    pub flows: Vec<ApprovalFlow>,
}

pub struct ApprovalService {
    repos: ServiceRepositories,
    builder: WorkflowBuilder,
    selector: RuleSelector,
    clock: Arc<dyn Clock>,
    events: Arc<dyn WorkflowEventSink>,
    max_action_retries: u32,
}

impl ApprovalService {
    pub fn new(repos: ServiceRepositories, config: WorkflowConfig, cache: Arc<RuleCache>) -> Self {
        let max_action_retries = config.max_action_retries.max(1);
        Self {
            repos,
            builder: WorkflowBuilder::new(config),
            selector: RuleSelector::new(cache),
            clock: Arc::new(SystemClock),
            events: Arc::new(TracingEventSink),
            max_action_retries,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn WorkflowEventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn rule_cache(&self) -> &Arc<RuleCache> {
        self.selector.cache()
    }

    /// Stores a new expense and runs it through submission.
    ///
    /// The id must be unused; an existing expense is never overwritten.
    pub async fn submit_new(
        &self,
        expense: Expense,
        correlation_id: &str,
    ) -> Result<SubmissionReport, ServiceError> {
        let expense_id = expense.id.clone();
        self.repos.expenses.insert(expense).await?;
        self.submit(&expense_id, correlation_id).await
    }

    /// Selects the governing rule, builds the approval rows and persists them
    /// together with the expense's new state.
    pub async fn submit(
        &self,
        expense_id: &ExpenseId,
        correlation_id: &str,
    ) -> Result<SubmissionReport, ServiceError> {
        for attempt in 1..=self.max_action_retries {
            let now = self.clock.now();
            let mut expense = self.load_expense(expense_id).await?;
            if expense.status == ExpenseStatus::Draft {
                expense.status = ExpenseStatus::Submitted;
            }

            let submitter = self
                .repos
                .users
                .find_by_id(&expense.submitted_by)
                .await?
                .filter(|user| user.company_id == expense.company_id)
                .ok_or_else(|| ServiceError::not_found("submitter", &expense.submitted_by.0))?;
            let rules = self.active_rules(&expense.company_id, now).await?;
            let rule = self.selector.select(&rules, &expense, &submitter, now);
            let directory = self.directory(&expense.company_id).await?;

            let plan = self.builder.build(&expense, &submitter, rule, &directory, now)?;
            for skipped in &plan.skipped {
                warn!(
                    event_name = "workflow.step_skipped",
                    correlation_id,
                    expense_id = %expense_id.0,
                    step = skipped.step,
                    approver_type = skipped.approver_type.as_str(),
                    required = skipped.required,
                    reason = %skipped.reason,
                    "approval step produced no approver"
                );
            }

            match self.repos.store.create_workflow(&plan).await {
                Ok(()) => {
                    info!(
                        event_name = "workflow.submitted",
                        correlation_id,
                        expense_id = %expense_id.0,
                        rule_id = rule.map(|rule| rule.id.0.as_str()).unwrap_or("default"),
                        approvers = plan.flows.len(),
                        status = plan.expense.status.as_str(),
                        "expense entered approval"
                    );
                    self.publish(plan.events.clone(), correlation_id);
                    return Ok(SubmissionReport {
                        expense: plan.expense,
                        flows: plan.flows,
                        skipped: plan.skipped,
                        outcome: plan.outcome,
                    });
                }
                Err(RepositoryError::Conflict(reason)) => {
                    warn!(
                        event_name = "workflow.submit_conflict",
                        correlation_id,
                        expense_id = %expense_id.0,
                        attempt,
                        reason = %reason,
                        "submission raced another writer; reloading"
                    );
                }
                Err(error) => return Err(error.into()),
            }
        }

        Err(ServiceError::ConflictRetriesExhausted {
            expense_id: expense_id.0.clone(),
            attempts: self.max_action_retries,
        })
    }

    pub async fn approve(
        &self,
        expense_id: &ExpenseId,
        approver: &UserId,
        comments: Option<String>,
        correlation_id: &str,
    ) -> Result<ActionReport, ServiceError> {
        self.act(expense_id, approver, ApprovalAction::Approve { comments }, correlation_id).await
    }

    pub async fn reject(
        &self,
        expense_id: &ExpenseId,
        approver: &UserId,
        comments: Option<String>,
        correlation_id: &str,
    ) -> Result<ActionReport, ServiceError> {
        self.act(expense_id, approver, ApprovalAction::Reject { comments }, correlation_id).await
    }

    pub async fn delegate(
        &self,
        expense_id: &ExpenseId,
        approver: &UserId,
        delegate_to: UserId,
        reason: Option<String>,
        correlation_id: &str,
    ) -> Result<ActionReport, ServiceError> {
        let action = ApprovalAction::Delegate { delegate_to, reason };
        self.act(expense_id, approver, action, correlation_id).await
    }

    /// Applies one approver action with optimistic retries.
    ///
    /// An expense that is already final turns the action into a no-op report
    /// with `applied = false`.
    pub async fn act(
        &self,
        expense_id: &ExpenseId,
        approver: &UserId,
        action: ApprovalAction,
        correlation_id: &str,
    ) -> Result<ActionReport, ServiceError> {
        for attempt in 1..=self.max_action_retries {
            let now = self.clock.now();
            let expense = self.load_expense(expense_id).await?;
            let flows = self.repos.flows.list_for_expense(expense_id).await?;
            let rule = self.applied_rule(&expense).await?;
            let directory = self.directory(&expense.company_id).await?;

            let outcome = match apply_action(
                &expense,
                &flows,
                rule.as_ref(),
                &directory,
                approver,
                action.clone(),
                now,
            ) {
                Ok(outcome) => outcome,
                Err(WorkflowError::ConcurrentFinalization { status, .. }) => {
                    info!(
                        event_name = "workflow.action_ignored",
                        correlation_id,
                        expense_id = %expense_id.0,
                        approver_id = %approver.0,
                        action = action.name(),
                        status = status.as_str(),
                        "expense already finalized; action is a no-op"
                    );
                    return Ok(ActionReport {
                        expense,
                        flows,
                        outcome: ProgressOutcome::NoChange,
                        applied: false,
                    });
                }
                Err(error) => return Err(error.into()),
            };

            match self.repos.store.commit_action(&outcome).await {
                Ok(()) => {
                    info!(
                        event_name = "workflow.action_applied",
                        correlation_id,
                        expense_id = %expense_id.0,
                        approver_id = %approver.0,
                        action = action.name(),
                        status = outcome.expense.status.as_str(),
                        step = outcome.expense.approval_step,
                        "approval action committed"
                    );
                    return Ok(self.committed(flows, outcome, correlation_id));
                }
                Err(RepositoryError::Conflict(reason)) => {
                    warn!(
                        event_name = "workflow.action_conflict",
                        correlation_id,
                        expense_id = %expense_id.0,
                        approver_id = %approver.0,
                        attempt,
                        reason = %reason,
                        "approval action raced another writer; reloading"
                    );
                }
                Err(error) => return Err(error.into()),
            }
        }

        Err(ServiceError::ConflictRetriesExhausted {
            expense_id: expense_id.0.clone(),
            attempts: self.max_action_retries,
        })
    }

    /// Re-runs progression on the stored rows without an approver action.
    pub async fn reevaluate(
        &self,
        expense_id: &ExpenseId,
        correlation_id: &str,
    ) -> Result<ActionReport, ServiceError> {
        for attempt in 1..=self.max_action_retries {
            let now = self.clock.now();
            let expense = self.load_expense(expense_id).await?;
            let flows = self.repos.flows.list_for_expense(expense_id).await?;
            if expense.status != ExpenseStatus::UnderReview {
                return Ok(ActionReport {
                    expense,
                    flows,
                    outcome: ProgressOutcome::NoChange,
                    applied: false,
                });
            }

            let rule = self.applied_rule(&expense).await?;
            let outcome = reevaluate(&expense, &flows, rule.as_ref(), now);
            if outcome.is_empty() {
                return Ok(ActionReport {
                    expense,
                    flows,
                    outcome: ProgressOutcome::NoChange,
                    applied: false,
                });
            }

            match self.repos.store.commit_action(&outcome).await {
                Ok(()) => return Ok(self.committed(flows, outcome, correlation_id)),
                Err(RepositoryError::Conflict(reason)) => {
                    warn!(
                        event_name = "workflow.reevaluate_conflict",
                        correlation_id,
                        expense_id = %expense_id.0,
                        attempt,
                        reason = %reason,
                        "re-evaluation raced another writer; reloading"
                    );
                }
                Err(error) => return Err(error.into()),
            }
        }

        Err(ServiceError::ConflictRetriesExhausted {
            expense_id: expense_id.0.clone(),
            attempts: self.max_action_retries,
        })
    }

    pub async fn pending_for_approver(
        &self,
        approver: &UserId,
    ) -> Result<Vec<ApprovalFlow>, ServiceError> {
        Ok(self.repos.flows.pending_for_approver(approver).await?)
    }

    pub async fn status(&self, expense_id: &ExpenseId) -> Result<ExpenseWorkflow, ServiceError> {
        let expense = self.load_expense(expense_id).await?;
        let flows = self.repos.flows.list_for_expense(expense_id).await?;
        Ok(ExpenseWorkflow { expense, flows })
    }

    /// Stores a rule and drops the company's cached rule list.
    pub async fn save_rule(
        &self,
        rule: ApprovalRule,
        correlation_id: &str,
    ) -> Result<(), ServiceError> {
        if self.repos.companies.find_by_id(&rule.company_id).await?.is_none() {
            return Err(ServiceError::not_found("company", &rule.company_id.0));
        }
        warn_on_invalid_condition(&rule, correlation_id);

        let company_id = rule.company_id.clone();
        let rule_id = rule.id.0.clone();
        self.repos.rules.save(rule).await?;
        self.selector.forget(&company_id);
        info!(
            event_name = "rules.saved",
            correlation_id,
            company_id = %company_id.0,
            rule_id = %rule_id,
            "approval rule saved; cache invalidated"
        );
        Ok(())
    }

    async fn load_expense(&self, expense_id: &ExpenseId) -> Result<Expense, ServiceError> {
        self.repos
            .expenses
            .find_by_id(expense_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("expense", &expense_id.0))
    }

    /// The rule recorded at submission keeps governing the expense, even if
    /// it has been deactivated since.
    async fn applied_rule(&self, expense: &Expense) -> Result<Option<ApprovalRule>, ServiceError> {
        match &expense.rule_applied {
            Some(rule_id) => Ok(self.repos.rules.find_by_id(rule_id).await?),
            None => Ok(None),
        }
    }

    async fn active_rules(
        &self,
        company_id: &CompanyId,
        now: DateTime<Utc>,
    ) -> Result<Arc<Vec<ApprovalRule>>, ServiceError> {
        if let Some(rules) = self.selector.cached(company_id, now) {
            return Ok(rules);
        }

        let rules =
            self.repos.rules.list_active_for_company(company_id, now.date_naive()).await?;
        for rule in &rules {
            warn_on_invalid_condition(rule, "rule-load");
        }
        Ok(self.selector.remember(company_id.clone(), rules, now))
    }

    async fn directory(&self, company_id: &CompanyId) -> Result<CompanyDirectory, ServiceError> {
        let users = self.repos.users.list_active_for_company(company_id).await?;
        Ok(CompanyDirectory::new(company_id.clone(), users))
    }

    fn committed(
        &self,
        mut flows: Vec<ApprovalFlow>,
        outcome: ActionOutcome,
        correlation_id: &str,
    ) -> ActionReport {
        for updated in &outcome.updated_flows {
            if let Some(flow) = flows.iter_mut().find(|flow| flow.id == updated.id) {
                *flow = updated.clone();
            }
        }
        flows.extend(outcome.inserted_flows.iter().cloned());
        flows.sort_by_key(|flow| flow.approval_step);

        self.publish(outcome.events, correlation_id);
        ActionReport { expense: outcome.expense, flows, outcome: outcome.progress, applied: true }
    }

    fn publish(&self, events: Vec<WorkflowEvent>, correlation_id: &str) {
        for event in events {
            self.events.emit(event.with_metadata("correlation_id", correlation_id));
        }
    }
}

fn warn_on_invalid_condition(rule: &ApprovalRule, correlation_id: &str) {
    let Some(condition) = &rule.condition else {
        return;
    };
    if let Err(error) = validate_condition(condition) {
        warn!(
            event_name = "rules.invalid_condition",
            correlation_id,
            rule_id = %rule.id.0,
            error = %error,
            "rule condition can never match as written"
        );
    }
}
