use std::collections::HashMap;

use chrono::NaiveDate;
use tokio::sync::RwLock;

use claimflow_core::domain::company::{Company, CompanyId};
use claimflow_core::domain::expense::{Expense, ExpenseId, ExpenseStatus};
use claimflow_core::domain::flow::{ApprovalFlow, FlowStatus};
use claimflow_core::domain::rule::{ApprovalRule, RuleId};
use claimflow_core::domain::user::{User, UserId};
use claimflow_core::workflow::{ActionOutcome, WorkflowPlan};

use super::{
    ApprovalFlowRepository, ApprovalRuleRepository, CompanyRepository, ExpenseRepository,
    RepositoryError, UserRepository, WorkflowStore,
};

#[derive(Default)]
struct MemoryState {
    companies: HashMap<String, Company>,
    users: HashMap<String, User>,
    expenses: HashMap<String, Expense>,
    rules: HashMap<String, ApprovalRule>,
    /// Insertion order doubles as storage order.
    flows: Vec<ApprovalFlow>,
}

/// Every repository plus the workflow store over one lock, so workflow
/// commits see and change a consistent snapshot.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sort_rules(rules: &mut [ApprovalRule]) {
    rules.sort_by(|left, right| {
        left.priority.cmp(&right.priority).then_with(|| left.id.cmp(&right.id))
    });
}

#[async_trait::async_trait]
impl CompanyRepository for InMemoryStore {
    async fn find_by_id(&self, id: &CompanyId) -> Result<Option<Company>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.companies.get(&id.0).cloned())
    }

    async fn list(&self) -> Result<Vec<Company>, RepositoryError> {
        let state = self.state.read().await;
        let mut companies: Vec<Company> = state.companies.values().cloned().collect();
        companies.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(companies)
    }

    async fn save(&self, company: Company) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.companies.insert(company.id.0.clone(), company);
        Ok(())
    }
}

#[async_trait::async_trait]
impl UserRepository for InMemoryStore {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.users.get(&id.0).cloned())
    }

    async fn list_active_for_company(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<User>, RepositoryError> {
        let state = self.state.read().await;
        let mut users: Vec<User> = state
            .users
            .values()
            .filter(|user| user.is_active && &user.company_id == company_id)
            .cloned()
            .collect();
        users.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(users)
    }

    async fn save(&self, user: User) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.users.insert(user.id.0.clone(), user);
        Ok(())
    }
}

#[async_trait::async_trait]
impl ExpenseRepository for InMemoryStore {
    async fn find_by_id(&self, id: &ExpenseId) -> Result<Option<Expense>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.expenses.get(&id.0).cloned())
    }

    async fn list_for_company(
        &self,
        company_id: &CompanyId,
        status: Option<ExpenseStatus>,
    ) -> Result<Vec<Expense>, RepositoryError> {
        let state = self.state.read().await;
        let mut expenses: Vec<Expense> = state
            .expenses
            .values()
            .filter(|expense| &expense.company_id == company_id)
            .filter(|expense| status.map_or(true, |status| expense.status == status))
            .cloned()
            .collect();
        expenses.sort_by(|left, right| {
            left.submitted_at.cmp(&right.submitted_at).then_with(|| left.id.cmp(&right.id))
        });
        Ok(expenses)
    }

    async fn insert(&self, expense: Expense) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if state.expenses.contains_key(&expense.id.0) {
            return Err(RepositoryError::Conflict(format!(
                "expense `{}` already exists",
                expense.id.0
            )));
        }
        state.expenses.insert(expense.id.0.clone(), expense);
        Ok(())
    }

    async fn save(&self, expense: Expense) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.expenses.insert(expense.id.0.clone(), expense);
        Ok(())
    }
}

#[async_trait::async_trait]
impl ApprovalRuleRepository for InMemoryStore {
    async fn find_by_id(&self, id: &RuleId) -> Result<Option<ApprovalRule>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.rules.get(&id.0).cloned())
    }

    async fn list_active_for_company(
        &self,
        company_id: &CompanyId,
        today: NaiveDate,
    ) -> Result<Vec<ApprovalRule>, RepositoryError> {
        let state = self.state.read().await;
        let mut rules: Vec<ApprovalRule> = state
            .rules
            .values()
            .filter(|rule| &rule.company_id == company_id && rule.is_in_effect(today))
            .cloned()
            .collect();
        sort_rules(&mut rules);
        Ok(rules)
    }

    async fn list_for_company(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<ApprovalRule>, RepositoryError> {
        let state = self.state.read().await;
        let mut rules: Vec<ApprovalRule> =
            state.rules.values().filter(|rule| &rule.company_id == company_id).cloned().collect();
        sort_rules(&mut rules);
        Ok(rules)
    }

    async fn save(&self, rule: ApprovalRule) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let usage_count = state.rules.get(&rule.id.0).map_or(rule.usage_count, |r| r.usage_count);
        state.rules.insert(rule.id.0.clone(), ApprovalRule { usage_count, ..rule });
        Ok(())
    }

    async fn increment_usage(&self, id: &RuleId) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if let Some(rule) = state.rules.get_mut(&id.0) {
            rule.usage_count += 1;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ApprovalFlowRepository for InMemoryStore {
    async fn list_for_expense(
        &self,
        expense_id: &ExpenseId,
    ) -> Result<Vec<ApprovalFlow>, RepositoryError> {
        let state = self.state.read().await;
        let mut flows: Vec<ApprovalFlow> =
            state.flows.iter().filter(|flow| &flow.expense_id == expense_id).cloned().collect();
        // Stable sort keeps insertion order within a step.
        flows.sort_by_key(|flow| flow.approval_step);
        Ok(flows)
    }

    async fn pending_for_approver(
        &self,
        approver_id: &UserId,
    ) -> Result<Vec<ApprovalFlow>, RepositoryError> {
        let state = self.state.read().await;
        let mut flows: Vec<ApprovalFlow> = state
            .flows
            .iter()
            .filter(|flow| &flow.approver_id == approver_id && flow.is_pending())
            .filter(|flow| {
                state.expenses.get(&flow.expense_id.0).is_some_and(|expense| {
                    expense.status == ExpenseStatus::UnderReview
                        && expense.approval_step == flow.approval_step
                })
            })
            .cloned()
            .collect();
        flows.sort_by(|left, right| {
            left.due_date.cmp(&right.due_date).then_with(|| left.id.cmp(&right.id))
        });
        Ok(flows)
    }
}

impl MemoryState {
    fn check_version(&self, expense: &Expense, expected: u32) -> Result<(), RepositoryError> {
        match self.expenses.get(&expense.id.0) {
            Some(stored) if stored.state_version == expected => Ok(()),
            Some(stored) => Err(RepositoryError::Conflict(format!(
                "expense `{}` is at state version {}, expected {expected}",
                expense.id.0, stored.state_version
            ))),
            None => Err(RepositoryError::Conflict(format!("expense `{}` is gone", expense.id.0))),
        }
    }

    fn check_insertable(&self, flows: &[ApprovalFlow]) -> Result<(), RepositoryError> {
        for (index, flow) in flows.iter().enumerate() {
            let clashes = |other: &ApprovalFlow| {
                other.id == flow.id
                    || (other.expense_id == flow.expense_id
                        && other.approver_id == flow.approver_id
                        && other.approval_step == flow.approval_step)
            };
            if self.flows.iter().any(clashes) || flows[..index].iter().any(clashes) {
                return Err(RepositoryError::Conflict(format!(
                    "approval row for `{}` at step {} already exists",
                    flow.approver_id.0, flow.approval_step
                )));
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl WorkflowStore for InMemoryStore {
    async fn create_workflow(&self, plan: &WorkflowPlan) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.check_version(&plan.expense, plan.expected_version)?;
        state.check_insertable(&plan.flows)?;

        state.flows.extend(plan.flows.iter().cloned());
        state.expenses.insert(plan.expense.id.0.clone(), plan.expense.clone());
        if plan.counts_rule_usage() {
            if let Some(rule_id) = &plan.expense.rule_applied {
                if let Some(rule) = state.rules.get_mut(&rule_id.0) {
                    rule.usage_count += 1;
                }
            }
        }
        Ok(())
    }

    async fn commit_action(&self, outcome: &ActionOutcome) -> Result<(), RepositoryError> {
        if outcome.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write().await;
        state.check_version(&outcome.expense, outcome.expected_version)?;
        for updated in &outcome.updated_flows {
            let still_pending = state
                .flows
                .iter()
                .any(|flow| flow.id == updated.id && flow.status == FlowStatus::Pending);
            if !still_pending {
                return Err(RepositoryError::Conflict(format!(
                    "approval `{}` was already acted on",
                    updated.id.0
                )));
            }
        }
        state.check_insertable(&outcome.inserted_flows)?;

        for updated in &outcome.updated_flows {
            if let Some(flow) = state.flows.iter_mut().find(|flow| flow.id == updated.id) {
                *flow = updated.clone();
            }
        }
        state.flows.extend(outcome.inserted_flows.iter().cloned());
        state.expenses.insert(outcome.expense.id.0.clone(), outcome.expense.clone());
        Ok(())
    }
}
