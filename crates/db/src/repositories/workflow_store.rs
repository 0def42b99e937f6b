use claimflow_core::workflow::{ActionOutcome, WorkflowPlan};

use super::expense::update_workflow_state;
use super::flow::{insert_flow, update_pending_flow};
use super::rule::increment_usage_in;
use super::{RepositoryError, WorkflowStore};
use crate::DbPool;

pub struct SqlWorkflowStore {
    pool: DbPool,
}

impl SqlWorkflowStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl WorkflowStore for SqlWorkflowStore {
    async fn create_workflow(&self, plan: &WorkflowPlan) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = update_workflow_state(&mut tx, &plan.expense, plan.expected_version).await?;
        if updated == 0 {
            return Err(RepositoryError::Conflict(format!(
                "expense `{}` changed before its workflow was created",
                plan.expense.id.0
            )));
        }

        for flow in &plan.flows {
            insert_flow(&mut tx, flow).await?;
        }

        if plan.counts_rule_usage() {
            if let Some(rule_id) = &plan.expense.rule_applied {
                increment_usage_in(&mut tx, rule_id).await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn commit_action(&self, outcome: &ActionOutcome) -> Result<(), RepositoryError> {
        if outcome.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        let updated =
            update_workflow_state(&mut tx, &outcome.expense, outcome.expected_version).await?;
        if updated == 0 {
            return Err(RepositoryError::Conflict(format!(
                "expense `{}` is no longer at state version {}",
                outcome.expense.id.0, outcome.expected_version
            )));
        }

        for flow in &outcome.updated_flows {
            if update_pending_flow(&mut tx, flow).await? == 0 {
                return Err(RepositoryError::Conflict(format!(
                    "approval `{}` was already acted on",
                    flow.id.0
                )));
            }
        }

        for flow in &outcome.inserted_flows {
            insert_flow(&mut tx, flow).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
