use std::sync::Arc;

use claimflow_core::config::AppConfig;
use claimflow_core::domain::expense::ExpenseId;
use claimflow_core::domain::user::UserId;
use claimflow_core::rules::RuleCache;
use claimflow_db::repositories::RepositoryError;
use claimflow_db::{
    connect_with_config, migrations, ActionReport, ApprovalService, ServiceError,
    ServiceRepositories,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::commands::{prepare, CommandResult};

/// Approval workflow operations exposed on the command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkflowCommand {
    Submit { expense_id: String },
    Approve { expense_id: String, approver: String, comments: Option<String> },
    Reject { expense_id: String, approver: String, comments: Option<String> },
    Delegate { expense_id: String, approver: String, delegate_to: String, reason: Option<String> },
    Reevaluate { expense_id: String },
    Pending { approver: String },
    Status { expense_id: String },
}

impl WorkflowCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Submit { .. } => "submit",
            Self::Approve { .. } => "approve",
            Self::Reject { .. } => "reject",
            Self::Delegate { .. } => "delegate",
            Self::Reevaluate { .. } => "reevaluate",
            Self::Pending { .. } => "pending",
            Self::Status { .. } => "status",
        }
    }
}

type Failure = (&'static str, String, u8);

pub fn run(command: WorkflowCommand) -> CommandResult {
    let name = command.name();
    let (config, runtime) = match prepare(name) {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let correlation_id = format!("cli-{}", Uuid::new_v4());
    let result = runtime.block_on(async {
        let service = open_service(&config).await?;
        execute(&service, command, &correlation_id).await.map_err(classify)
    });

    match result {
        Ok((message, data)) => CommandResult::success_with_data(name, message, Some(data)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(name, error_class, message, exit_code)
        }
    }
}

async fn open_service(config: &AppConfig) -> Result<ApprovalService, Failure> {
    let pool = connect_with_config(&config.database)
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
    migrations::run_pending(&pool).await.map_err(|error| ("migration", error.to_string(), 5u8))?;

    let cache = Arc::new(RuleCache::new(config.workflow.rule_cache_ttl_secs));
    Ok(ApprovalService::new(ServiceRepositories::sqlite(pool), config.workflow.clone(), cache))
}

async fn execute(
    service: &ApprovalService,
    command: WorkflowCommand,
    correlation_id: &str,
) -> Result<(String, Value), ServiceError> {
    match command {
        WorkflowCommand::Submit { expense_id } => {
            let report = service.submit(&ExpenseId(expense_id), correlation_id).await?;
            let skipped: Vec<Value> = report
                .skipped
                .iter()
                .map(|step| {
                    json!({
                        "step": step.step,
                        "approver_type": step.approver_type.as_str(),
                        "required": step.required,
                        "reason": step.reason,
                    })
                })
                .collect();
            let message = format!(
                "expense `{}` is {}",
                report.expense.id.0,
                report.expense.status.as_str()
            );
            let data = json!({
                "correlation_id": correlation_id,
                "expense": report.expense,
                "flows": report.flows,
                "skipped": skipped,
                "outcome": report.outcome,
            });
            Ok((message, data))
        }
        WorkflowCommand::Approve { expense_id, approver, comments } => {
            let report = service
                .approve(&ExpenseId(expense_id), &UserId(approver), comments, correlation_id)
                .await?;
            Ok(action_payload(report, correlation_id))
        }
        WorkflowCommand::Reject { expense_id, approver, comments } => {
            let report = service
                .reject(&ExpenseId(expense_id), &UserId(approver), comments, correlation_id)
                .await?;
            Ok(action_payload(report, correlation_id))
        }
        WorkflowCommand::Delegate { expense_id, approver, delegate_to, reason } => {
            let report = service
                .delegate(
                    &ExpenseId(expense_id),
                    &UserId(approver),
                    UserId(delegate_to),
                    reason,
                    correlation_id,
                )
                .await?;
            Ok(action_payload(report, correlation_id))
        }
        WorkflowCommand::Reevaluate { expense_id } => {
            let report = service.reevaluate(&ExpenseId(expense_id), correlation_id).await?;
            Ok(action_payload(report, correlation_id))
        }
        WorkflowCommand::Pending { approver } => {
            let pending = service.pending_for_approver(&UserId(approver.clone())).await?;
            let message = format!("{} approval(s) waiting on `{approver}`", pending.len());
            Ok((message, json!({ "correlation_id": correlation_id, "flows": pending })))
        }
        WorkflowCommand::Status { expense_id } => {
            let workflow = service.status(&ExpenseId(expense_id)).await?;
            let message = format!(
                "expense `{}` is {} at step {}",
                workflow.expense.id.0,
                workflow.expense.status.as_str(),
                workflow.expense.approval_step
            );
            let data = json!({
                "correlation_id": correlation_id,
                "expense": workflow.expense,
                "flows": workflow.flows,
            });
            Ok((message, data))
        }
    }
}

fn action_payload(report: ActionReport, correlation_id: &str) -> (String, Value) {
    let message = if report.applied {
        format!("expense `{}` is {}", report.expense.id.0, report.expense.status.as_str())
    } else {
        format!(
            "expense `{}` was already {}; nothing changed",
            report.expense.id.0,
            report.expense.status.as_str()
        )
    };
    let data = json!({
        "correlation_id": correlation_id,
        "applied": report.applied,
        "expense": report.expense,
        "flows": report.flows,
        "outcome": report.outcome,
    });
    (message, data)
}

/// Maps service failures onto the CLI's error classes and exit codes.
fn classify(error: ServiceError) -> Failure {
    let message = error.to_string();
    match error {
        ServiceError::NotFound { .. } => ("not_found", message, 6),
        ServiceError::Workflow(_) => ("workflow_validation", message, 6),
        ServiceError::Repository(RepositoryError::Conflict(_))
        | ServiceError::ConflictRetriesExhausted { .. } => ("workflow_conflict", message, 6),
        ServiceError::Repository(_) => ("persistence", message, 5),
    }
}

#[cfg(test)]
mod tests {
    use claimflow_core::workflow::WorkflowError;
    use claimflow_db::repositories::RepositoryError;
    use claimflow_db::ServiceError;

    use super::{classify, WorkflowCommand};

    #[test]
    fn command_names_match_subcommands() {
        let command = WorkflowCommand::Delegate {
            expense_id: "exp-1".to_string(),
            approver: "u-1".to_string(),
            delegate_to: "u-2".to_string(),
            reason: None,
        };
        assert_eq!(command.name(), "delegate");
        assert_eq!(WorkflowCommand::Pending { approver: "u-1".to_string() }.name(), "pending");
    }

    #[test]
    fn workflow_errors_exit_with_the_workflow_code() {
        let error = ServiceError::Workflow(WorkflowError::InvalidDelegation {
            reason: "self".to_string(),
        });
        let (class, _, code) = classify(error);
        assert_eq!((class, code), ("workflow_validation", 6));

        let conflict = ServiceError::Repository(RepositoryError::Conflict("stale".to_string()));
        assert_eq!(classify(conflict).0, "workflow_conflict");
    }

    #[test]
    fn storage_failures_are_persistence_errors() {
        let error = ServiceError::Repository(RepositoryError::Decode("bad row".to_string()));
        let (class, message, code) = classify(error);
        assert_eq!((class, code), ("persistence", 5));
        assert!(message.contains("bad row"));

        let missing = ServiceError::NotFound { entity: "expense", id: "x".to_string() };
        assert_eq!(classify(missing).0, "not_found");
    }
}
