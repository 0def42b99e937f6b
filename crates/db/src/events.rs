use tracing::info;

use claimflow_core::events::{WorkflowEvent, WorkflowEventKind, WorkflowEventSink};

/// Publishes workflow events as structured log lines.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventSink;

impl WorkflowEventSink for TracingEventSink {
    fn emit(&self, event: WorkflowEvent) {
        let correlation_id =
            event.metadata.get("correlation_id").map(String::as_str).unwrap_or("unknown");
        match &event.kind {
            WorkflowEventKind::ApproverAssigned { approver_id, step, due_date } => info!(
                event_name = event.kind.event_name(),
                event_id = %event.event_id,
                correlation_id,
                expense_id = %event.expense_id.0,
                approver_id = %approver_id.0,
                step,
                due_date = %due_date.to_rfc3339(),
                "approver assigned"
            ),
            WorkflowEventKind::StepCompleted { step } => info!(
                event_name = event.kind.event_name(),
                event_id = %event.event_id,
                correlation_id,
                expense_id = %event.expense_id.0,
                step,
                "approval step completed"
            ),
            WorkflowEventKind::ExpenseFinalized { status } => info!(
                event_name = event.kind.event_name(),
                event_id = %event.event_id,
                correlation_id,
                expense_id = %event.expense_id.0,
                status = status.as_str(),
                "expense finalized"
            ),
        }
    }
}
