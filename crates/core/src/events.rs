use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::expense::{ExpenseId, ExpenseStatus};
use crate::domain::user::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowEventKind {
    ApproverAssigned { approver_id: UserId, step: u32, due_date: DateTime<Utc> },
    StepCompleted { step: u32 },
    ExpenseFinalized { status: ExpenseStatus },
}

impl WorkflowEventKind {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::ApproverAssigned { .. } => "workflow.approver_assigned",
            Self::StepCompleted { .. } => "workflow.step_completed",
            Self::ExpenseFinalized { .. } => "workflow.expense_finalized",
        }
    }
}

/// Notification-facing record of a workflow change. Delivery is up to the sink.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub event_id: String,
    pub expense_id: ExpenseId,
    pub kind: WorkflowEventKind,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl WorkflowEvent {
    pub fn new(expense_id: ExpenseId, kind: WorkflowEventKind, occurred_at: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            expense_id,
            kind,
            metadata: BTreeMap::new(),
            occurred_at,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub trait WorkflowEventSink: Send + Sync {
    fn emit(&self, event: WorkflowEvent);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopEventSink;

impl WorkflowEventSink for NoopEventSink {
    fn emit(&self, _event: WorkflowEvent) {}
}

#[derive(Clone, Default)]
pub struct InMemoryEventSink {
    events: Arc<Mutex<Vec<WorkflowEvent>>>,
}

impl InMemoryEventSink {
    pub fn events(&self) -> Vec<WorkflowEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn event_names(&self) -> Vec<&'static str> {
        self.events().iter().map(|event| event.kind.event_name()).collect()
    }
}

impl WorkflowEventSink for InMemoryEventSink {
    fn emit(&self, event: WorkflowEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
