//! Step progression: applying approver actions and advancing an expense through its steps.
//!
//! Everything here works on in-memory copies. Callers persist the returned
//! [`ActionOutcome`] in one transaction guarded by the expense's `state_version`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::expense::{Expense, ExpenseStatus};
use crate::domain::flow::{ApprovalFlow, ApprovalFlowId, FlowStatus};
use crate::domain::rule::ApprovalRule;
use crate::domain::user::UserId;
use crate::events::{WorkflowEvent, WorkflowEventKind};
use crate::workflow::evaluator::{early_decision, is_approved, Decision};
use crate::workflow::resolver::CompanyDirectory;
use crate::workflow::WorkflowError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ApprovalAction {
    Approve { comments: Option<String> },
    Reject { comments: Option<String> },
    Delegate { delegate_to: UserId, reason: Option<String> },
}

impl ApprovalAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Approve { .. } => "approve",
            Self::Reject { .. } => "reject",
            Self::Delegate { .. } => "delegate",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProgressOutcome {
    NoChange,
    Advanced { from_step: u32, to_step: u32 },
    Finalized { status: ExpenseStatus },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Progress {
    pub outcome: ProgressOutcome,
    pub events: Vec<WorkflowEvent>,
}

/// Everything an action changed, ready to be committed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionOutcome {
    pub expense: Expense,
    /// `state_version` the stored expense must still carry for the commit to apply.
    pub expected_version: u32,
    pub acted_flow: Option<ApprovalFlowId>,
    /// Rows that were `Pending` before and changed status.
    pub updated_flows: Vec<ApprovalFlow>,
    pub inserted_flows: Vec<ApprovalFlow>,
    pub events: Vec<WorkflowEvent>,
    pub progress: ProgressOutcome,
}

impl ActionOutcome {
    pub fn is_empty(&self) -> bool {
        self.updated_flows.is_empty()
            && self.inserted_flows.is_empty()
            && self.progress == ProgressOutcome::NoChange
            && self.acted_flow.is_none()
    }
}

/// Applies one approver action and runs progression on the result.
///
/// `flows` must hold every row of the expense in storage order.
pub fn apply_action(
    expense: &Expense,
    flows: &[ApprovalFlow],
    rule: Option<&ApprovalRule>,
    directory: &CompanyDirectory,
    approver: &UserId,
    action: ApprovalAction,
    now: DateTime<Utc>,
) -> Result<ActionOutcome, WorkflowError> {
    if expense.status.is_terminal() {
        return Err(WorkflowError::ConcurrentFinalization {
            expense_id: expense.id.clone(),
            status: expense.status,
        });
    }
    if !is_reviewable(expense.status) {
        return Err(WorkflowError::ExpenseNotSubmitted {
            expense_id: expense.id.clone(),
            status: expense.status,
        });
    }

    let index = locate_actionable_row(expense, flows, approver)?;
    let mut working_expense = expense.clone();
    let mut working_flows = flows.to_vec();
    let mut events = Vec::new();

    match action {
        ApprovalAction::Approve { comments } => {
            let row = &mut working_flows[index];
            row.status = FlowStatus::Approved;
            row.action_date = Some(now);
            row.comments = comments;
            working_expense.approved_count += 1;
        }
        ApprovalAction::Reject { comments } => {
            let row = &mut working_flows[index];
            row.status = FlowStatus::Rejected;
            row.action_date = Some(now);
            row.comments = comments.clone();
            working_expense.rejected_count += 1;
            working_expense.rejection_reason = comments;
        }
        ApprovalAction::Delegate { delegate_to, reason } => {
            let replacement = delegate_row(
                expense,
                &mut working_flows,
                index,
                directory,
                &delegate_to,
                reason,
                now,
            )?;
            if working_expense.current_approver_id.as_ref() == Some(approver) {
                working_expense.current_approver_id = Some(delegate_to.clone());
            }
            events.push(WorkflowEvent::new(
                expense.id.clone(),
                WorkflowEventKind::ApproverAssigned {
                    approver_id: delegate_to,
                    step: replacement.approval_step,
                    due_date: replacement.due_date,
                },
                now,
            ));
            working_flows.push(replacement);
            working_expense.total_approvers = count_u32(working_flows.len());
        }
    }

    let acted_flow = Some(working_flows[index].id.clone());
    let progress = progress(&mut working_expense, &mut working_flows, rule, now);
    events.extend(progress.events);
    working_expense.state_version = expense.state_version + 1;

    let (updated_flows, inserted_flows) = diff_flows(flows, working_flows);
    Ok(ActionOutcome {
        expense: working_expense,
        expected_version: expense.state_version,
        acted_flow,
        updated_flows,
        inserted_flows,
        events,
        progress: progress.outcome,
    })
}

/// Re-runs progression without an action, e.g. after rows were repaired by hand.
pub fn reevaluate(
    expense: &Expense,
    flows: &[ApprovalFlow],
    rule: Option<&ApprovalRule>,
    now: DateTime<Utc>,
) -> ActionOutcome {
    let mut working_expense = expense.clone();
    let mut working_flows = flows.to_vec();
    let progress = progress(&mut working_expense, &mut working_flows, rule, now);
    if progress.outcome != ProgressOutcome::NoChange {
        working_expense.state_version = expense.state_version + 1;
    }

    let (updated_flows, inserted_flows) = diff_flows(flows, working_flows);
    ActionOutcome {
        expense: working_expense,
        expected_version: expense.state_version,
        acted_flow: None,
        updated_flows,
        inserted_flows,
        events: progress.events,
        progress: progress.outcome,
    }
}

/// Advances the expense as far as its rows allow.
///
/// Early decisions win first; otherwise a step with no `Pending` row hands
/// over to the next higher step, and when none is left the final evaluator
/// decides. Calling this again on a settled state changes nothing.
pub fn progress(
    expense: &mut Expense,
    flows: &mut [ApprovalFlow],
    rule: Option<&ApprovalRule>,
    now: DateTime<Utc>,
) -> Progress {
    let mut events = Vec::new();
    if !is_reviewable(expense.status) {
        return Progress { outcome: ProgressOutcome::NoChange, events };
    }

    if let Some(decision) = early_decision(flows, rule) {
        return finalize(expense, flows, decision, now, events);
    }

    let starting_step = expense.approval_step;
    loop {
        let current = expense.approval_step;
        let step_open =
            flows.iter().any(|flow| flow.approval_step == current && flow.is_pending());
        if step_open {
            break;
        }

        let next_step =
            flows.iter().map(|flow| flow.approval_step).filter(|step| *step > current).min();
        let Some(next_step) = next_step else {
            let decision =
                if is_approved(flows, rule) { Decision::Approved } else { Decision::Rejected };
            return finalize(expense, flows, decision, now, events);
        };

        if current > 0 {
            events.push(WorkflowEvent::new(
                expense.id.clone(),
                WorkflowEventKind::StepCompleted { step: current },
                now,
            ));
        }
        expense.approval_step = next_step;
        expense.current_approver_id = flows
            .iter()
            .filter(|flow| flow.approval_step == next_step)
            .find(|flow| flow.is_pending())
            .or_else(|| flows.iter().find(|flow| flow.approval_step == next_step))
            .map(|flow| flow.approver_id.clone());
        let assigned = flows
            .iter()
            .filter(|flow| flow.approval_step == next_step && flow.is_pending())
            .map(|flow| {
                WorkflowEvent::new(
                    expense.id.clone(),
                    WorkflowEventKind::ApproverAssigned {
                        approver_id: flow.approver_id.clone(),
                        step: next_step,
                        due_date: flow.due_date,
                    },
                    now,
                )
            });
        events.extend(assigned);
    }

    let outcome = if expense.approval_step == starting_step {
        ProgressOutcome::NoChange
    } else {
        ProgressOutcome::Advanced { from_step: starting_step, to_step: expense.approval_step }
    };
    Progress { outcome, events }
}

fn finalize(
    expense: &mut Expense,
    flows: &mut [ApprovalFlow],
    decision: Decision,
    now: DateTime<Utc>,
    mut events: Vec<WorkflowEvent>,
) -> Progress {
    for flow in flows.iter_mut().filter(|flow| flow.is_pending()) {
        flow.status = FlowStatus::Skipped;
    }

    let status = decision.status();
    expense.status = status;
    expense.current_approver_id = None;
    if decision == Decision::Approved {
        expense.approved_at = Some(now);
    }

    events.push(WorkflowEvent::new(
        expense.id.clone(),
        WorkflowEventKind::ExpenseFinalized { status },
        now,
    ));
    Progress { outcome: ProgressOutcome::Finalized { status }, events }
}

fn is_reviewable(status: ExpenseStatus) -> bool {
    matches!(status, ExpenseStatus::UnderReview | ExpenseStatus::PartiallyApproved)
}

fn locate_actionable_row(
    expense: &Expense,
    flows: &[ApprovalFlow],
    approver: &UserId,
) -> Result<usize, WorkflowError> {
    let mine: Vec<(usize, &ApprovalFlow)> = flows
        .iter()
        .enumerate()
        .filter(|(_, flow)| flow.expense_id == expense.id && &flow.approver_id == approver)
        .collect();

    if mine.is_empty() {
        return Err(WorkflowError::NoPendingApproval {
            expense_id: expense.id.clone(),
            approver_id: approver.clone(),
        });
    }

    if let Some((index, _)) = mine
        .iter()
        .find(|(_, flow)| flow.is_pending() && flow.approval_step == expense.approval_step)
    {
        return Ok(*index);
    }

    if let Some((_, flow)) = mine.iter().find(|(_, flow)| flow.is_pending()) {
        return Err(WorkflowError::StepNotActive {
            flow_id: flow.id.clone(),
            step: flow.approval_step,
            current_step: expense.approval_step,
        });
    }

    let settled = mine
        .iter()
        .find(|(_, flow)| flow.approval_step == expense.approval_step)
        .or_else(|| mine.last())
        .map(|(_, flow)| *flow);
    match settled {
        Some(flow) => Err(WorkflowError::DuplicateApprovalAction {
            flow_id: flow.id.clone(),
            status: flow.status,
        }),
        None => Err(WorkflowError::NoPendingApproval {
            expense_id: expense.id.clone(),
            approver_id: approver.clone(),
        }),
    }
}

fn delegate_row(
    expense: &Expense,
    flows: &mut [ApprovalFlow],
    index: usize,
    directory: &CompanyDirectory,
    delegate_to: &UserId,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<ApprovalFlow, WorkflowError> {
    let step = flows[index].approval_step;
    if delegate_to == &expense.submitted_by {
        return Err(WorkflowError::InvalidDelegation {
            reason: "the submitter cannot approve their own expense".to_string(),
        });
    }
    if !directory.contains(delegate_to) {
        return Err(WorkflowError::InvalidDelegation {
            reason: format!("`{}` is not an active user of this company", delegate_to.0),
        });
    }
    if flows.iter().any(|flow| flow.approval_step == step && &flow.approver_id == delegate_to) {
        return Err(WorkflowError::InvalidDelegation {
            reason: format!("`{}` is already an approver at step {step}", delegate_to.0),
        });
    }

    let original = &mut flows[index];
    original.status = FlowStatus::Delegated;
    original.action_date = Some(now);
    original.delegated_to = Some(delegate_to.clone());
    original.delegated_at = Some(now);
    original.delegation_reason = reason;

    Ok(ApprovalFlow {
        id: ApprovalFlowId::generate(),
        expense_id: original.expense_id.clone(),
        approver_id: delegate_to.clone(),
        approval_step: step,
        approver_type: original.approver_type,
        status: FlowStatus::Pending,
        is_required: original.is_required,
        action_date: None,
        comments: None,
        delegated_to: None,
        delegated_at: None,
        delegation_reason: None,
        auto_approved: false,
        auto_approval_reason: None,
        due_date: original.due_date,
        priority: original.priority,
        created_at: now,
    })
}

fn diff_flows(
    before: &[ApprovalFlow],
    after: Vec<ApprovalFlow>,
) -> (Vec<ApprovalFlow>, Vec<ApprovalFlow>) {
    let mut updated = Vec::new();
    let mut inserted = Vec::new();
    for flow in after {
        match before.iter().find(|original| original.id == flow.id) {
            Some(original) if original != &flow => updated.push(flow),
            Some(_) => {}
            None => inserted.push(flow),
        }
    }
    (updated, inserted)
}

pub(crate) fn count_u32(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}
