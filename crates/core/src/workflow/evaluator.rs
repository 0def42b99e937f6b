//! Final-approval decision over an expense's approval rows.

use serde::{Deserialize, Serialize};

use crate::domain::expense::ExpenseStatus;
use crate::domain::flow::{ApprovalFlow, FlowStatus};
use crate::domain::rule::{ApprovalRule, RuleType};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn status(self) -> ExpenseStatus {
        match self {
            Self::Approved => ExpenseStatus::Approved,
            Self::Rejected => ExpenseStatus::Rejected,
        }
    }
}

/// Outcome once no step is left to run.
///
/// Percentage rules compare approved rows against every row except delegated
/// ones; otherwise a met auto-approval condition wins, and failing that every
/// required row must be approved. No rows at all counts as approved.
pub fn is_approved(flows: &[ApprovalFlow], rule: Option<&ApprovalRule>) -> bool {
    if let Some(rule) = rule {
        if rule.rule_type == RuleType::Percentage {
            let tally = Tally::of(flows);
            return tally.meets(tally.approved, rule.required_percentage());
        }
        if auto_approval_met(flows, rule) {
            return true;
        }
    }

    flows
        .iter()
        .filter(|flow| flow.is_required && flow.counts_toward_outcome())
        .all(|flow| flow.status == FlowStatus::Approved)
}

/// Decision that can be taken before every step has run, if any.
pub fn early_decision(flows: &[ApprovalFlow], rule: Option<&ApprovalRule>) -> Option<Decision> {
    if let Some(rule) = rule {
        if rule.rule_type == RuleType::Percentage {
            let tally = Tally::of(flows);
            let threshold = rule.required_percentage();
            if tally.meets(tally.approved, threshold) {
                return Some(Decision::Approved);
            }
            if !tally.meets(tally.approved + tally.pending, threshold) {
                return Some(Decision::Rejected);
            }
            return None;
        }
        if auto_approval_met(flows, rule) {
            return Some(Decision::Approved);
        }
    }

    let required_rejected = flows
        .iter()
        .any(|flow| flow.is_required && flow.status == FlowStatus::Rejected);
    required_rejected.then_some(Decision::Rejected)
}

fn auto_approval_met(flows: &[ApprovalFlow], rule: &ApprovalRule) -> bool {
    let deciding = rule.auto_approve_conditions.deciding_types();
    !deciding.is_empty()
        && flows.iter().any(|flow| {
            flow.status == FlowStatus::Approved && deciding.contains(&flow.approver_type)
        })
}

#[derive(Clone, Copy, Debug, Default)]
struct Tally {
    total: usize,
    approved: usize,
    pending: usize,
}

impl Tally {
    fn of(flows: &[ApprovalFlow]) -> Self {
        flows.iter().filter(|flow| flow.status != FlowStatus::Delegated).fold(
            Self::default(),
            |mut tally, flow| {
                tally.total += 1;
                match flow.status {
                    FlowStatus::Approved => tally.approved += 1,
                    FlowStatus::Pending => tally.pending += 1,
                    _ => {}
                }
                tally
            },
        )
    }

    fn meets(&self, approvals: usize, threshold: u8) -> bool {
        if self.total == 0 {
            return true;
        }
        approvals * 100 >= usize::from(threshold) * self.total
    }
}
