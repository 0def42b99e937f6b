use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::company::CompanyId;
use crate::domain::rule::RuleId;
use crate::domain::user::UserId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExpenseId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExpenseStatus {
    Draft,
    Submitted,
    #[serde(rename = "Under Review")]
    UnderReview,
    #[serde(rename = "Partially Approved")]
    PartiallyApproved,
    Approved,
    Rejected,
    Cancelled,
}

impl ExpenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::Submitted => "Submitted",
            Self::UnderReview => "Under Review",
            Self::PartiallyApproved => "Partially Approved",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
            Self::Cancelled => "Cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "submitted" => Some(Self::Submitted),
            "under review" | "under_review" => Some(Self::UnderReview),
            "partially approved" | "partially_approved" => Some(Self::PartiallyApproved),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Cancelled)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExpenseCategory {
    Travel,
    Meals,
    #[serde(rename = "Office Supplies")]
    OfficeSupplies,
    Equipment,
    Software,
    Marketing,
    Training,
    Entertainment,
    Other,
}

impl ExpenseCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Travel => "Travel",
            Self::Meals => "Meals",
            Self::OfficeSupplies => "Office Supplies",
            Self::Equipment => "Equipment",
            Self::Software => "Software",
            Self::Marketing => "Marketing",
            Self::Training => "Training",
            Self::Entertainment => "Entertainment",
            Self::Other => "Other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "travel" => Some(Self::Travel),
            "meals" => Some(Self::Meals),
            "office supplies" | "office_supplies" => Some(Self::OfficeSupplies),
            "equipment" => Some(Self::Equipment),
            "software" => Some(Self::Software),
            "marketing" => Some(Self::Marketing),
            "training" => Some(Self::Training),
            "entertainment" => Some(Self::Entertainment),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub company_id: CompanyId,
    pub submitted_by: UserId,
    pub title: String,
    pub amount: Decimal,
    pub currency: String,
    /// Amount in the company currency; conversion happens before submission.
    pub converted_amount: Decimal,
    pub category: ExpenseCategory,
    pub expense_date: NaiveDate,
    pub status: ExpenseStatus,
    pub approval_step: u32,
    pub current_approver_id: Option<UserId>,
    pub rule_applied: Option<RuleId>,
    pub total_approvers: u32,
    pub approved_count: u32,
    pub rejected_count: u32,
    pub rejection_reason: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    /// Bumped on every workflow mutation; storage rejects writes carrying a stale value.
    pub state_version: u32,
}

impl Expense {
    pub fn can_transition_to(&self, next: ExpenseStatus) -> bool {
        matches!(
            (self.status, next),
            (ExpenseStatus::Draft, ExpenseStatus::Submitted)
                | (ExpenseStatus::Submitted, ExpenseStatus::UnderReview)
                | (ExpenseStatus::Submitted, ExpenseStatus::Approved)
                | (ExpenseStatus::UnderReview, ExpenseStatus::Approved)
                | (ExpenseStatus::UnderReview, ExpenseStatus::Rejected)
                | (ExpenseStatus::PartiallyApproved, ExpenseStatus::Approved)
                | (ExpenseStatus::PartiallyApproved, ExpenseStatus::Rejected)
                | (ExpenseStatus::Draft, ExpenseStatus::Cancelled)
                | (ExpenseStatus::Submitted, ExpenseStatus::Cancelled)
                | (ExpenseStatus::UnderReview, ExpenseStatus::Cancelled)
        )
    }

    pub fn transition_to(&mut self, next: ExpenseStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidExpenseTransition { from: self.status, to: next })
    }
}
