use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::expense::ExpenseId;
use crate::domain::user::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApprovalFlowId(pub String);

impl ApprovalFlowId {
    pub fn generate() -> Self {
        Self(format!("AF-{}", Uuid::new_v4()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApproverType {
    Manager,
    Finance,
    Admin,
    Director,
    #[serde(rename = "CFO")]
    Cfo,
    #[serde(rename = "CEO")]
    Ceo,
    #[serde(rename = "HR")]
    Hr,
    #[serde(rename = "Department Head")]
    DepartmentHead,
}

impl ApproverType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manager => "Manager",
            Self::Finance => "Finance",
            Self::Admin => "Admin",
            Self::Director => "Director",
            Self::Cfo => "CFO",
            Self::Ceo => "CEO",
            Self::Hr => "HR",
            Self::DepartmentHead => "Department Head",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "manager" => Some(Self::Manager),
            "finance" => Some(Self::Finance),
            "admin" => Some(Self::Admin),
            "director" => Some(Self::Director),
            "cfo" => Some(Self::Cfo),
            "ceo" => Some(Self::Ceo),
            "hr" => Some(Self::Hr),
            "department head" | "department_head" => Some(Self::DepartmentHead),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowStatus {
    Pending,
    Approved,
    Rejected,
    Skipped,
    Delegated,
}

impl FlowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Skipped => "skipped",
            Self::Delegated => "delegated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "skipped" => Some(Self::Skipped),
            "delegated" => Some(Self::Delegated),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl FlowPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }
}

/// One approver's obligation at one step of one expense.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalFlow {
    pub id: ApprovalFlowId,
    pub expense_id: ExpenseId,
    pub approver_id: UserId,
    pub approval_step: u32,
    pub approver_type: ApproverType,
    pub status: FlowStatus,
    pub is_required: bool,
    pub action_date: Option<DateTime<Utc>>,
    pub comments: Option<String>,
    pub delegated_to: Option<UserId>,
    pub delegated_at: Option<DateTime<Utc>>,
    pub delegation_reason: Option<String>,
    pub auto_approved: bool,
    pub auto_approval_reason: Option<String>,
    pub due_date: DateTime<Utc>,
    pub priority: FlowPriority,
    pub created_at: DateTime<Utc>,
}

impl ApprovalFlow {
    pub fn is_pending(&self) -> bool {
        self.status == FlowStatus::Pending
    }

    /// Delegated and skipped rows no longer carry an obligation of their own.
    pub fn counts_toward_outcome(&self) -> bool {
        !matches!(self.status, FlowStatus::Delegated | FlowStatus::Skipped)
    }
}
