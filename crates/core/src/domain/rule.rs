use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::company::CompanyId;
use crate::domain::flow::ApproverType;
use crate::domain::user::{UserId, UserRole};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleType {
    Amount,
    Category,
    Department,
    Percentage,
    #[serde(rename = "Specific_Approver")]
    SpecificApprover,
    Hybrid,
    #[serde(rename = "Role_Based")]
    RoleBased,
    #[serde(rename = "Time_Based")]
    TimeBased,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Amount => "Amount",
            Self::Category => "Category",
            Self::Department => "Department",
            Self::Percentage => "Percentage",
            Self::SpecificApprover => "Specific_Approver",
            Self::Hybrid => "Hybrid",
            Self::RoleBased => "Role_Based",
            Self::TimeBased => "Time_Based",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "amount" => Some(Self::Amount),
            "category" => Some(Self::Category),
            "department" => Some(Self::Department),
            "percentage" => Some(Self::Percentage),
            "specific_approver" => Some(Self::SpecificApprover),
            "hybrid" => Some(Self::Hybrid),
            "role_based" => Some(Self::RoleBased),
            "time_based" => Some(Self::TimeBased),
            _ => None,
        }
    }
}

/// Expense or submitter attribute a rule condition inspects.
///
/// Names outside the known set are kept as `Unrecognized` so a bad row still
/// loads; such conditions never match.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionField {
    Amount,
    ConvertedAmount,
    Category,
    Department,
    SubmitterRole,
    Currency,
    ExpenseDate,
    Unrecognized(String),
}

impl ConditionField {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Amount => "amount",
            Self::ConvertedAmount => "converted_amount",
            Self::Category => "category",
            Self::Department => "department",
            Self::SubmitterRole => "submitter_role",
            Self::Currency => "currency",
            Self::ExpenseDate => "expense_date",
            Self::Unrecognized(raw) => raw.as_str(),
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "amount" => Self::Amount,
            "converted_amount" => Self::ConvertedAmount,
            "category" => Self::Category,
            "department" => Self::Department,
            "submitter_role" => Self::SubmitterRole,
            "currency" => Self::Currency,
            "expense_date" => Self::ExpenseDate,
            _ => Self::Unrecognized(value.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterEqual,
    LessEqual,
    In,
    NotIn,
    Between,
    Unrecognized(String),
}

impl ConditionOperator {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
            Self::GreaterEqual => "greater_equal",
            Self::LessEqual => "less_equal",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::Between => "between",
            Self::Unrecognized(raw) => raw.as_str(),
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "equals" => Self::Equals,
            "not_equals" => Self::NotEquals,
            "greater_than" => Self::GreaterThan,
            "less_than" => Self::LessThan,
            "greater_equal" => Self::GreaterEqual,
            "less_equal" => Self::LessEqual,
            "in" => Self::In,
            "not_in" => Self::NotIn,
            "between" => Self::Between,
            _ => Self::Unrecognized(value.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCondition {
    pub field: ConditionField,
    pub operator: ConditionOperator,
    pub value: String,
    pub value_2: Option<String>,
}

fn default_required() -> bool {
    true
}

fn default_step_type() -> ApproverType {
    ApproverType::Admin
}

/// Abstract approver selector stored in a rule's `approval_steps` JSON.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    #[serde(rename = "type", default = "default_step_type")]
    pub approver_type: ApproverType,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<UserRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<u32>,
}

impl StepDefinition {
    pub fn for_role(approver_type: ApproverType, role: UserRole) -> Self {
        Self {
            approver_type,
            required: true,
            user_id: None,
            role: Some(role),
            department: None,
            days: None,
        }
    }

    pub fn for_user(approver_type: ApproverType, user_id: UserId) -> Self {
        Self {
            approver_type,
            required: true,
            user_id: Some(user_id),
            role: None,
            department: None,
            days: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoApproveConditions {
    #[serde(default)]
    pub cfo_approval: bool,
    #[serde(default)]
    pub director_approval: bool,
}

impl AutoApproveConditions {
    pub fn is_empty(&self) -> bool {
        !self.cfo_approval && !self.director_approval
    }

    /// Approver types whose single approval finalizes the expense.
    pub fn deciding_types(&self) -> Vec<ApproverType> {
        let mut types = Vec::new();
        if self.cfo_approval {
            types.push(ApproverType::Cfo);
        }
        if self.director_approval {
            types.push(ApproverType::Director);
        }
        types
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRule {
    pub id: RuleId,
    pub company_id: CompanyId,
    pub name: String,
    pub description: Option<String>,
    pub rule_type: RuleType,
    pub condition: Option<RuleCondition>,
    pub approval_steps: Vec<StepDefinition>,
    pub percentage_required: Option<u8>,
    pub specific_approver_id: Option<UserId>,
    pub auto_approve_conditions: AutoApproveConditions,
    pub is_manager_required: bool,
    pub skip_manager_if_higher_role: bool,
    pub parallel_approval: bool,
    pub priority: i32,
    pub is_active: bool,
    pub effective_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub usage_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalRule {
    /// Active and inside its effective/expiry window on `today` (both ends inclusive).
    pub fn is_in_effect(&self, today: NaiveDate) -> bool {
        self.is_active
            && self.effective_date.map_or(true, |effective| effective <= today)
            && self.expiry_date.map_or(true, |expiry| expiry >= today)
    }

    /// Threshold used by percentage rules; a percentage rule without one demands unanimity.
    pub fn required_percentage(&self) -> u8 {
        self.percentage_required.unwrap_or(100).clamp(1, 100)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use crate::domain::company::CompanyId;
    use crate::domain::flow::ApproverType;

    use super::{
        ApprovalRule, AutoApproveConditions, ConditionField, ConditionOperator, RuleId, RuleType,
        StepDefinition,
    };

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn rule() -> ApprovalRule {
        ApprovalRule {
            id: RuleId("rule-1".to_string()),
            company_id: CompanyId("acme".to_string()),
            name: "Travel over budget".to_string(),
            description: None,
            rule_type: RuleType::Amount,
            condition: None,
            approval_steps: Vec::new(),
            percentage_required: None,
            specific_approver_id: None,
            auto_approve_conditions: AutoApproveConditions::default(),
            is_manager_required: true,
            skip_manager_if_higher_role: false,
            parallel_approval: false,
            priority: 1,
            is_active: true,
            effective_date: None,
            expiry_date: None,
            usage_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn effective_window_is_inclusive_on_both_ends() {
        let mut windowed = rule();
        windowed.effective_date = Some(date(2026, 1, 1));
        windowed.expiry_date = Some(date(2026, 6, 30));

        assert!(windowed.is_in_effect(date(2026, 1, 1)));
        assert!(windowed.is_in_effect(date(2026, 6, 30)));
        assert!(!windowed.is_in_effect(date(2025, 12, 31)));
        assert!(!windowed.is_in_effect(date(2026, 7, 1)));
    }

    #[test]
    fn inactive_rule_is_never_in_effect() {
        let mut inactive = rule();
        inactive.is_active = false;
        assert!(!inactive.is_in_effect(date(2026, 3, 1)));
    }

    #[test]
    fn unknown_condition_names_are_preserved() {
        assert_eq!(ConditionField::parse("Converted_Amount"), ConditionField::ConvertedAmount);
        assert_eq!(
            ConditionField::parse("project_code"),
            ConditionField::Unrecognized("project_code".to_string())
        );
        assert_eq!(
            ConditionOperator::parse("contains"),
            ConditionOperator::Unrecognized("contains".to_string())
        );
        assert_eq!(ConditionOperator::parse("contains").as_str(), "contains");
    }

    #[test]
    fn step_definition_json_uses_defaults() {
        let step: StepDefinition =
            serde_json::from_str(r#"{"role":"Manager","department":"Finance"}"#).expect("parse");
        assert_eq!(step.approver_type, ApproverType::Admin);
        assert!(step.required);
        assert_eq!(step.department.as_deref(), Some("Finance"));

        let optional: StepDefinition =
            serde_json::from_str(r#"{"type":"CFO","required":false,"days":1}"#).expect("parse");
        assert_eq!(optional.approver_type, ApproverType::Cfo);
        assert!(!optional.required);
        assert_eq!(optional.days, Some(1));
    }

    #[test]
    fn percentage_threshold_defaults_to_unanimous() {
        let mut percentage = rule();
        percentage.rule_type = RuleType::Percentage;
        assert_eq!(percentage.required_percentage(), 100);
        percentage.percentage_required = Some(60);
        assert_eq!(percentage.required_percentage(), 60);
    }

    #[test]
    fn auto_approve_conditions_list_deciding_types() {
        let conditions = AutoApproveConditions { cfo_approval: true, director_approval: true };
        assert_eq!(conditions.deciding_types(), vec![ApproverType::Cfo, ApproverType::Director]);
        assert!(AutoApproveConditions::default().is_empty());
        assert_eq!(RuleType::parse("Specific_Approver"), Some(RuleType::SpecificApprover));
    }
}
