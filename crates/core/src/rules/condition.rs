//! Rule condition evaluation.
//!
//! A condition compares one expense or submitter attribute against the
//! rule's stored value(s). Numeric operators coerce both sides to `f64`,
//! `expense_date` compares as a calendar date and everything else compares
//! as text. Unrecognized fields and operators never match.

use std::cmp::Ordering;

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;

use crate::domain::expense::Expense;
use crate::domain::rule::{ApprovalRule, ConditionField, ConditionOperator, RuleCondition};
use crate::domain::user::User;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConditionError {
    #[error("condition value `{value}` is not valid for operator `{operator}`: {reason}")]
    InvalidConditionValue { operator: String, value: String, reason: String },
    #[error("unrecognized condition field `{0}`")]
    UnrecognizedField(String),
    #[error("unrecognized condition operator `{0}`")]
    UnrecognizedOperator(String),
}

/// Resolved value of a condition field.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    Date(NaiveDate),
    /// The attribute is optional and unset (e.g. a submitter without a department).
    Missing,
}

impl FieldValue {
    fn from_decimal(value: Decimal) -> Self {
        value.to_f64().map(Self::Number).unwrap_or(Self::Missing)
    }

    fn compare_raw(&self, raw: &str) -> Option<Ordering> {
        let raw = raw.trim();
        match self {
            Self::Number(number) => {
                raw.parse::<f64>().ok().and_then(|other| number.partial_cmp(&other))
            }
            Self::Text(text) => {
                let left = text.trim().parse::<f64>().ok()?;
                let right = raw.parse::<f64>().ok()?;
                left.partial_cmp(&right)
            }
            Self::Date(date) => {
                NaiveDate::parse_from_str(raw, DATE_FORMAT).ok().map(|other| date.cmp(&other))
            }
            Self::Missing => None,
        }
    }

    fn equals_raw(&self, raw: &str) -> bool {
        match self {
            Self::Number(_) | Self::Date(_) => self.compare_raw(raw) == Some(Ordering::Equal),
            Self::Text(text) => text.as_str() == raw.trim(),
            Self::Missing => false,
        }
    }

    fn equals_item(&self, item: &Value) -> bool {
        match item {
            Value::String(raw) => self.equals_raw(raw),
            Value::Number(number) => self.equals_raw(&number.to_string()),
            _ => false,
        }
    }
}

pub fn resolve_field(
    field: &ConditionField,
    expense: &Expense,
    submitter: &User,
) -> Option<FieldValue> {
    let value = match field {
        ConditionField::Amount => FieldValue::from_decimal(expense.amount),
        ConditionField::ConvertedAmount => FieldValue::from_decimal(expense.converted_amount),
        ConditionField::Category => FieldValue::Text(expense.category.as_str().to_string()),
        ConditionField::Department => {
            submitter.department.clone().map(FieldValue::Text).unwrap_or(FieldValue::Missing)
        }
        ConditionField::SubmitterRole => FieldValue::Text(submitter.role.as_str().to_string()),
        ConditionField::Currency => FieldValue::Text(expense.currency.clone()),
        ConditionField::ExpenseDate => FieldValue::Date(expense.expense_date),
        ConditionField::Unrecognized(_) => return None,
    };
    Some(value)
}

/// Whether `rule` applies to the expense. A rule without a condition applies to everything.
pub fn matches(rule: &ApprovalRule, expense: &Expense, submitter: &User) -> bool {
    match &rule.condition {
        Some(condition) => condition_matches(condition, expense, submitter),
        None => true,
    }
}

pub fn condition_matches(condition: &RuleCondition, expense: &Expense, submitter: &User) -> bool {
    let Some(field_value) = resolve_field(&condition.field, expense, submitter) else {
        return false;
    };

    evaluate_condition(
        &field_value,
        &condition.operator,
        &condition.value,
        condition.value_2.as_deref(),
    )
}

pub fn evaluate_condition(
    field_value: &FieldValue,
    operator: &ConditionOperator,
    value: &str,
    value_2: Option<&str>,
) -> bool {
    match operator {
        ConditionOperator::Equals => field_value.equals_raw(value),
        ConditionOperator::NotEquals => !field_value.equals_raw(value),
        ConditionOperator::GreaterThan => field_value.compare_raw(value) == Some(Ordering::Greater),
        ConditionOperator::LessThan => field_value.compare_raw(value) == Some(Ordering::Less),
        ConditionOperator::GreaterEqual => matches!(
            field_value.compare_raw(value),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        ConditionOperator::LessEqual => {
            matches!(field_value.compare_raw(value), Some(Ordering::Less | Ordering::Equal))
        }
        ConditionOperator::In => match parse_list(operator, value) {
            Ok(items) => items.iter().any(|item| field_value.equals_item(item)),
            Err(_) => field_value.equals_raw(value),
        },
        ConditionOperator::NotIn => match parse_list(operator, value) {
            Ok(items) => !items.iter().any(|item| field_value.equals_item(item)),
            Err(_) => !field_value.equals_raw(value),
        },
        ConditionOperator::Between => {
            let Some(upper) = value_2 else {
                return false;
            };
            let lower_ok =
                matches!(field_value.compare_raw(value), Some(Ordering::Greater | Ordering::Equal));
            let upper_ok =
                matches!(field_value.compare_raw(upper), Some(Ordering::Less | Ordering::Equal));
            lower_ok && upper_ok
        }
        ConditionOperator::Unrecognized(_) => false,
    }
}

/// Checks a stored condition for values the evaluator would have to work around.
pub fn validate_condition(condition: &RuleCondition) -> Result<(), ConditionError> {
    if let ConditionField::Unrecognized(raw) = &condition.field {
        return Err(ConditionError::UnrecognizedField(raw.clone()));
    }

    let expects_date = condition.field == ConditionField::ExpenseDate;
    let expects_number =
        matches!(condition.field, ConditionField::Amount | ConditionField::ConvertedAmount);
    let check_scalar = |raw: &str| -> Result<(), ConditionError> {
        let raw_trimmed = raw.trim();
        let valid = if expects_date {
            NaiveDate::parse_from_str(raw_trimmed, DATE_FORMAT).is_ok()
        } else if expects_number {
            raw_trimmed.parse::<f64>().is_ok()
        } else {
            true
        };
        if valid {
            Ok(())
        } else {
            Err(ConditionError::InvalidConditionValue {
                operator: condition.operator.as_str().to_string(),
                value: raw.to_string(),
                reason: if expects_date {
                    "expected a YYYY-MM-DD date".to_string()
                } else {
                    "expected a number".to_string()
                },
            })
        }
    };

    match &condition.operator {
        ConditionOperator::Unrecognized(raw) => {
            Err(ConditionError::UnrecognizedOperator(raw.clone()))
        }
        ConditionOperator::In | ConditionOperator::NotIn => {
            parse_list(&condition.operator, &condition.value).map(|_| ())
        }
        ConditionOperator::Between => {
            check_scalar(&condition.value)?;
            match condition.value_2.as_deref() {
                Some(upper) => check_scalar(upper),
                None => Err(ConditionError::InvalidConditionValue {
                    operator: condition.operator.as_str().to_string(),
                    value: condition.value.clone(),
                    reason: "between requires a second value".to_string(),
                }),
            }
        }
        ConditionOperator::Equals
        | ConditionOperator::NotEquals
        | ConditionOperator::GreaterThan
        | ConditionOperator::LessThan
        | ConditionOperator::GreaterEqual
        | ConditionOperator::LessEqual => check_scalar(&condition.value),
    }
}

fn parse_list(operator: &ConditionOperator, raw: &str) -> Result<Vec<Value>, ConditionError> {
    serde_json::from_str::<Vec<Value>>(raw.trim()).map_err(|error| {
        ConditionError::InvalidConditionValue {
            operator: operator.as_str().to_string(),
            value: raw.to_string(),
            reason: error.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use crate::domain::company::CompanyId;
    use crate::domain::expense::{Expense, ExpenseCategory, ExpenseId, ExpenseStatus};
    use crate::domain::rule::{ConditionField, ConditionOperator, RuleCondition};
    use crate::domain::user::{User, UserId, UserRole};

    use super::{
        condition_matches, evaluate_condition, validate_condition, ConditionError, FieldValue,
    };

    fn submitter(department: Option<&str>) -> User {
        User {
            id: UserId("u-emp".to_string()),
            company_id: CompanyId("acme".to_string()),
            name: "Ema Ployee".to_string(),
            email: "ema@acme.test".to_string(),
            role: UserRole::Employee,
            department: department.map(str::to_string),
            manager_id: None,
            is_active: true,
        }
    }

    fn expense(converted_cents: i64, category: ExpenseCategory) -> Expense {
        Expense {
            id: ExpenseId("EXP-1".to_string()),
            company_id: CompanyId("acme".to_string()),
            submitted_by: UserId("u-emp".to_string()),
            title: "Conference travel".to_string(),
            amount: Decimal::new(converted_cents, 2),
            currency: "USD".to_string(),
            converted_amount: Decimal::new(converted_cents, 2),
            category,
            expense_date: NaiveDate::from_ymd_opt(2026, 4, 10).expect("valid date"),
            status: ExpenseStatus::Submitted,
            approval_step: 0,
            current_approver_id: None,
            rule_applied: None,
            total_approvers: 0,
            approved_count: 0,
            rejected_count: 0,
            rejection_reason: None,
            submitted_at: Utc::now(),
            approved_at: None,
            state_version: 0,
        }
    }

    fn condition(field: &str, operator: &str, value: &str, value_2: Option<&str>) -> RuleCondition {
        RuleCondition {
            field: ConditionField::parse(field),
            operator: ConditionOperator::parse(operator),
            value: value.to_string(),
            value_2: value_2.map(str::to_string),
        }
    }

    #[test]
    fn between_is_inclusive_numeric_range() {
        let between = ConditionOperator::Between;
        assert!(evaluate_condition(&FieldValue::Number(50.0), &between, "10", Some("100")));
        assert!(!evaluate_condition(&FieldValue::Number(5.0), &between, "10", Some("100")));
        assert!(evaluate_condition(&FieldValue::Number(10.0), &between, "10", Some("100")));
        assert!(evaluate_condition(&FieldValue::Number(100.0), &between, "10", Some("100")));
        assert!(!evaluate_condition(&FieldValue::Number(50.0), &between, "10", None));
    }

    #[test]
    fn numeric_comparisons_coerce_to_float() {
        let amount = FieldValue::Number(1500.0);
        assert!(evaluate_condition(&amount, &ConditionOperator::GreaterThan, "1000", None));
        assert!(evaluate_condition(&amount, &ConditionOperator::GreaterEqual, "1500.00", None));
        assert!(!evaluate_condition(&amount, &ConditionOperator::LessThan, "1500", None));
        assert!(evaluate_condition(&amount, &ConditionOperator::LessEqual, " 1500 ", None));
        assert!(!evaluate_condition(&amount, &ConditionOperator::GreaterThan, "lots", None));
    }

    #[test]
    fn in_and_not_in_parse_json_lists() {
        let category = FieldValue::Text("Travel".to_string());
        let list = r#"["Meals","Travel"]"#;
        assert!(evaluate_condition(&category, &ConditionOperator::In, list, None));
        assert!(!evaluate_condition(&category, &ConditionOperator::NotIn, list, None));

        let three = FieldValue::Number(3.0);
        assert!(evaluate_condition(&three, &ConditionOperator::In, "[1, 2, 3]", None));
    }

    #[test]
    fn unparsable_list_falls_back_to_raw_comparison() {
        let category = FieldValue::Text("Travel".to_string());
        assert!(evaluate_condition(&category, &ConditionOperator::In, "Travel", None));
        assert!(!evaluate_condition(&category, &ConditionOperator::In, "Meals, Travel", None));
        assert!(evaluate_condition(&category, &ConditionOperator::NotIn, "Meals", None));
    }

    #[test]
    fn unrecognized_operator_and_field_fail_closed() {
        let anything = FieldValue::Text("Travel".to_string());
        assert!(!evaluate_condition(
            &anything,
            &ConditionOperator::Unrecognized("contains".to_string()),
            "Travel",
            None
        ));

        let cond = condition("project_code", "equals", "P-1", None);
        let travel = expense(10_000, ExpenseCategory::Travel);
        assert!(!condition_matches(&cond, &travel, &submitter(None)));
    }

    #[test]
    fn missing_department_only_satisfies_negative_operators() {
        let equals = condition("department", "equals", "Sales", None);
        let not_equals = condition("department", "not_equals", "Sales", None);
        let travel = expense(10_000, ExpenseCategory::Travel);

        assert!(!condition_matches(&equals, &travel, &submitter(None)));
        assert!(condition_matches(&not_equals, &travel, &submitter(None)));
        assert!(condition_matches(&equals, &travel, &submitter(Some("Sales"))));
    }

    #[test]
    fn expense_date_compares_as_calendar_date() {
        let window = condition("expense_date", "between", "2026-04-01", Some("2026-04-30"));
        let before = condition("expense_date", "less_than", "2026-04-10", None);
        let travel = expense(10_000, ExpenseCategory::Travel);

        assert!(condition_matches(&window, &travel, &submitter(None)));
        assert!(!condition_matches(&before, &travel, &submitter(None)));
    }

    #[test]
    fn converted_amount_and_role_fields_resolve_from_expense_and_submitter() {
        let high_value = condition("converted_amount", "greater_than", "1000", None);
        let employees = condition("submitter_role", "in", r#"["Employee"]"#, None);

        let laptop = expense(150_000, ExpenseCategory::Equipment);
        let monitor = expense(50_000, ExpenseCategory::Equipment);
        let lunch = expense(500, ExpenseCategory::Meals);

        assert!(condition_matches(&high_value, &laptop, &submitter(None)));
        assert!(!condition_matches(&high_value, &monitor, &submitter(None)));
        assert!(condition_matches(&employees, &lunch, &submitter(None)));
    }

    #[test]
    fn validation_reports_values_the_evaluator_cannot_use() {
        assert!(validate_condition(&condition("category", "in", r#"["Travel"]"#, None)).is_ok());
        assert!(matches!(
            validate_condition(&condition("category", "in", "Travel", None)),
            Err(ConditionError::InvalidConditionValue { .. })
        ));
        assert!(matches!(
            validate_condition(&condition("amount", "between", "10", None)),
            Err(ConditionError::InvalidConditionValue { .. })
        ));
        assert!(matches!(
            validate_condition(&condition("amount", "greater_than", "ten", None)),
            Err(ConditionError::InvalidConditionValue { .. })
        ));
        assert_eq!(
            validate_condition(&condition("amount", "approx", "10", None)),
            Err(ConditionError::UnrecognizedOperator("approx".to_string()))
        );
    }
}
