use chrono::{NaiveDate, Utc};
use sqlx::SqliteConnection;

use claimflow_core::domain::company::CompanyId;
use claimflow_core::domain::rule::{
    ApprovalRule, AutoApproveConditions, ConditionField, ConditionOperator, RuleCondition, RuleId,
    RuleType, StepDefinition,
};
use claimflow_core::domain::user::UserId;

use super::columns::{
    column, format_date, parse_enum, parse_optional_date, parse_timestamp, to_u32,
};
use super::{ApprovalRuleRepository, RepositoryError};
use crate::DbPool;

const RULE_COLUMNS: &str = "id, company_id, name, description, rule_type, condition_field,
    condition_operator, condition_value, condition_value_2, approval_steps, percentage_required,
    specific_approver_id, auto_approve_conditions, is_manager_required,
    skip_manager_if_higher_role, parallel_approval, priority, is_active, effective_date,
    expiry_date, usage_count, created_at, updated_at";

pub struct SqlApprovalRuleRepository {
    pool: DbPool,
}

impl SqlApprovalRuleRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_rule(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalRule, RepositoryError> {
    let rule_type: String = column(row, "rule_type")?;
    let condition_field: Option<String> = column(row, "condition_field")?;
    let condition_operator: Option<String> = column(row, "condition_operator")?;
    let condition_value: Option<String> = column(row, "condition_value")?;
    let approval_steps: String = column(row, "approval_steps")?;
    let percentage_required: Option<i64> = column(row, "percentage_required")?;
    let specific_approver_id: Option<String> = column(row, "specific_approver_id")?;
    let auto_approve_conditions: String = column(row, "auto_approve_conditions")?;
    let created_at: String = column(row, "created_at")?;
    let updated_at: String = column(row, "updated_at")?;

    // A condition needs all three parts; anything less means "always matches".
    let condition = match (condition_field, condition_operator, condition_value) {
        (Some(field), Some(operator), Some(value)) => Some(RuleCondition {
            field: ConditionField::parse(&field),
            operator: ConditionOperator::parse(&operator),
            value,
            value_2: column(row, "condition_value_2")?,
        }),
        _ => None,
    };

    let approval_steps: Vec<StepDefinition> = serde_json::from_str(&approval_steps)
        .map_err(|e| RepositoryError::Decode(format!("approval_steps: {e}")))?;
    let auto_approve_conditions: AutoApproveConditions =
        serde_json::from_str(&auto_approve_conditions)
            .map_err(|e| RepositoryError::Decode(format!("auto_approve_conditions: {e}")))?;
    let percentage_required = percentage_required
        .map(|value| {
            u8::try_from(value).map_err(|_| {
                RepositoryError::Decode(format!("percentage_required out of range: {value}"))
            })
        })
        .transpose()?;

    Ok(ApprovalRule {
        id: RuleId(column(row, "id")?),
        company_id: CompanyId(column(row, "company_id")?),
        name: column(row, "name")?,
        description: column(row, "description")?,
        rule_type: parse_enum("rule_type", &rule_type, RuleType::parse)?,
        condition,
        approval_steps,
        percentage_required,
        specific_approver_id: specific_approver_id.map(UserId),
        auto_approve_conditions,
        is_manager_required: column(row, "is_manager_required")?,
        skip_manager_if_higher_role: column(row, "skip_manager_if_higher_role")?,
        parallel_approval: column(row, "parallel_approval")?,
        priority: column(row, "priority")?,
        is_active: column(row, "is_active")?,
        effective_date: parse_optional_date(column(row, "effective_date")?)?,
        expiry_date: parse_optional_date(column(row, "expiry_date")?)?,
        usage_count: to_u32("usage_count", column(row, "usage_count")?)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

pub(crate) async fn increment_usage_in(
    conn: &mut SqliteConnection,
    id: &RuleId,
) -> Result<u64, RepositoryError> {
    let result = sqlx::query(
        "UPDATE approval_rule SET usage_count = usage_count + 1, updated_at = ? WHERE id = ?",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(&id.0)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

#[async_trait::async_trait]
impl ApprovalRuleRepository for SqlApprovalRuleRepository {
    async fn find_by_id(&self, id: &RuleId) -> Result<Option<ApprovalRule>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {RULE_COLUMNS} FROM approval_rule WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_rule).transpose()
    }

    async fn list_active_for_company(
        &self,
        company_id: &CompanyId,
        today: NaiveDate,
    ) -> Result<Vec<ApprovalRule>, RepositoryError> {
        let today = format_date(today);
        let rows = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM approval_rule
             WHERE company_id = ?1
               AND is_active = 1
               AND (effective_date IS NULL OR effective_date <= ?2)
               AND (expiry_date IS NULL OR expiry_date >= ?2)
             ORDER BY priority ASC, id ASC"
        ))
        .bind(&company_id.0)
        .bind(&today)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_rule).collect()
    }

    async fn list_for_company(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<ApprovalRule>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM approval_rule WHERE company_id = ?
             ORDER BY priority ASC, id ASC"
        ))
        .bind(&company_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_rule).collect()
    }

    async fn save(&self, rule: ApprovalRule) -> Result<(), RepositoryError> {
        let approval_steps = serde_json::to_string(&rule.approval_steps)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let auto_approve_conditions = serde_json::to_string(&rule.auto_approve_conditions)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let condition = rule.condition.as_ref();

        sqlx::query(
            "INSERT INTO approval_rule (id, company_id, name, description, rule_type,
                                        condition_field, condition_operator, condition_value,
                                        condition_value_2, approval_steps, percentage_required,
                                        specific_approver_id, auto_approve_conditions,
                                        is_manager_required, skip_manager_if_higher_role,
                                        parallel_approval, priority, is_active, effective_date,
                                        expiry_date, usage_count, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 description = excluded.description,
                 rule_type = excluded.rule_type,
                 condition_field = excluded.condition_field,
                 condition_operator = excluded.condition_operator,
                 condition_value = excluded.condition_value,
                 condition_value_2 = excluded.condition_value_2,
                 approval_steps = excluded.approval_steps,
                 percentage_required = excluded.percentage_required,
                 specific_approver_id = excluded.specific_approver_id,
                 auto_approve_conditions = excluded.auto_approve_conditions,
                 is_manager_required = excluded.is_manager_required,
                 skip_manager_if_higher_role = excluded.skip_manager_if_higher_role,
                 parallel_approval = excluded.parallel_approval,
                 priority = excluded.priority,
                 is_active = excluded.is_active,
                 effective_date = excluded.effective_date,
                 expiry_date = excluded.expiry_date,
                 updated_at = excluded.updated_at",
        )
        .bind(&rule.id.0)
        .bind(&rule.company_id.0)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(rule.rule_type.as_str())
        .bind(condition.map(|c| c.field.as_str().to_string()))
        .bind(condition.map(|c| c.operator.as_str().to_string()))
        .bind(condition.map(|c| c.value.clone()))
        .bind(condition.and_then(|c| c.value_2.clone()))
        .bind(approval_steps)
        .bind(rule.percentage_required.map(i64::from))
        .bind(rule.specific_approver_id.as_ref().map(|id| id.0.as_str()))
        .bind(auto_approve_conditions)
        .bind(rule.is_manager_required)
        .bind(rule.skip_manager_if_higher_role)
        .bind(rule.parallel_approval)
        .bind(rule.priority)
        .bind(rule.is_active)
        .bind(rule.effective_date.map(format_date))
        .bind(rule.expiry_date.map(format_date))
        .bind(i64::from(rule.usage_count))
        .bind(rule.created_at.to_rfc3339())
        .bind(rule.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn increment_usage(&self, id: &RuleId) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        increment_usage_in(&mut conn, id).await?;
        Ok(())
    }
}
