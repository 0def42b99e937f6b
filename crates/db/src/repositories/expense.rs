use sqlx::SqliteConnection;

use claimflow_core::domain::company::CompanyId;
use claimflow_core::domain::expense::{Expense, ExpenseCategory, ExpenseId, ExpenseStatus};
use claimflow_core::domain::rule::RuleId;
use claimflow_core::domain::user::UserId;

use super::columns::{
    column, format_date, parse_date, parse_decimal, parse_enum, parse_optional_timestamp,
    parse_timestamp, to_u32,
};
use super::{ExpenseRepository, RepositoryError};
use crate::DbPool;

const EXPENSE_COLUMNS: &str = "id, company_id, submitted_by, title, amount, currency,
    converted_amount, category, expense_date, status, approval_step, current_approver_id,
    rule_applied, total_approvers, approved_count, rejected_count, rejection_reason,
    submitted_at, approved_at, state_version";

pub struct SqlExpenseRepository {
    pool: DbPool,
}

impl SqlExpenseRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn row_to_expense(row: &sqlx::sqlite::SqliteRow) -> Result<Expense, RepositoryError> {
    let amount: String = column(row, "amount")?;
    let converted_amount: String = column(row, "converted_amount")?;
    let category: String = column(row, "category")?;
    let expense_date: String = column(row, "expense_date")?;
    let status: String = column(row, "status")?;
    let current_approver_id: Option<String> = column(row, "current_approver_id")?;
    let rule_applied: Option<String> = column(row, "rule_applied")?;
    let submitted_at: String = column(row, "submitted_at")?;

    Ok(Expense {
        id: ExpenseId(column(row, "id")?),
        company_id: CompanyId(column(row, "company_id")?),
        submitted_by: UserId(column(row, "submitted_by")?),
        title: column(row, "title")?,
        amount: parse_decimal(&amount)?,
        currency: column(row, "currency")?,
        converted_amount: parse_decimal(&converted_amount)?,
        category: parse_enum("category", &category, ExpenseCategory::parse)?,
        expense_date: parse_date(&expense_date)?,
        status: parse_enum("status", &status, ExpenseStatus::parse)?,
        approval_step: to_u32("approval_step", column(row, "approval_step")?)?,
        current_approver_id: current_approver_id.map(UserId),
        rule_applied: rule_applied.map(RuleId),
        total_approvers: to_u32("total_approvers", column(row, "total_approvers")?)?,
        approved_count: to_u32("approved_count", column(row, "approved_count")?)?,
        rejected_count: to_u32("rejected_count", column(row, "rejected_count")?)?,
        rejection_reason: column(row, "rejection_reason")?,
        submitted_at: parse_timestamp(&submitted_at)?,
        approved_at: parse_optional_timestamp(column(row, "approved_at")?)?,
        state_version: to_u32("state_version", column(row, "state_version")?)?,
    })
}

/// Writes the workflow-owned columns of `expense` if the stored row still
/// carries `expected_version`. Returns the number of rows touched.
pub(crate) async fn update_workflow_state(
    conn: &mut SqliteConnection,
    expense: &Expense,
    expected_version: u32,
) -> Result<u64, RepositoryError> {
    let result = sqlx::query(
        "UPDATE expense SET
             status = ?,
             approval_step = ?,
             current_approver_id = ?,
             rule_applied = ?,
             total_approvers = ?,
             approved_count = ?,
             rejected_count = ?,
             rejection_reason = ?,
             approved_at = ?,
             state_version = ?
         WHERE id = ? AND state_version = ?",
    )
    .bind(expense.status.as_str())
    .bind(i64::from(expense.approval_step))
    .bind(expense.current_approver_id.as_ref().map(|id| id.0.as_str()))
    .bind(expense.rule_applied.as_ref().map(|id| id.0.as_str()))
    .bind(i64::from(expense.total_approvers))
    .bind(i64::from(expense.approved_count))
    .bind(i64::from(expense.rejected_count))
    .bind(&expense.rejection_reason)
    .bind(expense.approved_at.map(|dt| dt.to_rfc3339()))
    .bind(i64::from(expense.state_version))
    .bind(&expense.id.0)
    .bind(i64::from(expected_version))
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

#[async_trait::async_trait]
impl ExpenseRepository for SqlExpenseRepository {
    async fn find_by_id(&self, id: &ExpenseId) -> Result<Option<Expense>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {EXPENSE_COLUMNS} FROM expense WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_expense(r)?)),
            None => Ok(None),
        }
    }

    async fn list_for_company(
        &self,
        company_id: &CompanyId,
        status: Option<ExpenseStatus>,
    ) -> Result<Vec<Expense>, RepositoryError> {
        let rows = if let Some(status) = status {
            sqlx::query(&format!(
                "SELECT {EXPENSE_COLUMNS} FROM expense
                 WHERE company_id = ? AND status = ?
                 ORDER BY submitted_at ASC, id ASC"
            ))
            .bind(&company_id.0)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {EXPENSE_COLUMNS} FROM expense
                 WHERE company_id = ?
                 ORDER BY submitted_at ASC, id ASC"
            ))
            .bind(&company_id.0)
            .fetch_all(&self.pool)
            .await?
        };

        rows.iter().map(row_to_expense).collect::<Result<Vec<_>, _>>()
    }

    async fn insert(&self, expense: Expense) -> Result<(), RepositoryError> {
        let sql = format!("{INSERT_EXPENSE} ON CONFLICT(id) DO NOTHING");
        if write_expense(&self.pool, &sql, &expense).await? == 0 {
            return Err(RepositoryError::Conflict(format!(
                "expense `{}` already exists",
                expense.id.0
            )));
        }
        Ok(())
    }

    async fn save(&self, expense: Expense) -> Result<(), RepositoryError> {
        let sql = format!(
            "{INSERT_EXPENSE}
             ON CONFLICT(id) DO UPDATE SET
                 title = excluded.title,
                 amount = excluded.amount,
                 currency = excluded.currency,
                 converted_amount = excluded.converted_amount,
                 category = excluded.category,
                 expense_date = excluded.expense_date,
                 status = excluded.status,
                 approval_step = excluded.approval_step,
                 current_approver_id = excluded.current_approver_id,
                 rule_applied = excluded.rule_applied,
                 total_approvers = excluded.total_approvers,
                 approved_count = excluded.approved_count,
                 rejected_count = excluded.rejected_count,
                 rejection_reason = excluded.rejection_reason,
                 submitted_at = excluded.submitted_at,
                 approved_at = excluded.approved_at,
                 state_version = excluded.state_version"
        );
        write_expense(&self.pool, &sql, &expense).await?;
        Ok(())
    }
}

const INSERT_EXPENSE: &str = "INSERT INTO expense (id, company_id, submitted_by, title, amount,
        currency, converted_amount, category, expense_date, status, approval_step,
        current_approver_id, rule_applied, total_approvers, approved_count, rejected_count,
        rejection_reason, submitted_at, approved_at, state_version)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

async fn write_expense(
    pool: &DbPool,
    sql: &str,
    expense: &Expense,
) -> Result<u64, RepositoryError> {
    let result = sqlx::query(sql)
        .bind(&expense.id.0)
        .bind(&expense.company_id.0)
        .bind(&expense.submitted_by.0)
        .bind(&expense.title)
        .bind(expense.amount.to_string())
        .bind(&expense.currency)
        .bind(expense.converted_amount.to_string())
        .bind(expense.category.as_str())
        .bind(format_date(expense.expense_date))
        .bind(expense.status.as_str())
        .bind(i64::from(expense.approval_step))
        .bind(expense.current_approver_id.as_ref().map(|id| id.0.as_str()))
        .bind(expense.rule_applied.as_ref().map(|id| id.0.as_str()))
        .bind(i64::from(expense.total_approvers))
        .bind(i64::from(expense.approved_count))
        .bind(i64::from(expense.rejected_count))
        .bind(&expense.rejection_reason)
        .bind(expense.submitted_at.to_rfc3339())
        .bind(expense.approved_at.map(|dt| dt.to_rfc3339()))
        .bind(i64::from(expense.state_version))
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
