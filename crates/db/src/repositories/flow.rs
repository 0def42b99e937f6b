use sqlx::SqliteConnection;

use claimflow_core::domain::expense::{ExpenseId, ExpenseStatus};
use claimflow_core::domain::flow::{
    ApprovalFlow, ApprovalFlowId, ApproverType, FlowPriority, FlowStatus,
};
use claimflow_core::domain::user::UserId;

use super::columns::{column, parse_enum, parse_optional_timestamp, parse_timestamp, to_u32};
use super::{ApprovalFlowRepository, RepositoryError};
use crate::DbPool;

const FLOW_COLUMNS: &str = "f.id, f.expense_id, f.approver_id, f.approval_step, f.approver_type,
    f.status, f.is_required, f.action_date, f.comments, f.delegated_to, f.delegated_at,
    f.delegation_reason, f.auto_approved, f.auto_approval_reason, f.due_date, f.priority,
    f.created_at";

pub struct SqlApprovalFlowRepository {
    pool: DbPool,
}

impl SqlApprovalFlowRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_flow(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalFlow, RepositoryError> {
    let approver_type: String = column(row, "approver_type")?;
    let status: String = column(row, "status")?;
    let priority: String = column(row, "priority")?;
    let delegated_to: Option<String> = column(row, "delegated_to")?;
    let due_date: String = column(row, "due_date")?;
    let created_at: String = column(row, "created_at")?;

    Ok(ApprovalFlow {
        id: ApprovalFlowId(column(row, "id")?),
        expense_id: ExpenseId(column(row, "expense_id")?),
        approver_id: UserId(column(row, "approver_id")?),
        approval_step: to_u32("approval_step", column(row, "approval_step")?)?,
        approver_type: parse_enum("approver_type", &approver_type, ApproverType::parse)?,
        status: parse_enum("status", &status, FlowStatus::parse)?,
        is_required: column(row, "is_required")?,
        action_date: parse_optional_timestamp(column(row, "action_date")?)?,
        comments: column(row, "comments")?,
        delegated_to: delegated_to.map(UserId),
        delegated_at: parse_optional_timestamp(column(row, "delegated_at")?)?,
        delegation_reason: column(row, "delegation_reason")?,
        auto_approved: column(row, "auto_approved")?,
        auto_approval_reason: column(row, "auto_approval_reason")?,
        due_date: parse_timestamp(&due_date)?,
        priority: parse_enum("priority", &priority, FlowPriority::parse)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

pub(crate) async fn insert_flow(
    conn: &mut SqliteConnection,
    flow: &ApprovalFlow,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO approval_flow (id, expense_id, approver_id, approval_step, approver_type,
                                    status, is_required, action_date, comments, delegated_to,
                                    delegated_at, delegation_reason, auto_approved,
                                    auto_approval_reason, due_date, priority, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&flow.id.0)
    .bind(&flow.expense_id.0)
    .bind(&flow.approver_id.0)
    .bind(i64::from(flow.approval_step))
    .bind(flow.approver_type.as_str())
    .bind(flow.status.as_str())
    .bind(flow.is_required)
    .bind(flow.action_date.map(|dt| dt.to_rfc3339()))
    .bind(&flow.comments)
    .bind(flow.delegated_to.as_ref().map(|id| id.0.as_str()))
    .bind(flow.delegated_at.map(|dt| dt.to_rfc3339()))
    .bind(&flow.delegation_reason)
    .bind(flow.auto_approved)
    .bind(&flow.auto_approval_reason)
    .bind(flow.due_date.to_rfc3339())
    .bind(flow.priority.as_str())
    .bind(flow.created_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Applies the post-action state of a row that must still be pending in storage.
/// Returns the number of rows touched.
pub(crate) async fn update_pending_flow(
    conn: &mut SqliteConnection,
    flow: &ApprovalFlow,
) -> Result<u64, RepositoryError> {
    let result = sqlx::query(
        "UPDATE approval_flow SET
             status = ?,
             action_date = ?,
             comments = ?,
             delegated_to = ?,
             delegated_at = ?,
             delegation_reason = ?
         WHERE id = ? AND status = 'pending'",
    )
    .bind(flow.status.as_str())
    .bind(flow.action_date.map(|dt| dt.to_rfc3339()))
    .bind(&flow.comments)
    .bind(flow.delegated_to.as_ref().map(|id| id.0.as_str()))
    .bind(flow.delegated_at.map(|dt| dt.to_rfc3339()))
    .bind(&flow.delegation_reason)
    .bind(&flow.id.0)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

#[async_trait::async_trait]
impl ApprovalFlowRepository for SqlApprovalFlowRepository {
    async fn list_for_expense(
        &self,
        expense_id: &ExpenseId,
    ) -> Result<Vec<ApprovalFlow>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {FLOW_COLUMNS} FROM approval_flow f
             WHERE f.expense_id = ?
             ORDER BY f.approval_step ASC, f.rowid ASC"
        ))
        .bind(&expense_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_flow).collect()
    }

    async fn pending_for_approver(
        &self,
        approver_id: &UserId,
    ) -> Result<Vec<ApprovalFlow>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {FLOW_COLUMNS} FROM approval_flow f
             JOIN expense e ON e.id = f.expense_id
             WHERE f.approver_id = ?
               AND f.status = 'pending'
               AND e.status = ?
               AND f.approval_step = e.approval_step
             ORDER BY f.due_date ASC, f.id ASC"
        ))
        .bind(&approver_id.0)
        .bind(ExpenseStatus::UnderReview.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_flow).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;

    use claimflow_core::domain::company::{Company, CompanyId};
    use claimflow_core::domain::expense::{Expense, ExpenseCategory, ExpenseId, ExpenseStatus};
    use claimflow_core::domain::flow::{
        ApprovalFlow, ApprovalFlowId, ApproverType, FlowPriority, FlowStatus,
    };
    use claimflow_core::domain::user::{User, UserId, UserRole};

    use super::{insert_flow, update_pending_flow, SqlApprovalFlowRepository};
    use crate::repositories::{
        ApprovalFlowRepository, CompanyRepository, ExpenseRepository, SqlCompanyRepository,
        SqlExpenseRepository, SqlUserRepository, UserRepository,
    };
    use crate::{connect_with_settings, migrations};

    async fn setup(expense_status: ExpenseStatus, step: u32) -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlCompanyRepository::new(pool.clone())
            .save(Company {
                id: CompanyId("acme".to_string()),
                name: "Acme".to_string(),
                currency: "USD".to_string(),
            })
            .await
            .expect("seed company");
        let users = SqlUserRepository::new(pool.clone());
        let staff = [
            ("u-emp", UserRole::Employee),
            ("u-mgr", UserRole::Manager),
            ("u-adm", UserRole::Admin),
        ];
        for (id, role) in staff {
            users
                .save(User {
                    id: UserId(id.to_string()),
                    company_id: CompanyId("acme".to_string()),
                    name: id.to_string(),
                    email: format!("{id}@acme.test"),
                    role,
                    department: None,
                    manager_id: None,
                    is_active: true,
                })
                .await
                .expect("seed user");
        }
        SqlExpenseRepository::new(pool.clone())
            .save(Expense {
                id: ExpenseId("EXP-1".to_string()),
                company_id: CompanyId("acme".to_string()),
                submitted_by: UserId("u-emp".to_string()),
                title: "Monitor".to_string(),
                amount: Decimal::new(1500, 0),
                currency: "USD".to_string(),
                converted_amount: Decimal::new(1500, 0),
                category: ExpenseCategory::Equipment,
                expense_date: NaiveDate::from_ymd_opt(2026, 5, 1).expect("valid date"),
                status: expense_status,
                approval_step: step,
                current_approver_id: None,
                rule_applied: None,
                total_approvers: 2,
                approved_count: 0,
                rejected_count: 0,
                rejection_reason: None,
                submitted_at: Utc::now(),
                approved_at: None,
                state_version: 1,
            })
            .await
            .expect("seed expense");
        pool
    }

    fn flow(id: &str, approver: &str, step: u32, approver_type: ApproverType) -> ApprovalFlow {
        let created = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).single().expect("instant");
        ApprovalFlow {
            id: ApprovalFlowId(id.to_string()),
            expense_id: ExpenseId("EXP-1".to_string()),
            approver_id: UserId(approver.to_string()),
            approval_step: step,
            approver_type,
            status: FlowStatus::Pending,
            is_required: true,
            action_date: None,
            comments: None,
            delegated_to: None,
            delegated_at: None,
            delegation_reason: None,
            auto_approved: false,
            auto_approval_reason: None,
            due_date: created + Duration::days(2),
            priority: FlowPriority::High,
            created_at: created,
        }
    }

    #[tokio::test]
    async fn list_for_expense_orders_by_step_then_insertion() {
        let pool = setup(ExpenseStatus::UnderReview, 1).await;
        let mut conn = pool.acquire().await.expect("acquire");
        insert_flow(&mut conn, &flow("AF-z", "u-adm", 2, ApproverType::Admin)).await.expect("z");
        insert_flow(&mut conn, &flow("AF-y", "u-mgr", 1, ApproverType::Manager)).await.expect("y");
        insert_flow(&mut conn, &flow("AF-x", "u-adm", 1, ApproverType::Finance)).await.expect("x");
        drop(conn);

        let repo = SqlApprovalFlowRepository::new(pool);
        let flows = repo.list_for_expense(&ExpenseId("EXP-1".to_string())).await.expect("list");
        let ids: Vec<&str> = flows.iter().map(|f| f.id.0.as_str()).collect();

        assert_eq!(ids, vec!["AF-y", "AF-x", "AF-z"]);
        assert_eq!(flows[0], flow("AF-y", "u-mgr", 1, ApproverType::Manager));
    }

    #[tokio::test]
    async fn duplicate_approver_at_the_same_step_is_rejected() {
        let pool = setup(ExpenseStatus::UnderReview, 1).await;
        let mut conn = pool.acquire().await.expect("acquire");
        insert_flow(&mut conn, &flow("AF-1", "u-mgr", 1, ApproverType::Manager))
            .await
            .expect("first");

        let duplicate =
            insert_flow(&mut conn, &flow("AF-2", "u-mgr", 1, ApproverType::Admin)).await;
        assert!(duplicate.is_err());
    }

    #[tokio::test]
    async fn pending_for_approver_only_returns_the_current_step() {
        let pool = setup(ExpenseStatus::UnderReview, 1).await;
        let mut conn = pool.acquire().await.expect("acquire");
        insert_flow(&mut conn, &flow("AF-1", "u-mgr", 1, ApproverType::Manager)).await.expect("1");
        insert_flow(&mut conn, &flow("AF-2", "u-adm", 2, ApproverType::Admin)).await.expect("2");
        drop(conn);

        let repo = SqlApprovalFlowRepository::new(pool);
        let manager = repo.pending_for_approver(&UserId("u-mgr".to_string())).await.expect("mgr");
        let admin = repo.pending_for_approver(&UserId("u-adm".to_string())).await.expect("adm");

        assert_eq!(manager.len(), 1);
        assert!(admin.is_empty());
    }

    #[tokio::test]
    async fn pending_for_approver_ignores_settled_expenses() {
        let pool = setup(ExpenseStatus::Approved, 1).await;
        let mut conn = pool.acquire().await.expect("acquire");
        insert_flow(&mut conn, &flow("AF-1", "u-mgr", 1, ApproverType::Manager)).await.expect("1");
        drop(conn);

        let repo = SqlApprovalFlowRepository::new(pool);
        let pending = repo.pending_for_approver(&UserId("u-mgr".to_string())).await.expect("list");
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn update_pending_flow_only_touches_pending_rows() {
        let pool = setup(ExpenseStatus::UnderReview, 1).await;
        let mut conn = pool.acquire().await.expect("acquire");
        let mut row = flow("AF-1", "u-mgr", 1, ApproverType::Manager);
        insert_flow(&mut conn, &row).await.expect("insert");

        row.status = FlowStatus::Approved;
        row.action_date = Some(Utc::now());
        row.comments = Some("ok".to_string());
        assert_eq!(update_pending_flow(&mut conn, &row).await.expect("first update"), 1);

        row.status = FlowStatus::Rejected;
        assert_eq!(update_pending_flow(&mut conn, &row).await.expect("second update"), 0);
    }
}
