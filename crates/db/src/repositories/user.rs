use claimflow_core::domain::company::CompanyId;
use claimflow_core::domain::user::{User, UserId, UserRole};

use super::columns::{column, parse_enum};
use super::{RepositoryError, UserRepository};
use crate::DbPool;

const USER_COLUMNS: &str =
    "id, company_id, name, email, role, department, manager_id, is_active";

pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> Result<User, RepositoryError> {
    let role: String = column(row, "role")?;
    let manager_id: Option<String> = column(row, "manager_id")?;

    Ok(User {
        id: UserId(column(row, "id")?),
        company_id: CompanyId(column(row, "company_id")?),
        name: column(row, "name")?,
        email: column(row, "email")?,
        role: parse_enum("role", &role, UserRole::parse)?,
        department: column(row, "department")?,
        manager_id: manager_id.map(UserId),
        is_active: column(row, "is_active")?,
    })
}

#[async_trait::async_trait]
impl UserRepository for SqlUserRepository {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn list_active_for_company(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<User>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE company_id = ? AND is_active = 1
             ORDER BY id ASC"
        ))
        .bind(&company_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_user).collect()
    }

    async fn save(&self, user: User) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO users (id, company_id, name, email, role, department, manager_id,
                                is_active)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 email = excluded.email,
                 role = excluded.role,
                 department = excluded.department,
                 manager_id = excluded.manager_id,
                 is_active = excluded.is_active",
        )
        .bind(&user.id.0)
        .bind(&user.company_id.0)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.role.as_str())
        .bind(&user.department)
        .bind(user.manager_id.as_ref().map(|id| id.0.as_str()))
        .bind(user.is_active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
