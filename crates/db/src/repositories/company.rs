use sqlx::Row;

use claimflow_core::domain::company::{Company, CompanyId};

use super::{CompanyRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCompanyRepository {
    pool: DbPool,
}

impl SqlCompanyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_company(row: &sqlx::sqlite::SqliteRow) -> Result<Company, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let name: String = row.try_get("name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let currency: String =
        row.try_get("currency").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(Company { id: CompanyId(id), name, currency })
}

#[async_trait::async_trait]
impl CompanyRepository for SqlCompanyRepository {
    async fn find_by_id(&self, id: &CompanyId) -> Result<Option<Company>, RepositoryError> {
        let row = sqlx::query("SELECT id, name, currency FROM company WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_company(r)?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<Company>, RepositoryError> {
        let rows = sqlx::query("SELECT id, name, currency FROM company ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_company).collect()
    }

    async fn save(&self, company: Company) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO company (id, name, currency) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 currency = excluded.currency",
        )
        .bind(&company.id.0)
        .bind(&company.name)
        .bind(&company.currency)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use claimflow_core::domain::company::{Company, CompanyId};

    use super::SqlCompanyRepository;
    use crate::repositories::CompanyRepository;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn save_upserts_and_lists_by_id() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlCompanyRepository::new(pool);

        let company = Company {
            id: CompanyId("globex".to_string()),
            name: "Globex".to_string(),
            currency: "USD".to_string(),
        };
        repo.save(company.clone()).await.expect("save");
        repo.save(Company {
            id: CompanyId("acme".to_string()),
            name: "Acme".to_string(),
            currency: "EUR".to_string(),
        })
        .await
        .expect("save acme");

        let mut renamed = company;
        renamed.name = "Globex Corp".to_string();
        repo.save(renamed).await.expect("upsert");

        let found = repo.find_by_id(&CompanyId("globex".to_string())).await.expect("find");
        assert_eq!(found.map(|c| c.name), Some("Globex Corp".to_string()));

        let ids: Vec<String> =
            repo.list().await.expect("list").into_iter().map(|c| c.id.0).collect();
        assert_eq!(ids, vec!["acme".to_string(), "globex".to_string()]);
    }
}
