use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

const DEMO_COMPANY_ID: &str = "co-demo";

const DEMO_USER_IDS: &[&str] =
    &["u-demo-admin", "u-demo-cfo", "u-demo-fin", "u-demo-mgr", "u-demo-emp"];

const DEMO_RULES: &[SeedRuleContract] = &[
    SeedRuleContract { rule_id: "rule-demo-cfo", rule_type: "Specific_Approver", priority: 1 },
    SeedRuleContract { rule_id: "rule-demo-travel", rule_type: "Category", priority: 2 },
];

const DEMO_EXPENSES: &[SeedExpenseContract] = &[
    SeedExpenseContract {
        expense_id: "exp-demo-travel",
        submitted_by: "u-demo-emp",
        description: "Travel claim routed through the category rule",
    },
    SeedExpenseContract {
        expense_id: "exp-demo-summit",
        submitted_by: "u-demo-emp",
        description: "Large marketing claim routed to the CFO",
    },
];

/// Demo company with a small org chart, two rules and two draft expenses.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed.sql");

    /// Loads the dataset. Rows that already exist are left untouched.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let expenses_seeded = DEMO_EXPENSES
            .iter()
            .map(|expense| ExpenseSeedInfo {
                expense_id: expense.expense_id,
                submitted_by: expense.submitted_by,
                description: expense.description,
            })
            .collect();

        Ok(SeedResult {
            company_id: DEMO_COMPANY_ID,
            users_seeded: DEMO_USER_IDS.len(),
            rules_seeded: DEMO_RULES.len(),
            expenses_seeded,
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        let company_exists: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM company WHERE id = ?1)")
                .bind(DEMO_COMPANY_ID)
                .fetch_one(pool)
                .await?;
        checks.push(("demo-company", company_exists == 1));

        let quoted_users = sql_array_from_ids(DEMO_USER_IDS);
        let user_count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM users WHERE company_id = ?1 AND is_active = 1 \
             AND id IN {quoted_users}"
        ))
        .bind(DEMO_COMPANY_ID)
        .fetch_one(pool)
        .await?;
        checks.push(("demo-users", user_count == DEMO_USER_IDS.len() as i64));

        let reporting_line: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = 'u-demo-emp' \
             AND manager_id = 'u-demo-mgr')",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("demo-reporting-line", reporting_line == 1));

        for rule in DEMO_RULES {
            let rule_ok: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM approval_rule WHERE id = ?1 AND company_id = ?2 \
                 AND rule_type = ?3 AND priority = ?4 AND is_active = 1)",
            )
            .bind(rule.rule_id)
            .bind(DEMO_COMPANY_ID)
            .bind(rule.rule_type)
            .bind(rule.priority)
            .fetch_one(pool)
            .await?;
            checks.push((rule.rule_id, rule_ok == 1));
        }

        for expense in DEMO_EXPENSES {
            let expense_exists: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM expense WHERE id = ?1 AND submitted_by = ?2)",
            )
            .bind(expense.expense_id)
            .bind(expense.submitted_by)
            .fetch_one(pool)
            .await?;
            checks.push((expense.expense_id, expense_exists == 1));
        }

        let all_present = checks.iter().all(|(_, exists)| *exists);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes the demo company; foreign keys cascade to its users, rules and expenses.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM company WHERE id = ?1")
            .bind(DEMO_COMPANY_ID)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedRuleContract {
    rule_id: &'static str,
    rule_type: &'static str,
    priority: i64,
}

#[derive(Debug, Clone, Copy)]
struct SeedExpenseContract {
    expense_id: &'static str,
    submitted_by: &'static str,
    description: &'static str,
}

#[derive(Debug, Clone)]
pub struct SeedResult {
    pub company_id: &'static str,
    pub users_seeded: usize,
    pub rules_seeded: usize,
    pub expenses_seeded: Vec<ExpenseSeedInfo>,
}

#[derive(Debug, Clone)]
pub struct ExpenseSeedInfo {
    pub expense_id: &'static str,
    pub submitted_by: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{id}'")).collect::<Vec<_>>().join(", ");
    format!("({quoted})")
}
