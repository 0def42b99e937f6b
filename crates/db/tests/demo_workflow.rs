use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use claimflow_core::clock::FixedClock;
use claimflow_core::config::WorkflowConfig;
use claimflow_core::domain::expense::{ExpenseId, ExpenseStatus};
use claimflow_core::domain::flow::{ApproverType, FlowStatus};
use claimflow_core::domain::rule::RuleId;
use claimflow_core::domain::user::UserId;
use claimflow_core::events::InMemoryEventSink;
use claimflow_core::rules::RuleCache;
use claimflow_db::repositories::{ApprovalRuleRepository, SqlApprovalRuleRepository};
use claimflow_db::{
    connect_with_settings, migrations, ApprovalService, DbPool, DemoSeedDataset,
    ServiceRepositories,
};

type DemoTestResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr) => {
        if !$cond {
            return Err(format!("assertion failed: `{}`", stringify!($cond)));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

macro_rules! require_eq {
    ($left:expr, $right:expr) => {
        if $left != $right {
            return Err(format!(
                "assertion failed: `left == right` (`{:?}` != `{:?}`)",
                $left,
                $right
            ));
        }
    };
}

struct Demo {
    pool: DbPool,
    service: ApprovalService,
    events: InMemoryEventSink,
    clock: FixedClock,
}

async fn demo() -> DemoTestResult<Demo> {
    let pool = connect_with_settings("sqlite::memory:", 1, 30)
        .await
        .map_err(|error| format!("connect: {error}"))?;
    migrations::run_pending(&pool).await.map_err(|error| format!("migrate: {error}"))?;
    DemoSeedDataset::load(&pool).await.map_err(|error| format!("seed: {error}"))?;

    let start = Utc
        .with_ymd_and_hms(2026, 3, 2, 8, 0, 0)
        .single()
        .ok_or_else(|| "start instant must be valid".to_string())?;
    let clock = FixedClock::new(start);
    let events = InMemoryEventSink::default();
    let service = ApprovalService::new(
        ServiceRepositories::sqlite(pool.clone()),
        WorkflowConfig::default(),
        Arc::new(RuleCache::new(300)),
    )
    .with_clock(Arc::new(clock.clone()))
    .with_event_sink(Arc::new(events.clone()));

    Ok(Demo { pool, service, events, clock })
}

fn user(id: &str) -> UserId {
    UserId(id.to_string())
}

#[tokio::test]
async fn travel_draft_follows_the_category_rule() -> DemoTestResult {
    let demo = demo().await?;
    let expense_id = ExpenseId("exp-demo-travel".to_string());

    let submitted =
        demo.service.submit(&expense_id, "it-travel").await.map_err(|e| e.to_string())?;
    require_eq!(submitted.expense.status, ExpenseStatus::UnderReview);
    require_eq!(submitted.expense.rule_applied, Some(RuleId("rule-demo-travel".to_string())));
    require_eq!(submitted.flows.len(), 3);

    let finance_rows: Vec<&str> = submitted
        .flows
        .iter()
        .filter(|flow| flow.approver_type == ApproverType::Finance)
        .map(|flow| flow.approver_id.0.as_str())
        .collect();
    require_eq!(finance_rows, vec!["u-demo-cfo", "u-demo-fin"]);
    require!(
        submitted.flows.iter().all(|flow| flow.approver_id != submitted.expense.submitted_by),
        "the submitter must never approve their own expense"
    );

    demo.service
        .approve(&expense_id, &user("u-demo-mgr"), None, "it-travel")
        .await
        .map_err(|e| e.to_string())?;
    demo.clock.advance(Duration::hours(6));
    demo.service
        .approve(&expense_id, &user("u-demo-cfo"), None, "it-travel")
        .await
        .map_err(|e| e.to_string())?;
    let done = demo
        .service
        .approve(&expense_id, &user("u-demo-fin"), Some("receipts ok".into()), "it-travel")
        .await
        .map_err(|e| e.to_string())?;

    require_eq!(done.expense.status, ExpenseStatus::Approved);
    require!(done.flows.iter().all(|flow| flow.status == FlowStatus::Approved));
    require_eq!(demo.events.event_names().last().copied(), Some("workflow.expense_finalized"));

    let rule = SqlApprovalRuleRepository::new(demo.pool.clone())
        .find_by_id(&RuleId("rule-demo-travel".to_string()))
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "travel rule must exist".to_string())?;
    require_eq!(rule.usage_count, 1);
    Ok(())
}

#[tokio::test]
async fn large_spend_goes_to_the_designated_approver() -> DemoTestResult {
    let demo = demo().await?;
    let expense_id = ExpenseId("exp-demo-summit".to_string());

    let submitted =
        demo.service.submit(&expense_id, "it-summit").await.map_err(|e| e.to_string())?;
    require_eq!(submitted.expense.rule_applied, Some(RuleId("rule-demo-cfo".to_string())));
    let steps: Vec<(u32, &str)> = submitted
        .flows
        .iter()
        .map(|flow| (flow.approval_step, flow.approver_id.0.as_str()))
        .collect();
    require_eq!(steps, vec![(1, "u-demo-mgr"), (2, "u-demo-cfo")]);

    demo.service
        .delegate(&expense_id, &user("u-demo-mgr"), user("u-demo-admin"), None, "it-summit")
        .await
        .map_err(|e| e.to_string())?;
    let pending = demo
        .service
        .pending_for_approver(&user("u-demo-admin"))
        .await
        .map_err(|e| e.to_string())?;
    require_eq!(pending.len(), 1);

    let rejected = demo
        .service
        .reject(&expense_id, &user("u-demo-admin"), Some("no budget".into()), "it-summit")
        .await
        .map_err(|e| e.to_string())?;
    require_eq!(rejected.expense.status, ExpenseStatus::Rejected);
    require_eq!(rejected.expense.rejection_reason.as_deref(), Some("no budget"));

    let stored = demo.service.status(&expense_id).await.map_err(|e| e.to_string())?;
    require_eq!(stored.flows.len(), 3);
    require!(stored.flows.iter().any(|flow| flow.status == FlowStatus::Delegated));
    require!(stored.flows.iter().any(|flow| flow.status == FlowStatus::Skipped));
    Ok(())
}
