use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};

use crate::domain::company::CompanyId;
use crate::domain::expense::Expense;
use crate::domain::rule::ApprovalRule;
use crate::domain::user::User;
use crate::rules::cache::RuleCache;
use crate::rules::condition::matches;

/// In-effect rules whose condition matches, ordered by (priority, id).
pub fn applicable_rules<'a>(
    rules: &'a [ApprovalRule],
    expense: &Expense,
    submitter: &User,
    today: NaiveDate,
) -> Vec<&'a ApprovalRule> {
    let mut applicable: Vec<&ApprovalRule> = rules
        .iter()
        .filter(|rule| rule.company_id == expense.company_id)
        .filter(|rule| rule.is_in_effect(today))
        .filter(|rule| matches(rule, expense, submitter))
        .collect();
    applicable.sort_by(|left, right| {
        left.priority.cmp(&right.priority).then_with(|| left.id.cmp(&right.id))
    });
    applicable
}

/// The single rule that governs this expense, or `None` for the default workflow.
pub fn select_rule<'a>(
    rules: &'a [ApprovalRule],
    expense: &Expense,
    submitter: &User,
    today: NaiveDate,
) -> Option<&'a ApprovalRule> {
    applicable_rules(rules, expense, submitter, today).into_iter().next()
}

/// Rule selection backed by an injected [`RuleCache`].
///
/// Loading is left to the caller so this type stays storage agnostic: check
/// [`RuleSelector::cached`], fall back to the repository and [`RuleSelector::remember`].
#[derive(Clone, Debug)]
pub struct RuleSelector {
    cache: Arc<RuleCache>,
}

impl RuleSelector {
    pub fn new(cache: Arc<RuleCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<RuleCache> {
        &self.cache
    }

    pub fn cached(
        &self,
        company: &CompanyId,
        now: DateTime<Utc>,
    ) -> Option<Arc<Vec<ApprovalRule>>> {
        self.cache.get(company, now)
    }

    pub fn remember(
        &self,
        company: CompanyId,
        mut rules: Vec<ApprovalRule>,
        now: DateTime<Utc>,
    ) -> Arc<Vec<ApprovalRule>> {
        rules.sort_by(|left, right| {
            left.priority.cmp(&right.priority).then_with(|| left.id.cmp(&right.id))
        });
        self.cache.put(company, rules, now)
    }

    pub fn forget(&self, company: &CompanyId) {
        self.cache.invalidate(company);
    }

    pub fn select<'a>(
        &self,
        rules: &'a [ApprovalRule],
        expense: &Expense,
        submitter: &User,
        now: DateTime<Utc>,
    ) -> Option<&'a ApprovalRule> {
        select_rule(rules, expense, submitter, now.date_naive())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;

    use crate::domain::company::CompanyId;
    use crate::domain::expense::{Expense, ExpenseCategory, ExpenseId, ExpenseStatus};
    use crate::domain::rule::{
        ApprovalRule, AutoApproveConditions, ConditionField, ConditionOperator, RuleCondition,
        RuleId, RuleType,
    };
    use crate::domain::user::{User, UserId, UserRole};
    use crate::rules::cache::RuleCache;

    use super::{applicable_rules, select_rule, RuleSelector};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn submitter() -> User {
        User {
            id: UserId("u-emp".to_string()),
            company_id: CompanyId("acme".to_string()),
            name: "Ema Ployee".to_string(),
            email: "ema@acme.test".to_string(),
            role: UserRole::Employee,
            department: Some("Sales".to_string()),
            manager_id: Some(UserId("u-mgr".to_string())),
            is_active: true,
        }
    }

    fn expense(converted: i64) -> Expense {
        Expense {
            id: ExpenseId("EXP-7".to_string()),
            company_id: CompanyId("acme".to_string()),
            submitted_by: UserId("u-emp".to_string()),
            title: "Laptop".to_string(),
            amount: Decimal::new(converted, 0),
            currency: "USD".to_string(),
            converted_amount: Decimal::new(converted, 0),
            category: ExpenseCategory::Equipment,
            expense_date: date(2026, 5, 2),
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

    fn rule(id: &str, priority: i32, condition: Option<RuleCondition>) -> ApprovalRule {
        ApprovalRule {
            id: RuleId(id.to_string()),
            company_id: CompanyId("acme".to_string()),
            name: format!("rule {id}"),
            description: None,
            rule_type: RuleType::Amount,
            condition,
            approval_steps: Vec::new(),
            percentage_required: None,
            specific_approver_id: None,
            auto_approve_conditions: AutoApproveConditions::default(),
            is_manager_required: true,
            skip_manager_if_higher_role: false,
            parallel_approval: false,
            priority,
            is_active: true,
            effective_date: None,
            expiry_date: None,
            usage_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn amount_over(threshold: &str) -> Option<RuleCondition> {
        Some(RuleCondition {
            field: ConditionField::Amount,
            operator: ConditionOperator::GreaterThan,
            value: threshold.to_string(),
            value_2: None,
        })
    }

    #[test]
    fn lowest_priority_number_wins() {
        let rules = vec![
            rule("r-broad", 10, None),
            rule("r-large", 1, amount_over("1000")),
            rule("r-huge", 0, amount_over("50000")),
        ];

        let selected = select_rule(&rules, &expense(2000), &submitter(), date(2026, 5, 2));
        assert_eq!(selected.map(|rule| rule.id.0.as_str()), Some("r-large"));

        let small = select_rule(&rules, &expense(200), &submitter(), date(2026, 5, 2));
        assert_eq!(small.map(|rule| rule.id.0.as_str()), Some("r-broad"));
    }

    #[test]
    fn equal_priority_breaks_ties_by_rule_id() {
        let rules = vec![rule("r-b", 1, None), rule("r-a", 1, None)];
        let ids: Vec<&str> = applicable_rules(&rules, &expense(10), &submitter(), date(2026, 5, 2))
            .into_iter()
            .map(|rule| rule.id.0.as_str())
            .collect();
        assert_eq!(ids, vec!["r-a", "r-b"]);
    }

    #[test]
    fn expired_and_inactive_rules_are_ignored() {
        let mut expired = rule("r-expired", 0, None);
        expired.expiry_date = Some(date(2026, 4, 30));
        let mut future = rule("r-future", 0, None);
        future.effective_date = Some(date(2026, 6, 1));
        let mut inactive = rule("r-off", 0, None);
        inactive.is_active = false;

        let rules = vec![expired, future, inactive];
        assert!(select_rule(&rules, &expense(10), &submitter(), date(2026, 5, 2)).is_none());
    }

    #[test]
    fn selector_serves_cached_rules_until_invalidated() {
        let selector = RuleSelector::new(Arc::new(RuleCache::new(300)));
        let company = CompanyId("acme".to_string());
        let now = Utc.with_ymd_and_hms(2026, 5, 2, 8, 0, 0).single().expect("valid instant");

        assert!(selector.cached(&company, now).is_none());
        selector.remember(company.clone(), vec![rule("r-2", 2, None), rule("r-1", 1, None)], now);

        let cached = selector.cached(&company, now).expect("cached rules");
        assert_eq!(cached[0].id.0, "r-1");
        let chosen = selector.select(&cached, &expense(10), &submitter(), now);
        assert_eq!(chosen.map(|rule| rule.id.0.as_str()), Some("r-1"));

        selector.forget(&company);
        assert!(selector.cached(&company, now).is_none());
    }
}
