//! Turns a submitted expense and its governing rule into approval rows.

use chrono::{DateTime, Duration, Utc};

use crate::config::{EmptyStepPolicy, WorkflowConfig};
use crate::domain::expense::{Expense, ExpenseStatus};
use crate::domain::flow::{ApprovalFlow, ApprovalFlowId, ApproverType, FlowPriority, FlowStatus};
use crate::domain::rule::{ApprovalRule, RuleType};
use crate::domain::user::{User, UserId, UserRole};
use crate::events::{WorkflowEvent, WorkflowEventKind};
use crate::workflow::progression::{count_u32, progress, ProgressOutcome};
use crate::workflow::resolver::{resolve, CompanyDirectory};
use crate::workflow::WorkflowError;

const CFO_AUTO_APPROVAL_REASON: &str = "CFO auto-approval rule";

/// A step that contributed no approver and was left out of the workflow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedStep {
    pub step: u32,
    pub approver_type: ApproverType,
    pub required: bool,
    pub reason: String,
}

/// Result of building a workflow: rows to insert plus the updated expense.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowPlan {
    pub expense: Expense,
    /// `state_version` the stored expense must still carry for the plan to apply.
    pub expected_version: u32,
    pub flows: Vec<ApprovalFlow>,
    pub events: Vec<WorkflowEvent>,
    pub skipped: Vec<SkippedStep>,
    pub outcome: ProgressOutcome,
}

impl WorkflowPlan {
    /// Rule usage is only counted when the rule actually produced approval rows.
    pub fn counts_rule_usage(&self) -> bool {
        self.expense.rule_applied.is_some() && !self.flows.is_empty()
    }
}

#[derive(Clone, Debug)]
struct PlannedRow {
    approver_id: UserId,
    step: u32,
    approver_type: ApproverType,
    required: bool,
    due_days: u32,
    auto_approved: bool,
}

#[derive(Clone, Debug)]
pub struct WorkflowBuilder {
    config: WorkflowConfig,
}

impl WorkflowBuilder {
    pub fn new(config: WorkflowConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Builds the approval rows for a freshly submitted expense.
    ///
    /// With no rule the default policy applies: the submitter's manager, then an
    /// Admin when the converted amount is above the high-value threshold.
    pub fn build(
        &self,
        expense: &Expense,
        submitter: &User,
        rule: Option<&ApprovalRule>,
        directory: &CompanyDirectory,
        now: DateTime<Utc>,
    ) -> Result<WorkflowPlan, WorkflowError> {
        if expense.status != ExpenseStatus::Submitted {
            return Err(WorkflowError::ExpenseNotSubmitted {
                expense_id: expense.id.clone(),
                status: expense.status,
            });
        }

        let mut skipped = Vec::new();
        let planned = match rule {
            Some(rule) => self.plan_rule(submitter, rule, directory, &mut skipped)?,
            None => self.plan_default(expense, submitter, directory, &mut skipped)?,
        };
        let mut flows = materialize(expense, planned, now);

        let mut updated = expense.clone();
        updated.rule_applied = rule.map(|rule| rule.id.clone());
        updated.total_approvers = count_u32(flows.len());
        updated.approved_count =
            count_u32(flows.iter().filter(|flow| flow.auto_approved).count());
        updated.rejected_count = 0;
        updated.state_version = expense.state_version + 1;

        let mut events = Vec::new();
        let outcome = if flows.is_empty() {
            updated.status = ExpenseStatus::Approved;
            updated.approval_step = 0;
            updated.current_approver_id = None;
            updated.approved_at = Some(now);
            events.push(WorkflowEvent::new(
                updated.id.clone(),
                WorkflowEventKind::ExpenseFinalized { status: ExpenseStatus::Approved },
                now,
            ));
            ProgressOutcome::Finalized { status: ExpenseStatus::Approved }
        } else {
            let first_step = flows.iter().map(|flow| flow.approval_step).min().unwrap_or(1);
            updated.status = ExpenseStatus::UnderReview;
            updated.approval_step = first_step;
            updated.current_approver_id = flows
                .iter()
                .find(|flow| flow.approval_step == first_step)
                .map(|flow| flow.approver_id.clone());
            events.extend(
                flows
                    .iter()
                    .filter(|flow| flow.approval_step == first_step && flow.is_pending())
                    .map(|flow| {
                        WorkflowEvent::new(
                            updated.id.clone(),
                            WorkflowEventKind::ApproverAssigned {
                                approver_id: flow.approver_id.clone(),
                                step: first_step,
                                due_date: flow.due_date,
                            },
                            now,
                        )
                    }),
            );

            let progressed = progress(&mut updated, &mut flows, rule, now);
            events.extend(progressed.events);
            match progressed.outcome {
                ProgressOutcome::NoChange => ProgressOutcome::Advanced {
                    from_step: 0,
                    to_step: updated.approval_step,
                },
                other => other,
            }
        };

        Ok(WorkflowPlan {
            expense: updated,
            expected_version: expense.state_version,
            flows,
            events,
            skipped,
            outcome,
        })
    }

    fn plan_default(
        &self,
        expense: &Expense,
        submitter: &User,
        directory: &CompanyDirectory,
        skipped: &mut Vec<SkippedStep>,
    ) -> Result<Vec<PlannedRow>, WorkflowError> {
        let mut rows = Vec::new();
        let mut step = 1;

        if submitter.manager_id.is_some() {
            if let Some(manager) = self.manager_row(submitter, directory, step, skipped)? {
                rows.push(manager);
                step += 1;
            }
        }

        if expense.converted_amount > self.config.high_value_threshold {
            match directory.first_with_role(UserRole::Admin, &submitter.id) {
                Some(admin) => rows.push(PlannedRow {
                    approver_id: admin.id.clone(),
                    step,
                    approver_type: ApproverType::Admin,
                    required: true,
                    due_days: self.config.admin_due_days,
                    auto_approved: false,
                }),
                None => self.empty_step(
                    step,
                    ApproverType::Admin,
                    true,
                    "no active admin other than the submitter",
                    skipped,
                )?,
            }
        }

        Ok(rows)
    }

    fn plan_rule(
        &self,
        submitter: &User,
        rule: &ApprovalRule,
        directory: &CompanyDirectory,
        skipped: &mut Vec<SkippedStep>,
    ) -> Result<Vec<PlannedRow>, WorkflowError> {
        let mut rows = Vec::new();
        let mut step = 1;

        let skip_manager = rule.skip_manager_if_higher_role && submitter.role.outranks_employee();
        if rule.is_manager_required && submitter.manager_id.is_some() && !skip_manager {
            if let Some(manager) = self.manager_row(submitter, directory, step, skipped)? {
                rows.push(manager);
                step += 1;
            }
        }

        let mut block_has_rows = false;
        for definition in &rule.approval_steps {
            let approvers = resolve(definition, directory, &submitter.id);
            if approvers.is_empty() {
                self.empty_step(
                    step,
                    definition.approver_type,
                    definition.required,
                    "step selectors matched no active user",
                    skipped,
                )?;
                continue;
            }

            let due_days = definition.days.unwrap_or(self.config.default_step_due_days);
            if due_days == 0 || due_days > MAX_STEP_DUE_DAYS {
                return Err(WorkflowError::InvalidStepDueDays {
                    step,
                    days: due_days,
                    max: MAX_STEP_DUE_DAYS,
                });
            }
            rows.extend(approvers.into_iter().map(|approver| PlannedRow {
                approver_id: approver.id.clone(),
                step,
                approver_type: definition.approver_type,
                required: definition.required,
                due_days,
                auto_approved: false,
            }));

            if rule.parallel_approval {
                block_has_rows = true;
            } else {
                step += 1;
            }
        }
        if block_has_rows {
            step += 1;
        }

        if rule.rule_type == RuleType::SpecificApprover {
            if let Some(approver_id) = &rule.specific_approver_id {
                if approver_id == &submitter.id {
                    skipped.push(SkippedStep {
                        step,
                        approver_type: ApproverType::Cfo,
                        required: true,
                        reason: "the designated approver submitted the expense".to_string(),
                    });
                } else if directory.contains(approver_id) {
                    rows.push(PlannedRow {
                        approver_id: approver_id.clone(),
                        step,
                        approver_type: ApproverType::Cfo,
                        required: true,
                        due_days: self.config.specific_approver_due_days,
                        auto_approved: rule.auto_approve_conditions.cfo_approval,
                    });
                } else {
                    self.empty_step(
                        step,
                        ApproverType::Cfo,
                        true,
                        "designated approver is not an active user",
                        skipped,
                    )?;
                }
            }
        }

        Ok(rows)
    }

    fn manager_row(
        &self,
        submitter: &User,
        directory: &CompanyDirectory,
        step: u32,
        skipped: &mut Vec<SkippedStep>,
    ) -> Result<Option<PlannedRow>, WorkflowError> {
        let manager = submitter
            .manager_id
            .as_ref()
            .filter(|manager_id| *manager_id != &submitter.id)
            .and_then(|manager_id| directory.get(manager_id));

        match manager {
            Some(manager) => Ok(Some(PlannedRow {
                approver_id: manager.id.clone(),
                step,
                approver_type: ApproverType::Manager,
                required: true,
                due_days: self.config.manager_due_days,
                auto_approved: false,
            })),
            None => {
                self.empty_step(
                    step,
                    ApproverType::Manager,
                    true,
                    "manager is not an active user",
                    skipped,
                )?;
                Ok(None)
            }
        }
    }

    fn empty_step(
        &self,
        step: u32,
        approver_type: ApproverType,
        required: bool,
        reason: &str,
        skipped: &mut Vec<SkippedStep>,
    ) -> Result<(), WorkflowError> {
        if required && self.config.empty_step_policy == EmptyStepPolicy::Fail {
            return Err(WorkflowError::NoApplicableApprover { step, approver_type });
        }

        skipped.push(SkippedStep { step, approver_type, required, reason: reason.to_string() });
        Ok(())
    }
}

impl Default for WorkflowBuilder {
    fn default() -> Self {
        Self::new(WorkflowConfig::default())
    }
}

/// Longest due offset a rule step may ask for; matches the configured bounds.
pub const MAX_STEP_DUE_DAYS: u32 = 365;

fn materialize(
    expense: &Expense,
    planned: Vec<PlannedRow>,
    now: DateTime<Utc>,
) -> Vec<ApprovalFlow> {
    let mut flows: Vec<ApprovalFlow> = Vec::with_capacity(planned.len());
    for row in planned {
        let duplicate = flows
            .iter()
            .any(|flow| flow.approver_id == row.approver_id && flow.approval_step == row.step);
        if duplicate {
            continue;
        }

        flows.push(ApprovalFlow {
            id: ApprovalFlowId::generate(),
            expense_id: expense.id.clone(),
            approver_id: row.approver_id,
            approval_step: row.step,
            approver_type: row.approver_type,
            status: if row.auto_approved { FlowStatus::Approved } else { FlowStatus::Pending },
            is_required: row.required,
            action_date: row.auto_approved.then_some(now),
            comments: None,
            delegated_to: None,
            delegated_at: None,
            delegation_reason: None,
            auto_approved: row.auto_approved,
            auto_approval_reason: row.auto_approved.then(|| CFO_AUTO_APPROVAL_REASON.to_string()),
            due_date: now + Duration::days(i64::from(row.due_days)),
            priority: FlowPriority::Normal,
            created_at: now,
        });
    }
    flows
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use crate::config::{EmptyStepPolicy, WorkflowConfig};
    use crate::domain::company::CompanyId;
    use crate::domain::expense::{Expense, ExpenseCategory, ExpenseId, ExpenseStatus};
    use crate::domain::flow::{ApproverType, FlowStatus};
    use crate::domain::rule::{
        ApprovalRule, AutoApproveConditions, RuleId, RuleType, StepDefinition,
    };
    use crate::domain::user::{User, UserId, UserRole};
    use crate::workflow::progression::ProgressOutcome;
    use crate::workflow::resolver::CompanyDirectory;
    use crate::workflow::WorkflowError;

    use super::{WorkflowBuilder, WorkflowPlan};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 9, 30, 0).single().expect("valid instant")
    }

    fn user(id: &str, role: UserRole, manager: Option<&str>) -> User {
        User {
            id: UserId(id.to_string()),
            company_id: CompanyId("acme".to_string()),
            name: id.to_string(),
            email: format!("{id}@acme.test"),
            role,
            department: Some("Operations".to_string()),
            manager_id: manager.map(|id| UserId(id.to_string())),
            is_active: true,
        }
    }

    fn staff() -> Vec<User> {
        vec![
            user("u-emp", UserRole::Employee, Some("u-mgr")),
            user("u-loner", UserRole::Employee, None),
            user("u-mgr", UserRole::Manager, Some("u-admin")),
            user("u-admin", UserRole::Admin, None),
            user("u-fin-1", UserRole::Manager, None),
            user("u-fin-2", UserRole::Manager, None),
            user("u-cfo", UserRole::Admin, None),
        ]
    }

    fn directory() -> CompanyDirectory {
        CompanyDirectory::new(CompanyId("acme".to_string()), staff())
    }

    fn submitter(id: &str) -> User {
        staff().into_iter().find(|user| user.id.0 == id).expect("known user")
    }

    fn expense(submitted_by: &str, converted: i64) -> Expense {
        Expense {
            id: ExpenseId("EXP-42".to_string()),
            company_id: CompanyId("acme".to_string()),
            submitted_by: UserId(submitted_by.to_string()),
            title: "Customer visit".to_string(),
            amount: Decimal::new(converted, 0),
            currency: "USD".to_string(),
            converted_amount: Decimal::new(converted, 0),
            category: ExpenseCategory::Travel,
            expense_date: now().date_naive(),
            status: ExpenseStatus::Submitted,
            approval_step: 0,
            current_approver_id: None,
            rule_applied: None,
            total_approvers: 0,
            approved_count: 0,
            rejected_count: 0,
            rejection_reason: None,
            submitted_at: now(),
            approved_at: None,
            state_version: 0,
        }
    }

    fn rule(rule_type: RuleType, steps: Vec<StepDefinition>, parallel: bool) -> ApprovalRule {
        ApprovalRule {
            id: RuleId("rule-1".to_string()),
            company_id: CompanyId("acme".to_string()),
            name: "policy".to_string(),
            description: None,
            rule_type,
            condition: None,
            approval_steps: steps,
            percentage_required: None,
            specific_approver_id: None,
            auto_approve_conditions: AutoApproveConditions::default(),
            is_manager_required: false,
            skip_manager_if_higher_role: false,
            parallel_approval: parallel,
            priority: 1,
            is_active: true,
            effective_date: None,
            expiry_date: None,
            usage_count: 0,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn plan(
        submitted_by: &str,
        converted: i64,
        rule: Option<&ApprovalRule>,
    ) -> Result<WorkflowPlan, WorkflowError> {
        WorkflowBuilder::default().build(
            &expense(submitted_by, converted),
            &submitter(submitted_by),
            rule,
            &directory(),
            now(),
        )
    }

    fn finance_user(id: &str) -> StepDefinition {
        StepDefinition::for_user(ApproverType::Finance, UserId(id.to_string()))
    }

    #[test]
    fn small_expense_without_manager_auto_approves() {
        let plan = plan("u-loner", 800, None).expect("build");

        assert!(plan.flows.is_empty());
        assert_eq!(plan.expense.status, ExpenseStatus::Approved);
        assert_eq!(plan.expense.approval_step, 0);
        assert_eq!(plan.expense.approved_at, Some(now()));
        assert_eq!(plan.outcome, ProgressOutcome::Finalized { status: ExpenseStatus::Approved });
        assert!(!plan.counts_rule_usage());
    }

    #[test]
    fn high_value_expense_gets_manager_then_admin() {
        let plan = plan("u-emp", 1500, None).expect("build");

        let shape: Vec<(&str, u32, ApproverType)> = plan
            .flows
            .iter()
            .map(|flow| (flow.approver_id.0.as_str(), flow.approval_step, flow.approver_type))
            .collect();
        assert_eq!(
            shape,
            vec![("u-mgr", 1, ApproverType::Manager), ("u-admin", 2, ApproverType::Admin)]
        );
        assert_eq!(plan.expense.status, ExpenseStatus::UnderReview);
        assert_eq!(plan.expense.approval_step, 1);
        assert_eq!(plan.expense.current_approver_id, Some(UserId("u-mgr".to_string())));
        assert_eq!(plan.expense.total_approvers, 2);
        assert_eq!(plan.expense.state_version, 1);
        assert_eq!(plan.flows[0].due_date, now() + Duration::days(2));
        assert_eq!(plan.flows[1].due_date, now() + Duration::days(3));
        assert_eq!(plan.events.len(), 1);
    }

    #[test]
    fn exactly_threshold_stays_with_the_manager() {
        let plan = plan("u-emp", 1000, None).expect("build");
        assert_eq!(plan.flows.len(), 1);
        assert_eq!(plan.flows[0].approver_type, ApproverType::Manager);
    }

    #[test]
    fn high_value_admin_step_becomes_step_one_without_manager() {
        let plan = plan("u-loner", 5000, None).expect("build");
        assert_eq!(plan.flows.len(), 1);
        assert_eq!(plan.flows[0].approval_step, 1);
        assert_eq!(plan.flows[0].approver_id.0, "u-admin");
    }

    #[test]
    fn admin_submitter_is_never_their_own_approver() {
        let plan = plan("u-admin", 5000, None).expect("build");
        assert_eq!(plan.flows.len(), 1);
        assert_eq!(plan.flows[0].approver_id.0, "u-cfo");
    }

    #[test]
    fn parallel_rule_puts_every_definition_on_one_step() {
        let panel = rule(
            RuleType::Hybrid,
            vec![finance_user("u-fin-1"), finance_user("u-fin-2"), finance_user("u-cfo")],
            true,
        );
        let plan = plan("u-loner", 300, Some(&panel)).expect("build");

        assert_eq!(plan.flows.len(), 3);
        assert!(plan.flows.iter().all(|flow| flow.approval_step == 1));
        assert_eq!(plan.events.len(), 3, "every parallel approver is notified");
        assert_eq!(plan.expense.rule_applied, Some(RuleId("rule-1".to_string())));
        assert!(plan.counts_rule_usage());
    }

    #[test]
    fn sequential_rule_numbers_steps_after_the_manager() {
        let mut chain =
            rule(RuleType::Amount, vec![finance_user("u-fin-1"), finance_user("u-cfo")], false);
        chain.is_manager_required = true;
        let plan = plan("u-emp", 300, Some(&chain)).expect("build");

        let steps: Vec<(&str, u32)> = plan
            .flows
            .iter()
            .map(|flow| (flow.approver_id.0.as_str(), flow.approval_step))
            .collect();
        assert_eq!(steps, vec![("u-mgr", 1), ("u-fin-1", 2), ("u-cfo", 3)]);
    }

    #[test]
    fn higher_role_submitter_skips_manager_when_allowed() {
        let mut chain = rule(RuleType::RoleBased, vec![finance_user("u-fin-1")], false);
        chain.is_manager_required = true;
        chain.skip_manager_if_higher_role = true;
        let plan = plan("u-mgr", 300, Some(&chain)).expect("build");

        assert_eq!(plan.flows.len(), 1);
        assert_eq!(plan.flows[0].approver_id.0, "u-fin-1");
        assert_eq!(plan.flows[0].approval_step, 1);
    }

    #[test]
    fn required_step_without_approvers_fails_by_default() {
        let ghost = rule(RuleType::Department, vec![finance_user("u-nobody")], false);
        let error = plan("u-loner", 300, Some(&ghost)).expect_err("nobody to approve");
        assert_eq!(
            error,
            WorkflowError::NoApplicableApprover { step: 1, approver_type: ApproverType::Finance }
        );
    }

    #[test]
    fn step_due_offsets_outside_a_year_are_refused() {
        let mut far = finance_user("u-fin-1");
        far.days = Some(u32::MAX);
        let distant = rule(RuleType::Department, vec![far], false);
        let error = plan("u-loner", 300, Some(&distant)).expect_err("due date out of range");
        assert_eq!(error, WorkflowError::InvalidStepDueDays { step: 1, days: u32::MAX, max: 365 });

        let mut immediate = finance_user("u-fin-1");
        immediate.days = Some(0);
        let same_day = rule(RuleType::Department, vec![immediate], false);
        assert!(matches!(
            plan("u-loner", 300, Some(&same_day)),
            Err(WorkflowError::InvalidStepDueDays { days: 0, .. })
        ));

        let mut yearly = finance_user("u-fin-1");
        yearly.days = Some(365);
        let annual = rule(RuleType::Department, vec![yearly], false);
        let plan = plan("u-loner", 300, Some(&annual)).expect("a year out is allowed");
        assert_eq!(plan.flows[0].due_date, now() + Duration::days(365));
    }

    #[test]
    fn skip_policy_drops_empty_steps_and_keeps_numbering_dense() {
        let builder = WorkflowBuilder::new(WorkflowConfig {
            empty_step_policy: EmptyStepPolicy::Skip,
            ..WorkflowConfig::default()
        });
        let mixed =
            rule(RuleType::Amount, vec![finance_user("u-nobody"), finance_user("u-fin-2")], false);
        let plan = builder
            .build(
                &expense("u-loner", 300),
                &submitter("u-loner"),
                Some(&mixed),
                &directory(),
                now(),
            )
            .expect("build");

        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.flows.len(), 1);
        assert_eq!(plan.flows[0].approval_step, 1);
    }

    #[test]
    fn optional_empty_step_is_skipped_even_when_failing_is_configured() {
        let mut optional = finance_user("u-nobody");
        optional.required = false;
        let optional_rule = rule(RuleType::Amount, vec![optional], false);
        let plan = plan("u-loner", 300, Some(&optional_rule)).expect("build");
        assert!(plan.flows.is_empty());
        assert_eq!(plan.expense.status, ExpenseStatus::Approved);
        assert_eq!(plan.skipped.len(), 1);
    }

    #[test]
    fn specific_approver_with_cfo_auto_approval_finalizes_at_submission() {
        let mut specific = rule(RuleType::SpecificApprover, Vec::new(), false);
        specific.is_manager_required = true;
        specific.specific_approver_id = Some(UserId("u-cfo".to_string()));
        specific.auto_approve_conditions.cfo_approval = true;

        let plan = plan("u-emp", 9000, Some(&specific)).expect("build");

        assert_eq!(plan.flows.len(), 2);
        let cfo = &plan.flows[1];
        assert_eq!(cfo.approver_type, ApproverType::Cfo);
        assert_eq!(cfo.approval_step, 2);
        assert!(cfo.auto_approved);
        assert_eq!(cfo.status, FlowStatus::Approved);
        assert_eq!(cfo.auto_approval_reason.as_deref(), Some("CFO auto-approval rule"));
        assert_eq!(plan.flows[0].status, FlowStatus::Skipped);
        assert_eq!(plan.expense.status, ExpenseStatus::Approved);
        assert_eq!(plan.outcome, ProgressOutcome::Finalized { status: ExpenseStatus::Approved });
    }

    #[test]
    fn specific_approver_without_auto_approval_waits_for_the_cfo() {
        let mut specific = rule(RuleType::SpecificApprover, Vec::new(), false);
        specific.specific_approver_id = Some(UserId("u-cfo".to_string()));

        let plan = plan("u-emp", 9000, Some(&specific)).expect("build");

        assert_eq!(plan.flows.len(), 1);
        assert_eq!(plan.flows[0].status, FlowStatus::Pending);
        assert_eq!(plan.flows[0].due_date, now() + Duration::days(1));
        assert_eq!(plan.expense.current_approver_id, Some(UserId("u-cfo".to_string())));
    }

    #[test]
    fn resubmission_is_refused() {
        let mut reviewed = expense("u-emp", 1500);
        reviewed.status = ExpenseStatus::UnderReview;
        let error = WorkflowBuilder::default()
            .build(&reviewed, &submitter("u-emp"), None, &directory(), now())
            .expect_err("already in review");
        assert!(matches!(error, WorkflowError::ExpenseNotSubmitted { .. }));
    }
}
