//! Rule matching: condition evaluation, the per-company rule cache and rule selection.

pub mod cache;
pub mod condition;
pub mod selector;

pub use cache::RuleCache;
pub use condition::{evaluate_condition, matches, validate_condition, ConditionError, FieldValue};
pub use selector::{applicable_rules, select_rule, RuleSelector};
