//! Channel to archive classification mapping.

pub mod resolver;
pub mod rules_file;

pub use resolver::{Classification, ClassificationResolver, RuleStatistics};
pub use rules_file::{ClassificationRule, RuleTable, RulesFile};
