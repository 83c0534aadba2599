//! Threshold-tree classification: model, split evaluation, routing.
//!
//! A [`ThresholdStructure`] is a validated tree of nodes, each optionally
//! carrying a [`SplitRule`] (range, pattern, or expression). A [`Classifier`]
//! walks each [`FeatureRecord`] from the root to a leaf and records the
//! path, per-stage nodes, and triggering metric values.

mod classify;
mod config;
mod error;
mod evaluate;
mod feature;
mod node;
mod result;
mod rule;
mod structure;

pub mod expr;
pub mod format;
pub mod presets;

pub use classify::{Classifier, classify, features_at_node};
pub use config::{ClassifierConfig, MissingValuePolicy, UnknownPolicy};
pub use error::{EmptyResultError, EvaluationInconsistency, ExprError, StructureError};
pub use evaluate::{CompiledBranches, EvaluationResult, SplitEvaluator, evaluate};
pub use feature::{FeatureId, FeatureRecord, Metrics, lookup};
pub use node::{
    Category, NodeId, ParentPathEntry, Stage, ThresholdNode, TriggeringValues, title_case,
};
pub use result::{ClassificationResult, ClassificationSummary, Stall};
pub use rule::{
    CompareOp, ExpressionBranch, ExpressionInfo, ExpressionRule, FLOAT_TOLERANCE, MetricState,
    Pattern, PatternCondition, PatternInfo, PatternRule, RangeInfo, RangeRule, RuleTrace,
    SplitRule,
};
pub use structure::{FORMAT_VERSION, ThresholdStructure};
