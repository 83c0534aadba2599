//! Split rule variants and the trace each one leaves in a parent path.

use std::fmt;

use indexmap::IndexMap;

use crate::node::NodeId;

/// Absolute tolerance used by `==` and `!=` on floats.
pub const FLOAT_TOLERANCE: f64 = 1e-9;

/// How features leaving a node are routed to its children.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SplitRule {
    /// Branch by counting thresholds at or below one metric's value.
    Range(RangeRule),
    /// Branch on the first pattern of per-metric states that matches.
    Pattern(PatternRule),
    /// Branch on the first boolean condition that holds.
    Expression(ExpressionRule),
}

impl SplitRule {
    /// Shorthand for a range rule.
    pub fn range(metric: impl Into<String>, thresholds: Vec<f64>) -> Self {
        SplitRule::Range(RangeRule {
            metric: metric.into(),
            thresholds,
        })
    }

    /// Return the rule kind as written in the `type` tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SplitRule::Range(_) => "range",
            SplitRule::Pattern(_) => "pattern",
            SplitRule::Expression(_) => "expression",
        }
    }

    /// Child ids the rule can route to by name, excluding positional range routing.
    #[must_use]
    pub fn routed_children(&self) -> Vec<&NodeId> {
        match self {
            SplitRule::Range(_) => Vec::new(),
            SplitRule::Pattern(rule) => rule
                .patterns
                .iter()
                .map(|p| &p.child_id)
                .chain(rule.default_child_id.as_ref())
                .collect(),
            SplitRule::Expression(rule) => rule
                .branches
                .iter()
                .map(|b| &b.child_id)
                .chain(std::iter::once(&rule.default_child_id))
                .collect(),
        }
    }
}

/// Range split: the branch is the number of thresholds the value reaches.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RangeRule {
    /// Metric to read.
    pub metric: String,
    /// Strictly ascending cut points. `n` thresholds give `n + 1` branches.
    pub thresholds: Vec<f64>,
}

impl RangeRule {
    /// Branch index for `value`: boundaries route to the higher branch.
    #[must_use]
    pub fn branch_for(&self, value: f64) -> usize {
        self.thresholds.iter().take_while(|&&t| value >= t).count()
    }
}

/// Comparison operator shared by pattern conditions and expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CompareOp {
    /// `>`
    #[serde(rename = ">")]
    Gt,
    /// `>=`
    #[serde(rename = ">=")]
    Ge,
    /// `<`
    #[serde(rename = "<")]
    Lt,
    /// `<=`
    #[serde(rename = "<=")]
    Le,
    /// `==`, within [`FLOAT_TOLERANCE`]
    #[serde(rename = "==")]
    Eq,
    /// `!=`, outside [`FLOAT_TOLERANCE`]
    #[serde(rename = "!=")]
    Ne,
}

impl CompareOp {
    /// Apply the operator to `lhs op rhs`.
    #[must_use]
    pub fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            CompareOp::Gt => lhs > rhs,
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Eq => (lhs - rhs).abs() < FLOAT_TOLERANCE,
            CompareOp::Ne => (lhs - rhs).abs() >= FLOAT_TOLERANCE,
        }
    }

    /// Return the operator as written.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Discrete state of one metric under a pattern condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricState {
    /// At or above the threshold, or the comparison held.
    High,
    /// Below the threshold, or the comparison failed.
    Low,
    /// Inside `[min, max]`.
    InRange,
    /// Outside `[min, max]`.
    OutRange,
}

impl fmt::Display for MetricState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricState::High => "high",
            MetricState::Low => "low",
            MetricState::InRange => "in_range",
            MetricState::OutRange => "out_range",
        };
        f.write_str(name)
    }
}

/// How one metric's value maps to a [`MetricState`].
///
/// Checked in order: `threshold`, then `min`/`max`, then `operator`/`value`.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PatternCondition {
    /// `value >= threshold` is high, otherwise low.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    /// Inclusive lower bound for `in_range`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Inclusive upper bound for `in_range`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Comparison whose truth means high.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<CompareOp>,
    /// Right-hand side for `operator`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl PatternCondition {
    /// High at or above `threshold`.
    #[must_use]
    pub fn threshold(threshold: f64) -> Self {
        Self {
            threshold: Some(threshold),
            ..Self::default()
        }
    }

    /// In range within `[min, max]`; either bound may be open.
    #[must_use]
    pub fn range(min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            min,
            max,
            ..Self::default()
        }
    }

    /// High when `metric op value` holds.
    #[must_use]
    pub fn compare(operator: CompareOp, value: f64) -> Self {
        Self {
            operator: Some(operator),
            value: Some(value),
            ..Self::default()
        }
    }

    /// Return `true` if any of the three comparison forms is set.
    #[must_use]
    pub fn is_specified(&self) -> bool {
        self.threshold.is_some()
            || self.min.is_some()
            || self.max.is_some()
            || (self.operator.is_some() && self.value.is_some())
    }

    /// State of `value` under this condition, or `None` when no form applies.
    #[must_use]
    pub fn state(&self, value: f64) -> Option<MetricState> {
        if let Some(threshold) = self.threshold {
            return Some(if value >= threshold { MetricState::High } else { MetricState::Low });
        }
        if self.min.is_some() || self.max.is_some() {
            let above = self.min.is_none_or(|min| value >= min);
            let below = self.max.is_none_or(|max| value <= max);
            return Some(if above && below { MetricState::InRange } else { MetricState::OutRange });
        }
        match (self.operator, self.value) {
            (Some(op), Some(rhs)) => {
                Some(if op.apply(value, rhs) { MetricState::High } else { MetricState::Low })
            }
            _ => None,
        }
    }

    /// The single cut value this condition exposes, if any: `threshold`, else `value`.
    #[must_use]
    pub fn cut_value(&self) -> Option<f64> {
        self.threshold.or(self.value)
    }
}

/// Expected per-metric states and the child they route to.
///
/// A `null` state is a wildcard.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Pattern {
    /// Expected state per metric; `None` matches anything.
    #[serde(rename = "match")]
    pub states: IndexMap<String, Option<MetricState>>,
    /// Child selected when the pattern matches.
    pub child_id: NodeId,
    /// Optional label for display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Pattern {
    /// Return `true` when every non-wildcard expectation equals the computed state.
    ///
    /// A metric with no computed state never satisfies a concrete expectation.
    #[must_use]
    pub fn matches(&self, computed: &IndexMap<String, Option<MetricState>>) -> bool {
        self.states.iter().all(|(metric, expected)| match expected {
            None => true,
            Some(expected) => matches!(computed.get(metric), Some(Some(actual)) if actual == expected),
        })
    }

    /// Non-wildcard expectations, in declared order.
    #[must_use]
    pub fn concrete_states(&self) -> IndexMap<String, MetricState> {
        self.states
            .iter()
            .filter_map(|(metric, state)| state.map(|s| (metric.clone(), s)))
            .collect()
    }
}

/// Pattern split over several metrics.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PatternRule {
    /// Per-metric conditions, in declared order.
    pub conditions: IndexMap<String, PatternCondition>,
    /// Patterns tried in order; the first match wins.
    pub patterns: Vec<Pattern>,
    /// Child used when nothing matches. Falls back to the last child when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_child_id: Option<NodeId>,
}

/// One boolean condition and the child it routes to.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExpressionBranch {
    /// Condition text in the branch-condition language.
    pub condition: String,
    /// Child selected when the condition holds.
    pub child_id: NodeId,
    /// Optional label for display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Expression split: branches tried in order, then the default.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExpressionRule {
    /// Names visible to conditions. When unset, every metric of the feature is visible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_metrics: Option<Vec<String>>,
    /// Branches tried in order; the first true condition wins.
    pub branches: Vec<ExpressionBranch>,
    /// Child used when no condition holds.
    pub default_child_id: NodeId,
}

// --- Traces ---

/// Which rule fired at an ancestor, with its parameters.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleTrace {
    /// A range rule fired.
    Range {
        /// Range parameters and the selected branch.
        range_info: RangeInfo,
    },
    /// A pattern rule fired.
    Pattern {
        /// The matched pattern, or the default.
        pattern_info: PatternInfo,
    },
    /// An expression rule fired.
    Expression {
        /// The true branch, or the default.
        expression_info: ExpressionInfo,
    },
}

impl RuleTrace {
    /// Return the rule kind as written in the `type` tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RuleTrace::Range { .. } => "range",
            RuleTrace::Pattern { .. } => "pattern",
            RuleTrace::Expression { .. } => "expression",
        }
    }
}

/// Trace of a range decision.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RangeInfo {
    /// Metric read.
    pub metric: String,
    /// Thresholds in effect.
    pub thresholds: Vec<f64>,
    /// Branch selected.
    pub selected_range: usize,
}

/// Trace of a pattern decision. `pattern_index` is `-1` on the wire for the default.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PatternInfo {
    /// Index of the matched pattern; `None` when the default was used.
    #[serde(default, with = "optional_index")]
    pub pattern_index: Option<usize>,
    /// Description of the matched pattern, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_description: Option<String>,
    /// Concrete states the matched pattern required.
    #[serde(default)]
    pub matched_pattern: IndexMap<String, MetricState>,
}

/// Trace of an expression decision. `branch_index` is `-1` on the wire for the default.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExpressionInfo {
    /// Index of the true branch; `None` when the default was used.
    #[serde(default, with = "optional_index")]
    pub branch_index: Option<usize>,
    /// Condition text of the true branch, or `"default"`.
    pub condition: String,
    /// Description of the true branch, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Serialize `Option<usize>` as a plain integer with `-1` for `None`.
mod optional_index {
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(
        index: &Option<usize>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match index {
            Some(i) => serializer.serialize_u64(*i as u64),
            None => serializer.serialize_i64(-1),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<usize>, D::Error> {
        let raw = Option::<i64>::deserialize(deserializer)?;
        Ok(raw.and_then(|i| usize::try_from(i).ok()))
    }
}
