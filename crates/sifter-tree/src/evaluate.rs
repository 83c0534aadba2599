//! Split-rule evaluation: pick one child for one feature at one node.

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::config::MissingValuePolicy;
use crate::error::{EvaluationInconsistency, ExprError};
use crate::expr::{Expression, Namespace};
use crate::feature::{Metrics, lookup};
use crate::node::{NodeId, TriggeringValues};
use crate::rule::{
    ExpressionInfo, ExpressionRule, MetricState, PatternInfo, PatternRule, RangeInfo, RangeRule,
    RuleTrace, SplitRule,
};

/// Outcome of evaluating one split rule for one feature.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    /// Child the feature moves to.
    pub child_id: NodeId,
    /// Position of `child_id` in the node's `children_ids`.
    pub branch_index: usize,
    /// Which rule fired and with which parameters.
    pub trace: RuleTrace,
    /// Metric values the decision was based on.
    pub triggering_values: TriggeringValues,
    /// Non-fatal problems met along the way.
    pub inconsistencies: Vec<EvaluationInconsistency>,
}

/// Compiled conditions for one expression rule, index-aligned with its branches.
#[derive(Debug, Clone)]
pub struct CompiledBranches(Vec<Result<Expression, ExprError>>);

impl CompiledBranches {
    /// Compile every branch condition. Failures are kept and evaluate as false.
    ///
    /// With `available_metrics` set, a condition naming any other metric
    /// fails here with [`ExprError::UnknownMetric`].
    #[must_use]
    pub fn compile(rule: &ExpressionRule) -> Self {
        let compiled = rule
            .branches
            .iter()
            .map(|branch| {
                let result = Expression::compile(&branch.condition)
                    .and_then(|e| check_available(e, rule.available_metrics.as_deref()));
                if let Err(e) = &result {
                    warn!(
                        condition = %branch.condition,
                        child_id = %branch.child_id,
                        error = %e,
                        "expression branch does not compile, treating as false"
                    );
                }
                result
            })
            .collect();
        Self(compiled)
    }

    /// Return the number of compiled branches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Return `true` if there are no branches.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Evaluates split rules under a missing-value policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct SplitEvaluator {
    missing_values: MissingValuePolicy,
}

impl SplitEvaluator {
    /// Create an evaluator with the given missing-value policy.
    #[must_use]
    pub fn new(missing_values: MissingValuePolicy) -> Self {
        Self { missing_values }
    }

    /// Evaluate `rule` for a feature with `metrics`, routing among `children_ids`.
    ///
    /// Expression conditions are compiled on every call; use
    /// [`evaluate_compiled`](Self::evaluate_compiled) to reuse them.
    ///
    /// # Errors
    ///
    /// | Variant | When |
    /// |---------|------|
    /// | [`EvaluationInconsistency::NoChildren`] | `children_ids` is empty |
    /// | [`EvaluationInconsistency::MissingMetric`] | a range metric is absent under [`MissingValuePolicy::Stall`] |
    /// | [`EvaluationInconsistency::ChildNotListed`] | the selected child is not in `children_ids` |
    pub fn evaluate(
        &self,
        metrics: &Metrics,
        rule: &SplitRule,
        children_ids: &[NodeId],
    ) -> Result<EvaluationResult, EvaluationInconsistency> {
        self.evaluate_compiled(metrics, rule, children_ids, None)
    }

    /// Like [`evaluate`](Self::evaluate), reusing `compiled` for expression rules.
    ///
    /// # Errors
    ///
    /// Same as [`evaluate`](Self::evaluate).
    pub fn evaluate_compiled(
        &self,
        metrics: &Metrics,
        rule: &SplitRule,
        children_ids: &[NodeId],
        compiled: Option<&CompiledBranches>,
    ) -> Result<EvaluationResult, EvaluationInconsistency> {
        if children_ids.is_empty() {
            return Err(EvaluationInconsistency::NoChildren);
        }
        match rule {
            SplitRule::Range(range) => self.evaluate_range(metrics, range, children_ids),
            SplitRule::Pattern(pattern) => evaluate_pattern(metrics, pattern, children_ids),
            SplitRule::Expression(expression) => match compiled {
                Some(branches) if branches.len() == expression.branches.len() => {
                    evaluate_expression(metrics, expression, branches, children_ids)
                }
                _ => {
                    let branches = CompiledBranches::compile(expression);
                    evaluate_expression(metrics, expression, &branches, children_ids)
                }
            },
        }
    }

    fn evaluate_range(
        &self,
        metrics: &Metrics,
        rule: &RangeRule,
        children_ids: &[NodeId],
    ) -> Result<EvaluationResult, EvaluationInconsistency> {
        let observed = lookup(metrics, &rule.metric);
        let value = match (observed, self.missing_values) {
            (Some(v), _) => v,
            (None, MissingValuePolicy::TreatAsZero) => 0.0,
            (None, MissingValuePolicy::Stall) => {
                return Err(EvaluationInconsistency::MissingMetric { metric: rule.metric.clone() });
            }
        };

        let computed = rule.branch_for(value);
        let mut inconsistencies = Vec::new();
        let branch_index = if computed >= children_ids.len() {
            let inconsistency = EvaluationInconsistency::BranchClamped {
                computed,
                n_children: children_ids.len(),
            };
            warn!(metric = %rule.metric, value, %inconsistency, "range branch clamped");
            inconsistencies.push(inconsistency);
            children_ids.len() - 1
        } else {
            computed
        };

        Ok(EvaluationResult {
            child_id: children_ids[branch_index].clone(),
            branch_index,
            trace: RuleTrace::Range {
                range_info: RangeInfo {
                    metric: rule.metric.clone(),
                    thresholds: rule.thresholds.clone(),
                    selected_range: branch_index,
                },
            },
            triggering_values: TriggeringValues::from([(rule.metric.clone(), observed)]),
            inconsistencies,
        })
    }
}

/// Evaluate with the default policy, compiling expressions on the fly.
///
/// # Errors
///
/// Same as [`SplitEvaluator::evaluate`].
pub fn evaluate(
    metrics: &Metrics,
    rule: &SplitRule,
    children_ids: &[NodeId],
) -> Result<EvaluationResult, EvaluationInconsistency> {
    SplitEvaluator::default().evaluate(metrics, rule, children_ids)
}

fn locate(children_ids: &[NodeId], child_id: &NodeId) -> Result<usize, EvaluationInconsistency> {
    children_ids
        .iter()
        .position(|c| c == child_id)
        .ok_or_else(|| EvaluationInconsistency::ChildNotListed { child_id: child_id.clone() })
}

fn evaluate_pattern(
    metrics: &Metrics,
    rule: &PatternRule,
    children_ids: &[NodeId],
) -> Result<EvaluationResult, EvaluationInconsistency> {
    let mut triggering_values = TriggeringValues::new();
    let mut states: IndexMap<String, Option<MetricState>> = IndexMap::with_capacity(rule.conditions.len());
    for (metric, condition) in &rule.conditions {
        let value = lookup(metrics, metric);
        triggering_values.insert(metric.clone(), value);
        states.insert(metric.clone(), value.and_then(|v| condition.state(v)));
    }

    if let Some((pattern_index, pattern)) = rule
        .patterns
        .iter()
        .enumerate()
        .find(|(_, p)| p.matches(&states))
    {
        let branch_index = locate(children_ids, &pattern.child_id)?;
        return Ok(EvaluationResult {
            child_id: pattern.child_id.clone(),
            branch_index,
            trace: RuleTrace::Pattern {
                pattern_info: PatternInfo {
                    pattern_index: Some(pattern_index),
                    pattern_description: pattern.description.clone(),
                    matched_pattern: pattern.concrete_states(),
                },
            },
            triggering_values,
            inconsistencies: Vec::new(),
        });
    }

    let (child_id, branch_index) = match &rule.default_child_id {
        Some(default) => (default.clone(), locate(children_ids, default)?),
        None => {
            let last = children_ids.len() - 1;
            (children_ids[last].clone(), last)
        }
    };
    debug!(%child_id, "no pattern matched, using default child");
    Ok(EvaluationResult {
        child_id,
        branch_index,
        trace: RuleTrace::Pattern {
            pattern_info: PatternInfo {
                pattern_index: None,
                pattern_description: None,
                matched_pattern: IndexMap::new(),
            },
        },
        triggering_values,
        inconsistencies: Vec::new(),
    })
}

fn check_available(expression: Expression, available: Option<&[String]>) -> Result<Expression, ExprError> {
    let Some(available) = available else {
        return Ok(expression);
    };
    let unknown = expression
        .identifiers()
        .into_iter()
        .find(|name| !available.iter().any(|m| m.as_str() == *name))
        .map(str::to_string);
    match unknown {
        Some(name) => Err(ExprError::UnknownMetric { name }),
        None => Ok(expression),
    }
}

fn evaluate_expression(
    metrics: &Metrics,
    rule: &ExpressionRule,
    compiled: &CompiledBranches,
    children_ids: &[NodeId],
) -> Result<EvaluationResult, EvaluationInconsistency> {
    let namespace: Namespace = match &rule.available_metrics {
        Some(available) => available
            .iter()
            .map(|m| (m.clone(), lookup(metrics, m)))
            .collect(),
        None => metrics
            .iter()
            .map(|(m, &v)| (m.clone(), Some(v).filter(|v| !v.is_nan())))
            .collect(),
    };

    let mut inconsistencies = Vec::new();
    for (branch_index, (branch, expression)) in rule.branches.iter().zip(&compiled.0).enumerate() {
        let Ok(expression) = expression else {
            continue;
        };
        match expression.eval(&namespace) {
            Ok(true) => {
                let child_branch = locate(children_ids, &branch.child_id)?;
                return Ok(EvaluationResult {
                    child_id: branch.child_id.clone(),
                    branch_index: child_branch,
                    trace: RuleTrace::Expression {
                        expression_info: ExpressionInfo {
                            branch_index: Some(branch_index),
                            condition: branch.condition.clone(),
                            description: branch.description.clone(),
                        },
                    },
                    triggering_values: referenced_values(expression, &namespace),
                    inconsistencies,
                });
            }
            Ok(false) => {}
            // An unknown name at this point is a metric this record lacks.
            Err(ExprError::MissingValue { name } | ExprError::UnknownMetric { name }) => {
                debug!(condition = %branch.condition, metric = %name, "metric absent, branch is false");
            }
            Err(e) => {
                warn!(condition = %branch.condition, error = %e, "expression branch failed, treating as false");
                inconsistencies.push(EvaluationInconsistency::InvalidExpression {
                    condition: branch.condition.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    let branch_index = locate(children_ids, &rule.default_child_id)?;
    Ok(EvaluationResult {
        child_id: rule.default_child_id.clone(),
        branch_index,
        trace: RuleTrace::Expression {
            expression_info: ExpressionInfo {
                branch_index: None,
                condition: "default".to_string(),
                description: None,
            },
        },
        triggering_values: namespace,
        inconsistencies,
    })
}

fn referenced_values(expression: &Expression, namespace: &Namespace) -> TriggeringValues {
    expression
        .identifiers()
        .into_iter()
        .map(|name| (name.to_string(), namespace.get(name).copied().flatten()))
        .collect()
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::{CompiledBranches, SplitEvaluator, evaluate};
    use crate::config::MissingValuePolicy;
    use crate::error::{EvaluationInconsistency, ExprError};
    use crate::feature::Metrics;
    use crate::node::NodeId;
    use crate::rule::{
        ExpressionBranch, ExpressionRule, MetricState, Pattern, PatternCondition, PatternRule,
        RuleTrace, SplitRule,
    };

    fn ids(names: &[&str]) -> Vec<NodeId> {
        names.iter().map(|&n| NodeId::new(n)).collect()
    }

    fn metrics(pairs: &[(&str, f64)]) -> Metrics {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    // --- Range ---

    #[test]
    fn range_selects_by_threshold_count() {
        let rule = SplitRule::range("x", vec![0.1, 0.3, 0.6]);
        let children = ids(&["c0", "c1", "c2", "c3"]);
        for (value, expected) in [(0.05, "c0"), (0.2, "c1"), (0.5, "c2"), (0.8, "c3"), (0.3, "c2")] {
            let result = evaluate(&metrics(&[("x", value)]), &rule, &children).unwrap();
            assert_eq!(result.child_id.as_str(), expected, "value {value}");
        }
    }

    #[test]
    fn range_clamps_to_last_child() {
        let rule = SplitRule::range("x", vec![0.1, 0.3]);
        let children = ids(&["a", "b"]);
        let result = evaluate(&metrics(&[("x", 0.9)]), &rule, &children).unwrap();
        assert_eq!(result.child_id.as_str(), "b");
        assert_eq!(result.branch_index, 1);
        assert_eq!(
            result.inconsistencies,
            vec![EvaluationInconsistency::BranchClamped { computed: 2, n_children: 2 }]
        );
    }

    #[test]
    fn range_missing_metric_stalls_by_default() {
        let rule = SplitRule::range("x", vec![0.5]);
        let err = evaluate(&Metrics::new(), &rule, &ids(&["a", "b"])).unwrap_err();
        assert_eq!(err, EvaluationInconsistency::MissingMetric { metric: "x".into() });
    }

    #[test]
    fn range_missing_metric_as_zero() {
        let rule = SplitRule::range("x", vec![-1.0, 0.5]);
        let evaluator = SplitEvaluator::new(MissingValuePolicy::TreatAsZero);
        let result = evaluator
            .evaluate(&Metrics::new(), &rule, &ids(&["a", "b", "c"]))
            .unwrap();
        assert_eq!(result.child_id.as_str(), "b");
        assert_eq!(result.triggering_values.get("x"), Some(&None));
    }

    #[test]
    fn range_trace_records_selection() {
        let rule = SplitRule::range("x", vec![0.5]);
        let result = evaluate(&metrics(&[("x", 0.7)]), &rule, &ids(&["a", "b"])).unwrap();
        let RuleTrace::Range { range_info } = result.trace else {
            panic!("expected range trace");
        };
        assert_eq!(range_info.selected_range, 1);
        assert_eq!(result.triggering_values.get("x"), Some(&Some(0.7)));
    }

    #[test]
    fn no_children_is_an_error() {
        let rule = SplitRule::range("x", vec![0.5]);
        assert_eq!(
            evaluate(&metrics(&[("x", 0.7)]), &rule, &[]),
            Err(EvaluationInconsistency::NoChildren)
        );
    }

    // --- Pattern ---

    fn two_metric_pattern(default: Option<&str>) -> SplitRule {
        let conditions = IndexMap::from([
            ("a".to_string(), PatternCondition::threshold(0.5)),
            ("b".to_string(), PatternCondition::threshold(0.5)),
        ]);
        let pattern = |a: Option<MetricState>, b: Option<MetricState>, child: &str| Pattern {
            states: IndexMap::from([("a".to_string(), a), ("b".to_string(), b)]),
            child_id: NodeId::new(child),
            description: Some(format!("to {child}")),
        };
        SplitRule::Pattern(PatternRule {
            conditions,
            patterns: vec![
                pattern(Some(MetricState::High), Some(MetricState::High), "both"),
                pattern(Some(MetricState::High), None, "a_only"),
                pattern(Some(MetricState::Low), Some(MetricState::Low), "neither"),
            ],
            default_child_id: default.map(NodeId::new),
        })
    }

    #[test]
    fn first_matching_pattern_wins() {
        let rule = two_metric_pattern(None);
        let children = ids(&["both", "a_only", "neither", "other"]);
        let result = evaluate(&metrics(&[("a", 0.9), ("b", 0.9)]), &rule, &children).unwrap();
        assert_eq!(result.child_id.as_str(), "both");

        let result = evaluate(&metrics(&[("a", 0.9), ("b", 0.1)]), &rule, &children).unwrap();
        assert_eq!(result.child_id.as_str(), "a_only");
        let RuleTrace::Pattern { pattern_info } = result.trace else {
            panic!("expected pattern trace");
        };
        assert_eq!(pattern_info.pattern_index, Some(1));
        assert_eq!(pattern_info.pattern_description.as_deref(), Some("to a_only"));
        assert_eq!(pattern_info.matched_pattern.len(), 1);
    }

    #[test]
    fn reordering_patterns_changes_the_child() {
        let children = ids(&["both", "a_only", "neither", "other"]);
        let input = metrics(&[("a", 0.9), ("b", 0.9)]);
        let mut rule = two_metric_pattern(None);
        assert_eq!(evaluate(&input, &rule, &children).unwrap().child_id.as_str(), "both");

        let SplitRule::Pattern(pattern_rule) = &mut rule else {
            unreachable!();
        };
        pattern_rule.patterns.swap(0, 1);
        let result = evaluate(&input, &rule, &children).unwrap();
        assert_eq!(result.child_id.as_str(), "a_only");
        let RuleTrace::Pattern { pattern_info } = result.trace else {
            panic!("expected pattern trace");
        };
        assert_eq!(pattern_info.pattern_index, Some(0));
    }

    #[test]
    fn pattern_default_then_last_child() {
        let children = ids(&["both", "a_only", "neither", "other"]);
        let input = metrics(&[("a", 0.1), ("b", 0.9)]);

        let with_default = evaluate(&input, &two_metric_pattern(Some("neither")), &children).unwrap();
        assert_eq!(with_default.child_id.as_str(), "neither");

        let without = evaluate(&input, &two_metric_pattern(None), &children).unwrap();
        assert_eq!(without.child_id.as_str(), "other");
        assert_eq!(without.branch_index, 3);
        let RuleTrace::Pattern { pattern_info } = without.trace else {
            panic!("expected pattern trace");
        };
        assert_eq!(pattern_info.pattern_index, None);
    }

    #[test]
    fn pattern_missing_metric_only_matches_wildcards() {
        let children = ids(&["both", "a_only", "neither", "other"]);
        let result = evaluate(&metrics(&[("a", 0.9)]), &two_metric_pattern(None), &children).unwrap();
        assert_eq!(result.child_id.as_str(), "a_only");
        assert_eq!(result.triggering_values.get("b"), Some(&None));
    }

    #[test]
    fn pattern_child_not_listed() {
        let children = ids(&["a_only", "neither"]);
        let err = evaluate(&metrics(&[("a", 0.9), ("b", 0.9)]), &two_metric_pattern(None), &children)
            .unwrap_err();
        assert_eq!(err, EvaluationInconsistency::ChildNotListed { child_id: NodeId::new("both") });
    }

    // --- Expression ---

    fn expression_rule(conditions: &[&str], available: Option<Vec<&str>>) -> ExpressionRule {
        ExpressionRule {
            available_metrics: available.map(|a| a.into_iter().map(String::from).collect()),
            branches: conditions
                .iter()
                .enumerate()
                .map(|(i, c)| ExpressionBranch {
                    condition: c.to_string(),
                    child_id: NodeId::new(format!("b{i}")),
                    description: None,
                })
                .collect(),
            default_child_id: NodeId::new("fallback"),
        }
    }

    #[test]
    fn expression_first_true_branch_wins() {
        let rule = SplitRule::Expression(expression_rule(&["x > 0.8", "x > 0.4"], None));
        let children = ids(&["b0", "b1", "fallback"]);
        let result = evaluate(&metrics(&[("x", 0.5)]), &rule, &children).unwrap();
        assert_eq!(result.child_id.as_str(), "b1");
        assert_eq!(result.triggering_values.get("x"), Some(&Some(0.5)));
    }

    #[test]
    fn expression_default_when_nothing_holds() {
        let rule = SplitRule::Expression(expression_rule(&["x > 0.8"], None));
        let children = ids(&["b0", "fallback"]);
        let result = evaluate(&metrics(&[("x", 0.5)]), &rule, &children).unwrap();
        assert_eq!(result.child_id.as_str(), "fallback");
        let RuleTrace::Expression { expression_info } = result.trace else {
            panic!("expected expression trace");
        };
        assert_eq!(expression_info.branch_index, None);
        assert_eq!(expression_info.condition, "default");
    }

    #[test]
    fn broken_expression_is_false_not_fatal() {
        let rule = SplitRule::Expression(expression_rule(&["x >> 1", "open(1)", "x > 0"], None));
        let children = ids(&["b0", "b1", "b2", "fallback"]);
        let result = evaluate(&metrics(&[("x", 0.5)]), &rule, &children).unwrap();
        assert_eq!(result.child_id.as_str(), "b2");
    }

    #[test]
    fn available_metrics_restrict_namespace() {
        let rule = expression_rule(&["hidden > 0"], Some(vec!["visible"]));
        let children = ids(&["b0", "fallback"]);
        let input = metrics(&[("visible", 1.0), ("hidden", 1.0)]);
        let compiled = CompiledBranches::compile(&rule);
        assert!(matches!(
            compiled.0.as_slice(),
            [Err(ExprError::UnknownMetric { name })] if name == "hidden"
        ));
        let result = SplitEvaluator::default()
            .evaluate_compiled(&input, &SplitRule::Expression(rule), &children, Some(&compiled))
            .unwrap();
        assert_eq!(result.child_id.as_str(), "fallback");
        assert!(result.inconsistencies.is_empty());
    }

    #[test]
    fn metric_missing_from_one_record_is_not_invalid() {
        let rule = SplitRule::Expression(expression_rule(&["z > 0", "x > 0"], None));
        let children = ids(&["b0", "b1", "fallback"]);
        let result = evaluate(&metrics(&[("x", 0.5)]), &rule, &children).unwrap();
        assert_eq!(result.child_id.as_str(), "b1");
        assert!(result.inconsistencies.is_empty());
    }

    #[test]
    fn missing_metric_makes_branch_false() {
        let rule = SplitRule::Expression(expression_rule(&["y > 0"], Some(vec!["y"])));
        let children = ids(&["b0", "fallback"]);
        let result = evaluate(&Metrics::new(), &rule, &children).unwrap();
        assert_eq!(result.child_id.as_str(), "fallback");
        assert!(result.inconsistencies.is_empty());
    }

    #[test]
    fn precompiled_branches_match_on_the_fly() {
        let rule = expression_rule(&["x > 0.4"], None);
        let compiled = CompiledBranches::compile(&rule);
        assert_eq!(compiled.len(), 1);
        let split = SplitRule::Expression(rule);
        let children = ids(&["b0", "fallback"]);
        let input = metrics(&[("x", 0.5)]);
        let evaluator = SplitEvaluator::default();
        assert_eq!(
            evaluator.evaluate_compiled(&input, &split, &children, Some(&compiled)),
            evaluator.evaluate(&input, &split, &children)
        );
    }

    // --- Determinism ---

    #[test]
    fn evaluation_is_deterministic() {
        let rule = two_metric_pattern(Some("neither"));
        let children = ids(&["both", "a_only", "neither", "other"]);
        let input = metrics(&[("a", 0.51), ("b", 0.49)]);
        let first = evaluate(&input, &rule, &children).unwrap();
        for _ in 0..10 {
            assert_eq!(evaluate(&input, &rule, &children).unwrap(), first);
        }
    }
}
