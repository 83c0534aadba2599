//! Human-readable node labels.
//!
//! Names derive from the node's category and the rule of the parent that
//! routes to it. Unknown categories are title-cased; nothing here fails.

use sifter_tree::{
    ExpressionRule, MetricState, PatternRule, SplitRule, ThresholdNode, ThresholdStructure,
    title_case,
};

/// Display name for `node`: `"<Category>: <branch label>"`, or the category alone for the root.
#[must_use]
pub fn display_name(node: &ThresholdNode, structure: &ThresholdStructure) -> String {
    let category = node.category.display_name();
    if node.category.is_root() || node.stage == sifter_tree::Stage::ROOT {
        return category;
    }
    let Some(parent) = structure.parent_of(node.id.as_str()) else {
        return category;
    };
    let Some(rule) = &parent.split_rule else {
        return category;
    };
    let branch_index = parent
        .child_position(node.id.as_str())
        .or_else(|| node.parent_path.last().map(|e| e.branch_index))
        .unwrap_or(0);

    let label = match rule {
        SplitRule::Range(range) => range_label(branch_index, range.thresholds.len()),
        SplitRule::Pattern(pattern) => pattern_label(pattern, node, branch_index),
        SplitRule::Expression(expression) => expression_label(expression, node, branch_index),
    };
    format!("{category}: {label}")
}

/// `Low` for the first branch, `High` for the last, `Range k` (1-based) between.
fn range_label(branch_index: usize, n_thresholds: usize) -> String {
    if branch_index == 0 {
        "Low".to_string()
    } else if branch_index >= n_thresholds {
        "High".to_string()
    } else {
        format!("Range {}", branch_index + 1)
    }
}

/// Metric name for labels: drops a `score_` prefix and title-cases.
fn metric_label(metric: &str) -> String {
    title_case(metric.strip_prefix("score_").unwrap_or(metric))
}

fn pattern_label(rule: &PatternRule, node: &ThresholdNode, branch_index: usize) -> String {
    let routing: Vec<_> = rule.patterns.iter().filter(|p| p.child_id == node.id).collect();
    if routing.is_empty() {
        if rule.default_child_id.as_ref() == Some(&node.id) {
            return "Default".to_string();
        }
        return format!("Pattern {}", branch_index + 1);
    }

    let n = rule.conditions.len();
    let high_counts: Vec<Option<usize>> = routing
        .iter()
        .map(|p| {
            let fully_binary = n > 0
                && rule.conditions.keys().all(|m| {
                    matches!(
                        p.states.get(m),
                        Some(Some(MetricState::High | MetricState::Low))
                    )
                });
            fully_binary.then(|| {
                p.states
                    .values()
                    .filter(|s| **s == Some(MetricState::High))
                    .count()
            })
        })
        .collect();

    match high_counts.first().copied().flatten() {
        Some(k) if high_counts.iter().all(|c| *c == Some(k)) => {
            if k == n {
                "All High".to_string()
            } else if k == 0 {
                "All Low".to_string()
            } else if let [only] = routing.as_slice() {
                let names: Vec<String> = rule
                    .conditions
                    .keys()
                    .filter(|m| only.states.get(*m) == Some(&Some(MetricState::High)))
                    .map(|m| metric_label(m))
                    .collect();
                format!("{k} of {n} High ({})", names.join(", "))
            } else {
                format!("{k} of {n} High")
            }
        }
        _ => routing
            .iter()
            .find_map(|p| p.description.clone())
            .unwrap_or_else(|| format!("Pattern {}", branch_index + 1)),
    }
}

fn expression_label(rule: &ExpressionRule, node: &ThresholdNode, branch_index: usize) -> String {
    let routing: Vec<(usize, _)> = rule
        .branches
        .iter()
        .enumerate()
        .filter(|(_, b)| b.child_id == node.id)
        .collect();
    if let Some(description) = routing.iter().find_map(|(_, b)| b.description.clone()) {
        return description;
    }
    if let Some((position, _)) = routing.first() {
        return format!("Branch {}", position + 1);
    }
    if rule.default_child_id == node.id {
        return "Default".to_string();
    }
    format!("Branch {}", branch_index + 1)
}
