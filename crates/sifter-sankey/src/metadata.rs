use std::collections::BTreeMap;

use sifter_tree::{SplitRule, ThresholdStructure};

/// Flatten every cut value in `structure` into one map keyed by metric.
///
/// A range with one threshold contributes `metric`; with several,
/// `metric_0`, `metric_1`, and so on. Pattern conditions contribute their
/// threshold, else their comparison value. Expression rules contribute
/// nothing. Later nodes overwrite earlier ones on key collisions.
#[must_use]
pub fn applied_thresholds(structure: &ThresholdStructure) -> BTreeMap<String, f64> {
    let mut applied = BTreeMap::new();
    for rule in structure.nodes().iter().filter_map(|n| n.split_rule.as_ref()) {
        match rule {
            SplitRule::Range(range) => match range.thresholds.as_slice() {
                [] => {}
                [single] => {
                    applied.insert(range.metric.clone(), *single);
                }
                many => {
                    for (i, &t) in many.iter().enumerate() {
                        applied.insert(format!("{}_{i}", range.metric), t);
                    }
                }
            },
            SplitRule::Pattern(pattern) => {
                for (metric, condition) in &pattern.conditions {
                    if let Some(cut) = condition.cut_value() {
                        applied.insert(metric.clone(), cut);
                    }
                }
            }
            SplitRule::Expression(_) => {}
        }
    }
    applied
}
