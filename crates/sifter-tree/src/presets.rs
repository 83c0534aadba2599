//! Ready-made structures.

use indexmap::IndexMap;

use crate::error::StructureError;
use crate::node::{Category, NodeId, ParentPathEntry, Stage, ThresholdNode};
use crate::rule::{
    MetricState, Pattern, PatternCondition, PatternInfo, PatternRule, RangeInfo, RuleTrace,
    SplitRule,
};
use crate::structure::ThresholdStructure;

/// Metric read by the root split.
pub const FEATURE_SPLITTING: &str = "feature_splitting";
/// Metric read by the stage-1 splits.
pub const SEMDIST_MEAN: &str = "semdist_mean";
/// Scores compared at stage 2, in pattern order.
pub const SCORE_METRICS: [&str; 3] = ["score_fuzz", "score_simulation", "score_detection"];

/// Leaf suffix by number of high scores.
const AGREEMENT_LEAVES: [&str; 4] = ["all_3_low", "1_of_3_high", "2_of_3_high", "all_3_high"];

/// Thresholds for [`legacy_three_stage`].
///
/// # Defaults
///
/// | Parameter           | Default   |
/// |---------------------|-----------|
/// | `feature_splitting` | 0.00002   |
/// | `semdist_mean`      | 0.15      |
/// | `score_fuzz`        | 0.5       |
/// | `score_simulation`  | 0.5       |
/// | `score_detection`   | 0.2       |
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegacyThresholds {
    /// Root cut on `feature_splitting`.
    pub feature_splitting: f64,
    /// Stage-1 cut on `semdist_mean`.
    pub semdist_mean: f64,
    /// High cut for `score_fuzz`.
    pub score_fuzz: f64,
    /// High cut for `score_simulation`.
    pub score_simulation: f64,
    /// High cut for `score_detection`.
    pub score_detection: f64,
}

impl Default for LegacyThresholds {
    fn default() -> Self {
        Self {
            feature_splitting: 0.00002,
            semdist_mean: 0.15,
            score_fuzz: 0.5,
            score_simulation: 0.5,
            score_detection: 0.2,
        }
    }
}

impl LegacyThresholds {
    fn score_thresholds(&self) -> [f64; 3] {
        [self.score_fuzz, self.score_simulation, self.score_detection]
    }
}

fn range_entry(parent: &str, metric: &str, threshold: f64, branch: usize) -> ParentPathEntry {
    ParentPathEntry {
        parent_id: NodeId::new(parent),
        rule: RuleTrace::Range {
            range_info: RangeInfo {
                metric: metric.to_string(),
                thresholds: vec![threshold],
                selected_range: branch,
            },
        },
        branch_index: branch,
        triggering_values: None,
    }
}

/// Eight high/low combinations over the three scores, most highs first.
fn agreement_patterns(parent: &str) -> Vec<Pattern> {
    const MASKS: [u8; 8] = [0b111, 0b110, 0b101, 0b011, 0b100, 0b010, 0b001, 0b000];
    MASKS
        .iter()
        .map(|&mask| {
            let states: IndexMap<String, Option<MetricState>> = SCORE_METRICS
                .iter()
                .enumerate()
                .map(|(i, &metric)| {
                    let high = mask & (0b100 >> i) != 0;
                    let state = if high { MetricState::High } else { MetricState::Low };
                    (metric.to_string(), Some(state))
                })
                .collect();
            let n_high = mask.count_ones() as usize;
            let high_names: Vec<&str> = SCORE_METRICS
                .iter()
                .enumerate()
                .filter(|&(i, _)| mask & (0b100 >> i) != 0)
                .map(|(_, &m)| m.trim_start_matches("score_"))
                .collect();
            let description = if high_names.is_empty() {
                "all scores low".to_string()
            } else {
                format!("high: {}", high_names.join(", "))
            };
            Pattern {
                states,
                child_id: NodeId::new(format!("{parent}_{}", AGREEMENT_LEAVES[n_high])),
                description: Some(description),
            }
        })
        .collect()
}

/// The three-stage structure: feature splitting, semantic distance, then score agreement.
///
/// ```text
/// root --feature_splitting--> split_false | split_true
///      --semdist_mean------> *_semdist_low | *_semdist_high
///      --score pattern-----> *_all_3_low | *_1_of_3_high | *_2_of_3_high | *_all_3_high
/// ```
///
/// # Errors
///
/// Returns a [`StructureError`] only if `thresholds` contains non-finite values.
pub fn legacy_three_stage(thresholds: &LegacyThresholds) -> Result<ThresholdStructure, StructureError> {
    let mut nodes = vec![
        ThresholdNode::leaf("root", Stage::ROOT, Category::root()).with_split(
            SplitRule::range(FEATURE_SPLITTING, vec![thresholds.feature_splitting]),
            &["split_false", "split_true"],
        ),
    ];

    let conditions: IndexMap<String, PatternCondition> = SCORE_METRICS
        .iter()
        .zip(thresholds.score_thresholds())
        .map(|(&metric, t)| (metric.to_string(), PatternCondition::threshold(t)))
        .collect();

    for (split_branch, split_id) in ["split_false", "split_true"].into_iter().enumerate() {
        let split_path = vec![range_entry("root", FEATURE_SPLITTING, thresholds.feature_splitting, split_branch)];
        let semdist_ids = [format!("{split_id}_semdist_low"), format!("{split_id}_semdist_high")];
        nodes.push(
            ThresholdNode::leaf(split_id, Stage::new(1), Category::new("feature_splitting"))
                .with_parent_path(split_path.clone())
                .with_split(
                    SplitRule::range(SEMDIST_MEAN, vec![thresholds.semdist_mean]),
                    &[semdist_ids[0].as_str(), semdist_ids[1].as_str()],
                ),
        );

        for (semdist_branch, semdist_id) in semdist_ids.iter().enumerate() {
            let mut semdist_path = split_path.clone();
            semdist_path.push(range_entry(split_id, SEMDIST_MEAN, thresholds.semdist_mean, semdist_branch));

            let leaf_ids: Vec<String> = AGREEMENT_LEAVES
                .iter()
                .map(|suffix| format!("{semdist_id}_{suffix}"))
                .collect();
            let leaf_refs: Vec<&str> = leaf_ids.iter().map(String::as_str).collect();
            let patterns = agreement_patterns(semdist_id);

            nodes.push(
                ThresholdNode::leaf(semdist_id.as_str(), Stage::new(2), Category::new("semantic_distance"))
                    .with_parent_path(semdist_path.clone())
                    .with_split(
                        SplitRule::Pattern(PatternRule {
                            conditions: conditions.clone(),
                            patterns: patterns.clone(),
                            default_child_id: Some(NodeId::new(leaf_ids[0].as_str())),
                        }),
                        &leaf_refs,
                    ),
            );

            for (leaf_branch, leaf_id) in leaf_ids.iter().enumerate() {
                let representative = patterns.iter().position(|p| p.child_id.as_str() == leaf_id);
                let mut leaf_path = semdist_path.clone();
                leaf_path.push(ParentPathEntry {
                    parent_id: NodeId::new(semdist_id.as_str()),
                    rule: RuleTrace::Pattern {
                        pattern_info: PatternInfo {
                            pattern_index: representative,
                            pattern_description: Some(format!("score agreement: {}", AGREEMENT_LEAVES[leaf_branch])),
                            matched_pattern: representative
                                .map(|i| patterns[i].concrete_states())
                                .unwrap_or_default(),
                        },
                    },
                    branch_index: leaf_branch,
                    triggering_values: None,
                });
                nodes.push(
                    ThresholdNode::leaf(leaf_id.as_str(), Stage::new(3), Category::new("score_agreement"))
                        .with_parent_path(leaf_path),
                );
            }
        }
    }

    let metrics = std::iter::once(FEATURE_SPLITTING)
        .chain(std::iter::once(SEMDIST_MEAN))
        .chain(SCORE_METRICS)
        .map(String::from)
        .collect();
    ThresholdStructure::with_metrics(nodes, metrics)
}
