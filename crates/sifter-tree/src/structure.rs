//! Validated threshold structure: a flat node arena with id lookup.

use std::collections::{HashMap, HashSet};

use tracing::{debug, instrument};

use crate::error::StructureError;
use crate::expr::Expression;
use crate::node::{NodeId, ParentPathEntry, Stage, ThresholdNode};
use crate::rule::SplitRule;

/// Version written into serialized structures.
pub const FORMAT_VERSION: u32 = 2;

fn default_version() -> u32 {
    FORMAT_VERSION
}

/// Wire shape of a structure before validation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub(crate) struct RawStructure {
    pub(crate) nodes: Vec<ThresholdNode>,
    #[serde(default)]
    pub(crate) metrics: Vec<String>,
    #[serde(default = "default_version")]
    pub(crate) version: u32,
}

/// A validated tree of threshold nodes.
///
/// Nodes are stored in declaration order and referenced by [`NodeId`].
/// Construction validates the whole tree; afterwards the structure is
/// immutable and safe to share across threads.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "RawStructure", into = "RawStructure")]
pub struct ThresholdStructure {
    nodes: Vec<ThresholdNode>,
    metrics: Vec<String>,
    version: u32,
    index: HashMap<NodeId, usize>,
    root: usize,
}

impl ThresholdStructure {
    /// Validate `nodes` and build a structure. The metric list is inferred from the rules.
    ///
    /// # Errors
    ///
    /// | Variant | When |
    /// |---------|------|
    /// | [`StructureError::EmptyStructure`] | `nodes` is empty |
    /// | [`StructureError::DuplicateNodeId`] | two nodes share an id |
    /// | [`StructureError::MissingRoot`] / [`StructureError::DuplicateRoot`] | not exactly one stage-0 node |
    /// | [`StructureError::DanglingChild`] | a child id is unknown |
    /// | [`StructureError::StageMismatch`] | a child is not one stage deeper |
    /// | [`StructureError::ParentPathLength`] / [`StructureError::DanglingParentPath`] | malformed parent path |
    /// | rule variants | a split rule disagrees with the node's children |
    pub fn validate(nodes: Vec<ThresholdNode>) -> Result<Self, StructureError> {
        Self::with_metrics(nodes, Vec::new())
    }

    /// Like [`validate`](Self::validate), with declared metrics listed first.
    ///
    /// # Errors
    ///
    /// Same as [`validate`](Self::validate).
    #[instrument(skip_all, fields(n_nodes = nodes.len()))]
    pub fn with_metrics(
        nodes: Vec<ThresholdNode>,
        declared_metrics: Vec<String>,
    ) -> Result<Self, StructureError> {
        // --- Validate inputs ---
        if nodes.is_empty() {
            return Err(StructureError::EmptyStructure);
        }

        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() {
                return Err(StructureError::DuplicateNodeId { node_id: node.id.clone() });
            }
        }

        let root = find_root(&nodes)?;

        for node in &nodes {
            check_rule(node)?;
            check_parent_path(node, &index)?;
            for child_id in &node.children_ids {
                let Some(&child_idx) = index.get(child_id) else {
                    return Err(StructureError::DanglingChild {
                        node_id: node.id.clone(),
                        child_id: child_id.clone(),
                    });
                };
                let child = &nodes[child_idx];
                if child.stage != node.stage.next() {
                    return Err(StructureError::StageMismatch {
                        parent_id: node.id.clone(),
                        parent_stage: node.stage,
                        child_id: child.id.clone(),
                        child_stage: child.stage,
                    });
                }
            }
        }

        let metrics = collect_metrics(&nodes, declared_metrics);
        debug!(n_metrics = metrics.len(), "threshold structure validated");

        Ok(Self {
            nodes,
            metrics,
            version: FORMAT_VERSION,
            index,
            root,
        })
    }

    /// Parse and validate a flat structure document.
    ///
    /// # Errors
    ///
    /// Returns [`StructureError::Json`] for malformed JSON, otherwise any
    /// validation error from [`validate`](Self::validate).
    pub fn from_json(json: &str) -> Result<Self, StructureError> {
        let raw: RawStructure = serde_json::from_str(json)?;
        Self::try_from(raw)
    }

    /// Serialize to a pretty-printed flat structure document.
    ///
    /// # Errors
    ///
    /// Returns [`StructureError::Json`] if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String, StructureError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    // --- Lookup ---

    /// Return the stage-0 node.
    #[must_use]
    pub fn root(&self) -> &ThresholdNode {
        &self.nodes[self.root]
    }

    /// Return the node with `id`.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&ThresholdNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Return the children of `id` in declared order; empty for leaves and unknown ids.
    #[must_use]
    pub fn children(&self, id: &str) -> Vec<&ThresholdNode> {
        self.node(id)
            .map(|node| {
                node.children_ids
                    .iter()
                    .filter_map(|c| self.node(c.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Return the declaration position of `id`.
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Return the nodes at `stage`, in declaration order.
    #[must_use]
    pub fn nodes_at_stage(&self, stage: Stage) -> Vec<&ThresholdNode> {
        self.nodes.iter().filter(|n| n.stage == stage).collect()
    }

    /// Return the deepest stage present.
    #[must_use]
    pub fn max_stage(&self) -> Stage {
        self.nodes.iter().map(|n| n.stage).max().unwrap_or(Stage::ROOT)
    }

    /// Return the ancestor ids of `id` from the root down, excluding `id` itself.
    #[must_use]
    pub fn ancestors(&self, id: &str) -> Vec<&NodeId> {
        self.node(id)
            .map(|node| node.parent_path.iter().map(|e| &e.parent_id).collect())
            .unwrap_or_default()
    }

    /// Return the decisions a feature must satisfy to reach `id`.
    #[must_use]
    pub fn path_constraints(&self, id: &str) -> &[ParentPathEntry] {
        self.node(id)
            .map(|node| node.parent_path.as_slice())
            .unwrap_or_default()
    }

    /// Return the node that lists `id` as a child.
    #[must_use]
    pub fn parent_of(&self, id: &str) -> Option<&ThresholdNode> {
        if let Some(entry) = self.node(id).and_then(|n| n.parent_path.last())
            && let Some(parent) = self.node(entry.parent_id.as_str())
            && parent.child_position(id).is_some()
        {
            return Some(parent);
        }
        self.nodes.iter().find(|n| n.child_position(id).is_some())
    }

    // --- Getters ---

    /// Return all nodes in declaration order.
    #[must_use]
    pub fn nodes(&self) -> &[ThresholdNode] {
        &self.nodes
    }

    /// Return metric names used by the structure: declared first, then referenced.
    #[must_use]
    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    /// Return the format version.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Return the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always `false`; a validated structure has at least a root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl TryFrom<RawStructure> for ThresholdStructure {
    type Error = StructureError;

    fn try_from(raw: RawStructure) -> Result<Self, Self::Error> {
        let mut structure = Self::with_metrics(raw.nodes, raw.metrics)?;
        structure.version = raw.version;
        Ok(structure)
    }
}

impl From<ThresholdStructure> for RawStructure {
    fn from(structure: ThresholdStructure) -> Self {
        Self {
            nodes: structure.nodes,
            metrics: structure.metrics,
            version: structure.version,
        }
    }
}

// --- Validation helpers ---

fn find_root(nodes: &[ThresholdNode]) -> Result<usize, StructureError> {
    let mut roots = nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.stage == Stage::ROOT);
    let Some((root, first)) = roots.next() else {
        return Err(StructureError::MissingRoot);
    };
    if let Some((_, second)) = roots.next() {
        return Err(StructureError::DuplicateRoot {
            first: first.id.clone(),
            second: second.id.clone(),
        });
    }
    Ok(root)
}

fn check_parent_path(
    node: &ThresholdNode,
    index: &HashMap<NodeId, usize>,
) -> Result<(), StructureError> {
    if node.parent_path.len() != node.stage.depth() {
        return Err(StructureError::ParentPathLength {
            node_id: node.id.clone(),
            stage: node.stage,
            got: node.parent_path.len(),
        });
    }
    if let Some(entry) = node
        .parent_path
        .iter()
        .find(|e| !index.contains_key(&e.parent_id))
    {
        return Err(StructureError::DanglingParentPath {
            node_id: node.id.clone(),
            parent_id: entry.parent_id.clone(),
        });
    }
    Ok(())
}

fn check_rule(node: &ThresholdNode) -> Result<(), StructureError> {
    let node_id = || node.id.clone();
    let Some(rule) = &node.split_rule else {
        if !node.children_ids.is_empty() {
            return Err(StructureError::LeafWithChildren {
                node_id: node_id(),
                n_children: node.children_ids.len(),
            });
        }
        return Ok(());
    };

    match rule {
        SplitRule::Range(range) => {
            if range.thresholds.is_empty() {
                return Err(StructureError::EmptyThresholds {
                    node_id: node_id(),
                    metric: range.metric.clone(),
                });
            }
            let ascending = range.thresholds.iter().all(|t| t.is_finite())
                && range.thresholds.windows(2).all(|w| w[0] < w[1]);
            if !ascending {
                return Err(StructureError::ThresholdsNotAscending {
                    node_id: node_id(),
                    metric: range.metric.clone(),
                    thresholds: range.thresholds.clone(),
                });
            }
            let expected = range.thresholds.len() + 1;
            if node.children_ids.len() != expected {
                return Err(StructureError::ChildrenCountMismatch {
                    node_id: node_id(),
                    n_thresholds: range.thresholds.len(),
                    expected,
                    got: node.children_ids.len(),
                });
            }
        }
        SplitRule::Pattern(pattern) => {
            if pattern.patterns.is_empty() {
                return Err(StructureError::NoPatterns { node_id: node_id() });
            }
            if let Some((metric, _)) = pattern.conditions.iter().find(|(_, c)| !c.is_specified()) {
                return Err(StructureError::EmptyCondition {
                    node_id: node_id(),
                    metric: metric.clone(),
                });
            }
        }
        SplitRule::Expression(expression) => {
            if expression.branches.is_empty() {
                return Err(StructureError::NoBranches { node_id: node_id() });
            }
        }
    }

    let listed: HashSet<&NodeId> = node.children_ids.iter().collect();
    let mut missing: Vec<NodeId> = Vec::new();
    for child in rule.routed_children() {
        if !listed.contains(child) && !missing.contains(child) {
            missing.push(child.clone());
        }
    }
    if !missing.is_empty() {
        return Err(StructureError::MissingRuleChildren { node_id: node_id(), missing });
    }
    Ok(())
}

fn collect_metrics(nodes: &[ThresholdNode], declared: Vec<String>) -> Vec<String> {
    let mut metrics = declared;
    let mut push = |name: &str| {
        if !metrics.iter().any(|m| m == name) {
            metrics.push(name.to_string());
        }
    };
    for rule in nodes.iter().filter_map(|n| n.split_rule.as_ref()) {
        match rule {
            SplitRule::Range(range) => push(&range.metric),
            SplitRule::Pattern(pattern) => pattern.conditions.keys().for_each(|m| push(m)),
            SplitRule::Expression(expression) => match &expression.available_metrics {
                Some(available) => available.iter().for_each(|m| push(m)),
                None => {
                    for branch in &expression.branches {
                        if let Ok(compiled) = Expression::compile(&branch.condition) {
                            compiled.identifiers().into_iter().for_each(&mut push);
                        }
                    }
                }
            },
        }
    }
    metrics
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::ThresholdStructure;
    use crate::error::StructureError;
    use crate::node::{Category, NodeId, ParentPathEntry, Stage, ThresholdNode};
    use crate::rule::{
        ExpressionBranch, ExpressionRule, Pattern, PatternCondition, PatternRule, RangeInfo,
        RuleTrace, SplitRule,
    };

    fn entry(parent: &str, metric: &str, branch: usize) -> ParentPathEntry {
        ParentPathEntry {
            parent_id: NodeId::new(parent),
            rule: RuleTrace::Range {
                range_info: RangeInfo {
                    metric: metric.to_string(),
                    thresholds: vec![0.5],
                    selected_range: branch,
                },
            },
            branch_index: branch,
            triggering_values: None,
        }
    }

    fn two_level() -> Vec<ThresholdNode> {
        vec![
            ThresholdNode::leaf("root", Stage::ROOT, Category::root())
                .with_split(SplitRule::range("x", vec![0.5]), &["low", "high"]),
            ThresholdNode::leaf("low", Stage::new(1), Category::new("x_split"))
                .with_parent_path(vec![entry("root", "x", 0)]),
            ThresholdNode::leaf("high", Stage::new(1), Category::new("x_split"))
                .with_parent_path(vec![entry("root", "x", 1)]),
        ]
    }

    // --- Valid structures ---

    #[test]
    fn valid_structure_builds() {
        let s = ThresholdStructure::validate(two_level()).unwrap();
        assert_eq!(s.root().id.as_str(), "root");
        assert_eq!(s.len(), 3);
        assert_eq!(s.metrics(), &["x".to_string()]);
        assert_eq!(s.max_stage(), Stage::new(1));
    }

    #[test]
    fn lookup_helpers() {
        let s = ThresholdStructure::validate(two_level()).unwrap();
        let children: Vec<&str> = s.children("root").iter().map(|n| n.id.as_str()).collect();
        assert_eq!(children, vec!["low", "high"]);
        assert!(s.children("low").is_empty());
        assert_eq!(s.position("high"), Some(2));
        assert_eq!(s.nodes_at_stage(Stage::new(1)).len(), 2);
        assert_eq!(s.ancestors("high"), vec![&NodeId::new("root")]);
        assert_eq!(s.path_constraints("high")[0].branch_index, 1);
        assert_eq!(s.parent_of("low").map(|n| n.id.as_str()), Some("root"));
        assert!(s.node("nope").is_none());
    }

    #[test]
    fn declared_metrics_come_first() {
        let s = ThresholdStructure::with_metrics(two_level(), vec!["z".into(), "x".into()]).unwrap();
        assert_eq!(s.metrics(), &["z".to_string(), "x".to_string()]);
    }

    // --- Invalid structures ---

    #[test]
    fn rejects_empty() {
        assert!(matches!(
            ThresholdStructure::validate(Vec::new()),
            Err(StructureError::EmptyStructure)
        ));
    }

    #[test]
    fn rejects_two_roots() {
        let mut nodes = two_level();
        nodes.push(ThresholdNode::leaf("other_root", Stage::ROOT, Category::root()));
        assert!(matches!(
            ThresholdStructure::validate(nodes),
            Err(StructureError::DuplicateRoot { .. })
        ));
    }

    #[test]
    fn rejects_missing_root() {
        let nodes = vec![
            ThresholdNode::leaf("orphan", Stage::new(1), Category::new("c"))
                .with_parent_path(vec![entry("orphan", "x", 0)]),
        ];
        assert!(matches!(
            ThresholdStructure::validate(nodes),
            Err(StructureError::MissingRoot)
        ));
    }

    #[test]
    fn rejects_dangling_child() {
        let mut nodes = two_level();
        nodes.pop();
        let err = ThresholdStructure::validate(nodes).unwrap_err();
        assert!(matches!(
            err,
            StructureError::DanglingChild { ref child_id, .. } if child_id.as_str() == "high"
        ));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let mut nodes = two_level();
        nodes.push(nodes[1].clone());
        assert!(matches!(
            ThresholdStructure::validate(nodes),
            Err(StructureError::DuplicateNodeId { .. })
        ));
    }

    #[test]
    fn rejects_children_count_mismatch() {
        let mut nodes = two_level();
        nodes[0].split_rule = Some(SplitRule::range("x", vec![0.2, 0.5]));
        assert!(matches!(
            ThresholdStructure::validate(nodes),
            Err(StructureError::ChildrenCountMismatch { expected: 3, got: 2, .. })
        ));
    }

    #[test]
    fn rejects_descending_thresholds() {
        let mut nodes = two_level();
        nodes[0].split_rule = Some(SplitRule::range("x", vec![0.5, 0.2]));
        nodes[0].children_ids.push(NodeId::new("high"));
        assert!(matches!(
            ThresholdStructure::validate(nodes),
            Err(StructureError::ThresholdsNotAscending { .. })
        ));
    }

    #[test]
    fn rejects_leaf_with_children() {
        let mut nodes = two_level();
        nodes[0].split_rule = None;
        assert!(matches!(
            ThresholdStructure::validate(nodes),
            Err(StructureError::LeafWithChildren { n_children: 2, .. })
        ));
    }

    #[test]
    fn rejects_stage_skip() {
        let mut nodes = two_level();
        nodes[2].stage = Stage::new(2);
        nodes[2].parent_path.push(entry("root", "x", 1));
        assert!(matches!(
            ThresholdStructure::validate(nodes),
            Err(StructureError::StageMismatch { .. })
        ));
    }

    #[test]
    fn rejects_bad_parent_path() {
        let mut nodes = two_level();
        nodes[1].parent_path.clear();
        assert!(matches!(
            ThresholdStructure::validate(nodes),
            Err(StructureError::ParentPathLength { got: 0, .. })
        ));

        let mut nodes = two_level();
        nodes[1].parent_path = vec![entry("ghost", "x", 0)];
        assert!(matches!(
            ThresholdStructure::validate(nodes),
            Err(StructureError::DanglingParentPath { .. })
        ));
    }

    #[test]
    fn rejects_pattern_routing_to_unlisted_child() {
        let mut nodes = two_level();
        nodes[0].split_rule = Some(SplitRule::Pattern(PatternRule {
            conditions: IndexMap::from([("x".to_string(), PatternCondition::threshold(0.5))]),
            patterns: vec![Pattern {
                states: IndexMap::new(),
                child_id: NodeId::new("elsewhere"),
                description: None,
            }],
            default_child_id: None,
        }));
        let err = ThresholdStructure::validate(nodes).unwrap_err();
        assert!(matches!(err, StructureError::MissingRuleChildren { ref missing, .. } if missing.len() == 1));
    }

    #[test]
    fn rejects_pattern_condition_with_no_bounds() {
        let mut nodes = two_level();
        nodes[0].split_rule = Some(SplitRule::Pattern(PatternRule {
            conditions: IndexMap::from([
                ("x".to_string(), PatternCondition::threshold(0.5)),
                ("y".to_string(), PatternCondition::default()),
            ]),
            patterns: vec![Pattern {
                states: IndexMap::new(),
                child_id: NodeId::new("low"),
                description: None,
            }],
            default_child_id: Some(NodeId::new("high")),
        }));
        let err = ThresholdStructure::validate(nodes).unwrap_err();
        assert!(matches!(err, StructureError::EmptyCondition { ref metric, .. } if metric == "y"));
    }

    #[test]
    fn rejects_expression_without_branches() {
        let mut nodes = two_level();
        nodes[0].split_rule = Some(SplitRule::Expression(ExpressionRule {
            available_metrics: None,
            branches: Vec::new(),
            default_child_id: NodeId::new("low"),
        }));
        assert!(matches!(
            ThresholdStructure::validate(nodes),
            Err(StructureError::NoBranches { .. })
        ));
    }

    #[test]
    fn expression_identifiers_feed_metrics() {
        let mut nodes = two_level();
        nodes[0].split_rule = Some(SplitRule::Expression(ExpressionRule {
            available_metrics: None,
            branches: vec![ExpressionBranch {
                condition: "alpha > 1 and beta < 2".into(),
                child_id: NodeId::new("high"),
                description: None,
            }],
            default_child_id: NodeId::new("low"),
        }));
        let s = ThresholdStructure::validate(nodes).unwrap();
        assert_eq!(s.metrics(), &["alpha".to_string(), "beta".to_string()]);
    }

    // --- Serde ---

    #[test]
    fn json_roundtrip_preserves_nodes() {
        let s = ThresholdStructure::validate(two_level()).unwrap();
        let json = s.to_json_pretty().unwrap();
        let back = ThresholdStructure::from_json(&json).unwrap();
        assert_eq!(back.nodes(), s.nodes());
        assert_eq!(back.version(), super::FORMAT_VERSION);
    }

    #[test]
    fn deserialize_runs_validation() {
        let json = r#"{"nodes":[
            {"id":"a","stage":0,"category":"root"},
            {"id":"b","stage":0,"category":"root"}
        ]}"#;
        assert!(matches!(
            ThresholdStructure::from_json(json),
            Err(StructureError::DuplicateRoot { .. })
        ));
        assert!(serde_json::from_str::<ThresholdStructure>(json).is_err());
    }
}
