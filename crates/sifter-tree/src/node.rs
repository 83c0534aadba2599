use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

use crate::rule::{RuleTrace, SplitRule};

/// Metric name to the value observed when a split was taken. `None` marks an absent metric.
pub type TriggeringValues = BTreeMap<String, Option<f64>>;

/// Unique identifier of a node within a threshold structure.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Depth of a node: the root is stage 0 and each edge adds one.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct Stage(u32);

impl Stage {
    /// The root stage.
    pub const ROOT: Stage = Stage(0);

    /// Create a stage from a raw depth.
    #[must_use]
    pub fn new(depth: u32) -> Self {
        Self(depth)
    }

    /// Return the raw depth.
    #[must_use]
    pub fn value(self) -> u32 {
        self.0
    }

    /// Return the stage one level deeper.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Return the depth as a `usize`, for comparison with path lengths.
    #[must_use]
    pub fn depth(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Open-ended grouping label for display (e.g. `root`, `feature_splitting`).
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct Category(String);

impl Category {
    /// Label reserved for the stage-0 node.
    pub const ROOT: &'static str = "root";

    /// Create a category from any string-like value.
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// Return the root category.
    #[must_use]
    pub fn root() -> Self {
        Self::new(Self::ROOT)
    }

    /// Return the raw label.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Return `true` for the root category.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }

    /// Human-readable name: `root` renders as "All Features", anything else is title-cased.
    #[must_use]
    pub fn display_name(&self) -> String {
        if self.is_root() {
            return "All Features".to_string();
        }
        let titled = title_case(&self.0);
        if titled.is_empty() { "Unknown".to_string() } else { titled }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Title-case a snake, kebab, or space separated label: `score_agreement` -> `Score Agreement`.
#[must_use]
pub fn title_case(label: &str) -> String {
    label
        .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// One ancestor decision on the way to a node.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ParentPathEntry {
    /// The ancestor that made the decision.
    pub parent_id: NodeId,
    /// Which rule fired and with which parameters.
    #[serde(rename = "parent_split_rule")]
    pub rule: RuleTrace,
    /// Position of the chosen child in the ancestor's `children_ids`.
    pub branch_index: usize,
    /// Metric values that triggered the decision, when recorded during classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggering_values: Option<TriggeringValues>,
}

/// A node of a threshold structure.
///
/// Nodes live in a flat list and reference their children by [`NodeId`].
/// A node without a split rule is a leaf.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ThresholdNode {
    /// Unique id within the structure.
    pub id: NodeId,
    /// Depth from the root.
    pub stage: Stage,
    /// Display grouping label.
    pub category: Category,
    /// Ancestor decisions from the root down to this node.
    #[serde(default)]
    pub parent_path: Vec<ParentPathEntry>,
    /// How features leaving this node are routed; `None` for leaves.
    #[serde(default)]
    pub split_rule: Option<SplitRule>,
    /// Ordered child ids. Empty for leaves.
    #[serde(default)]
    pub children_ids: Vec<NodeId>,
}

impl ThresholdNode {
    /// Create a leaf node with an empty parent path.
    pub fn leaf(id: impl Into<String>, stage: Stage, category: Category) -> Self {
        Self {
            id: NodeId::new(id),
            stage,
            category,
            parent_path: Vec::new(),
            split_rule: None,
            children_ids: Vec::new(),
        }
    }

    /// Attach a split rule and the ordered children it routes to.
    #[must_use]
    pub fn with_split(mut self, rule: SplitRule, children: &[&str]) -> Self {
        self.split_rule = Some(rule);
        self.children_ids = children.iter().map(|&c| NodeId::new(c)).collect();
        self
    }

    /// Replace the parent path.
    #[must_use]
    pub fn with_parent_path(mut self, parent_path: Vec<ParentPathEntry>) -> Self {
        self.parent_path = parent_path;
        self
    }

    /// Return `true` if this node has no split rule.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.split_rule.is_none()
    }

    /// Return the position of `child` in `children_ids`.
    #[must_use]
    pub fn child_position(&self, child: &str) -> Option<usize> {
        self.children_ids.iter().position(|c| c.as_str() == child)
    }
}

#[cfg(test)]
mod tests {
    use super::{Category, NodeId, Stage, ThresholdNode, title_case};
    use crate::rule::{RangeRule, SplitRule};

    // --- NodeId ---

    #[test]
    fn node_id_display() {
        assert_eq!(format!("{}", NodeId::new("split_true")), "split_true");
    }

    #[test]
    fn node_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&NodeId::new("root")).unwrap();
        assert_eq!(json, "\"root\"");
    }

    // --- Stage ---

    #[test]
    fn stage_next_and_ordering() {
        assert_eq!(Stage::ROOT.next(), Stage::new(1));
        assert!(Stage::new(1) < Stage::new(2));
        assert_eq!(Stage::new(3).depth(), 3);
    }

    // --- Category ---

    #[test]
    fn root_category_display_name() {
        assert_eq!(Category::root().display_name(), "All Features");
    }

    #[test]
    fn category_display_name_title_cases() {
        assert_eq!(Category::new("score_agreement").display_name(), "Score Agreement");
        assert_eq!(Category::new("feature-splitting").display_name(), "Feature Splitting");
    }

    #[test]
    fn blank_category_renders_unknown() {
        assert_eq!(Category::new("__").display_name(), "Unknown");
    }

    #[test]
    fn title_case_lowercases_tail() {
        assert_eq!(title_case("SEMDIST_mean"), "Semdist Mean");
    }

    // --- ThresholdNode ---

    fn make_split() -> ThresholdNode {
        ThresholdNode::leaf("root", Stage::ROOT, Category::root()).with_split(
            SplitRule::range("x", vec![0.5]),
            &["low", "high"],
        )
    }

    #[test]
    fn leaf_is_leaf() {
        assert!(ThresholdNode::leaf("a", Stage::new(1), Category::new("c")).is_leaf());
    }

    #[test]
    fn split_is_not_leaf() {
        assert!(!make_split().is_leaf());
    }

    #[test]
    fn child_position_finds_declared_order() {
        let node = make_split();
        assert_eq!(node.child_position("high"), Some(1));
        assert_eq!(node.child_position("missing"), None);
    }

    #[test]
    fn range_rule_helper_builds_range_variant() {
        assert!(matches!(
            make_split().split_rule,
            Some(SplitRule::Range(RangeRule { ref metric, .. })) if metric == "x"
        ));
    }
}
