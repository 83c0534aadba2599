use crate::node::{NodeId, Stage};

/// Errors raised while building or validating a [`ThresholdStructure`](crate::ThresholdStructure).
#[derive(Debug, thiserror::Error)]
pub enum StructureError {
    /// Returned when the node list is empty.
    #[error("threshold structure has no nodes")]
    EmptyStructure,

    /// Returned when no node sits at stage 0.
    #[error("threshold structure has no stage-0 root node")]
    MissingRoot,

    /// Returned when more than one node sits at stage 0.
    #[error("threshold structure has more than one root: {first} and {second}")]
    DuplicateRoot {
        /// The first stage-0 node encountered.
        first: NodeId,
        /// The second stage-0 node encountered.
        second: NodeId,
    },

    /// Returned when two nodes share an id.
    #[error("node id {node_id} appears more than once")]
    DuplicateNodeId {
        /// The repeated id.
        node_id: NodeId,
    },

    /// Returned when a node lists a child that does not exist.
    #[error("node {node_id} references unknown child {child_id}")]
    DanglingChild {
        /// The node holding the reference.
        node_id: NodeId,
        /// The child id that could not be resolved.
        child_id: NodeId,
    },

    /// Returned when a parent-path entry names a node that does not exist.
    #[error("node {node_id} has parent-path entry for unknown node {parent_id}")]
    DanglingParentPath {
        /// The node holding the parent path.
        node_id: NodeId,
        /// The ancestor id that could not be resolved.
        parent_id: NodeId,
    },

    /// Returned when the parent path is not exactly `stage` entries long.
    #[error("node {node_id} at stage {stage} has {got} parent-path entries")]
    ParentPathLength {
        /// The offending node.
        node_id: NodeId,
        /// Stage of the offending node.
        stage: Stage,
        /// Number of entries actually present.
        got: usize,
    },

    /// Returned when a child is not exactly one stage below its parent.
    #[error("child {child_id} (stage {child_stage}) of {parent_id} (stage {parent_stage}) is not one stage deeper")]
    StageMismatch {
        /// The parent node.
        parent_id: NodeId,
        /// Stage of the parent node.
        parent_stage: Stage,
        /// The child node.
        child_id: NodeId,
        /// Stage of the child node.
        child_stage: Stage,
    },

    /// Returned when a node without a split rule lists children.
    #[error("leaf node {node_id} lists {n_children} children")]
    LeafWithChildren {
        /// The offending node.
        node_id: NodeId,
        /// Number of children listed.
        n_children: usize,
    },

    /// Returned when a range rule's branch count disagrees with its children.
    #[error("range rule on {node_id} has {n_thresholds} thresholds, needs {expected} children, got {got}")]
    ChildrenCountMismatch {
        /// The offending node.
        node_id: NodeId,
        /// Number of thresholds in the rule.
        n_thresholds: usize,
        /// Number of children the rule requires.
        expected: usize,
        /// Number of children listed.
        got: usize,
    },

    /// Returned when a range rule has no thresholds.
    #[error("range rule on {node_id} for metric {metric} has no thresholds")]
    EmptyThresholds {
        /// The offending node.
        node_id: NodeId,
        /// Metric the rule splits on.
        metric: String,
    },

    /// Returned when range thresholds are not finite and strictly ascending.
    #[error("range rule on {node_id} for metric {metric} has thresholds that are not strictly ascending: {thresholds:?}")]
    ThresholdsNotAscending {
        /// The offending node.
        node_id: NodeId,
        /// Metric the rule splits on.
        metric: String,
        /// The thresholds as declared.
        thresholds: Vec<f64>,
    },

    /// Returned when a pattern condition sets none of threshold, min/max, or operator/value.
    #[error("pattern condition for metric {metric} on {node_id} specifies no comparison")]
    EmptyCondition {
        /// The offending node.
        node_id: NodeId,
        /// The metric whose condition is empty.
        metric: String,
    },

    /// Returned when a pattern rule has no patterns.
    #[error("pattern rule on {node_id} has no patterns")]
    NoPatterns {
        /// The offending node.
        node_id: NodeId,
    },

    /// Returned when an expression rule has no branches.
    #[error("expression rule on {node_id} has no branches")]
    NoBranches {
        /// The offending node.
        node_id: NodeId,
    },

    /// Returned when a pattern or expression rule routes to ids missing from `children_ids`.
    #[error("rule on {node_id} routes to children not listed in children_ids: {missing:?}")]
    MissingRuleChildren {
        /// The offending node.
        node_id: NodeId,
        /// Child ids referenced by the rule but absent from `children_ids`.
        missing: Vec<NodeId>,
    },

    /// Returned when a legacy nested tree cannot be migrated.
    #[error("cannot migrate legacy structure: {reason}")]
    LegacyFormat {
        /// Human-readable description of what is wrong.
        reason: String,
    },

    /// Returned when the structure document is not valid JSON for the expected shape.
    #[error("invalid structure document")]
    Json {
        /// The underlying serde_json error.
        #[from]
        source: serde_json::Error,
    },
}

/// Non-fatal inconsistency found while evaluating a split rule.
///
/// Fatal variants stop classification at the current node; the others are
/// attached to the evaluation and logged while routing continues.
#[derive(Debug, Clone, PartialEq, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluationInconsistency {
    /// The computed range branch exceeded the available children and was clamped.
    #[error("computed branch {computed} but only {n_children} children exist, clamped to last")]
    BranchClamped {
        /// Branch index computed from the thresholds.
        computed: usize,
        /// Number of children on the node.
        n_children: usize,
    },

    /// The rule has children to route to but none were supplied.
    #[error("rule has no children to route to")]
    NoChildren,

    /// The selected child id is not in the node's `children_ids`.
    #[error("selected child {child_id} is not listed in children_ids")]
    ChildNotListed {
        /// The child id chosen by the rule.
        child_id: NodeId,
    },

    /// The selected child id does not resolve to a node in the structure.
    #[error("selected child {child_id} does not exist in the structure")]
    UnresolvableChild {
        /// The child id chosen by the rule.
        child_id: NodeId,
    },

    /// A range rule's metric is absent and the missing-value policy does not substitute.
    #[error("metric {metric} is missing")]
    MissingMetric {
        /// The absent metric.
        metric: String,
    },

    /// An expression branch could not be compiled or evaluated and was treated as false.
    #[error("expression {condition:?} failed: {reason}")]
    InvalidExpression {
        /// The condition text.
        condition: String,
        /// Why it failed.
        reason: String,
    },
}

impl EvaluationInconsistency {
    /// Return `true` if this inconsistency stops classification at the current node.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            EvaluationInconsistency::BranchClamped { .. }
                | EvaluationInconsistency::InvalidExpression { .. }
        )
    }
}

/// Errors from compiling or evaluating a branch condition.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    /// Returned when the condition is blank.
    #[error("empty expression")]
    Empty,

    /// Returned when the condition exceeds the length limit.
    #[error("expression is {len} characters, limit is {max}")]
    TooLong {
        /// Length of the condition in characters.
        len: usize,
        /// Maximum accepted length.
        max: usize,
    },

    /// Returned when nesting exceeds the depth limit.
    #[error("expression nesting exceeds depth {max}")]
    TooDeep {
        /// Maximum accepted nesting depth.
        max: usize,
    },

    /// Returned when the tokenizer meets a character outside the grammar.
    #[error("unexpected character {ch:?} at offset {offset}")]
    UnexpectedChar {
        /// The offending character.
        ch: char,
        /// Byte offset into the condition.
        offset: usize,
    },

    /// Returned when the parser meets a token it cannot use.
    #[error("unexpected {found} at offset {offset}")]
    UnexpectedToken {
        /// Description of the offending token.
        found: String,
        /// Byte offset into the condition.
        offset: usize,
    },

    /// Returned when the condition ends mid-expression.
    #[error("unexpected end of expression")]
    UnexpectedEnd,

    /// Returned when a numeric literal cannot be parsed.
    #[error("invalid number literal {raw:?}")]
    InvalidNumber {
        /// The literal as written.
        raw: String,
    },

    /// Returned when evaluation references a name outside the namespace.
    #[error("unknown metric {name}")]
    UnknownMetric {
        /// The unresolved identifier.
        name: String,
    },

    /// Returned when evaluation references a metric with no value for this feature.
    #[error("metric {name} has no value")]
    MissingValue {
        /// The metric without a value.
        name: String,
    },
}

/// Returned when a query that must produce features produces none.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmptyResultError {
    /// The input feature set is empty.
    #[error("no features to process")]
    NoFeatures,

    /// No feature reaches the requested node.
    #[error("no features reach node {node_id}")]
    NoFeaturesAtNode {
        /// The requested node.
        node_id: NodeId,
    },

    /// The requested node does not exist.
    #[error("node {node_id} does not exist in the structure")]
    UnknownNode {
        /// The requested node.
        node_id: NodeId,
    },

    /// Filtering removed every feature.
    #[error("no features remain after applying filters")]
    FilteredOut,
}
