use sifter_tree::{EmptyResultError, NodeId, Stage};

/// Errors from Sankey aggregation.
#[derive(Debug, thiserror::Error)]
pub enum SankeyError {
    /// Returned when there is nothing to aggregate.
    #[error(transparent)]
    Empty(#[from] EmptyResultError),

    /// Returned when a classification result names a node absent from the structure.
    #[error("classification result references unknown node {node_id}")]
    UnknownNode {
        /// The unresolved node id.
        node_id: NodeId,
    },

    /// Returned when a result places a node at a stage other than its declared one.
    #[error("node {node_id} reported at stage {found}, declared at stage {expected}")]
    StageMismatch {
        /// The offending node.
        node_id: NodeId,
        /// Stage declared in the structure.
        expected: Stage,
        /// Stage reported by the classification result.
        found: Stage,
    },
}
