use std::collections::BTreeMap;

use sifter_tree::{Category, NodeId, Stage};

/// One node of the diagram.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SankeyNode {
    /// Structure node id.
    pub id: NodeId,
    /// Human-readable label.
    pub display_name: String,
    /// Depth from the root.
    pub stage: Stage,
    /// Distinct features that reached the node.
    pub unique_feature_count: usize,
    /// Grouping label copied from the structure.
    pub category: Category,
}

/// A flow between adjacent stages.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SankeyLink {
    /// Upstream node.
    pub source_id: NodeId,
    /// Downstream node, one stage deeper.
    pub target_id: NodeId,
    /// Distinct features that took this edge.
    pub unique_feature_count: usize,
}

/// Context echoed with a diagram.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SankeyMetadata {
    /// Distinct features aggregated.
    pub total_features: usize,
    /// Distinct features that stalled before a leaf.
    pub stalled_features: usize,
    /// Filters that produced the input set.
    pub applied_filters: BTreeMap<String, Vec<String>>,
    /// Flattened cut values from every split rule, keyed by metric.
    pub applied_thresholds: BTreeMap<String, f64>,
}

/// Nodes ordered by stage then declaration, links by source then target position.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SankeyDiagram {
    /// Populated nodes, plus the root.
    pub nodes: Vec<SankeyNode>,
    /// Flows out of branching nodes.
    pub links: Vec<SankeyLink>,
    /// Totals, filters, and thresholds.
    pub metadata: SankeyMetadata,
}

impl SankeyDiagram {
    /// Return the node with `id`.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&SankeyNode> {
        self.nodes.iter().find(|n| n.id.as_str() == id)
    }

    /// Return the links leaving `source`.
    #[must_use]
    pub fn links_from(&self, source: &str) -> Vec<&SankeyLink> {
        self.links.iter().filter(|l| l.source_id.as_str() == source).collect()
    }
}
