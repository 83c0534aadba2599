use std::collections::{BTreeMap, HashMap};

use tracing::info;

use crate::error::EvaluationInconsistency;
use crate::feature::FeatureId;
use crate::node::{NodeId, ParentPathEntry, Stage};

/// Where and why a feature stopped before reaching a leaf.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Stall {
    /// The node the feature stopped at.
    pub node_id: NodeId,
    /// What prevented routing further.
    pub reason: EvaluationInconsistency,
}

/// Path of one feature through a threshold structure.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ClassificationResult {
    /// The classified feature.
    pub feature_id: FeatureId,
    /// The node the feature ended at: a leaf, or the node where it stalled.
    pub final_node_id: NodeId,
    /// Node ids from the root to `final_node_id`.
    pub path: Vec<NodeId>,
    /// The node occupied at each stage reached.
    pub stage_nodes: BTreeMap<Stage, NodeId>,
    /// Decision taken at each split, with triggering values.
    pub parent_path: Vec<ParentPathEntry>,
    /// Present when classification stopped before a leaf.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stall: Option<Stall>,
}

impl ClassificationResult {
    /// Return the node occupied at `stage`, if the feature got that far.
    #[must_use]
    pub fn node_at_stage(&self, stage: Stage) -> Option<&NodeId> {
        self.stage_nodes.get(&stage)
    }

    /// Return `true` if the feature passed through or ended at `node_id`.
    #[must_use]
    pub fn passes_through(&self, node_id: &str) -> bool {
        self.path.iter().any(|n| n.as_str() == node_id)
    }

    /// Return `true` if classification stopped before a leaf.
    #[must_use]
    pub fn is_stalled(&self) -> bool {
        self.stall.is_some()
    }
}

/// Count of features ending at each node.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ClassificationSummary {
    /// Number of results summarized.
    pub total: usize,
    /// Results that stalled before a leaf.
    pub stalled: usize,
    /// `(final node, count)` sorted by count descending, then id.
    pub final_node_counts: Vec<(NodeId, usize)>,
}

impl ClassificationSummary {
    /// Summarize a batch of results.
    #[must_use]
    pub fn from_results(results: &[ClassificationResult]) -> Self {
        let mut counts: HashMap<&NodeId, usize> = HashMap::new();
        for result in results {
            *counts.entry(&result.final_node_id).or_default() += 1;
        }
        let mut final_node_counts: Vec<(NodeId, usize)> =
            counts.into_iter().map(|(id, n)| (id.clone(), n)).collect();
        final_node_counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        Self {
            total: results.len(),
            stalled: results.iter().filter(|r| r.is_stalled()).count(),
            final_node_counts,
        }
    }

    /// Return the `k` most populated final nodes.
    #[must_use]
    pub fn top(&self, k: usize) -> &[(NodeId, usize)] {
        &self.final_node_counts[..k.min(self.final_node_counts.len())]
    }

    /// Log totals and the `k` most populated final nodes at info level.
    pub fn log_top(&self, k: usize) {
        info!(
            total = self.total,
            stalled = self.stalled,
            distinct_final_nodes = self.final_node_counts.len(),
            "classification complete"
        );
        for (rank, (node_id, count)) in self.top(k).iter().enumerate() {
            info!(rank = rank + 1, %node_id, count, "final node population");
        }
    }
}
