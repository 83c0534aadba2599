//! Distinct-feature counting over classification results.

use std::collections::{HashMap, HashSet};

use rayon::iter::{IntoParallelIterator, ParallelIterator};
use sifter_tree::{ClassificationResult, FeatureId, NodeId, Stage};

/// Distinct feature sets per node and per adjacent-stage edge.
///
/// Each feature id is counted along one path: the first result listed for
/// it. Later results for the same id are ignored, even when they diverge.
#[derive(Debug, Default)]
pub(crate) struct FlowCounts<'r> {
    pub(crate) nodes: HashMap<&'r NodeId, (Stage, HashSet<&'r FeatureId>)>,
    pub(crate) links: HashMap<(&'r NodeId, &'r NodeId), HashSet<&'r FeatureId>>,
    pub(crate) features: HashSet<&'r FeatureId>,
    pub(crate) stalled: HashSet<&'r FeatureId>,
}

impl<'r> FlowCounts<'r> {
    /// Count over `results` in parallel.
    pub(crate) fn collect(results: &'r [ClassificationResult]) -> Self {
        let mut seen = HashSet::new();
        let canonical: Vec<&'r ClassificationResult> = results
            .iter()
            .filter(|result| seen.insert(&result.feature_id))
            .collect();
        canonical
            .into_par_iter()
            .fold(FlowCounts::default, |mut acc, result| {
                acc.record(result);
                acc
            })
            .reduce(FlowCounts::default, FlowCounts::merge)
    }

    fn record(&mut self, result: &'r ClassificationResult) {
        let id = &result.feature_id;
        self.features.insert(id);
        if result.is_stalled() {
            self.stalled.insert(id);
        }
        for (&stage, node_id) in &result.stage_nodes {
            self.nodes
                .entry(node_id)
                .or_insert_with(|| (stage, HashSet::new()))
                .1
                .insert(id);
        }
        let mut stages = result.stage_nodes.iter().peekable();
        while let Some((stage, source)) = stages.next() {
            if let Some(&(next_stage, target)) = stages.peek()
                && *next_stage == stage.next()
            {
                self.links.entry((source, target)).or_default().insert(id);
            }
        }
    }

    fn merge(mut self, other: Self) -> Self {
        for (node_id, (stage, ids)) in other.nodes {
            self.nodes
                .entry(node_id)
                .or_insert_with(|| (stage, HashSet::new()))
                .1
                .extend(ids);
        }
        for (edge, ids) in other.links {
            self.links.entry(edge).or_default().extend(ids);
        }
        self.features.extend(other.features);
        self.stalled.extend(other.stalled);
        self
    }

    /// Distinct features that reached `node_id`.
    pub(crate) fn node_count(&self, node_id: &NodeId) -> usize {
        self.nodes.get(node_id).map_or(0, |(_, ids)| ids.len())
    }
}
