//! Classification results to Sankey nodes and links.

use std::collections::{BTreeMap, HashMap};

use sifter_tree::{ClassificationResult, EmptyResultError, NodeId, ThresholdStructure};
use tracing::{debug, info, instrument};

use crate::config::AggregatorConfig;
use crate::count::FlowCounts;
use crate::diagram::{SankeyDiagram, SankeyLink, SankeyMetadata, SankeyNode};
use crate::error::SankeyError;
use crate::metadata::applied_thresholds;
use crate::naming::display_name;

/// Builds Sankey diagrams for one structure.
#[derive(Debug, Clone)]
pub struct Aggregator<'s> {
    structure: &'s ThresholdStructure,
    config: AggregatorConfig,
}

impl<'s> Aggregator<'s> {
    /// Create an aggregator for `structure`.
    #[must_use]
    pub fn new(structure: &'s ThresholdStructure, config: AggregatorConfig) -> Self {
        Self { structure, config }
    }

    /// Aggregate `results` into nodes, links, and metadata.
    ///
    /// Counts are distinct feature ids, each following the path of its first
    /// result. A node appears when at least one feature reached it; the root
    /// always appears. A link appears between adjacent stages when its source
    /// branches to more than one populated target, unless pass-through links
    /// are enabled.
    ///
    /// A feature that stalls at a node counts toward that node but leaves
    /// through no link. The links out of a node therefore sum to its count
    /// minus the features stalled there.
    ///
    /// # Errors
    ///
    /// | Variant | When |
    /// |---------|------|
    /// | [`SankeyError::Empty`] | `results` is empty |
    /// | [`SankeyError::UnknownNode`] | a result names a node not in the structure |
    /// | [`SankeyError::StageMismatch`] | a result places a node at the wrong stage |
    #[instrument(skip_all, fields(n_results = results.len(), n_nodes = self.structure.len()))]
    pub fn aggregate(&self, results: &[ClassificationResult]) -> Result<SankeyDiagram, SankeyError> {
        // --- Validate inputs ---
        if results.is_empty() {
            return Err(EmptyResultError::NoFeatures.into());
        }

        let counts = FlowCounts::collect(results);
        self.check_counts(&counts)?;

        let nodes = self.build_nodes(&counts);
        let positions: HashMap<&NodeId, usize> =
            nodes.iter().enumerate().map(|(i, n)| (&n.id, i)).collect();
        let links = self.build_links(&counts, &positions);

        let metadata = SankeyMetadata {
            total_features: counts.features.len(),
            stalled_features: counts.stalled.len(),
            applied_filters: self.config.applied_filters.clone(),
            applied_thresholds: applied_thresholds(self.structure),
        };
        info!(
            n_nodes = nodes.len(),
            n_links = links.len(),
            total_features = metadata.total_features,
            stalled_features = metadata.stalled_features,
            "sankey aggregation complete"
        );
        Ok(SankeyDiagram { nodes, links, metadata })
    }

    fn check_counts(&self, counts: &FlowCounts<'_>) -> Result<(), SankeyError> {
        for (&node_id, &(stage, _)) in &counts.nodes {
            let Some(node) = self.structure.node(node_id.as_str()) else {
                return Err(SankeyError::UnknownNode { node_id: node_id.clone() });
            };
            if node.stage != stage {
                return Err(SankeyError::StageMismatch {
                    node_id: node_id.clone(),
                    expected: node.stage,
                    found: stage,
                });
            }
        }
        Ok(())
    }

    /// Populated nodes ordered by stage, then declaration position.
    fn build_nodes(&self, counts: &FlowCounts<'_>) -> Vec<SankeyNode> {
        let root_id = &self.structure.root().id;
        let mut declared: Vec<(usize, &sifter_tree::ThresholdNode)> =
            self.structure.nodes().iter().enumerate().collect();
        declared.sort_by_key(|&(position, node)| (node.stage, position));

        declared
            .into_iter()
            .filter_map(|(_, node)| {
                let count = counts.node_count(&node.id);
                if count == 0 && node.id != *root_id {
                    return None;
                }
                Some(SankeyNode {
                    id: node.id.clone(),
                    display_name: display_name(node, self.structure),
                    stage: node.stage,
                    unique_feature_count: count,
                    category: node.category.clone(),
                })
            })
            .collect()
    }

    /// Links out of branching sources, ordered by source then target position.
    fn build_links(
        &self,
        counts: &FlowCounts<'_>,
        positions: &HashMap<&NodeId, usize>,
    ) -> Vec<SankeyLink> {
        let mut targets_per_source: BTreeMap<usize, Vec<(usize, SankeyLink)>> = BTreeMap::new();
        for (&(source, target), ids) in &counts.links {
            let (Some(&source_pos), Some(&target_pos)) = (positions.get(source), positions.get(target))
            else {
                continue;
            };
            targets_per_source.entry(source_pos).or_default().push((
                target_pos,
                SankeyLink {
                    source_id: source.clone(),
                    target_id: target.clone(),
                    unique_feature_count: ids.len(),
                },
            ));
        }

        let mut links = Vec::new();
        for (source_pos, mut targets) in targets_per_source {
            if targets.len() < 2 && !self.config.pass_through_links {
                debug!(source_pos, "skipping pass-through link");
                continue;
            }
            targets.sort_by_key(|(target_pos, _)| *target_pos);
            links.extend(targets.into_iter().map(|(_, link)| link));
        }
        links
    }
}

/// Aggregate with the default configuration.
///
/// # Errors
///
/// Same as [`Aggregator::aggregate`].
pub fn aggregate(
    results: &[ClassificationResult],
    structure: &ThresholdStructure,
) -> Result<SankeyDiagram, SankeyError> {
    Aggregator::new(structure, AggregatorConfig::default()).aggregate(results)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use sifter_tree::{
        Category, ClassificationResult, EmptyResultError, FeatureId, NodeId, ParentPathEntry,
        RangeInfo, RuleTrace, SplitRule, Stage, ThresholdNode, ThresholdStructure,
    };

    use super::{Aggregator, aggregate};
    use crate::config::AggregatorConfig;
    use crate::error::SankeyError;

    fn entry(parent: &str, branch: usize) -> ParentPathEntry {
        ParentPathEntry {
            parent_id: NodeId::new(parent),
            rule: RuleTrace::Range {
                range_info: RangeInfo { metric: "m".into(), thresholds: vec![0.5], selected_range: branch },
            },
            branch_index: branch,
            triggering_values: None,
        }
    }

    /// root -> {a, b}; a -> {a0, a1}; b -> {b0, b1}
    fn make_structure() -> ThresholdStructure {
        let split = |id: &str, stage: u32, path: Vec<ParentPathEntry>, children: [&str; 2]| {
            ThresholdNode::leaf(id, Stage::new(stage), if stage == 0 { Category::root() } else { Category::new("first") })
                .with_parent_path(path)
                .with_split(SplitRule::range("m", vec![0.5]), &children)
        };
        let leaf = |id: &str, path: Vec<ParentPathEntry>| {
            ThresholdNode::leaf(id, Stage::new(2), Category::new("second")).with_parent_path(path)
        };
        ThresholdStructure::validate(vec![
            split("root", 0, vec![], ["a", "b"]),
            split("a", 1, vec![entry("root", 0)], ["a0", "a1"]),
            split("b", 1, vec![entry("root", 1)], ["b0", "b1"]),
            leaf("a0", vec![entry("root", 0), entry("a", 0)]),
            leaf("a1", vec![entry("root", 0), entry("a", 1)]),
            leaf("b0", vec![entry("root", 1), entry("b", 0)]),
            leaf("b1", vec![entry("root", 1), entry("b", 1)]),
        ])
        .unwrap()
    }

    fn make_result(id: i64, path: &[&str]) -> ClassificationResult {
        let path: Vec<NodeId> = path.iter().map(|&p| NodeId::new(p)).collect();
        let stage_nodes: BTreeMap<Stage, NodeId> = path
            .iter()
            .enumerate()
            .map(|(i, n)| (Stage::new(i as u32), n.clone()))
            .collect();
        ClassificationResult {
            feature_id: FeatureId::Int(id),
            final_node_id: path[path.len() - 1].clone(),
            path,
            stage_nodes,
            parent_path: Vec::new(),
            stall: None,
        }
    }

    #[test]
    fn empty_results_are_an_error() {
        let s = make_structure();
        assert!(matches!(
            aggregate(&[], &s),
            Err(SankeyError::Empty(EmptyResultError::NoFeatures))
        ));
    }

    #[test]
    fn nodes_ordered_and_unpopulated_skipped() {
        let s = make_structure();
        let results = vec![
            make_result(1, &["root", "b", "b1"]),
            make_result(2, &["root", "a", "a0"]),
            make_result(3, &["root", "a", "a1"]),
        ];
        let diagram = aggregate(&results, &s).unwrap();
        let ids: Vec<&str> = diagram.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["root", "a", "b", "a0", "a1", "b1"]);
        assert_eq!(diagram.node("a").map(|n| n.unique_feature_count), Some(2));
        assert_eq!(diagram.metadata.total_features, 3);
    }

    #[test]
    fn single_target_sources_emit_no_links() {
        let s = make_structure();
        let results = vec![
            make_result(1, &["root", "b", "b1"]),
            make_result(2, &["root", "a", "a0"]),
            make_result(3, &["root", "a", "a1"]),
        ];
        let diagram = aggregate(&results, &s).unwrap();
        let links: Vec<(&str, &str, usize)> = diagram
            .links
            .iter()
            .map(|l| (l.source_id.as_str(), l.target_id.as_str(), l.unique_feature_count))
            .collect();
        assert_eq!(links, vec![("root", "a", 2), ("root", "b", 1), ("a", "a0", 1), ("a", "a1", 1)]);
        assert!(diagram.links_from("b").is_empty());
    }

    #[test]
    fn pass_through_links_when_enabled() {
        let s = make_structure();
        let results = vec![make_result(1, &["root", "b", "b1"])];
        let config = AggregatorConfig::new().with_pass_through_links(true);
        let diagram = Aggregator::new(&s, config).aggregate(&results).unwrap();
        assert_eq!(diagram.links.len(), 2);
    }

    #[test]
    fn root_always_present() {
        let s = make_structure();
        let mut result = make_result(1, &["root"]);
        result.feature_id = FeatureId::Text("only".into());
        let diagram = aggregate(&[result], &s).unwrap();
        assert_eq!(diagram.nodes.len(), 1);
        assert_eq!(diagram.nodes[0].display_name, "All Features");
    }

    #[test]
    fn unknown_node_is_rejected() {
        let s = make_structure();
        let results = vec![make_result(1, &["root", "ghost"])];
        assert!(matches!(
            aggregate(&results, &s),
            Err(SankeyError::UnknownNode { .. })
        ));
    }

    #[test]
    fn stage_mismatch_is_rejected() {
        let s = make_structure();
        let results = vec![make_result(1, &["root", "a0"])];
        assert!(matches!(
            aggregate(&results, &s),
            Err(SankeyError::StageMismatch { .. })
        ));
    }

    #[test]
    fn filters_are_echoed() {
        let s = make_structure();
        let filters = BTreeMap::from([("llm_explainer".to_string(), vec!["gpt".to_string()])]);
        let config = AggregatorConfig::new().with_applied_filters(filters.clone());
        let diagram = config.aggregator(&s).aggregate(&[make_result(1, &["root", "a", "a0"])]).unwrap();
        assert_eq!(diagram.metadata.applied_filters, filters);
        assert_eq!(diagram.metadata.applied_thresholds.get("m"), Some(&0.5));
    }
}
