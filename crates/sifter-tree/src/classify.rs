//! Route features from the root to a leaf, recording the path taken.

use std::collections::{BTreeMap, HashMap, HashSet};

use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use tracing::{debug, error, instrument, warn};

use crate::config::ClassifierConfig;
use crate::error::{EmptyResultError, EvaluationInconsistency};
use crate::evaluate::{CompiledBranches, EvaluationResult, SplitEvaluator};
use crate::feature::{FeatureId, FeatureRecord};
use crate::node::{NodeId, ParentPathEntry};
use crate::result::{ClassificationResult, ClassificationSummary, Stall};
use crate::rule::SplitRule;
use crate::structure::ThresholdStructure;

/// Number of final nodes logged after each batch.
const SUMMARY_TOP_K: usize = 5;

/// Classifies features through one structure.
///
/// Expression conditions are compiled once at construction and reused for
/// every feature.
#[derive(Debug)]
pub struct Classifier<'s> {
    structure: &'s ThresholdStructure,
    evaluator: SplitEvaluator,
    expressions: HashMap<NodeId, CompiledBranches>,
    parallel: bool,
}

impl<'s> Classifier<'s> {
    /// Prepare a classifier for `structure`.
    #[must_use]
    pub fn new(structure: &'s ThresholdStructure, config: &ClassifierConfig) -> Self {
        let expressions = structure
            .nodes()
            .iter()
            .filter_map(|node| match &node.split_rule {
                Some(SplitRule::Expression(rule)) => {
                    Some((node.id.clone(), CompiledBranches::compile(rule)))
                }
                _ => None,
            })
            .collect();
        Self {
            structure,
            evaluator: SplitEvaluator::new(config.missing_values),
            expressions,
            parallel: config.parallel,
        }
    }

    /// Return the structure this classifier routes through.
    #[must_use]
    pub fn structure(&self) -> &'s ThresholdStructure {
        self.structure
    }

    /// Classify a batch, preserving input order.
    #[instrument(skip_all, fields(n_features = features.len(), n_nodes = self.structure.len()))]
    pub fn classify(&self, features: &[FeatureRecord]) -> Vec<ClassificationResult> {
        let results: Vec<ClassificationResult> = if self.parallel {
            features.par_iter().map(|f| self.classify_one(f)).collect()
        } else {
            features.iter().map(|f| self.classify_one(f)).collect()
        };
        ClassificationSummary::from_results(&results).log_top(SUMMARY_TOP_K);
        results
    }

    /// Classify a single feature.
    #[must_use]
    pub fn classify_one(&self, feature: &FeatureRecord) -> ClassificationResult {
        let mut current = self.structure.root();
        let mut path = vec![current.id.clone()];
        let mut stage_nodes = BTreeMap::from([(current.stage, current.id.clone())]);
        let mut parent_path = Vec::new();
        let mut stall = None;

        while let Some(rule) = &current.split_rule {
            let evaluation = self.evaluator.evaluate_compiled(
                &feature.metrics,
                rule,
                &current.children_ids,
                self.expressions.get(&current.id),
            );
            let EvaluationResult {
                child_id,
                branch_index,
                trace,
                triggering_values,
                ..
            } = match evaluation {
                Ok(evaluation) => evaluation,
                Err(reason) => {
                    if matches!(reason, EvaluationInconsistency::MissingMetric { .. }) {
                        debug!(feature_id = %feature.id, node_id = %current.id, %reason, "classification stalled");
                    } else {
                        warn!(feature_id = %feature.id, node_id = %current.id, %reason, "classification stalled");
                    }
                    stall = Some(Stall { node_id: current.id.clone(), reason });
                    break;
                }
            };

            parent_path.push(ParentPathEntry {
                parent_id: current.id.clone(),
                rule: trace,
                branch_index,
                triggering_values: Some(triggering_values),
            });

            let Some(next) = self.structure.node(child_id.as_str()) else {
                error!(feature_id = %feature.id, node_id = %current.id, %child_id, "child does not resolve to a node");
                stall = Some(Stall {
                    node_id: current.id.clone(),
                    reason: EvaluationInconsistency::UnresolvableChild { child_id },
                });
                break;
            };
            current = next;
            path.push(current.id.clone());
            stage_nodes.insert(current.stage, current.id.clone());
        }

        ClassificationResult {
            feature_id: feature.id.clone(),
            final_node_id: current.id.clone(),
            path,
            stage_nodes,
            parent_path,
            stall,
        }
    }

    /// Return the distinct ids of features whose path passes through `node_id`.
    ///
    /// The root yields every input feature without classifying.
    ///
    /// # Errors
    ///
    /// | Variant | When |
    /// |---------|------|
    /// | [`EmptyResultError::NoFeatures`] | `features` is empty |
    /// | [`EmptyResultError::UnknownNode`] | `node_id` is not in the structure |
    /// | [`EmptyResultError::NoFeaturesAtNode`] | no feature reaches `node_id` |
    #[instrument(skip(self, features), fields(n_features = features.len()))]
    pub fn features_at_node(
        &self,
        features: &[FeatureRecord],
        node_id: &str,
    ) -> Result<Vec<FeatureId>, EmptyResultError> {
        // --- Validate inputs ---
        if features.is_empty() {
            return Err(EmptyResultError::NoFeatures);
        }
        let Some(node) = self.structure.node(node_id) else {
            return Err(EmptyResultError::UnknownNode { node_id: NodeId::new(node_id) });
        };

        let matching: Vec<&FeatureId> = if node.id == self.structure.root().id {
            features.iter().map(|f| &f.id).collect()
        } else {
            let results = self.classify(features);
            let reached: HashSet<&FeatureId> = results
                .iter()
                .filter(|r| r.node_at_stage(node.stage) == Some(&node.id))
                .map(|r| &r.feature_id)
                .collect();
            features.iter().map(|f| &f.id).filter(|id| reached.contains(id)).collect()
        };

        let mut seen = HashSet::new();
        let ids: Vec<FeatureId> = matching
            .into_iter()
            .filter(|id| seen.insert(*id))
            .cloned()
            .collect();
        if ids.is_empty() {
            return Err(EmptyResultError::NoFeaturesAtNode { node_id: node.id.clone() });
        }
        debug!(node_id = %node.id, n_matching = ids.len(), "features at node");
        Ok(ids)
    }
}

/// Classify `features` through `structure` with the default configuration.
#[must_use]
pub fn classify(features: &[FeatureRecord], structure: &ThresholdStructure) -> Vec<ClassificationResult> {
    Classifier::new(structure, &ClassifierConfig::default()).classify(features)
}

/// Ids of features reaching `node_id`, with the default configuration.
///
/// # Errors
///
/// Same as [`Classifier::features_at_node`].
pub fn features_at_node(
    features: &[FeatureRecord],
    structure: &ThresholdStructure,
    node_id: &str,
) -> Result<Vec<FeatureId>, EmptyResultError> {
    Classifier::new(structure, &ClassifierConfig::default()).features_at_node(features, node_id)
}
