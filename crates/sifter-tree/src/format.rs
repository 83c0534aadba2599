//! Structure document formats: detection and legacy migration.

use serde_json::Value;
use tracing::{debug, info};

use crate::error::StructureError;
use crate::node::{Category, NodeId, ParentPathEntry, Stage, ThresholdNode};
use crate::rule::{RangeInfo, RuleTrace, SplitRule};
use crate::structure::{RawStructure, ThresholdStructure};

/// Shape of a structure document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureFormat {
    /// Flat node list with `version` and `nodes`.
    FlatV2,
    /// Legacy nested tree under `root`, range splits only.
    NestedV1,
}

/// Detect the format of a structure document.
///
/// Returns `None` when the document matches neither shape.
#[must_use]
pub fn detect(document: &Value) -> Option<StructureFormat> {
    let object = document.as_object()?;
    if object.get("nodes").is_some_and(Value::is_array) {
        return Some(StructureFormat::FlatV2);
    }
    let root = object.get("root")?.as_object()?;
    if root.contains_key("split") || root.contains_key("metric") || root.contains_key("id") {
        return Some(StructureFormat::NestedV1);
    }
    None
}

#[derive(Debug, serde::Deserialize)]
struct LegacyTree {
    root: LegacyNode,
    #[serde(default)]
    metrics: Vec<String>,
}

#[derive(Debug, serde::Deserialize)]
struct LegacyNode {
    id: String,
    #[serde(default)]
    metric: Option<String>,
    #[serde(default)]
    split: Option<LegacySplit>,
}

#[derive(Debug, serde::Deserialize)]
struct LegacySplit {
    thresholds: Vec<f64>,
    children: Vec<LegacyNode>,
}

/// Convert a legacy nested tree into a validated flat structure.
///
/// Each legacy split becomes a range rule. Non-root nodes take the metric
/// of the split that produced them as their category.
///
/// # Errors
///
/// | Variant | When |
/// |---------|------|
/// | [`StructureError::Json`] | the document is not a nested tree |
/// | [`StructureError::LegacyFormat`] | a split names no metric |
/// | validation variants | the migrated nodes are inconsistent |
pub fn migrate_v1(document: &Value) -> Result<ThresholdStructure, StructureError> {
    let tree: LegacyTree = serde::Deserialize::deserialize(document)?;
    let mut nodes = Vec::new();
    flatten(&tree.root, Stage::ROOT, Category::root(), Vec::new(), &mut nodes)?;
    info!(n_nodes = nodes.len(), "migrated legacy nested structure");
    ThresholdStructure::with_metrics(nodes, tree.metrics)
}

fn flatten(
    legacy: &LegacyNode,
    stage: Stage,
    category: Category,
    parent_path: Vec<ParentPathEntry>,
    out: &mut Vec<ThresholdNode>,
) -> Result<(), StructureError> {
    let mut node = ThresholdNode::leaf(legacy.id.as_str(), stage, category).with_parent_path(parent_path);
    let Some(split) = &legacy.split else {
        out.push(node);
        return Ok(());
    };
    let Some(metric) = &legacy.metric else {
        return Err(StructureError::LegacyFormat {
            reason: format!("node {} has a split but no metric", legacy.id),
        });
    };

    node.split_rule = Some(SplitRule::range(metric.as_str(), split.thresholds.clone()));
    node.children_ids = split.children.iter().map(|c| NodeId::new(c.id.as_str())).collect();
    let path_prefix = node.parent_path.clone();
    out.push(node);

    for (branch, child) in split.children.iter().enumerate() {
        let mut child_path = path_prefix.clone();
        child_path.push(ParentPathEntry {
            parent_id: NodeId::new(legacy.id.as_str()),
            rule: RuleTrace::Range {
                range_info: RangeInfo {
                    metric: metric.clone(),
                    thresholds: split.thresholds.clone(),
                    selected_range: branch,
                },
            },
            branch_index: branch,
            triggering_values: None,
        });
        flatten(child, stage.next(), Category::new(metric.as_str()), child_path, out)?;
    }
    Ok(())
}

/// Parse a structure document in either format.
///
/// # Errors
///
/// Returns [`StructureError::LegacyFormat`] when the format cannot be
/// detected, otherwise any error from parsing or validation.
pub fn parse_structure(document: &Value) -> Result<ThresholdStructure, StructureError> {
    match detect(document) {
        Some(StructureFormat::FlatV2) => {
            debug!("parsing flat structure document");
            let raw: RawStructure = serde::Deserialize::deserialize(document)?;
            ThresholdStructure::try_from(raw)
        }
        Some(StructureFormat::NestedV1) => migrate_v1(document),
        None => Err(StructureError::LegacyFormat {
            reason: "document has neither a 'nodes' list nor a nested 'root'".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{StructureFormat, detect, migrate_v1, parse_structure};
    use crate::classify::classify;
    use crate::error::StructureError;
    use crate::feature::FeatureRecord;
    use crate::node::Stage;

    fn legacy_doc() -> serde_json::Value {
        json!({
            "metrics": ["a", "b"],
            "root": {
                "id": "root",
                "metric": "a",
                "split": {
                    "thresholds": [0.5],
                    "children": [
                        {"id": "a_low"},
                        {"id": "a_high", "metric": "b", "split": {
                            "thresholds": [1.0, 2.0],
                            "children": [{"id": "b0"}, {"id": "b1"}, {"id": "b2"}]
                        }}
                    ]
                }
            }
        })
    }

    #[test]
    fn detects_formats() {
        assert_eq!(detect(&legacy_doc()), Some(StructureFormat::NestedV1));
        assert_eq!(detect(&json!({"version": 2, "nodes": []})), Some(StructureFormat::FlatV2));
        assert_eq!(detect(&json!({"something": 1})), None);
        assert_eq!(detect(&json!([1, 2])), None);
    }

    #[test]
    fn migrates_nested_tree() {
        let s = migrate_v1(&legacy_doc()).unwrap();
        assert_eq!(s.len(), 6);
        assert_eq!(s.node("b2").map(|n| n.stage), Some(Stage::new(2)));
        assert_eq!(s.node("b2").map(|n| n.category.as_str()), Some("b"));
        assert_eq!(s.path_constraints("b2").len(), 2);

        let r = &classify(&[FeatureRecord::new(1).with_metric("a", 0.9).with_metric("b", 1.5)], &s)[0];
        assert_eq!(r.final_node_id.as_str(), "b1");
    }

    #[test]
    fn split_without_metric_is_rejected() {
        let doc = json!({"root": {"id": "r", "split": {"thresholds": [1.0], "children": [{"id": "x"}, {"id": "y"}]}}});
        assert!(matches!(migrate_v1(&doc), Err(StructureError::LegacyFormat { .. })));
    }

    #[test]
    fn parse_structure_dispatches() {
        let flat = json!({
            "version": 2,
            "nodes": [{"id": "root", "stage": 0, "category": "root"}]
        });
        assert_eq!(parse_structure(&flat).unwrap().len(), 1);
        assert_eq!(parse_structure(&legacy_doc()).unwrap().len(), 6);
        assert!(matches!(
            parse_structure(&json!({})),
            Err(StructureError::LegacyFormat { .. })
        ));
    }
}
