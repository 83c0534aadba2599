//! JSON artifact writer for diagrams and classification results.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sifter_sankey::SankeyDiagram;
use sifter_tree::{ClassificationResult, ClassificationSummary, NodeId};
use tracing::{debug, info, instrument};

use crate::IoError;
use crate::domain::OutputName;

/// Writes Sankey diagrams and classification results to JSON files.
///
/// Creates the output directory on construction if it does not exist.
/// Output files are named `{name}_sankey.json` and
/// `{name}_classification.json`.
#[derive(Debug, Clone)]
pub struct ResultWriter {
    output_dir: PathBuf,
    name: OutputName,
}

impl ResultWriter {
    /// Create a new writer targeting the given directory and output name.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::OutputDirCreate`] if the directory cannot be created.
    #[instrument(skip_all, fields(dir = %output_dir.display(), name = %name))]
    pub fn new(output_dir: &Path, name: OutputName) -> Result<Self, IoError> {
        fs::create_dir_all(output_dir).map_err(|e| IoError::OutputDirCreate {
            path: output_dir.to_path_buf(),
            source: e,
        })?;
        debug!("output directory ready");
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            name,
        })
    }

    /// Path of the artifact with `suffix`.
    fn artifact_path(&self, suffix: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}_{suffix}.json", self.name.as_str()))
    }

    fn write_json<T: Serialize>(&self, path: &Path, artifact: &T) -> Result<(), IoError> {
        let json = serde_json::to_string_pretty(artifact).map_err(|e| IoError::Serialize {
            path: path.to_path_buf(),
            source: e,
        })?;
        fs::write(path, &json).map_err(|e| IoError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Write a diagram to `{name}_sankey.json`.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::Serialize`] or [`IoError::WriteFile`] on failure.
    #[instrument(skip_all)]
    pub fn write_sankey(&self, diagram: &SankeyDiagram) -> Result<PathBuf, IoError> {
        let path = self.artifact_path("sankey");
        self.write_json(&path, diagram)?;
        info!(
            path = %path.display(),
            n_nodes = diagram.nodes.len(),
            n_links = diagram.links.len(),
            "sankey diagram written"
        );
        Ok(path)
    }

    /// Write per-feature results and a leaf summary to `{name}_classification.json`.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::Serialize`] or [`IoError::WriteFile`] on failure.
    #[instrument(skip_all)]
    pub fn write_classification(
        &self,
        results: &[ClassificationResult],
    ) -> Result<PathBuf, IoError> {
        let path = self.artifact_path("classification");
        let summary = ClassificationSummary::from_results(results);
        let artifact = ClassificationArtifact {
            name: self.name.as_str(),
            total: summary.total,
            stalled: summary.stalled,
            final_node_counts: &summary.final_node_counts,
            results,
        };
        self.write_json(&path, &artifact)?;
        info!(path = %path.display(), n_results = results.len(), "classification written");
        Ok(path)
    }
}

#[derive(Serialize)]
struct ClassificationArtifact<'a> {
    name: &'a str,
    total: usize,
    stalled: usize,
    final_node_counts: &'a [(NodeId, usize)],
    results: &'a [ClassificationResult],
}
