//! Threshold structure JSON reader.

use std::path::{Path, PathBuf};

use sifter_tree::ThresholdStructure;
use sifter_tree::format;
use tracing::{info, instrument};

use crate::IoError;

/// Reads a threshold structure from a JSON file, in either the flat or the
/// legacy nested format.
///
/// # Errors
///
/// | Variant | Condition |
/// |---|---|
/// | [`IoError::FileNotFound`] | File doesn't exist or is unreadable |
/// | [`IoError::JsonParse`] | File is not valid JSON |
/// | [`IoError::InvalidStructure`] | Document fails structure validation |
#[derive(Debug, Clone)]
pub struct StructureReader {
    path: PathBuf,
}

impl StructureReader {
    /// Create a new reader for the given JSON file path.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Read, detect, and validate the structure.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn read(&self) -> Result<ThresholdStructure, IoError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| IoError::FileNotFound {
            path: self.path.clone(),
            source: e,
        })?;
        let document: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| IoError::JsonParse {
                path: self.path.clone(),
                source: e,
            })?;
        let detected = format::detect(&document);
        let structure =
            format::parse_structure(&document).map_err(|e| IoError::InvalidStructure {
                path: self.path.clone(),
                source: e,
            })?;
        info!(
            format = ?detected,
            n_nodes = structure.len(),
            max_stage = %structure.max_stage(),
            "structure loaded"
        );
        Ok(structure)
    }
}
