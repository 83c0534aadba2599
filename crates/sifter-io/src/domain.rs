//! Domain types for sifter-io.

use std::collections::BTreeSet;

use sifter_tree::FeatureRecord;

use crate::IoError;

/// A validated output name for artifact file naming.
///
/// Must match `[a-zA-Z0-9_-]+`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputName(String);

impl OutputName {
    /// Parse and validate an output name.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::InvalidOutputName`] if the name is empty or
    /// contains characters outside `[a-zA-Z0-9_-]`.
    pub fn new(name: impl Into<String>) -> Result<Self, IoError> {
        let name = name.into();
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(IoError::InvalidOutputName { name });
        }
        Ok(Self(name))
    }

    /// Return the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OutputName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A feature table loaded from CSV.
///
/// Produced by [`FeatureTableReader`](crate::FeatureTableReader). Columns are
/// split into metrics (numeric) and attributes (anything else) once, over the
/// whole file.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    /// One record per data row, in file order. Ids may repeat.
    pub records: Vec<FeatureRecord>,
    /// Columns read as metrics.
    pub metric_columns: Vec<String>,
    /// Columns read as attributes.
    pub attribute_columns: Vec<String>,
}

impl FeatureTable {
    /// Return the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Return `true` if the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Return the number of distinct feature ids.
    #[must_use]
    pub fn n_unique(&self) -> usize {
        self.records.iter().map(|r| &r.id).collect::<BTreeSet<_>>().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_name_accepts_safe_chars() {
        assert_eq!(OutputName::new("run-01_a").unwrap().as_str(), "run-01_a");
    }

    #[test]
    fn output_name_rejects_paths_and_empty() {
        assert!(matches!(
            OutputName::new("../etc"),
            Err(IoError::InvalidOutputName { .. })
        ));
        assert!(OutputName::new("").is_err());
        assert!(OutputName::new("a b").is_err());
    }

    #[test]
    fn unique_ids_counted() {
        let table = FeatureTable {
            records: vec![
                FeatureRecord::new(1i64),
                FeatureRecord::new(1i64),
                FeatureRecord::new("x"),
            ],
            metric_columns: vec![],
            attribute_columns: vec![],
        };
        assert_eq!(table.len(), 3);
        assert_eq!(table.n_unique(), 2);
    }
}
