//! CSV feature table reader.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sifter_tree::{FeatureId, FeatureRecord, Metrics};
use tracing::{debug, info, instrument, warn};

use crate::IoError;
use crate::domain::FeatureTable;

/// Id column looked up when none is configured.
pub const DEFAULT_ID_COLUMN: &str = "feature_id";

/// Cell values read as missing.
const MISSING_TOKENS: [&str; 7] = ["", "null", "NULL", "None", "NaN", "nan", "NA"];

fn is_missing(raw: &str) -> bool {
    MISSING_TOKENS.contains(&raw.trim())
}

fn parse_metric(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Reads a feature table from a CSV file.
///
/// Expected CSV format:
/// - Header row required, one column of which holds feature ids
/// - Every other column is a metric if all its non-missing cells parse as
///   finite floats, otherwise an attribute
/// - Missing cells (`""`, `null`, `NaN`, `NA`, ...) are left out of the record
///
/// # Errors
///
/// | Variant | Condition |
/// |---|---|
/// | [`IoError::FileNotFound`] | File doesn't exist or is unreadable |
/// | [`IoError::CsvParse`] | Malformed CSV record |
/// | [`IoError::MissingIdColumn`] | Header lacks the id column |
/// | [`IoError::InconsistentRowLength`] | Row has different column count than header |
/// | [`IoError::EmptyFeatureId`] | Row has an empty id cell |
/// | [`IoError::EmptyDataset`] | Zero data rows after header |
#[derive(Debug, Clone)]
pub struct FeatureTableReader {
    path: PathBuf,
    id_column: String,
}

impl FeatureTableReader {
    /// Create a new reader for the given CSV file path.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            id_column: DEFAULT_ID_COLUMN.to_string(),
        }
    }

    /// Read ids from `column` instead of `feature_id`.
    #[must_use]
    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    fn csv_error(&self, e: csv::Error) -> IoError {
        IoError::CsvParse {
            path: self.path.clone(),
            offset: e.position().map_or(0, |p| p.byte()),
            source: e,
        }
    }

    /// Read and validate the CSV file, returning a [`FeatureTable`].
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn read(&self) -> Result<FeatureTable, IoError> {
        let file = std::fs::File::open(&self.path).map_err(|e| IoError::FileNotFound {
            path: self.path.clone(),
            source: e,
        })?;

        // flexible(true) so that InconsistentRowLength fires instead of CsvParse.
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let header = rdr.headers().map_err(|e| self.csv_error(e))?.clone();
        let expected_cols = header.len();
        let id_index = header
            .iter()
            .position(|h| h.trim() == self.id_column)
            .ok_or_else(|| IoError::MissingIdColumn {
                path: self.path.clone(),
                column: self.id_column.clone(),
            })?;
        debug!(expected_cols, id_index, "read CSV header");

        let mut rows = Vec::new();
        for (row_index, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| self.csv_error(e))?;
            if record.len() != expected_cols {
                return Err(IoError::InconsistentRowLength {
                    path: self.path.clone(),
                    row_index,
                    feature_id: record.get(id_index).unwrap_or("").to_string(),
                    expected: expected_cols,
                    got: record.len(),
                });
            }
            if record.get(id_index).is_none_or(|id| id.trim().is_empty()) {
                return Err(IoError::EmptyFeatureId {
                    path: self.path.clone(),
                    row_index,
                });
            }
            rows.push(record);
        }

        if rows.is_empty() {
            return Err(IoError::EmptyDataset {
                path: self.path.clone(),
            });
        }

        // --- Column kinds, decided over the whole file ---
        let mut metric_columns = Vec::new();
        let mut attribute_columns = Vec::new();
        let mut is_metric = vec![false; expected_cols];
        for (col, name) in header.iter().enumerate() {
            if col == id_index {
                continue;
            }
            let numeric = rows.iter().all(|row| {
                let raw = row.get(col).unwrap_or("");
                is_missing(raw) || parse_metric(raw).is_some()
            });
            is_metric[col] = numeric;
            if numeric {
                metric_columns.push(name.trim().to_string());
            } else {
                attribute_columns.push(name.trim().to_string());
            }
        }
        if metric_columns.is_empty() {
            warn!("feature table has no numeric columns");
        }

        let names: Vec<&str> = header.iter().map(str::trim).collect();
        let records: Vec<FeatureRecord> = rows
            .iter()
            .map(|row| {
                let mut metrics = Metrics::new();
                let mut attributes = BTreeMap::new();
                for (col, raw) in row.iter().enumerate() {
                    if col == id_index || is_missing(raw) {
                        continue;
                    }
                    if is_metric[col] {
                        if let Some(value) = parse_metric(raw) {
                            metrics.insert(names[col].to_string(), value);
                        }
                    } else {
                        attributes.insert(names[col].to_string(), raw.trim().to_string());
                    }
                }
                FeatureRecord {
                    id: FeatureId::parse(row.get(id_index).unwrap_or("")),
                    metrics,
                    attributes,
                }
            })
            .collect();

        let table = FeatureTable {
            records,
            metric_columns,
            attribute_columns,
        };
        info!(
            n_rows = table.len(),
            n_unique = table.n_unique(),
            n_metrics = table.metric_columns.len(),
            n_attributes = table.attribute_columns.len(),
            "feature table loaded"
        );
        Ok(table)
    }
}
