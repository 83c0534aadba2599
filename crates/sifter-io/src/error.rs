//! I/O error types for sifter-io.

use std::path::PathBuf;

use sifter_tree::{EmptyResultError, StructureError};

/// Errors from file I/O, CSV parsing, filtering, and result serialization.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// Returned when the input file does not exist or is unreadable.
    #[error("file not found: {path}")]
    FileNotFound {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when the CSV parser encounters a malformed record.
    #[error("CSV parse error in {path} at byte offset {offset}")]
    CsvParse {
        /// Path to the CSV file.
        path: PathBuf,
        /// Byte offset where the error occurred.
        offset: u64,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// Returned when the header has no id column.
    #[error("missing id column \"{column}\" in {path}")]
    MissingIdColumn {
        /// Path to the CSV file.
        path: PathBuf,
        /// Column name that was expected.
        column: String,
    },

    /// Returned when a row has an empty id cell.
    #[error("empty feature id in {path} at row {row_index}")]
    EmptyFeatureId {
        /// Path to the CSV file.
        path: PathBuf,
        /// Zero-based row index (excluding header).
        row_index: usize,
    },

    /// Returned when the CSV file contains a header but zero data rows.
    #[error("empty dataset (no data rows) in {path}")]
    EmptyDataset {
        /// Path to the CSV file.
        path: PathBuf,
    },

    /// Returned when a data row has a different number of columns than the header.
    #[error("inconsistent row length in {path}: row {row_index} (feature {feature_id}) has {got} columns, expected {expected}")]
    InconsistentRowLength {
        /// Path to the CSV file.
        path: PathBuf,
        /// Zero-based row index (excluding header).
        row_index: usize,
        /// Raw id cell of the offending row.
        feature_id: String,
        /// Expected number of columns (from header).
        expected: usize,
        /// Actual number of columns in this row.
        got: usize,
    },

    /// Returned when a `--filter` argument is not `column=v1,v2`.
    #[error("invalid filter \"{raw}\": expected column=value[,value...]")]
    InvalidFilter {
        /// The argument as given.
        raw: String,
    },

    /// Returned when filtering or node selection leaves nothing to process.
    #[error(transparent)]
    Empty(#[from] EmptyResultError),

    /// Returned when a structure document is not valid JSON.
    #[error("invalid JSON in {path}")]
    JsonParse {
        /// Path to the structure file.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// Returned when a structure document fails validation.
    #[error("invalid threshold structure in {path}")]
    InvalidStructure {
        /// Path to the structure file.
        path: PathBuf,
        /// Validation failure.
        source: StructureError,
    },

    /// Returned when the output name contains characters outside `[a-zA-Z0-9_-]`.
    #[error("invalid output name \"{name}\": must match [a-zA-Z0-9_-]+")]
    InvalidOutputName {
        /// The invalid name.
        name: String,
    },

    /// Returned when the output directory cannot be created.
    #[error("cannot create output directory {path}")]
    OutputDirCreate {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when an artifact cannot be serialized.
    #[error("cannot serialize {path}")]
    Serialize {
        /// Destination path.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// Returned when a result file cannot be written.
    #[error("cannot write file {path}")]
    WriteFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}
