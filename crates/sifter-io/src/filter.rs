//! Attribute filters applied to a feature table before classification.

use std::collections::BTreeMap;
use std::str::FromStr;

use sifter_tree::{EmptyResultError, FLOAT_TOLERANCE, FeatureRecord};
use tracing::{debug, info, instrument};

use crate::IoError;

/// Attribute column to allowed values.
///
/// A record passes when, for every filtered column, its attribute equals one
/// of the allowed values, or its metric is numerically equal to one within
/// [`FLOAT_TOLERANCE`]. Columns are ANDed; values within a column are ORed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters(BTreeMap<String, Vec<String>>);

impl Filters {
    /// Create an empty filter set that keeps everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `values` in `column`, extending any values already allowed.
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.0
            .entry(column.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Return `true` if no column is filtered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Return the filters as a map, for diagram metadata.
    #[must_use]
    pub fn as_map(&self) -> &BTreeMap<String, Vec<String>> {
        &self.0
    }

    fn keeps(&self, record: &FeatureRecord) -> bool {
        self.0.iter().all(|(column, allowed)| {
            if let Some(value) = record.attribute(column) {
                return allowed.iter().any(|a| a == value);
            }
            record.metric(column).is_some_and(|value| {
                allowed
                    .iter()
                    .filter_map(|a| a.parse::<f64>().ok())
                    .any(|a| (value - a).abs() <= FLOAT_TOLERANCE)
            })
        })
    }

    /// Keep the records that pass every filter.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::Empty`] with [`EmptyResultError::FilteredOut`] if
    /// no record survives.
    #[instrument(skip_all, fields(n_in = records.len(), n_filters = self.0.len()))]
    pub fn apply(&self, records: Vec<FeatureRecord>) -> Result<Vec<FeatureRecord>, IoError> {
        if self.is_empty() {
            debug!("no filters, keeping all records");
            return Ok(records);
        }
        let n_in = records.len();
        let kept: Vec<FeatureRecord> = records.into_iter().filter(|r| self.keeps(r)).collect();
        if kept.is_empty() {
            return Err(EmptyResultError::FilteredOut.into());
        }
        info!(n_in, n_kept = kept.len(), "filters applied");
        Ok(kept)
    }

    /// Add one `column=v1,v2` argument.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::InvalidFilter`] when the column or every value is empty.
    pub fn parse_arg(self, raw: &str) -> Result<Self, IoError> {
        let invalid = || IoError::InvalidFilter { raw: raw.to_string() };
        let (column, values) = raw.split_once('=').ok_or_else(invalid)?;
        let column = column.trim();
        let values: Vec<&str> = values
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect();
        if column.is_empty() || values.is_empty() {
            return Err(invalid());
        }
        Ok(self.with(column, values))
    }
}

impl FromStr for Filters {
    type Err = IoError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Filters::new().parse_arg(raw)
    }
}
