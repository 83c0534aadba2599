//! Configuration builder for classification runs.

use std::fmt;
use std::str::FromStr;

use crate::classify::Classifier;
use crate::feature::FeatureRecord;
use crate::result::ClassificationResult;
use crate::structure::ThresholdStructure;

/// What a range rule does when its metric is absent for a feature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingValuePolicy {
    /// Stop the feature at the node and record why.
    #[default]
    Stall,
    /// Substitute `0.0` and keep routing.
    TreatAsZero,
}

impl fmt::Display for MissingValuePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingValuePolicy::Stall => f.write_str("stall"),
            MissingValuePolicy::TreatAsZero => f.write_str("zero"),
        }
    }
}

/// Returned when parsing an unknown missing-value policy name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown missing-value policy {name:?}, expected 'stall' or 'zero'")]
pub struct UnknownPolicy {
    /// The unrecognized name.
    pub name: String,
}

impl FromStr for MissingValuePolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stall" => Ok(MissingValuePolicy::Stall),
            "zero" | "treat_as_zero" => Ok(MissingValuePolicy::TreatAsZero),
            other => Err(UnknownPolicy { name: other.to_string() }),
        }
    }
}

/// Configuration for classifying features through a threshold structure.
///
/// Construct via [`ClassifierConfig::new`], then chain `with_*` methods.
///
/// # Defaults
///
/// | Parameter        | Default |
/// |------------------|---------|
/// | `missing_values` | `Stall` |
/// | `parallel`       | `true`  |
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub(crate) missing_values: MissingValuePolicy,
    pub(crate) parallel: bool,
}

impl ClassifierConfig {
    /// Create a config with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            missing_values: MissingValuePolicy::Stall,
            parallel: true,
        }
    }

    // --- Setters ---

    /// Set how absent range metrics are handled.
    #[must_use]
    pub fn with_missing_values(mut self, missing_values: MissingValuePolicy) -> Self {
        self.missing_values = missing_values;
        self
    }

    /// Classify batches on the rayon pool when `true`.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    // --- Getters ---

    /// Return the missing-value policy.
    #[must_use]
    pub fn missing_values(&self) -> MissingValuePolicy {
        self.missing_values
    }

    /// Return whether batches run in parallel.
    #[must_use]
    pub fn parallel(&self) -> bool {
        self.parallel
    }

    /// Classify `features` through `structure` with this configuration.
    #[must_use]
    pub fn classify(
        &self,
        structure: &ThresholdStructure,
        features: &[FeatureRecord],
    ) -> Vec<ClassificationResult> {
        Classifier::new(structure, self).classify(features)
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self::new()
    }
}
