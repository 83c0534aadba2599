//! Configuration builder for Sankey aggregation.

use std::collections::BTreeMap;

use sifter_tree::ThresholdStructure;

use crate::aggregate::Aggregator;

/// Configuration for turning classification results into a Sankey diagram.
///
/// Construct via [`AggregatorConfig::new`], then chain `with_*` methods.
///
/// # Defaults
///
/// | Parameter            | Default |
/// |----------------------|---------|
/// | `applied_filters`    | empty   |
/// | `pass_through_links` | `false` |
#[derive(Debug, Clone, Default)]
pub struct AggregatorConfig {
    pub(crate) applied_filters: BTreeMap<String, Vec<String>>,
    pub(crate) pass_through_links: bool,
}

impl AggregatorConfig {
    /// Create a config with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // --- Setters ---

    /// Record the filters that produced the input set, echoed in diagram metadata.
    #[must_use]
    pub fn with_applied_filters(mut self, applied_filters: BTreeMap<String, Vec<String>>) -> Self {
        self.applied_filters = applied_filters;
        self
    }

    /// Emit links from sources with a single populated target.
    ///
    /// Off by default: a pass-through edge carries no branching information.
    #[must_use]
    pub fn with_pass_through_links(mut self, pass_through_links: bool) -> Self {
        self.pass_through_links = pass_through_links;
        self
    }

    // --- Getters ---

    /// Return the recorded filters.
    #[must_use]
    pub fn applied_filters(&self) -> &BTreeMap<String, Vec<String>> {
        &self.applied_filters
    }

    /// Return whether single-target links are emitted.
    #[must_use]
    pub fn pass_through_links(&self) -> bool {
        self.pass_through_links
    }

    /// Build an aggregator for `structure` with this configuration.
    #[must_use]
    pub fn aggregator<'s>(&self, structure: &'s ThresholdStructure) -> Aggregator<'s> {
        Aggregator::new(structure, self.clone())
    }
}
