//! Sankey aggregation of threshold-tree classification results.
//!
//! An [`Aggregator`] counts distinct features per node and per
//! adjacent-stage edge, names nodes from their category and parent rule,
//! and echoes the applied filters and thresholds as diagram metadata.

mod aggregate;
mod config;
mod count;
mod diagram;
mod error;
mod metadata;
mod naming;

pub use aggregate::{Aggregator, aggregate};
pub use config::AggregatorConfig;
pub use diagram::{SankeyDiagram, SankeyLink, SankeyMetadata, SankeyNode};
pub use error::SankeyError;
pub use metadata::applied_thresholds;
pub use naming::display_name;
