//! File I/O, filtering, and serialization for the sifter pipeline.

mod domain;
mod error;
mod filter;
mod reader;
mod structure_reader;
mod writer;

pub use domain::{FeatureTable, OutputName};
pub use error::IoError;
pub use filter::Filters;
pub use reader::{DEFAULT_ID_COLUMN, FeatureTableReader};
pub use structure_reader::StructureReader;
pub use writer::ResultWriter;
