//! Node-definition pipeline
//!
//! Implementation files are discovered, parsed to syntax trees (never
//! executed), normalized and merged into an indexed library. Stages are
//! pure transformations; semantic problems are reported by the validator.

pub mod discovery;
pub mod extractor;
pub mod normalizer;
pub mod registry;
pub mod types;

pub use discovery::discover_implementation_files;
pub use extractor::{extract_specs, extract_specs_from_source};
pub use normalizer::normalize_specs;
pub use registry::NodeLibrary;
pub use types::{ExtractedSpec, NormalizedSpec};
