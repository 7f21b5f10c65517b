//! FlowScript - engine core for a visual node-graph game-scripting tool
//!
//! This library provides the non-UI core of the authoring tool:
//! - Node-definition pipeline (discovery, AST extraction, normalization, registry)
//! - Graph model, graph-file parser and semantic validator
//! - Deterministic multi-stage layout engine (blocks, cross-block copies, positioning)
//! - Persistent and in-memory caching keyed by content fingerprints

pub mod fingerprint;
pub mod graph;
pub mod layout;
pub mod nodes;
pub mod pyast;
pub mod settings;

/// Initialize the logging framework.
///
/// Configures env_logger to support the RUST_LOG environment variable.
/// Call this once at application startup.
///
/// # Examples
///
/// ```no_run
/// flowscript::init_logging();
/// log::info!("engine ready");
/// ```
pub fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_millis()
        .init();

    log::info!("FlowScript logging initialized");
}

/// Re-export commonly used types
pub use graph::{EdgeModel, GraphModel, NodeModel, PortModel};
pub use layout::{LayoutResult, LayoutService};
pub use nodes::NodeLibrary;
pub use settings::Settings;

/// Application errors
#[derive(Debug, thiserror::Error)]
pub enum FlowScriptError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),
}

/// Graph-model and graph-file errors
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Failed to parse {path} at {line}:{column}: {detail}")]
    Parse {
        path: String,
        line: usize,
        column: usize,
        detail: String,
    },

    #[error("Node {0} not found in graph")]
    NodeNotFound(String),

    #[error("Edge {0} not found in graph")]
    EdgeNotFound(String),

    #[error("Port {port} not found on node {node}")]
    PortNotFound { node: String, port: String },

    #[error("Malformed graph payload: {0}")]
    Malformed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Node-definition pipeline errors
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Duplicate node key {key}: declared in {first} and {second}")]
    DuplicateStandardKey {
        key: String,
        first: std::path::PathBuf,
        second: std::path::PathBuf,
    },

    #[error("Failed to parse {path}: {detail}")]
    SourceParse { path: String, detail: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistent-cache errors.
///
/// Content-level corruption never surfaces here: corrupted cache files are
/// deleted and reported as misses. Only real I/O failures propagate.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Layout-engine errors
#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("All layout blocks must have an order_index assigned during identification")]
    MissingOrderIndex,

    #[error("Layout assertion failed: data nodes not assigned to any block: {0:?}")]
    UnassignedDataNodes(Vec<String>),
}
