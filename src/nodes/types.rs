//! Pipeline intermediate types
//!
//! `ExtractedSpec` is the raw, per-function result of AST extraction;
//! `NormalizedSpec` adds the canonical category, the standard key and the
//! derived port-type maps while preserving the original pair lists.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Raw extraction result for one `@node_spec(...)`-decorated function.
///
/// Field values mirror the decorator's keyword arguments; anything that was
/// not a literal in the source arrives as `Value::Null` for the normalizer
/// and validator to report.
#[derive(Debug, Clone, Default)]
pub struct ExtractedSpec {
    pub file_path: PathBuf,
    /// Implementation function name, used to locate the callable at runtime.
    pub function_name: String,
    pub name: Option<String>,
    pub category: Option<String>,
    /// Raw `(port, type)` pair list as written; invalid entries survive
    /// until normalization drops them.
    pub inputs: Vec<Value>,
    pub outputs: Vec<Value>,
    pub description: String,
    pub mount_restrictions: Vec<String>,
    pub doc_reference: String,
    pub dynamic_port_type: String,
    pub scopes: Vec<String>,
    pub aliases: Vec<String>,
    pub input_generic_constraints: BTreeMap<String, Vec<String>>,
    pub output_generic_constraints: BTreeMap<String, Vec<String>>,
    pub input_enum_options: BTreeMap<String, Vec<String>>,
    pub output_enum_options: BTreeMap<String, Vec<String>>,
}

/// Canonicalized node specification.
#[derive(Debug, Clone, Default)]
pub struct NormalizedSpec {
    pub file_path: PathBuf,
    pub function_name: String,
    /// `"{category_with_suffix}/{name}"`.
    pub standard_key: String,
    pub category_standard: String,
    pub name: String,
    pub input_types: BTreeMap<String, String>,
    pub output_types: BTreeMap<String, String>,
    pub aliases: Vec<String>,
    pub scopes: Vec<String>,
    pub description: String,
    pub mount_restrictions: Vec<String>,
    pub doc_reference: String,
    pub dynamic_port_type: String,
    /// Cleaned `(port, type)` pairs, order preserved from the source.
    pub inputs: Vec<(String, String)>,
    pub outputs: Vec<(String, String)>,
    pub input_generic_constraints: BTreeMap<String, Vec<String>>,
    pub output_generic_constraints: BTreeMap<String, Vec<String>>,
    pub input_enum_options: BTreeMap<String, Vec<String>>,
    pub output_enum_options: BTreeMap<String, Vec<String>>,
}

impl NormalizedSpec {
    /// Input port names in declaration order.
    pub fn input_names(&self) -> Vec<&str> {
        self.inputs.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Output port names in declaration order.
    pub fn output_names(&self) -> Vec<&str> {
        self.outputs.iter().map(|(name, _)| name.as_str()).collect()
    }
}
