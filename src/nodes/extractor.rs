//! AST-based node-spec extraction
//!
//! Parses implementation files with tree-sitter and collects the keyword
//! arguments of every top-level function decorated with `node_spec(...)`.
//! Pure transformation: no semantic validation happens here, and files are
//! never imported.

use crate::nodes::types::ExtractedSpec;
use crate::pyast;
use crate::PipelineError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tree_sitter::Node;

/// Extract raw specs from a list of implementation files.
///
/// Missing decorator: function skipped. Non-literal argument: field stays at
/// its empty default (the normalizer/validator reports it). Unreadable file
/// or broken syntax: error with the file position.
pub fn extract_specs(file_paths: &[PathBuf]) -> Result<Vec<ExtractedSpec>, PipelineError> {
    let mut extracted = Vec::new();
    for file_path in file_paths {
        if !file_path.exists() {
            continue;
        }
        let source = std::fs::read_to_string(file_path)?;
        extracted.extend(extract_specs_from_source(&source, file_path)?);
    }
    Ok(extracted)
}

/// Extract specs from already-loaded source text.
pub fn extract_specs_from_source(
    source: &str,
    file_path: &Path,
) -> Result<Vec<ExtractedSpec>, PipelineError> {
    let tree = pyast::parse_module(source).ok_or_else(|| PipelineError::SourceParse {
        path: file_path.display().to_string(),
        detail: "tree-sitter produced no tree".to_string(),
    })?;
    if let Some((line, column)) = pyast::first_error_position(&tree) {
        return Err(PipelineError::SourceParse {
            path: file_path.display().to_string(),
            detail: format!("syntax error at {line}:{column}"),
        });
    }

    let mut extracted = Vec::new();
    for statement in pyast::module_statements(&tree) {
        let Some((function, decorators)) = decorated_function(statement) else {
            continue;
        };
        let Some(spec_call) = decorators
            .into_iter()
            .find(|call| pyast::callee_simple_name(*call, source) == Some("node_spec"))
        else {
            continue;
        };

        let function_name = function
            .child_by_field_name("name")
            .map(|n| pyast::node_text(n, source).to_string())
            .unwrap_or_default();

        let mut keyword_values: BTreeMap<String, Value> = BTreeMap::new();
        let arguments = pyast::call_arguments(spec_call, source);
        for (keyword, value_node) in arguments.keyword {
            let value = pyast::literal_value(value_node, source).unwrap_or(Value::Null);
            keyword_values.insert(keyword, value);
        }

        extracted.push(build_spec(file_path, function_name, &keyword_values));
    }
    Ok(extracted)
}

/// Resolve a decorated or plain top-level function definition and the call
/// expressions of its decorators.
fn decorated_function(statement: Node) -> Option<(Node, Vec<Node>)> {
    match statement.kind() {
        "decorated_definition" => {
            let function = statement.child_by_field_name("definition")?;
            if function.kind() != "function_definition" {
                return None;
            }
            let mut calls = Vec::new();
            let mut cursor = statement.walk();
            for child in statement.named_children(&mut cursor) {
                if child.kind() != "decorator" {
                    continue;
                }
                let mut inner = child.walk();
                for expr in child.named_children(&mut inner) {
                    if expr.kind() == "call" {
                        calls.push(expr);
                    }
                }
            }
            Some((function, calls))
        }
        "function_definition" => Some((statement, Vec::new())),
        _ => None,
    }
}

fn build_spec(
    file_path: &Path,
    function_name: String,
    keywords: &BTreeMap<String, Value>,
) -> ExtractedSpec {
    let string_of = |key: &str| -> Option<String> {
        keywords.get(key).and_then(Value::as_str).map(str::to_string)
    };
    let string_or_empty = |key: &str| string_of(key).unwrap_or_default();
    let string_list = |key: &str| -> Vec<String> {
        keywords
            .get(key)
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    };
    let raw_pairs = |key: &str| -> Vec<Value> {
        keywords
            .get(key)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    };
    let constraint_map = |key: &str| -> BTreeMap<String, Vec<String>> {
        let mut map = BTreeMap::new();
        if let Some(object) = keywords.get(key).and_then(Value::as_object) {
            for (port, options) in object {
                let entries: Vec<String> = options
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect();
                map.insert(port.clone(), entries);
            }
        }
        map
    };

    ExtractedSpec {
        file_path: file_path.to_path_buf(),
        function_name,
        name: string_of("name"),
        category: string_of("category"),
        inputs: raw_pairs("inputs"),
        outputs: raw_pairs("outputs"),
        description: string_or_empty("description"),
        mount_restrictions: string_list("mount_restrictions"),
        doc_reference: string_or_empty("doc_reference"),
        dynamic_port_type: string_or_empty("dynamic_port_type"),
        scopes: string_list("scopes"),
        aliases: string_list("aliases"),
        input_generic_constraints: constraint_map("input_generic_constraints"),
        output_generic_constraints: constraint_map("output_generic_constraints"),
        input_enum_options: constraint_map("input_enum_options"),
        output_enum_options: constraint_map("output_enum_options"),
    }
}
