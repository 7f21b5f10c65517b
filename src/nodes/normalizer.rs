//! Spec normalization
//!
//! Unifies field naming and structure: category suffix, standard key, port
//! pair lists to type maps, and scope inference from the implementation file
//! path. Cross-item validation stays out; the validator reports problems.

use crate::nodes::types::{ExtractedSpec, NormalizedSpec};
use serde_json::Value;
use std::path::Path;

/// Category suffix every internal category name carries.
pub const CATEGORY_SUFFIX: &str = "节点";

/// Canonicalize a category name: `执行` -> `执行节点`, `执行节点` unchanged.
pub fn ensure_category_with_suffix(category_text: &str) -> String {
    let clean = category_text.trim();
    if clean.ends_with(CATEGORY_SUFFIX) {
        clean.to_string()
    } else {
        format!("{clean}{CATEGORY_SUFFIX}")
    }
}

/// Convert raw `(port, type)` entries into cleaned pairs; invalid entries
/// (wrong arity, empty name or type, non-strings) are dropped.
fn pairs_from_raw(raw: &[Value]) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for entry in raw {
        let Some(items) = entry.as_array() else { continue };
        if items.len() < 2 {
            continue;
        }
        let (Some(port), Some(type_name)) = (items[0].as_str(), items[1].as_str()) else {
            continue;
        };
        if port.is_empty() || type_name.is_empty() {
            continue;
        }
        pairs.push((port.to_string(), type_name.to_string()));
    }
    pairs
}

/// Infer scopes from the implementation file path: a `server` path component
/// yields `server`, a `client` component yields `client`; both can apply.
pub fn infer_scopes_from_file_path(file_path: &Path) -> Vec<String> {
    let mut inferred = Vec::new();
    let components: Vec<String> = file_path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_lowercase())
        .collect();
    if components.iter().any(|c| c == "server") {
        inferred.push("server".to_string());
    }
    if components.iter().any(|c| c == "client") {
        inferred.push("client".to_string());
    }
    inferred
}

fn normalize_scopes(scopes: &[String], file_path: &Path) -> Vec<String> {
    let kept: Vec<String> = scopes
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if !kept.is_empty() {
        return kept;
    }
    infer_scopes_from_file_path(file_path)
}

/// Normalize a batch of extracted specs.
///
/// Items missing name or category still produce placeholder entries so the
/// validator can point at the offending file instead of the pipeline
/// silently shrinking.
pub fn normalize_specs(extracted_items: &[ExtractedSpec]) -> Vec<NormalizedSpec> {
    let mut normalized_list = Vec::with_capacity(extracted_items.len());

    for raw in extracted_items {
        let name_text = raw.name.as_deref().unwrap_or("").trim().to_string();
        let category_text = raw.category.as_deref().unwrap_or("").trim().to_string();
        let category_standard = ensure_category_with_suffix(&category_text);
        let standard_key = format!("{category_standard}/{name_text}");
        let scopes = normalize_scopes(&raw.scopes, &raw.file_path);

        if name_text.is_empty() || category_text.is_empty() {
            normalized_list.push(NormalizedSpec {
                file_path: raw.file_path.clone(),
                function_name: raw.function_name.clone(),
                standard_key,
                category_standard,
                name: name_text,
                scopes,
                aliases: raw.aliases.clone(),
                description: raw.description.clone(),
                mount_restrictions: raw.mount_restrictions.clone(),
                doc_reference: raw.doc_reference.clone(),
                dynamic_port_type: raw.dynamic_port_type.clone(),
                input_enum_options: raw.input_enum_options.clone(),
                output_enum_options: raw.output_enum_options.clone(),
                ..NormalizedSpec::default()
            });
            continue;
        }

        let inputs = pairs_from_raw(&raw.inputs);
        let outputs = pairs_from_raw(&raw.outputs);
        let input_types = inputs.iter().cloned().collect();
        let output_types = outputs.iter().cloned().collect();

        normalized_list.push(NormalizedSpec {
            file_path: raw.file_path.clone(),
            function_name: raw.function_name.clone(),
            standard_key,
            category_standard,
            name: name_text,
            input_types,
            output_types,
            aliases: raw.aliases.clone(),
            scopes,
            description: raw.description.clone(),
            mount_restrictions: raw.mount_restrictions.clone(),
            doc_reference: raw.doc_reference.clone(),
            dynamic_port_type: raw.dynamic_port_type.clone(),
            inputs,
            outputs,
            input_generic_constraints: raw.input_generic_constraints.clone(),
            output_generic_constraints: raw.output_generic_constraints.clone(),
            input_enum_options: raw.input_enum_options.clone(),
            output_enum_options: raw.output_enum_options.clone(),
        });
    }

    normalized_list
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn extracted(name: &str, category: &str, path: &str) -> ExtractedSpec {
        ExtractedSpec {
            file_path: PathBuf::from(path),
            function_name: name.to_string(),
            name: Some(name.to_string()),
            category: Some(category.to_string()),
            inputs: vec![json!(["流程入", "流程"]), json!(["字符串", "字符串"])],
            outputs: vec![json!(["流程出", "流程"])],
            ..ExtractedSpec::default()
        }
    }

    #[test]
    fn test_category_suffix_and_standard_key() {
        let specs = normalize_specs(&[extracted("打印字符串", "执行", "plugins/nodes/server/a.py")]);
        assert_eq!(specs[0].category_standard, "执行节点");
        assert_eq!(specs[0].standard_key, "执行节点/打印字符串");
    }

    #[test]
    fn test_scope_inferred_from_path_only_when_empty() {
        let from_path = normalize_specs(&[extracted("甲", "查询节点", "plugins/nodes/server/分类/甲.py")]);
        assert_eq!(from_path[0].scopes, vec!["server".to_string()]);

        let mut explicit = extracted("乙", "查询节点", "plugins/nodes/client/分类/乙.py");
        explicit.scopes = vec!["server".to_string()];
        let kept = normalize_specs(&[explicit]);
        assert_eq!(kept[0].scopes, vec!["server".to_string()]);
    }

    #[test]
    fn test_invalid_pairs_are_dropped() {
        let mut raw = extracted("丙", "查询节点", "plugins/nodes/server/丙.py");
        raw.inputs = vec![json!(["好", "字符串"]), json!(["只有一项"]), json!(["", "字符串"]), json!(42)];
        let specs = normalize_specs(&[raw]);
        assert_eq!(specs[0].inputs.len(), 1);
        assert_eq!(specs[0].input_types.len(), 1);
    }

    #[test]
    fn test_missing_name_produces_placeholder() {
        let mut raw = extracted("", "执行", "plugins/nodes/server/x.py");
        raw.name = None;
        let specs = normalize_specs(&[raw]);
        assert_eq!(specs.len(), 1);
        assert!(specs[0].name.is_empty());
        assert!(specs[0].inputs.is_empty());
    }
}
