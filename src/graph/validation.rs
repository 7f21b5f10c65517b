//! Semantic validation
//!
//! Every rule emits a structured `(level, code, location, detail)` issue;
//! errors never halt the run, so the full report is always produced. I/O
//! failures and programming bugs are not funneled through here - only
//! content-level inconsistencies become issues.

use crate::graph::model::GraphModel;
use crate::graph::parser::ParsedGraph;
use crate::graph::ports::{is_flow_endpoint, is_selection_port_name, FLOW_PORT_PLACEHOLDER};
use crate::nodes::normalizer::infer_scopes_from_file_path;
use crate::nodes::types::NormalizedSpec;
use crate::nodes::NodeLibrary;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

pub const CODE_UNKNOWN_EVENT_NAME: &str = "CODE_UNKNOWN_EVENT_NAME";
pub const CODE_ON_METHOD_NAME_UNKNOWN: &str = "CODE_ON_METHOD_NAME_UNKNOWN";
pub const CODE_PORT_TYPE_MISMATCH: &str = "CODE_PORT_TYPE_MISMATCH";
pub const CODE_PORT_NOT_FOUND: &str = "CODE_PORT_NOT_FOUND";
pub const CODE_EDGE_ENDPOINT_MISSING: &str = "CODE_EDGE_ENDPOINT_MISSING";
pub const CODE_FLOW_DATA_MIXED: &str = "CODE_FLOW_DATA_MIXED";
pub const CODE_SELECTION_PORT_WIRED: &str = "CODE_SELECTION_PORT_WIRED";
pub const CODE_ENTITY_INPUT_SOURCE: &str = "CODE_ENTITY_INPUT_SOURCE";
pub const CODE_MISSING_SPEC_FIELD: &str = "CODE_MISSING_SPEC_FIELD";
pub const CODE_SCOPE_PATH_MISMATCH: &str = "CODE_SCOPE_PATH_MISMATCH";
pub const CODE_MULTIPLE_SPECS_IN_FILE: &str = "CODE_MULTIPLE_SPECS_IN_FILE";
pub const CODE_FLOW_CYCLE: &str = "CODE_FLOW_CYCLE";

/// Generic type compatible with everything.
pub const GENERIC_TYPE: &str = "泛型";

/// Suffix marking parameterized list types (`GUID列表`, `字符串列表`, ...).
pub const LIST_TYPE_SUFFIX: &str = "列表";

/// Built-in engine events always accepted by the event-name rules.
pub const BUILTIN_EVENT_NAMES: [&str; 7] = [
    "实体创建时",
    "实体销毁时",
    "游戏开始时",
    "玩家进入时",
    "玩家离开时",
    "每帧更新时",
    "定时器触发时",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub level: IssueLevel,
    pub code: &'static str,
    pub location: String,
    pub detail: String,
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn error_count(&self) -> usize {
        self.issues.iter().filter(|i| i.level == IssueLevel::Error).count()
    }

    pub fn warning_count(&self) -> usize {
        self.issues.iter().filter(|i| i.level == IssueLevel::Warning).count()
    }

    pub fn is_ok(&self) -> bool {
        self.error_count() == 0
    }

    fn error(&mut self, code: &'static str, location: impl Into<String>, detail: impl Into<String>) {
        self.issues.push(ValidationIssue {
            level: IssueLevel::Error,
            code,
            location: location.into(),
            detail: detail.into(),
        });
    }

    fn warning(&mut self, code: &'static str, location: impl Into<String>, detail: impl Into<String>) {
        self.issues.push(ValidationIssue {
            level: IssueLevel::Warning,
            code,
            location: location.into(),
            detail: detail.into(),
        });
    }
}

/// Event names the rules accept: built-ins plus signal names/ids.
#[derive(Debug, Clone, Default)]
pub struct KnownEvents {
    pub builtin: BTreeSet<String>,
    pub signals: BTreeSet<String>,
}

impl KnownEvents {
    pub fn with_defaults() -> Self {
        Self {
            builtin: BUILTIN_EVENT_NAMES.iter().map(|s| s.to_string()).collect(),
            signals: BTreeSet::new(),
        }
    }

    pub fn add_signal(&mut self, name: impl Into<String>) {
        self.signals.insert(name.into());
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.builtin.contains(name) || self.signals.contains(name)
    }
}

/// String-typed compatibility with an extensible alias table.
#[derive(Debug, Clone, Default)]
pub struct TypeCompatibility {
    aliases: BTreeSet<(String, String)>,
}

impl TypeCompatibility {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare two type names mutually compatible.
    pub fn add_alias(&mut self, left: impl Into<String>, right: impl Into<String>) {
        let (left, right) = (left.into(), right.into());
        self.aliases.insert((left.clone(), right.clone()));
        self.aliases.insert((right, left));
    }

    /// Compatibility is reflexive; the generic type matches anything;
    /// parameterized list/mapping types compare element-wise; everything
    /// else needs a declared alias.
    pub fn compatible(&self, from: &str, to: &str) -> bool {
        if from == to || from == GENERIC_TYPE || to == GENERIC_TYPE {
            return true;
        }
        if let (Some(from_element), Some(to_element)) = (list_element(from), list_element(to)) {
            return self.compatible(&from_element, &to_element);
        }
        if let (Some((fk, fv)), Some((tk, tv))) = (mapping_elements(from), mapping_elements(to)) {
            return self.compatible(&fk, &tk) && self.compatible(&fv, &tv);
        }
        self.aliases.contains(&(from.to_string(), to.to_string()))
    }
}

/// Element type of a list type name, if the name denotes a list.
fn list_element(type_name: &str) -> Option<String> {
    if let Some(rest) = type_name.strip_prefix("列表<").and_then(|r| r.strip_suffix('>')) {
        return Some(rest.to_string());
    }
    if type_name == LIST_TYPE_SUFFIX {
        return Some(GENERIC_TYPE.to_string());
    }
    type_name
        .strip_suffix(LIST_TYPE_SUFFIX)
        .map(|prefix| prefix.to_string())
}

/// Key/value element types of a mapping type name (`字典<K,V>`).
fn mapping_elements(type_name: &str) -> Option<(String, String)> {
    let inner = type_name.strip_prefix("字典<")?.strip_suffix('>')?;
    let mut parts = inner.splitn(2, ',');
    let key = parts.next()?.trim().to_string();
    let value = parts.next()?.trim().to_string();
    Some((key, value))
}

/// Semantic validator over a parsed graph and its source facts.
pub struct Validator<'a> {
    pub library: Option<&'a NodeLibrary>,
    pub known_events: KnownEvents,
    pub compatibility: TypeCompatibility,
    pub strict_entity_inputs: bool,
}

impl<'a> Validator<'a> {
    pub fn new(library: Option<&'a NodeLibrary>) -> Self {
        Self {
            library,
            known_events: KnownEvents::with_defaults(),
            compatibility: TypeCompatibility::new(),
            strict_entity_inputs: false,
        }
    }

    /// Validate a parsed graph: structural rules plus the source-fact rules.
    pub fn validate(&self, parsed: &ParsedGraph) -> ValidationReport {
        let mut report = self.validate_model(&parsed.model);
        let known = self.known_events_for(&parsed.model);

        for handler in &parsed.facts.registered_handlers {
            match &handler.resolved_event {
                Some(event_name) if known.contains(event_name) => {}
                Some(event_name) => report.error(
                    CODE_UNKNOWN_EVENT_NAME,
                    format!("event:{event_name}"),
                    format!("registered event '{event_name}' is not a built-in event or known signal"),
                ),
                None => report.error(
                    CODE_UNKNOWN_EVENT_NAME,
                    format!("event:{}", handler.event_expr),
                    format!("event name expression '{}' cannot be resolved", handler.event_expr),
                ),
            }
        }

        for event_name in &parsed.facts.on_method_events {
            if !known.contains(event_name) {
                report.error(
                    CODE_ON_METHOD_NAME_UNKNOWN,
                    format!("method:on_{event_name}"),
                    format!("'{event_name}' is not a built-in event or known signal name"),
                );
            }
        }

        self.check_entity_inputs(parsed, &mut report);
        report
    }

    /// Structure-only rules that need no source facts.
    pub fn validate_model(&self, model: &GraphModel) -> ValidationReport {
        let mut report = ValidationReport::default();

        for (edge_id, edge) in &model.edges {
            let location = format!("edge:{edge_id}");
            let Some(src_node) = model.nodes.get(&edge.src_node) else {
                report.error(
                    CODE_EDGE_ENDPOINT_MISSING,
                    location,
                    format!("source node {} does not exist", edge.src_node),
                );
                continue;
            };
            let Some(dst_node) = model.nodes.get(&edge.dst_node) else {
                report.error(
                    CODE_EDGE_ENDPOINT_MISSING,
                    location,
                    format!("destination node {} does not exist", edge.dst_node),
                );
                continue;
            };

            if edge.src_port != FLOW_PORT_PLACEHOLDER && src_node.output_port(&edge.src_port).is_none() {
                report.error(
                    CODE_PORT_NOT_FOUND,
                    location.clone(),
                    format!("node {} has no output port '{}'", edge.src_node, edge.src_port),
                );
            }
            if edge.dst_port != FLOW_PORT_PLACEHOLDER && dst_node.input_port(&edge.dst_port).is_none() {
                report.error(
                    CODE_PORT_NOT_FOUND,
                    location.clone(),
                    format!("node {} has no input port '{}'", edge.dst_node, edge.dst_port),
                );
            }

            let src_is_flow = is_flow_endpoint(&edge.src_port);
            let dst_is_flow = is_flow_endpoint(&edge.dst_port);
            if src_is_flow != dst_is_flow {
                report.error(
                    CODE_FLOW_DATA_MIXED,
                    location.clone(),
                    format!(
                        "flow outputs connect only to flow inputs ('{}' -> '{}')",
                        edge.src_port, edge.dst_port
                    ),
                );
            }

            if is_selection_port_name(&edge.src_port) || is_selection_port_name(&edge.dst_port) {
                report.error(
                    CODE_SELECTION_PORT_WIRED,
                    location.clone(),
                    "selection ports never accept connections".to_string(),
                );
            }

            if !src_is_flow && !dst_is_flow {
                self.check_edge_types(src_node, dst_node, edge_id, edge, &mut report);
            }
        }

        self.check_flow_cycles(model, &mut report);
        report
    }

    /// Pipeline-spec rules: missing fields, scope/path disagreement, and
    /// the one-spec-per-file convention.
    pub fn validate_specs(&self, specs: &[NormalizedSpec]) -> ValidationReport {
        let mut report = ValidationReport::default();

        let mut specs_per_file: BTreeMap<&std::path::Path, usize> = BTreeMap::new();
        for spec in specs {
            *specs_per_file.entry(spec.file_path.as_path()).or_insert(0) += 1;
        }
        for (file_path, count) in specs_per_file {
            if count > 1 {
                report.error(
                    CODE_MULTIPLE_SPECS_IN_FILE,
                    format!("spec:{}", file_path.display()),
                    format!("implementation file declares {count} node_spec functions, expected exactly one"),
                );
            }
        }

        for spec in specs {
            let location = format!("spec:{}", spec.file_path.display());
            if spec.name.is_empty() {
                report.error(CODE_MISSING_SPEC_FIELD, location.clone(), "node_spec is missing 'name'");
            }
            if spec.category_standard == crate::nodes::normalizer::CATEGORY_SUFFIX {
                report.error(
                    CODE_MISSING_SPEC_FIELD,
                    location.clone(),
                    "node_spec is missing 'category'",
                );
            }
            let inferred = infer_scopes_from_file_path(&spec.file_path);
            if !inferred.is_empty()
                && !spec.scopes.is_empty()
                && !spec.scopes.iter().any(|scope| inferred.contains(scope))
            {
                report.warning(
                    CODE_SCOPE_PATH_MISMATCH,
                    location,
                    format!(
                        "declared scopes {:?} disagree with directory scope {:?}",
                        spec.scopes, inferred
                    ),
                );
            }
        }
        report
    }

    fn known_events_for(&self, model: &GraphModel) -> BTreeSet<String> {
        let mut known: BTreeSet<String> = self.known_events.builtin.clone();
        known.extend(self.known_events.signals.iter().cloned());
        if let Some(bindings) = model.metadata.get("signal_bindings") {
            collect_signal_names(bindings, &mut known);
        }
        known
    }

    fn check_edge_types(
        &self,
        src_node: &crate::graph::model::NodeModel,
        dst_node: &crate::graph::model::NodeModel,
        edge_id: &str,
        edge: &crate::graph::model::EdgeModel,
        report: &mut ValidationReport,
    ) {
        let Some(library) = self.library else { return };
        let Some(src_def) = library.get_by_title(&src_node.title) else { return };
        let Some(dst_def) = library.get_by_title(&dst_node.title) else { return };
        let (Some(src_type), Some(dst_type)) = (
            src_def.output_types.get(&edge.src_port),
            dst_def.input_types.get(&edge.dst_port),
        ) else {
            return;
        };
        if !self.compatibility.compatible(src_type, dst_type) {
            report.error(
                CODE_PORT_TYPE_MISMATCH,
                format!("edge:{edge_id}"),
                format!(
                    "cannot connect {}({}: {}) to {}({}: {})",
                    src_node.title, edge.src_port, src_type, dst_node.title, edge.dst_port, dst_type
                ),
            );
        }
    }

    fn check_entity_inputs(&self, parsed: &ParsedGraph, report: &mut ValidationReport) {
        let Some(library) = self.library else { return };
        let entity_inputs = library.entity_input_params_by_func();

        let mut attribute_by_node_port: BTreeMap<(String, String), &str> = BTreeMap::new();
        for attribute in &parsed.facts.attribute_inputs {
            attribute_by_node_port
                .insert((attribute.node_id.clone(), attribute.port.clone()), attribute.expr.as_str());
        }

        for (node_id, node) in &parsed.model.nodes {
            let Some(entity_ports) = entity_inputs.get(&node.title) else { continue };
            for port in entity_ports {
                let location = format!("node:{node_id}:{port}");
                if node.input_constants.contains_key(port) {
                    report.error(
                        CODE_ENTITY_INPUT_SOURCE,
                        location,
                        format!("entity input '{port}' of {} cannot take a text/constant value", node.title),
                    );
                    continue;
                }
                if self.strict_entity_inputs {
                    if let Some(expr) = attribute_by_node_port.get(&(node_id.clone(), port.clone())) {
                        report.error(
                            CODE_ENTITY_INPUT_SOURCE,
                            location,
                            format!(
                                "entity input '{port}' of {} may only come from wires or event parameters (got '{expr}')",
                                node.title
                            ),
                        );
                    }
                }
            }
        }
    }

    fn check_flow_cycles(&self, model: &GraphModel, report: &mut ValidationReport) {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut indices = BTreeMap::new();
        for node_id in model.nodes.keys() {
            indices.insert(node_id.as_str(), graph.add_node(node_id.as_str()));
        }
        let mut has_flow_edges = false;
        for edge in model.edges.values() {
            if !is_flow_endpoint(&edge.dst_port) && !is_flow_endpoint(&edge.src_port) {
                continue;
            }
            if let (Some(&src), Some(&dst)) =
                (indices.get(edge.src_node.as_str()), indices.get(edge.dst_node.as_str()))
            {
                graph.add_edge(src, dst, ());
                has_flow_edges = true;
            }
        }
        if has_flow_edges && is_cyclic_directed(&graph) {
            report.warning(
                CODE_FLOW_CYCLE,
                "graph".to_string(),
                "flow edges form a cycle; block identification will break it at the first back-edge".to_string(),
            );
        }
    }
}

fn collect_signal_names(bindings: &Value, known: &mut BTreeSet<String>) {
    match bindings {
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::String(name) => {
                        known.insert(name.clone());
                    }
                    Value::Object(object) => {
                        for key in ["name", "signal_name", "signal_id"] {
                            if let Some(name) = object.get(key).and_then(Value::as_str) {
                                known.insert(name.to_string());
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        Value::Object(object) => {
            for key in object.keys() {
                known.insert(key.clone());
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_compatibility_rules() {
        let table = TypeCompatibility::new();
        assert!(table.compatible("字符串", "字符串"));
        assert!(table.compatible("泛型", "GUID"));
        assert!(table.compatible("GUID列表", "泛型列表"));
        assert!(!table.compatible("GUID列表", "字符串列表"));
        assert!(!table.compatible("整数", "浮点数"));

        let mut with_alias = TypeCompatibility::new();
        with_alias.add_alias("整数", "浮点数");
        assert!(with_alias.compatible("整数", "浮点数"));
        assert!(with_alias.compatible("浮点数", "整数"));
    }

    #[test]
    fn test_angle_bracket_parameterized_types() {
        let table = TypeCompatibility::new();
        assert!(table.compatible("列表<泛型>", "列表<GUID>"));
        assert!(table.compatible("字典<字符串, 泛型>", "字典<字符串, 整数>"));
        assert!(!table.compatible("字典<字符串, 布尔值>", "字典<字符串, 整数>"));
    }

    #[test]
    fn test_flow_data_segregation_and_selection_ports() {
        let mut model = GraphModel::new("g", "g");
        let a = model.add_node("甲", "执行节点", &["流程入"], &["流程出", "值"]);
        let b = model.add_node("乙", "执行节点", &["流程入", "信号名"], &["流程出"]);
        model.add_edge(a.clone(), "流程出", b.clone(), "流程入");
        model.add_edge(a.clone(), "值", b.clone(), "流程入");
        model.add_edge(a, "值", b, "信号名");

        let validator = Validator::new(None);
        let report = validator.validate_model(&model);
        let codes: Vec<_> = report.issues.iter().map(|i| i.code).collect();
        assert!(codes.contains(&CODE_FLOW_DATA_MIXED));
        assert!(codes.contains(&CODE_SELECTION_PORT_WIRED));
    }

    #[test]
    fn test_missing_ports_and_endpoints_are_reported() {
        let mut model = GraphModel::new("g", "g");
        let a = model.add_node("甲", "数据", &[], &["值"]);
        model.add_edge(a, "不存在", "ghost", "值");
        let validator = Validator::new(None);
        let report = validator.validate_model(&model);
        assert!(report
            .issues
            .iter()
            .any(|i| i.code == CODE_EDGE_ENDPOINT_MISSING));
    }

    #[test]
    fn test_multiple_specs_per_file_are_flagged() {
        use crate::nodes::types::NormalizedSpec;
        let make = |name: &str| NormalizedSpec {
            file_path: "plugins/nodes/server/组/多个.py".into(),
            name: name.into(),
            category_standard: "执行节点".into(),
            standard_key: format!("执行节点/{name}"),
            scopes: vec!["server".into()],
            ..NormalizedSpec::default()
        };
        let validator = Validator::new(None);
        let report = validator.validate_specs(&[make("甲"), make("乙")]);
        assert!(report
            .issues
            .iter()
            .any(|i| i.code == CODE_MULTIPLE_SPECS_IN_FILE));
    }

    #[test]
    fn test_flow_cycle_is_a_warning_not_error() {
        let mut model = GraphModel::new("g", "g");
        let a = model.add_node("甲", "执行节点", &["流程入"], &["流程出"]);
        let b = model.add_node("乙", "执行节点", &["流程入"], &["流程出"]);
        model.add_edge(a.clone(), "流程出", b.clone(), "流程入");
        model.add_edge(b, "流程出", a, "流程入");
        let validator = Validator::new(None);
        let report = validator.validate_model(&model);
        assert!(report.is_ok());
        assert!(report.issues.iter().any(|i| i.code == CODE_FLOW_CYCLE));
    }
}
