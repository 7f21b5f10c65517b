//! Graph-file parser
//!
//! Graph files are Python sources following the generated class convention:
//! a module docstring header (`graph_id` / `graph_name` / `graph_type`), a
//! `GRAPH_VARIABLES` list of literal `GraphVariableConfig(...)` calls, and a
//! single class whose `on_<Event>` methods encode the node graph as a
//! sequence of node-function calls. The parser recovers the graph model from
//! that convention without ever executing the file.
//!
//! Besides the model it collects source facts the semantic validator needs:
//! `on_` method names, registered event handlers (module-level string
//! constants resolved), and inputs fed from attributes or free variables.

use crate::graph::model::{GraphModel, GraphVariableConfig, NodeModel, PortModel};
use crate::graph::ports::{FLOW_IN_PORT, FLOW_OUT_PORT};
use crate::nodes::NodeLibrary;
use crate::pyast;
use crate::GraphError;
use regex::Regex;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use tree_sitter::Node;

/// Category of event-root nodes.
pub const EVENT_NODE_CATEGORY: &str = "事件节点";

/// Default category for statement-position nodes without a library entry.
pub const EXEC_NODE_CATEGORY: &str = "执行节点";

/// Default category for value-producing nodes without a library entry.
pub const QUERY_NODE_CATEGORY: &str = "查询节点";

/// Title of the flow node an `if`/`else` statement lowers to.
pub const BRANCH_NODE_TITLE: &str = "条件分支";

const BRANCH_TRUE_PORT: &str = "分支真";
const BRANCH_FALSE_PORT: &str = "分支假";
const BRANCH_CONDITION_PORT: &str = "条件";

/// One `register_event_handler(...)` call found in the source.
#[derive(Debug, Clone)]
pub struct RegisteredHandler {
    /// Source text of the event-name argument.
    pub event_expr: String,
    /// Event name after resolving module-level string constants, when possible.
    pub resolved_event: Option<String>,
    /// Handler method name (`on_...`).
    pub handler: String,
}

/// An input that was fed from an attribute or free variable rather than a
/// wire or a literal; the entity-provenance rule inspects these.
#[derive(Debug, Clone)]
pub struct AttributeInput {
    pub node_id: String,
    pub port: String,
    pub expr: String,
}

/// Facts about the source that do not live in the graph model itself.
#[derive(Debug, Clone, Default)]
pub struct SourceFacts {
    /// `X` for every `def on_<X>` method, registered or not.
    pub on_method_events: Vec<String>,
    pub registered_handlers: Vec<RegisteredHandler>,
    pub module_constants: BTreeMap<String, String>,
    pub attribute_inputs: Vec<AttributeInput>,
}

/// Parse result: the model plus validator-facing source facts.
#[derive(Debug)]
pub struct ParsedGraph {
    pub model: GraphModel,
    pub facts: SourceFacts,
}

/// Parser for generated graph files.
pub struct GraphCodeParser<'lib> {
    library: Option<&'lib NodeLibrary>,
}

impl<'lib> GraphCodeParser<'lib> {
    pub fn new() -> Self {
        Self { library: None }
    }

    pub fn with_library(library: &'lib NodeLibrary) -> Self {
        Self { library: Some(library) }
    }

    pub fn parse_file(&self, path: &Path) -> Result<ParsedGraph, GraphError> {
        let source = std::fs::read_to_string(path)?;
        let label = path.display().to_string();
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        self.parse_source(&source, &label, &stem)
    }

    /// Parse source text. `file_label` is used in error positions; `fallback_id`
    /// seeds `graph_id` when the docstring header lacks one.
    pub fn parse_source(
        &self,
        source: &str,
        file_label: &str,
        fallback_id: &str,
    ) -> Result<ParsedGraph, GraphError> {
        let tree = pyast::parse_module(source).ok_or_else(|| GraphError::Parse {
            path: file_label.to_string(),
            line: 0,
            column: 0,
            detail: "tree-sitter produced no tree".to_string(),
        })?;
        if let Some((line, column)) = pyast::first_error_position(&tree) {
            return Err(GraphError::Parse {
                path: file_label.to_string(),
                line,
                column,
                detail: "syntax error".to_string(),
            });
        }

        let mut model = GraphModel::new("", "");
        let mut facts = SourceFacts::default();
        let mut header = Header::default();
        let mut class_node: Option<Node> = None;

        for statement in pyast::module_statements(&tree) {
            match statement.kind() {
                "expression_statement" => {
                    let Some(child) = statement.named_child(0) else { continue };
                    match child.kind() {
                        "string" if header.raw.is_none() => {
                            let content = pyast::string_literal_content(child, source).unwrap_or_default();
                            header = Header::parse(&content);
                        }
                        "assignment" => {
                            self.collect_module_assignment(child, source, &mut model, &mut facts);
                        }
                        _ => {}
                    }
                }
                "class_definition" if class_node.is_none() => {
                    class_node = Some(statement);
                }
                _ => {}
            }
        }

        let class_name = class_node
            .and_then(|c| c.child_by_field_name("name"))
            .map(|n| pyast::node_text(n, source).to_string())
            .unwrap_or_default();

        model.graph_id = header.graph_id.clone().unwrap_or_else(|| fallback_id.to_string());
        model.graph_name = header
            .graph_name
            .clone()
            .unwrap_or_else(|| class_name.clone());
        let graph_type = header.graph_type.clone().unwrap_or_else(|| "server".to_string());
        model.metadata.insert("graph_type".to_string(), json!(graph_type));

        if let Some(class_node) = class_node {
            self.parse_class_body(class_node, source, &mut model, &mut facts);
        }

        Ok(ParsedGraph { model, facts })
    }

    fn collect_module_assignment(
        &self,
        assignment: Node,
        source: &str,
        model: &mut GraphModel,
        facts: &mut SourceFacts,
    ) {
        let Some(left) = assignment.child_by_field_name("left") else { return };
        if left.kind() != "identifier" {
            return;
        }
        let name = pyast::node_text(left, source);
        let Some(right) = assignment.child_by_field_name("right") else { return };

        if name == "GRAPH_VARIABLES" {
            self.collect_graph_variables(right, source, model);
            return;
        }
        if right.kind() == "string" {
            if let Some(content) = pyast::string_literal_content(right, source) {
                facts.module_constants.insert(name.to_string(), content);
            }
        }
    }

    fn collect_graph_variables(&self, list_node: Node, source: &str, model: &mut GraphModel) {
        if list_node.kind() != "list" {
            return;
        }
        let mut cursor = list_node.walk();
        for element in list_node.named_children(&mut cursor) {
            if element.kind() != "call" {
                continue;
            }
            if pyast::callee_simple_name(element, source) != Some("GraphVariableConfig") {
                continue;
            }
            let arguments = pyast::call_arguments(element, source);
            let mut variable = GraphVariableConfig {
                name: String::new(),
                variable_type: String::new(),
                default_value: serde_json::Value::Null,
                description: String::new(),
                is_exposed: false,
            };
            for (keyword, value_node) in arguments.keyword {
                let literal = pyast::literal_value(value_node, source);
                match keyword.as_str() {
                    "name" => {
                        variable.name = literal.and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default()
                    }
                    "variable_type" => {
                        variable.variable_type =
                            literal.and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default()
                    }
                    "default_value" => variable.default_value = literal.unwrap_or(serde_json::Value::Null),
                    "description" => {
                        variable.description =
                            literal.and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default()
                    }
                    "is_exposed" => {
                        variable.is_exposed = literal.and_then(|v| v.as_bool()).unwrap_or(false)
                    }
                    _ => {}
                }
            }
            if !variable.name.is_empty() {
                model.graph_variables.push(variable);
            }
        }
    }

    fn parse_class_body(
        &self,
        class_node: Node,
        source: &str,
        model: &mut GraphModel,
        facts: &mut SourceFacts,
    ) {
        let Some(body) = class_node.child_by_field_name("body") else { return };
        let mut cursor = body.walk();
        for statement in body.named_children(&mut cursor) {
            if statement.kind() != "function_definition" {
                continue;
            }
            let name = statement
                .child_by_field_name("name")
                .map(|n| pyast::node_text(n, source).to_string())
                .unwrap_or_default();
            if let Some(event_name) = name.strip_prefix("on_") {
                facts.on_method_events.push(event_name.to_string());
                self.parse_event_method(statement, event_name, source, model, facts);
            } else if name == "register_handlers" {
                self.scan_register_handlers(statement, source, facts);
            }
        }
    }

    fn parse_event_method(
        &self,
        function: Node,
        event_name: &str,
        source: &str,
        model: &mut GraphModel,
        facts: &mut SourceFacts,
    ) {
        let parameters: Vec<String> = pyast::function_parameter_names(function, source);
        let mut outputs: Vec<&str> = vec![FLOW_OUT_PORT];
        for parameter in &parameters {
            outputs.push(parameter.as_str());
        }
        let event_id = model.add_node(event_name, EVENT_NODE_CATEGORY, &[], &outputs);

        let mut scope = MethodScope::default();
        for parameter in &parameters {
            scope
                .var_source
                .insert(parameter.clone(), (event_id.clone(), parameter.clone()));
        }

        let Some(body) = function.child_by_field_name("body") else { return };
        let statements: Vec<Node> = {
            let mut cursor = body.walk();
            body.named_children(&mut cursor).collect()
        };
        let entries = vec![(event_id, FLOW_OUT_PORT.to_string())];
        self.walk_block(&statements, entries, source, model, facts, &mut scope);
    }

    /// Walk a statement block, chaining flow from `entries`; returns the flow
    /// exits that continue past the block (empty after a `return`).
    fn walk_block(
        &self,
        statements: &[Node],
        mut entries: Vec<(String, String)>,
        source: &str,
        model: &mut GraphModel,
        facts: &mut SourceFacts,
        scope: &mut MethodScope,
    ) -> Vec<(String, String)> {
        for statement in statements {
            match statement.kind() {
                "expression_statement" => {
                    let Some(child) = statement.named_child(0) else { continue };
                    match child.kind() {
                        "call" => {
                            entries = self.handle_call(child, None, entries, source, model, facts, scope);
                        }
                        "assignment" => {
                            entries = self.handle_assignment(child, entries, source, model, facts, scope);
                        }
                        _ => {}
                    }
                }
                "if_statement" => {
                    entries = self.handle_if(*statement, entries, source, model, facts, scope);
                }
                "return_statement" => {
                    entries.clear();
                }
                _ => {}
            }
        }
        entries
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_assignment(
        &self,
        assignment: Node,
        entries: Vec<(String, String)>,
        source: &str,
        model: &mut GraphModel,
        facts: &mut SourceFacts,
        scope: &mut MethodScope,
    ) -> Vec<(String, String)> {
        let Some(left) = assignment.child_by_field_name("left") else { return entries };
        let Some(right) = assignment.child_by_field_name("right") else {
            // Bare annotation line (`变量: "三维向量"`), a type ascription for
            // an earlier tuple unpack.
            return entries;
        };

        let targets: Vec<String> = match left.kind() {
            "identifier" => vec![pyast::node_text(left, source).to_string()],
            "pattern_list" | "tuple_pattern" => {
                let mut cursor = left.walk();
                left.named_children(&mut cursor)
                    .filter(|n| n.kind() == "identifier")
                    .map(|n| pyast::node_text(n, source).to_string())
                    .collect()
            }
            _ => return entries,
        };

        if right.kind() == "call" {
            return self.handle_call(right, Some(targets), entries, source, model, facts, scope);
        }
        if targets.len() == 1 && pyast::is_literal(right, source) {
            scope
                .local_literals
                .insert(targets[0].clone(), pyast::node_text(right, source).to_string());
        }
        entries
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_call(
        &self,
        call: Node,
        targets: Option<Vec<String>>,
        entries: Vec<(String, String)>,
        source: &str,
        model: &mut GraphModel,
        facts: &mut SourceFacts,
        scope: &mut MethodScope,
    ) -> Vec<(String, String)> {
        let Some(callee) = pyast::callee_simple_name(call, source) else { return entries };
        if callee == "register_event_handler" {
            self.record_handler_call(call, source, facts);
            return entries;
        }
        if callee == "validate_node_graph" {
            return entries;
        }

        let definition = self.library.and_then(|lib| lib.get_by_title(callee));
        let is_statement = targets.is_none();

        let mut node = {
            let id = String::new();
            let category = definition
                .map(|d| d.category_standard.clone())
                .unwrap_or_else(|| {
                    if is_statement { EXEC_NODE_CATEGORY.to_string() } else { QUERY_NODE_CATEGORY.to_string() }
                });
            NodeModel::new(id, callee, category)
        };

        match definition {
            Some(definition) => {
                node.inputs = definition
                    .inputs
                    .iter()
                    .map(|(port, _)| PortModel::input(port.clone()))
                    .collect();
                node.outputs = definition
                    .outputs
                    .iter()
                    .map(|(port, _)| PortModel::output(port.clone()))
                    .collect();
            }
            None => {
                if is_statement {
                    node.inputs.push(PortModel::input(FLOW_IN_PORT));
                    node.outputs.push(PortModel::output(FLOW_OUT_PORT));
                }
            }
        }

        let arguments = pyast::call_arguments(call, source);

        // Ensure every call-site keyword exists as an input port even when
        // the library entry is missing or stale.
        for (keyword, _) in &arguments.keyword {
            if node.input_port(keyword).is_none() {
                node.inputs.push(PortModel::input(keyword.clone()));
            }
        }

        let node_id = {
            let id = mint_node_id(model);
            node.id = id.clone();
            model.insert_node(node);
            id
        };

        // Flow wiring.
        let has_flow_in = model.nodes[&node_id].input_port(FLOW_IN_PORT).is_some();
        let has_flow_out = model.nodes[&node_id].output_port(FLOW_OUT_PORT).is_some();
        let mut next_entries = entries.clone();
        if has_flow_in {
            for (entry_node, entry_port) in &entries {
                model.add_edge(entry_node.clone(), entry_port.clone(), node_id.clone(), FLOW_IN_PORT);
            }
            if has_flow_out {
                next_entries = vec![(node_id.clone(), FLOW_OUT_PORT.to_string())];
            }
        }

        // Keyword arguments: literals become constants, known names become
        // data edges, everything else is an attribute-sourced input.
        for (keyword, value_node) in &arguments.keyword {
            self.bind_input(&node_id, keyword, *value_node, source, model, facts, scope);
        }

        // Positional arguments: the leading game handle is skipped, the rest
        // feed variadic-style ports in declaration order.
        let data_input_names: Vec<String> = model.nodes[&node_id]
            .inputs
            .iter()
            .filter(|p| !p.is_flow())
            .map(|p| p.name.clone())
            .collect();
        let mut positional_index = 0usize;
        for argument in &arguments.positional {
            let text = pyast::node_text(*argument, source);
            if text == "self.game" || text == "game" {
                continue;
            }
            let port = data_input_names
                .get(positional_index)
                .cloned()
                .unwrap_or_else(|| format!("参数{}", positional_index + 1));
            if model.nodes[&node_id].input_port(&port).is_none() {
                if let Some(node) = model.nodes.get_mut(&node_id) {
                    node.inputs.push(PortModel::input(port.clone()));
                }
            }
            self.bind_input(&node_id, &port, *argument, source, model, facts, scope);
            positional_index += 1;
        }

        // Output binding for assignments.
        if let Some(targets) = targets {
            let mut data_outputs: Vec<String> = model.nodes[&node_id]
                .outputs
                .iter()
                .filter(|p| !p.is_flow())
                .map(|p| p.name.clone())
                .collect();
            for (index, variable) in targets.iter().enumerate() {
                let port = match data_outputs.get(index) {
                    Some(port) => port.clone(),
                    None => {
                        if let Some(node) = model.nodes.get_mut(&node_id) {
                            node.outputs.push(PortModel::output(variable.clone()));
                        }
                        data_outputs.push(variable.clone());
                        variable.clone()
                    }
                };
                scope.var_source.insert(variable.clone(), (node_id.clone(), port));
            }
        }

        next_entries
    }

    #[allow(clippy::too_many_arguments)]
    fn bind_input(
        &self,
        node_id: &str,
        port: &str,
        value_node: Node,
        source: &str,
        model: &mut GraphModel,
        facts: &mut SourceFacts,
        scope: &mut MethodScope,
    ) {
        if value_node.kind() == "identifier" {
            let name = pyast::node_text(value_node, source);
            if let Some((src_node, src_port)) = scope.var_source.get(name).cloned() {
                model.add_edge(src_node, src_port, node_id.to_string(), port.to_string());
                return;
            }
            if let Some(text) = scope.local_literals.get(name).cloned() {
                if let Some(node) = model.nodes.get_mut(node_id) {
                    node.input_constants.insert(port.to_string(), text);
                }
                return;
            }
            facts.attribute_inputs.push(AttributeInput {
                node_id: node_id.to_string(),
                port: port.to_string(),
                expr: name.to_string(),
            });
            return;
        }
        if pyast::is_literal(value_node, source) {
            if let Some(node) = model.nodes.get_mut(node_id) {
                node.input_constants
                    .insert(port.to_string(), pyast::node_text(value_node, source).to_string());
            }
            return;
        }
        facts.attribute_inputs.push(AttributeInput {
            node_id: node_id.to_string(),
            port: port.to_string(),
            expr: pyast::node_text(value_node, source).to_string(),
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_if(
        &self,
        if_statement: Node,
        entries: Vec<(String, String)>,
        source: &str,
        model: &mut GraphModel,
        facts: &mut SourceFacts,
        scope: &mut MethodScope,
    ) -> Vec<(String, String)> {
        let branch_id = {
            let mut node = NodeModel::new("", BRANCH_NODE_TITLE, EXEC_NODE_CATEGORY);
            node.inputs = vec![PortModel::input(FLOW_IN_PORT), PortModel::input(BRANCH_CONDITION_PORT)];
            node.outputs = vec![PortModel::output(BRANCH_TRUE_PORT), PortModel::output(BRANCH_FALSE_PORT)];
            let id = mint_node_id(model);
            node.id = id.clone();
            model.insert_node(node);
            id
        };

        for (entry_node, entry_port) in &entries {
            model.add_edge(entry_node.clone(), entry_port.clone(), branch_id.clone(), FLOW_IN_PORT);
        }
        if let Some(condition) = if_statement.child_by_field_name("condition") {
            self.bind_input(&branch_id, BRANCH_CONDITION_PORT, condition, source, model, facts, scope);
        }

        let consequence: Vec<Node> = if_statement
            .child_by_field_name("consequence")
            .map(|body| {
                let mut cursor = body.walk();
                body.named_children(&mut cursor).collect()
            })
            .unwrap_or_default();
        let true_exits = self.walk_block(
            &consequence,
            vec![(branch_id.clone(), BRANCH_TRUE_PORT.to_string())],
            source,
            model,
            facts,
            scope,
        );

        let mut exits = true_exits;
        let alternative = if_statement.child_by_field_name("alternative");
        match alternative {
            Some(else_clause) => {
                let body: Vec<Node> = else_clause
                    .child_by_field_name("body")
                    .map(|b| {
                        let mut cursor = b.walk();
                        b.named_children(&mut cursor).collect()
                    })
                    .unwrap_or_default();
                let false_exits = self.walk_block(
                    &body,
                    vec![(branch_id.clone(), BRANCH_FALSE_PORT.to_string())],
                    source,
                    model,
                    facts,
                    scope,
                );
                exits.extend(false_exits);
            }
            None => exits.push((branch_id, BRANCH_FALSE_PORT.to_string())),
        }
        exits
    }

    fn scan_register_handlers(&self, function: Node, source: &str, facts: &mut SourceFacts) {
        fn visit(node: Node, source: &str, facts: &mut SourceFacts) {
            if node.kind() == "call"
                && pyast::callee_simple_name(node, source) == Some("register_event_handler")
            {
                record_handler(node, source, facts);
            }
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                visit(child, source, facts);
            }
        }
        visit(function, source, facts);
    }

    fn record_handler_call(&self, call: Node, source: &str, facts: &mut SourceFacts) {
        record_handler(call, source, facts);
    }
}

impl Default for GraphCodeParser<'_> {
    fn default() -> Self {
        Self::new()
    }
}

fn record_handler(call: Node, source: &str, facts: &mut SourceFacts) {
    let arguments = pyast::call_arguments(call, source);
    let Some(event_node) = arguments.positional.first() else { return };
    let event_expr = pyast::node_text(*event_node, source).to_string();
    let resolved_event = match event_node.kind() {
        "string" => pyast::string_literal_content(*event_node, source),
        "identifier" => facts.module_constants.get(&event_expr).cloned(),
        _ => None,
    };
    let handler = arguments
        .positional
        .get(1)
        .map(|n| pyast::node_text(*n, source))
        .and_then(|text| text.rsplit('.').next())
        .unwrap_or_default()
        .to_string();
    facts.registered_handlers.push(RegisteredHandler {
        event_expr,
        resolved_event,
        handler,
    });
}

fn mint_node_id(model: &GraphModel) -> String {
    let mut sequence = model.nodes.len() + 1;
    loop {
        let candidate = format!("node_{sequence}");
        if !model.nodes.contains_key(&candidate) {
            return candidate;
        }
        sequence += 1;
    }
}

/// Parsed docstring header.
#[derive(Debug, Default)]
struct Header {
    raw: Option<String>,
    graph_id: Option<String>,
    graph_name: Option<String>,
    graph_type: Option<String>,
}

impl Header {
    fn parse(content: &str) -> Self {
        let pattern = Regex::new(r"(?m)^\s*(graph_id|graph_name|graph_type)\s*[:：]\s*(\S.*)$")
            .expect("header pattern");
        let mut header = Header {
            raw: Some(content.to_string()),
            ..Header::default()
        };
        for captures in pattern.captures_iter(content) {
            let value = captures[2].trim().to_string();
            match &captures[1] {
                "graph_id" => header.graph_id.get_or_insert(value),
                "graph_name" => header.graph_name.get_or_insert(value),
                "graph_type" => header.graph_type.get_or_insert(value),
                _ => continue,
            };
        }
        header
    }
}

/// Per-method parse state.
#[derive(Debug, Default)]
struct MethodScope {
    /// Variable name -> (producing node, output port).
    var_source: BTreeMap<String, (String, String)>,
    /// Variables assigned from literals inside the method body.
    local_literals: BTreeMap<String, String>,
}
