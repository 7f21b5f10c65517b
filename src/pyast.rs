//! Shared Python syntax-tree helpers
//!
//! Both the node-spec extractor and the graph-file parser read Python sources
//! through tree-sitter. Files are parsed, never imported or executed, so
//! implementation files with side effects stay inert during analysis.

use serde_json::Value;
use tree_sitter::{Node, Parser, Tree};

/// Parse a Python module into a syntax tree.
///
/// Returns `None` only when tree-sitter itself fails to produce a tree
/// (cancellation or an invalid language build); syntactically broken input
/// still yields a tree containing ERROR nodes, which callers inspect via
/// [`first_error_position`].
pub fn parse_module(source: &str) -> Option<Tree> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .ok()?;
    parser.parse(source, None)
}

/// Position (1-based line, column) of the first ERROR/MISSING node, if any.
pub fn first_error_position(tree: &Tree) -> Option<(usize, usize)> {
    fn walk(node: Node) -> Option<(usize, usize)> {
        if node.is_error() || node.is_missing() {
            let pos = node.start_position();
            return Some((pos.row + 1, pos.column + 1));
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if let Some(found) = walk(child) {
                return Some(found);
            }
        }
        None
    }
    walk(tree.root_node())
}

/// Source text of a node.
pub fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

/// Content of a string literal node, without quotes or prefixes.
pub fn string_literal_content(node: Node, source: &str) -> Option<String> {
    if node.kind() != "string" {
        return None;
    }
    let mut content = String::new();
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "string_content" {
            content.push_str(node_text(child, source));
        }
    }
    Some(content)
}

/// Convert a literal expression to a JSON value.
///
/// Supports strings, integers, floats, booleans, `None`, lists, tuples,
/// dictionaries and negated numbers. Anything else (names, calls,
/// comprehensions) yields `None` so downstream stages can report it.
pub fn literal_value(node: Node, source: &str) -> Option<Value> {
    match node.kind() {
        "string" => string_literal_content(node, source).map(Value::String),
        "integer" => node_text(node, source).parse::<i64>().ok().map(Value::from),
        "float" => node_text(node, source).parse::<f64>().ok().map(Value::from),
        "true" => Some(Value::Bool(true)),
        "false" => Some(Value::Bool(false)),
        "none" => Some(Value::Null),
        "unary_operator" => {
            let text = node_text(node, source);
            if let Ok(int_value) = text.parse::<i64>() {
                return Some(Value::from(int_value));
            }
            text.parse::<f64>().ok().map(Value::from)
        }
        "list" | "tuple" => {
            let mut items = Vec::new();
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                items.push(literal_value(child, source)?);
            }
            Some(Value::Array(items))
        }
        "dictionary" => {
            let mut map = serde_json::Map::new();
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                if child.kind() != "pair" {
                    continue;
                }
                let key_node = child.child_by_field_name("key")?;
                let value_node = child.child_by_field_name("value")?;
                let key = match literal_value(key_node, source)? {
                    Value::String(text) => text,
                    other => other.to_string(),
                };
                map.insert(key, literal_value(value_node, source)?);
            }
            Some(Value::Object(map))
        }
        "parenthesized_expression" => {
            let inner = node.named_child(0)?;
            literal_value(inner, source)
        }
        _ => None,
    }
}

/// True when the expression is representable as a literal value.
pub fn is_literal(node: Node, source: &str) -> bool {
    literal_value(node, source).is_some()
}

/// Simple name of a call's callee: `foo(...)` -> `foo`, `a.b.foo(...)` -> `foo`.
pub fn callee_simple_name<'a>(call: Node, source: &'a str) -> Option<&'a str> {
    let function = call.child_by_field_name("function")?;
    match function.kind() {
        "identifier" => Some(node_text(function, source)),
        "attribute" => {
            let attribute = function.child_by_field_name("attribute")?;
            Some(node_text(attribute, source))
        }
        _ => None,
    }
}

/// Positional and keyword arguments of a call node.
pub struct CallArguments<'t> {
    pub positional: Vec<Node<'t>>,
    pub keyword: Vec<(String, Node<'t>)>,
}

pub fn call_arguments<'t>(call: Node<'t>, source: &str) -> CallArguments<'t> {
    let mut positional = Vec::new();
    let mut keyword = Vec::new();
    if let Some(arguments) = call.child_by_field_name("arguments") {
        let mut cursor = arguments.walk();
        for child in arguments.named_children(&mut cursor) {
            match child.kind() {
                "keyword_argument" => {
                    let name = child
                        .child_by_field_name("name")
                        .map(|n| node_text(n, source).to_string())
                        .unwrap_or_default();
                    if let Some(value) = child.child_by_field_name("value") {
                        keyword.push((name, value));
                    }
                }
                "comment" => {}
                _ => positional.push(child),
            }
        }
    }
    CallArguments { positional, keyword }
}

/// Iterate top-level statements of a module, descending into nothing.
pub fn module_statements<'t>(tree: &'t Tree) -> Vec<Node<'t>> {
    let root = tree.root_node();
    let mut cursor = root.walk();
    root.named_children(&mut cursor).collect()
}

/// Parameter names of a function definition, in order, `self` excluded.
pub fn function_parameter_names(function: Node, source: &str) -> Vec<String> {
    let mut names = Vec::new();
    let Some(parameters) = function.child_by_field_name("parameters") else {
        return names;
    };
    let mut cursor = parameters.walk();
    for child in parameters.named_children(&mut cursor) {
        let name_node = match child.kind() {
            "identifier" => Some(child),
            "typed_parameter" | "default_parameter" | "typed_default_parameter" => {
                child.child_by_field_name("name").or_else(|| {
                    let mut inner = child.walk();
                    let found = child.named_children(&mut inner).find(|n| n.kind() == "identifier");
                    found
                })
            }
            _ => None,
        };
        if let Some(name_node) = name_node {
            let name = node_text(name_node, source);
            if name != "self" {
                names.push(name.to_string());
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_extraction() {
        let source = "x = [(\"a\", 1), (\"b\", 2.5), True, None]\n";
        let tree = parse_module(source).expect("parse");
        let statements = module_statements(&tree);
        let assignment = statements[0].named_child(0).expect("assignment");
        let right = assignment.child_by_field_name("right").expect("right");
        let value = literal_value(right, source).expect("literal");
        let items = value.as_array().expect("array");
        assert_eq!(items.len(), 4);
        assert_eq!(items[0][0], "a");
        assert_eq!(items[1][1], 2.5);
        assert_eq!(items[2], true);
        assert!(items[3].is_null());
    }

    #[test]
    fn test_callee_and_arguments() {
        let source = "result = compute(self.game, 端口=\"值\", 另一个=标识符)\n";
        let tree = parse_module(source).expect("parse");
        let statements = module_statements(&tree);
        let assignment = statements[0].named_child(0).expect("assignment");
        let call = assignment.child_by_field_name("right").expect("call");
        assert_eq!(callee_simple_name(call, source), Some("compute"));
        let arguments = call_arguments(call, source);
        assert_eq!(arguments.positional.len(), 1);
        assert_eq!(arguments.keyword.len(), 2);
        assert_eq!(arguments.keyword[0].0, "端口");
        assert!(is_literal(arguments.keyword[0].1, source));
        assert!(!is_literal(arguments.keyword[1].1, source));
    }

    #[test]
    fn test_error_position_reported() {
        let tree = parse_module("def broken(:\n    pass\n").expect("parse");
        assert!(first_error_position(&tree).is_some());
    }
}
