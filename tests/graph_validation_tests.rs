//! Event-name rules over parsed graph sources: registered handlers resolve
//! module constants, and every `on_<X>` method needs a known event or
//! signal name even when never registered.

use flowscript::graph::validation::{
    Validator, CODE_ENTITY_INPUT_SOURCE, CODE_ON_METHOD_NAME_UNKNOWN, CODE_UNKNOWN_EVENT_NAME,
};
use flowscript::graph::GraphCodeParser;
use flowscript::nodes::{normalize_specs, NodeLibrary};

fn graph_source(constant_value: &str, method_event: &str) -> String {
    format!(
        r#"
"""
graph_id: test_event_rules
graph_name: 事件规则
graph_type: server
"""

事件名常量: "字符串" = "{constant_value}"


class 事件规则:
    def __init__(self, game, owner_entity):
        self.game = game
        self.owner_entity = owner_entity

    def on_{method_event}(self, 事件源实体, 事件源GUID):
        return

    def register_handlers(self):
        self.game.register_event_handler(
            事件名常量,
            self.on_{method_event},
        )
"#
    )
}

#[test]
fn test_unknown_event_name_in_module_constant_is_reported() {
    let source = graph_source("阿这", "阿这");
    let parsed = GraphCodeParser::new()
        .parse_source(&source, "temp_event_name_graph.py", "temp")
        .expect("parse");
    let validator = Validator::new(None);
    let report = validator.validate(&parsed);
    assert!(report.issues.iter().any(|i| i.code == CODE_UNKNOWN_EVENT_NAME));
}

#[test]
fn test_signal_name_in_module_constant_is_allowed() {
    let source = graph_source("测试信号_全部参数类型", "测试信号_全部参数类型");
    let parsed = GraphCodeParser::new()
        .parse_source(&source, "temp_event_name_graph.py", "temp")
        .expect("parse");
    let mut validator = Validator::new(None);
    validator.known_events.add_signal("测试信号_全部参数类型");
    let report = validator.validate(&parsed);
    assert!(!report.issues.iter().any(|i| i.code == CODE_UNKNOWN_EVENT_NAME));
    assert!(!report.issues.iter().any(|i| i.code == CODE_ON_METHOD_NAME_UNKNOWN));
}

#[test]
fn test_unknown_on_method_name_is_reported_even_if_not_registered() {
    let source = r#"
"""
graph_id: test_on_method_unknown
graph_name: on方法校验
graph_type: server
"""


class on方法校验:
    def __init__(self, game, owner_entity):
        self.game = game
        self.owner_entity = owner_entity

    def on_阿这(self, 事件源实体, 事件源GUID):
        return

    def register_handlers(self):
        return
"#;
    let parsed = GraphCodeParser::new()
        .parse_source(source, "temp_on_method.py", "temp")
        .expect("parse");
    let validator = Validator::new(None);
    let report = validator.validate(&parsed);
    assert!(report.issues.iter().any(|i| i.code == CODE_ON_METHOD_NAME_UNKNOWN));
}

#[test]
fn test_builtin_event_on_method_is_allowed() {
    let source = graph_source("实体创建时", "实体创建时");
    let parsed = GraphCodeParser::new()
        .parse_source(&source, "temp_builtin.py", "temp")
        .expect("parse");
    let validator = Validator::new(None);
    let report = validator.validate(&parsed);
    assert!(!report.issues.iter().any(|i| i.code == CODE_ON_METHOD_NAME_UNKNOWN));
    assert!(!report.issues.iter().any(|i| i.code == CODE_UNKNOWN_EVENT_NAME));
}

#[test]
fn test_signal_binding_metadata_extends_known_events() {
    let source = graph_source("自定义信号_广播", "自定义信号_广播");
    let mut parsed = GraphCodeParser::new()
        .parse_source(&source, "temp_binding.py", "temp")
        .expect("parse");
    parsed.model.metadata.insert(
        "signal_bindings".to_string(),
        serde_json::json!([{ "name": "自定义信号_广播" }]),
    );
    let validator = Validator::new(None);
    let report = validator.validate(&parsed);
    assert!(!report.issues.iter().any(|i| i.code == CODE_UNKNOWN_EVENT_NAME));
}

fn entity_library() -> NodeLibrary {
    let extracted = flowscript::nodes::extract_specs_from_source(
        r#"
@node_spec(
    name="传送实体",
    category="执行节点",
    inputs=[("流程入", "流程"), ("目标实体", "实体")],
    outputs=[("流程出", "流程")],
)
def 传送实体(game, 目标实体):
    pass
"#,
        std::path::Path::new("plugins/nodes/server/执行节点/传送实体.py"),
    )
    .expect("extract");
    NodeLibrary::build(normalize_specs(&extracted)).expect("library")
}

#[test]
fn test_entity_input_from_attribute_is_rejected_only_in_strict_mode() {
    let source = r#"
"""
graph_id: test_entity_inputs
graph_name: 实体入参
graph_type: server
"""


class 实体入参:
    def __init__(self, game, owner_entity):
        self.game = game
        self.owner_entity = owner_entity

    def on_实体创建时(self, 事件源实体, 事件源GUID):
        传送实体(self.game, 目标实体=self.owner_entity)
"#;
    let library = entity_library();
    let parser = GraphCodeParser::with_library(&library);
    let parsed = parser.parse_source(source, "temp_entity.py", "temp").expect("parse");

    let default_mode = Validator::new(Some(&library));
    let report = default_mode.validate(&parsed);
    assert!(!report.issues.iter().any(|i| i.code == CODE_ENTITY_INPUT_SOURCE));

    let mut strict_mode = Validator::new(Some(&library));
    strict_mode.strict_entity_inputs = true;
    let report = strict_mode.validate(&parsed);
    assert!(report.issues.iter().any(|i| i.code == CODE_ENTITY_INPUT_SOURCE));
}

#[test]
fn test_entity_input_constant_is_always_rejected() {
    let source = r#"
"""
graph_id: test_entity_constant
graph_name: 实体常量
graph_type: server
"""


class 实体常量:
    def __init__(self, game, owner_entity):
        self.game = game
        self.owner_entity = owner_entity

    def on_实体创建时(self, 事件源实体, 事件源GUID):
        传送实体(self.game, 目标实体="玩家一号")
"#;
    let library = entity_library();
    let parser = GraphCodeParser::with_library(&library);
    let parsed = parser.parse_source(source, "temp_entity_c.py", "temp").expect("parse");
    let validator = Validator::new(Some(&library));
    let report = validator.validate(&parsed);
    assert!(report.issues.iter().any(|i| i.code == CODE_ENTITY_INPUT_SOURCE));
}

#[test]
fn test_entity_input_from_event_parameter_wire_is_allowed_in_strict_mode() {
    let source = r#"
"""
graph_id: test_entity_wire
graph_name: 实体连线
graph_type: server
"""


class 实体连线:
    def __init__(self, game, owner_entity):
        self.game = game
        self.owner_entity = owner_entity

    def on_实体创建时(self, 事件源实体, 事件源GUID):
        传送实体(self.game, 目标实体=事件源实体)
"#;
    let library = entity_library();
    let parser = GraphCodeParser::with_library(&library);
    let parsed = parser.parse_source(source, "temp_entity_w.py", "temp").expect("parse");
    let mut validator = Validator::new(Some(&library));
    validator.strict_entity_inputs = true;
    let report = validator.validate(&parsed);
    assert!(!report.issues.iter().any(|i| i.code == CODE_ENTITY_INPUT_SOURCE));
}
