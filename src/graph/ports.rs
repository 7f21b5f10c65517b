//! Port-name semantics
//!
//! Port names are semantically typed: a name containing the flow keyword
//! marks a control-flow port, everything else is a data port. Selection
//! ports are data-like but never participate in connections.

/// Substring that marks a control-flow port name.
pub const FLOW_KEYWORD: &str = "流程";

/// Canonical flow-input port name.
pub const FLOW_IN_PORT: &str = "流程入";

/// Canonical flow-output port name.
pub const FLOW_OUT_PORT: &str = "流程出";

/// Placeholder accepted in serialized edges for flow endpoints that need no
/// port-name validation.
pub const FLOW_PORT_PLACEHOLDER: &str = "__flow__";

/// Branch-style flow outputs that do not contain the flow keyword.
pub const FLOW_BRANCH_PORT_ALIASES: [&str; 4] = ["分支真", "分支假", "循环体", "完成"];

/// Data-like ports that select a resource by name and never accept wires.
pub const SELECTION_PORT_NAMES: [&str; 2] = ["信号名", "结构体名"];

/// True when the port name denotes control flow.
pub fn is_flow_port_name(name: &str) -> bool {
    name.contains(FLOW_KEYWORD) || FLOW_BRANCH_PORT_ALIASES.contains(&name)
}

/// True when the port name is a selection port.
pub fn is_selection_port_name(name: &str) -> bool {
    SELECTION_PORT_NAMES.contains(&name)
}

/// True when an edge endpoint name marks a flow endpoint (real name or placeholder).
pub fn is_flow_endpoint(port_name: &str) -> bool {
    port_name == FLOW_PORT_PLACEHOLDER || is_flow_port_name(port_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_port_detection() {
        assert!(is_flow_port_name("流程入"));
        assert!(is_flow_port_name("流程出"));
        assert!(is_flow_port_name("分支真"));
        assert!(!is_flow_port_name("字符串"));
        assert!(!is_flow_port_name("目标实体"));
    }

    #[test]
    fn test_selection_ports_are_not_flow() {
        for name in SELECTION_PORT_NAMES {
            assert!(is_selection_port_name(name));
            assert!(!is_flow_port_name(name));
        }
    }

    #[test]
    fn test_placeholder_is_flow_endpoint() {
        assert!(is_flow_endpoint(FLOW_PORT_PLACEHOLDER));
        assert!(is_flow_endpoint("流程出"));
        assert!(!is_flow_endpoint("数值"));
    }
}
