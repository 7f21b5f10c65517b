//! ASCII flow-tree rendering
//!
//! Renders a graph's event/branch structure as an indented tree for
//! diagnostics and the CLI: events, sequencing, branches, data inputs and
//! loop markers. Read-only; shares the port-ordered successor walk with the
//! layout engine.

use crate::graph::model::{GraphModel, NodeModel};
use crate::graph::ports::FLOW_OUT_PORT;
use crate::layout::context::LayoutContext;
use crate::layout::events::find_event_roots;
use std::collections::BTreeSet;

const RULE_WIDTH: usize = 80;

pub fn generate_flow_tree(model: &GraphModel) -> String {
    if model.nodes.is_empty() {
        return "空节点图".to_string();
    }

    let context = LayoutContext::build(model);
    let mut lines: Vec<String> = Vec::new();
    lines.push("=".repeat(RULE_WIDTH));
    let display_name = if model.graph_name.is_empty() { "未命名" } else { &model.graph_name };
    lines.push(format!("节点图: {display_name}"));
    lines.push("=".repeat(RULE_WIDTH));

    let event_roots = find_event_roots(model, true, &context);
    if event_roots.is_empty() {
        let has_flow_edges = !context.flow_out_by_node.is_empty();
        if !has_flow_edges {
            lines.push("\n⚠️  纯数据节点图（无流程控制）\n".to_string());
            lines.push(generate_data_tree(model, &context));
        } else {
            lines.push("\n⚠️  未发现事件或可识别的流程根\n".to_string());
        }
        return lines.join("\n");
    }

    for (index, root_id) in event_roots.iter().enumerate() {
        if index > 0 {
            lines.push(format!("\n{}\n", "-".repeat(RULE_WIDTH)));
        }
        let Some(root) = model.nodes.get(root_id) else { continue };
        lines.push(format!("\n【事件】{}", root.title));

        let output_params: Vec<&str> = root
            .outputs
            .iter()
            .filter(|port| port.name != FLOW_OUT_PORT)
            .map(|port| port.name.as_str())
            .collect();
        if !output_params.is_empty() {
            lines.push(format!("  输出: {}", output_params.join(", ")));
        }
        lines.push(String::new());

        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut expanded: BTreeSet<String> = BTreeSet::new();
        trace_flow_tree(model, &context, root_id, &mut visited, &mut expanded, "", true, &mut lines);
    }

    lines.push(format!("\n{}", "=".repeat(RULE_WIDTH)));
    lines.join("\n")
}

#[allow(clippy::too_many_arguments)]
fn trace_flow_tree(
    model: &GraphModel,
    context: &LayoutContext,
    node_id: &str,
    visited: &mut BTreeSet<String>,
    expanded: &mut BTreeSet<String>,
    prefix: &str,
    is_last: bool,
    lines: &mut Vec<String>,
) {
    let connector = if is_last { "└─" } else { "├─" };
    if visited.contains(node_id) {
        if let Some(node) = model.nodes.get(node_id) {
            lines.push(format!("{prefix}{connector}↻ 循环: {}", node.title));
        }
        return;
    }
    let Some(node) = model.nodes.get(node_id) else { return };
    visited.insert(node_id.to_string());

    lines.push(format!("{prefix}{connector}{}", node_info(node)));
    let child_prefix = format!("{prefix}{}", if is_last { "    " } else { "│   " });

    // Merge targets already printed once refer back instead of re-expanding.
    if expanded.contains(node_id) {
        lines.push(format!("{child_prefix}↻ 已展开，参考上文"));
        visited.remove(node_id);
        return;
    }

    let successors = context.ordered_flow_successors(model, node_id);
    if successors.len() == 1 {
        let (_, next_id) = &successors[0];
        trace_flow_tree(model, context, next_id, visited, expanded, &child_prefix, true, lines);
    } else if successors.len() > 1 {
        for (branch_index, (port_name, next_id)) in successors.iter().enumerate() {
            let is_last_branch = branch_index == successors.len() - 1;
            let branch_connector = if is_last_branch { "└─" } else { "├─" };
            lines.push(format!("{child_prefix}{branch_connector}[{port_name}]"));
            let branch_prefix =
                format!("{child_prefix}{}", if is_last_branch { "    " } else { "│   " });
            trace_flow_tree(model, context, next_id, visited, expanded, &branch_prefix, true, lines);
        }
    }

    let data_info = data_inputs_info(model, context, node_id);
    for info_line in data_info {
        lines.push(format!("{child_prefix}{info_line}"));
    }
    visited.remove(node_id);
    expanded.insert(node_id.to_string());
}

fn node_info(node: &NodeModel) -> String {
    let mut info = format!("【{}】", node.title);
    if node.category != "事件节点" {
        info.push_str(&format!(" ({})", node.category));
    }
    if !node.input_constants.is_empty() {
        let constants: Vec<String> = node
            .input_constants
            .iter()
            .map(|(port, value)| {
                let mut display = value.trim_matches(|c| c == '"' || c == '\'').to_string();
                if display.chars().count() > 20 {
                    display = format!("{}...", display.chars().take(17).collect::<String>());
                }
                format!("{port}={display}")
            })
            .collect();
        info.push_str(&format!(" {{{}}}", constants.join(", ")));
    }
    info
}

fn data_inputs_info(model: &GraphModel, context: &LayoutContext, node_id: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut inputs: Vec<(String, String, String)> = Vec::new();
    for edge_id in context.in_data_edges(node_id) {
        let Some(edge) = model.edges.get(edge_id) else { continue };
        let Some(src_node) = model.nodes.get(&edge.src_node) else { continue };
        inputs.push((edge.dst_port.clone(), src_node.title.clone(), edge.src_port.clone()));
    }
    if !inputs.is_empty() {
        lines.push("◈ 数据输入:".to_string());
        for (dst_port, src_title, src_port) in inputs {
            lines.push(format!("  • {dst_port} ← {src_title}.{src_port}"));
        }
    }
    lines
}

/// Pure-data graphs: list dependency layers per connected component.
fn generate_data_tree(model: &GraphModel, context: &LayoutContext) -> String {
    let mut lines = vec!["数据流层次:".to_string()];

    // Producer depth: nodes with no data inputs are layer 1.
    let mut depth_of: std::collections::BTreeMap<&str, usize> = std::collections::BTreeMap::new();
    let mut pending: Vec<&str> = model.nodes.keys().map(String::as_str).collect();
    let mut guard = 0usize;
    while !pending.is_empty() && guard <= model.nodes.len() {
        guard += 1;
        pending.retain(|node_id| {
            let mut depth = 1usize;
            for edge_id in context.in_data_edges(node_id) {
                let Some(edge) = model.edges.get(edge_id) else { continue };
                match depth_of.get(edge.src_node.as_str()) {
                    Some(source_depth) => depth = depth.max(source_depth + 1),
                    None => return true,
                }
            }
            depth_of.insert(node_id, depth);
            false
        });
    }
    for node_id in pending {
        depth_of.insert(node_id, 1);
    }

    let max_depth = depth_of.values().copied().max().unwrap_or(0);
    for layer_index in 1..=max_depth {
        let layer: Vec<&str> = depth_of
            .iter()
            .filter(|(_, depth)| **depth == layer_index)
            .map(|(id, _)| *id)
            .collect();
        if layer.is_empty() {
            continue;
        }
        lines.push(format!("\n第 {layer_index} 层:"));
        for (node_index, node_id) in layer.iter().enumerate() {
            let Some(node) = model.nodes.get(*node_id) else { continue };
            let connector = if node_index == layer.len() - 1 { "└─" } else { "├─" };
            lines.push(format!("  {connector}{}", node.title));
        }
    }
    lines.join("\n")
}
