//! Event-flow analysis
//!
//! Finds event-root nodes (plus composite virtual-pin inputs when asked) and
//! propagates `(event root id, event title)` to every downstream flow node
//! via BFS over the flow-out index. First writer wins, so nodes reachable
//! from several events keep the metadata of the earliest root.

use crate::graph::model::GraphModel;
use crate::graph::parser::EVENT_NODE_CATEGORY;
use crate::layout::context::LayoutContext;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Event-root node ids, ordered by (title, id) for stable group ordering.
pub fn find_event_roots(
    model: &GraphModel,
    include_virtual_pin_roots: bool,
    context: &LayoutContext,
) -> Vec<String> {
    let mut roots: Vec<(String, String)> = Vec::new();
    for (node_id, node) in &model.nodes {
        let is_event = node.category == EVENT_NODE_CATEGORY;
        let is_pin_root =
            include_virtual_pin_roots && node.is_virtual_pin && node.is_virtual_pin_input;
        if is_event || is_pin_root {
            roots.push((node.title.clone(), node_id.clone()));
        }
    }
    let _ = context;
    roots.sort();
    roots.into_iter().map(|(_, id)| id).collect()
}

/// Propagate `(event_id, title)` from the given roots through flow edges.
///
/// Returns the complete map and stores it on the context.
pub fn propagate_event_metadata(
    model: &GraphModel,
    context: &mut LayoutContext,
    event_roots: &[String],
) -> BTreeMap<String, (String, String)> {
    let mut metadata: BTreeMap<String, (String, String)> = BTreeMap::new();
    for root_id in event_roots {
        let title = model
            .nodes
            .get(root_id)
            .map(|node| node.title.clone())
            .unwrap_or_default();
        metadata.insert(root_id.clone(), (root_id.clone(), title));
    }

    let mut visited: BTreeSet<String> = BTreeSet::new();
    let mut queue: VecDeque<String> = event_roots.iter().cloned().collect();
    while let Some(current_id) = queue.pop_front() {
        if !visited.insert(current_id.clone()) {
            continue;
        }
        let Some((event_id, title)) = metadata.get(&current_id).cloned() else { continue };
        for edge_id in context.out_flow_edges(&current_id).to_vec() {
            let Some(edge) = model.edges.get(&edge_id) else { continue };
            let dst_id = edge.dst_node.clone();
            if dst_id.is_empty() || visited.contains(&dst_id) || metadata.contains_key(&dst_id) {
                continue;
            }
            metadata.insert(dst_id.clone(), (event_id.clone(), title.clone()));
            queue.push_back(dst_id);
        }
    }

    context.set_event_metadata(metadata.clone());
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roots_are_sorted_and_metadata_reaches_all_flow_nodes() {
        let mut model = GraphModel::new("ev", "ev");
        let event_b = model.add_node("乙事件", "事件节点", &[], &["流程出"]);
        let event_a = model.add_node("甲事件", "事件节点", &[], &["流程出"]);
        let step1 = model.add_node("步骤一", "执行节点", &["流程入"], &["流程出"]);
        let step2 = model.add_node("步骤二", "执行节点", &["流程入"], &["流程出"]);
        model.add_edge(event_a.clone(), "流程出", step1.clone(), "流程入");
        model.add_edge(step1.clone(), "流程出", step2.clone(), "流程入");

        let mut context = LayoutContext::build(&model);
        let roots = find_event_roots(&model, true, &context);
        assert_eq!(roots.len(), 2);
        // 乙事件 sorts after 甲事件 by title.
        assert_eq!(roots[0], event_a);
        assert_eq!(roots[1], event_b);

        let metadata = propagate_event_metadata(&model, &mut context, &roots);
        assert_eq!(metadata[&step1].0, event_a);
        assert_eq!(metadata[&step2].1, "甲事件");
    }

    #[test]
    fn test_first_writer_wins_on_shared_nodes() {
        let mut model = GraphModel::new("ev2", "ev2");
        let event_a = model.add_node("A事件", "事件节点", &[], &["流程出"]);
        let event_b = model.add_node("B事件", "事件节点", &[], &["流程出"]);
        let shared = model.add_node("共享", "执行节点", &["流程入"], &["流程出"]);
        model.add_edge(event_a.clone(), "流程出", shared.clone(), "流程入");
        model.add_edge(event_b, "流程出", shared.clone(), "流程入");

        let mut context = LayoutContext::build(&model);
        let roots = find_event_roots(&model, false, &context);
        let metadata = propagate_event_metadata(&model, &mut context, &roots);
        assert_eq!(metadata[&shared].0, event_a);
    }

    #[test]
    fn test_virtual_pin_roots_are_optional() {
        let mut model = GraphModel::new("ev3", "ev3");
        let pin = model.add_node("输入引脚", "引脚", &[], &["流程出"]);
        if let Some(node) = model.nodes.get_mut(&pin) {
            node.is_virtual_pin = true;
            node.is_virtual_pin_input = true;
        }
        let context = LayoutContext::build(&model);
        assert!(find_event_roots(&model, false, &context).is_empty());
        assert_eq!(find_event_roots(&model, true, &context), vec![pin]);
    }
}
