//! Basic-block identification and in-block placement
//!
//! Phase 1 walks flow edges from each event root and cuts the chain into
//! blocks at branches and merges, assigning a monotone `order_index` across
//! roots. Phase 2 runs after the global copy stage: it places the block's
//! attributed data nodes in dependency layers left of the flow column and
//! computes the block's local geometry.

use crate::graph::model::GraphModel;
use crate::layout::constants::{
    block_color, BLOCK_PADDING_DEFAULT, DATA_SLOT_WIDTH, DATA_STACK_GAP, FLOW_STACK_GAP,
    INPUT_PORT_TO_DATA_GAP, NODE_HEADER_HEIGHT, NODE_HEIGHT_DEFAULT, NODE_ROW_HEIGHT,
    NODE_WIDTH_DEFAULT,
};
use crate::layout::context::LayoutContext;
use crate::layout::relaxation::{DataYRelaxationEngine, RelaxationInputs};
use crate::settings::{DataLayerSort, Settings};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Internal layout block.
#[derive(Debug, Clone, Default)]
pub struct LayoutBlock {
    pub flow_nodes: Vec<String>,
    pub data_nodes: Vec<String>,
    pub width: f64,
    pub height: f64,
    pub top_left_pos: (f64, f64),
    pub node_local_pos: BTreeMap<String, (f64, f64)>,
    pub color: String,
    /// `(out port, successor)` pairs of the block's last flow node.
    pub last_node_branches: Vec<(String, String)>,
    /// Stable 1-based index assigned during identification.
    pub order_index: usize,
    pub event_root_id: Option<String>,
}

impl LayoutBlock {
    pub fn with_order(order_index: usize) -> Self {
        Self {
            order_index,
            color: block_color(order_index),
            ..Self::default()
        }
    }

    /// Canonical id (`block_<order_index>`) used by the copy manager.
    pub fn block_id(&self) -> String {
        format!("block_{}", self.order_index)
    }

    pub fn center_y(&self) -> f64 {
        self.top_left_pos.1 + self.height * 0.5
    }

    pub fn bottom_y(&self) -> f64 {
        self.top_left_pos.1 + self.height
    }

    pub fn right_x(&self) -> f64 {
        self.top_left_pos.0 + self.width
    }
}

/// Per-node Y-placement debug record.
#[derive(Debug, Clone, Default, Serialize)]
pub struct YDebugCandidates {
    pub column_bottom: Option<f64>,
    pub chain_port: Option<f64>,
    pub single_target: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct YDebugInfo {
    #[serde(rename = "type")]
    pub node_type: String,
    pub final_y: f64,
    pub base_y: Option<f64>,
    pub candidates: YDebugCandidates,
    pub was_clamped_by_column_bottom: bool,
    pub chain_port_raw: f64,
    pub chain_port_gap: f64,
    pub node_height: f64,
    pub block_id: String,
    pub event_flow_title: String,
    pub text: String,
}

/// Estimated on-canvas height of a node from its port-row count.
pub fn estimate_node_height(model: &GraphModel, node_id: &str) -> f64 {
    let Some(node) = model.nodes.get(node_id) else {
        return NODE_HEIGHT_DEFAULT;
    };
    let rows = node.inputs.len().max(node.outputs.len()).max(1);
    NODE_HEADER_HEIGHT + NODE_ROW_HEIGHT * rows as f64 + 12.0
}

/// Local Y of a port row's center within its node.
pub fn port_row_y(port_index: usize) -> f64 {
    NODE_HEADER_HEIGHT + NODE_ROW_HEIGHT * (port_index as f64 + 0.5)
}

/// Phase 1: identify flow-only blocks for the given event roots, then give
/// orphan flow nodes their own blocks. `order_index` is monotone across the
/// whole run.
pub fn identify_blocks_flow_only(
    model: &GraphModel,
    context: &LayoutContext,
    event_roots: &[String],
) -> Vec<LayoutBlock> {
    let mut blocks: Vec<LayoutBlock> = Vec::new();
    let mut visited: BTreeSet<String> = BTreeSet::new();
    let mut order_counter = 0usize;

    for root_id in event_roots {
        identify_from(
            model,
            context,
            root_id,
            Some(root_id.clone()),
            &mut visited,
            &mut order_counter,
            &mut blocks,
        );
    }

    // Orphan flow nodes unreachable from any event get their own blocks.
    let mut orphans: Vec<(String, String)> = context
        .flow_capable_node_ids
        .iter()
        .filter(|id| !visited.contains(*id))
        .map(|id| model.node_order_key(id))
        .collect();
    orphans.sort();
    for (_, orphan_id) in orphans {
        if !visited.contains(&orphan_id) {
            identify_from(
                model,
                context,
                &orphan_id,
                None,
                &mut visited,
                &mut order_counter,
                &mut blocks,
            );
        }
    }

    blocks
}

fn identify_from(
    model: &GraphModel,
    context: &LayoutContext,
    start_id: &str,
    event_root_id: Option<String>,
    visited: &mut BTreeSet<String>,
    order_counter: &mut usize,
    blocks: &mut Vec<LayoutBlock>,
) {
    let mut queue: VecDeque<String> = VecDeque::new();
    queue.push_back(start_id.to_string());

    while let Some(chain_start) = queue.pop_front() {
        if visited.contains(&chain_start) {
            continue;
        }
        *order_counter += 1;
        let mut block = LayoutBlock::with_order(*order_counter);
        block.event_root_id = event_root_id.clone();

        let mut current = chain_start;
        loop {
            visited.insert(current.clone());
            block.flow_nodes.push(current.clone());

            let successors = context.ordered_flow_successors(model, &current);
            if successors.len() == 1 {
                let (_, next) = &successors[0];
                if visited.contains(next) {
                    // Back-edge or merge into an already-identified block;
                    // the target block is not re-entered.
                    block.last_node_branches = successors;
                    break;
                }
                if context.in_flow_edges(next).len() > 1 {
                    // Merge point starts a fresh block.
                    block.last_node_branches = successors.clone();
                    queue.push_back(next.clone());
                    break;
                }
                current = next.clone();
                continue;
            }

            block.last_node_branches = successors.clone();
            for (_, next) in successors {
                if !visited.contains(&next) {
                    queue.push_back(next);
                }
            }
            break;
        }
        blocks.push(block);
    }
}

/// Phase 2: place the block's flow nodes and the attributed data nodes,
/// compute the bounding box, and record debug info when requested.
pub fn layout_block_data_phase(
    model: &GraphModel,
    context: &LayoutContext,
    block: &mut LayoutBlock,
    block_data_nodes: &BTreeSet<String>,
    settings: &Settings,
    y_debug: &mut BTreeMap<String, YDebugInfo>,
) {
    block.data_nodes = block_data_nodes
        .iter()
        .filter(|id| model.nodes.contains_key(*id))
        .cloned()
        .collect();

    let member_set: BTreeSet<String> = block
        .flow_nodes
        .iter()
        .chain(block.data_nodes.iter())
        .cloned()
        .collect();

    let depths = compute_data_depths(model, context, block, &member_set);
    let max_depth = depths.values().copied().max().unwrap_or(0);
    let flow_x = BLOCK_PADDING_DEFAULT + max_depth as f64 * DATA_SLOT_WIDTH;

    block.node_local_pos.clear();
    let mut heights: BTreeMap<String, f64> = BTreeMap::new();
    for node_id in &member_set {
        heights.insert(node_id.clone(), estimate_node_height(model, node_id));
    }

    // Flow column.
    let mut flow_cursor = BLOCK_PADDING_DEFAULT;
    for flow_id in &block.flow_nodes {
        block.node_local_pos.insert(flow_id.clone(), (flow_x, flow_cursor));
        flow_cursor += heights[flow_id] + FLOW_STACK_GAP;
    }

    // Data layers, nearest consumers first.
    let mut lower_bounds: BTreeMap<String, f64> = BTreeMap::new();
    let mut chain_port_raw: BTreeMap<String, f64> = BTreeMap::new();
    let mut clamped: BTreeMap<String, bool> = BTreeMap::new();
    let mut column_candidates: BTreeMap<String, Option<f64>> = BTreeMap::new();
    let mut columns: BTreeMap<String, i64> = BTreeMap::new();

    for depth in 1..=max_depth {
        let x = flow_x - depth as f64 * DATA_SLOT_WIDTH;
        let mut layer: Vec<String> = depths
            .iter()
            .filter(|(_, d)| **d == depth)
            .map(|(id, _)| id.clone())
            .collect();
        order_layer(model, context, &member_set, block, &mut layer, settings);

        let mut column_bottom = BLOCK_PADDING_DEFAULT;
        let mut first_in_column = true;
        for node_id in layer {
            let height = heights[&node_id];
            let (preferred, raw_port_y) =
                preferred_data_y(model, context, block, &member_set, &node_id);
            let bound = preferred.unwrap_or(BLOCK_PADDING_DEFAULT);
            let column_candidate = if first_in_column { None } else { Some(column_bottom) };
            let final_y = match column_candidate {
                Some(bottom) => bound.max(bottom),
                None => bound.max(BLOCK_PADDING_DEFAULT),
            };
            clamped.insert(
                node_id.clone(),
                column_candidate.map(|b| final_y > bound && (final_y - b).abs() < 1e-9).unwrap_or(false),
            );
            column_candidates.insert(node_id.clone(), column_candidate);
            block.node_local_pos.insert(node_id.clone(), (x, final_y));
            lower_bounds.insert(node_id.clone(), bound);
            if let Some(raw) = raw_port_y {
                chain_port_raw.insert(node_id.clone(), raw);
            }
            columns.insert(node_id.clone(), depth as i64);
            column_bottom = final_y + height + DATA_STACK_GAP;
            first_in_column = false;
        }
    }

    // Iterative refinement of data-node Y under the hard constraints.
    let relaxer = DataYRelaxationEngine::new(
        model,
        context,
        settings,
        RelaxationInputs {
            heights: heights.clone(),
            lower_bounds: lower_bounds.clone(),
            columns: columns.clone(),
        },
    );
    relaxer.relax_in_place(&mut block.node_local_pos);

    // Bounding box.
    let mut max_bottom = BLOCK_PADDING_DEFAULT;
    for (node_id, (_, y)) in &block.node_local_pos {
        max_bottom = max_bottom.max(y + heights[node_id]);
    }
    block.width = flow_x + NODE_WIDTH_DEFAULT + BLOCK_PADDING_DEFAULT;
    block.height = max_bottom + BLOCK_PADDING_DEFAULT;

    if settings.show_layout_y_debug {
        record_debug_info(
            model,
            context,
            block,
            &heights,
            &lower_bounds,
            &chain_port_raw,
            &clamped,
            &column_candidates,
            y_debug,
        );
    }
}

/// Data-dependency depth of every data node attributed to the block:
/// 1 for direct producers of flow inputs, +1 per hop leftward.
fn compute_data_depths(
    model: &GraphModel,
    context: &LayoutContext,
    block: &LayoutBlock,
    member_set: &BTreeSet<String>,
) -> BTreeMap<String, usize> {
    let flow_set: BTreeSet<&String> = block.flow_nodes.iter().collect();
    let mut memo: BTreeMap<String, usize> = BTreeMap::new();

    fn depth_of(
        node_id: &str,
        model: &GraphModel,
        context: &LayoutContext,
        member_set: &BTreeSet<String>,
        flow_set: &BTreeSet<&String>,
        memo: &mut BTreeMap<String, usize>,
        visiting: &mut BTreeSet<String>,
    ) -> usize {
        if let Some(cached) = memo.get(node_id) {
            return *cached;
        }
        if !visiting.insert(node_id.to_string()) {
            return 1;
        }
        let mut best = 1usize;
        for edge_id in context.out_data_edges(node_id) {
            let Some(edge) = model.edges.get(edge_id) else { continue };
            let consumer = &edge.dst_node;
            if !member_set.contains(consumer) {
                continue;
            }
            if flow_set.contains(consumer) {
                best = best.max(1);
            } else {
                let consumer_depth =
                    depth_of(consumer, model, context, member_set, flow_set, memo, visiting);
                best = best.max(consumer_depth + 1);
            }
        }
        visiting.remove(node_id);
        memo.insert(node_id.to_string(), best);
        best
    }

    for node_id in &block.data_nodes {
        let mut visiting = BTreeSet::new();
        depth_of(node_id, model, context, member_set, &flow_set, &mut memo, &mut visiting);
    }
    memo.retain(|id, _| block.data_nodes.contains(id));
    memo
}

/// Order a layer before placement: by primary consumer geometry, then id.
/// The experimental layer-sort modes replace the primary key.
fn order_layer(
    model: &GraphModel,
    context: &LayoutContext,
    member_set: &BTreeSet<String>,
    block: &LayoutBlock,
    layer: &mut [String],
    settings: &Settings,
) {
    let consumer_anchor = |node_id: &str| -> (i64, String) {
        for edge_id in context.out_data_edges(node_id) {
            let Some(edge) = model.edges.get(edge_id) else { continue };
            if !member_set.contains(&edge.dst_node) {
                continue;
            }
            if let Some((_, consumer_y)) = block.node_local_pos.get(&edge.dst_node) {
                let port_y = port_row_y(context.input_port_index(&edge.dst_node, &edge.dst_port));
                return (((consumer_y + port_y) * 1000.0) as i64, node_id.to_string());
            }
        }
        (i64::MAX, node_id.to_string())
    };

    match settings.layout_data_layer_sort {
        DataLayerSort::None => layer.sort_by_key(|id| consumer_anchor(id)),
        DataLayerSort::OutDegree => layer.sort_by_key(|id| {
            (std::cmp::Reverse(context.out_data_edges(id).len()), id.clone())
        }),
        DataLayerSort::InDegree => {
            layer.sort_by_key(|id| (context.in_data_edges(id).len(), id.clone()))
        }
        DataLayerSort::Hybrid => layer.sort_by_key(|id| {
            (
                std::cmp::Reverse(context.out_data_edges(id).len()),
                context.in_data_edges(id).len(),
                id.clone(),
            )
        }),
    }
}

/// Preferred top Y of a data node: align its output port with the topmost
/// in-block consumer input port. Returns `(preferred_top, raw consumer port y)`.
fn preferred_data_y(
    model: &GraphModel,
    context: &LayoutContext,
    block: &LayoutBlock,
    member_set: &BTreeSet<String>,
    node_id: &str,
) -> (Option<f64>, Option<f64>) {
    let mut best: Option<(f64, f64)> = None;
    for edge_id in context.out_data_edges(node_id) {
        let Some(edge) = model.edges.get(edge_id) else { continue };
        if !member_set.contains(&edge.dst_node) {
            continue;
        }
        let Some((_, consumer_y)) = block.node_local_pos.get(&edge.dst_node) else { continue };
        let consumer_port_y =
            consumer_y + port_row_y(context.input_port_index(&edge.dst_node, &edge.dst_port));
        let out_offset = port_row_y(context.output_port_index(node_id, &edge.src_port));
        let candidate_top = consumer_port_y - out_offset + INPUT_PORT_TO_DATA_GAP;
        if best.map(|(top, _)| candidate_top < top).unwrap_or(true) {
            best = Some((candidate_top, consumer_port_y));
        }
    }
    match best {
        Some((top, raw)) => (Some(top.max(BLOCK_PADDING_DEFAULT)), Some(raw)),
        None => (None, None),
    }
}

#[allow(clippy::too_many_arguments)]
fn record_debug_info(
    model: &GraphModel,
    context: &LayoutContext,
    block: &LayoutBlock,
    heights: &BTreeMap<String, f64>,
    lower_bounds: &BTreeMap<String, f64>,
    chain_port_raw: &BTreeMap<String, f64>,
    clamped: &BTreeMap<String, bool>,
    column_candidates: &BTreeMap<String, Option<f64>>,
    y_debug: &mut BTreeMap<String, YDebugInfo>,
) {
    let event_title = block
        .event_root_id
        .as_ref()
        .and_then(|root| model.nodes.get(root))
        .map(|node| node.title.clone())
        .unwrap_or_default();

    for (node_id, (_, final_y)) in &block.node_local_pos {
        let is_flow = block.flow_nodes.contains(node_id);
        let mut info = YDebugInfo {
            node_type: if is_flow { "flow" } else { "data" }.to_string(),
            final_y: *final_y,
            node_height: heights.get(node_id).copied().unwrap_or(0.0),
            block_id: block.block_id(),
            event_flow_title: event_title.clone(),
            ..YDebugInfo::default()
        };
        if is_flow {
            info.base_y = Some(*final_y);
            info.text = format!("Y={final_y:.1} <- flow baseline");
        } else {
            info.candidates.chain_port = lower_bounds.get(node_id).copied();
            info.candidates.column_bottom = column_candidates.get(node_id).copied().flatten();
            info.was_clamped_by_column_bottom = clamped.get(node_id).copied().unwrap_or(false);
            info.chain_port_raw = chain_port_raw.get(node_id).copied().unwrap_or(0.0);
            info.chain_port_gap = INPUT_PORT_TO_DATA_GAP;
            let clamp_note = if info.was_clamped_by_column_bottom {
                " +column-bottom clamp"
            } else {
                ""
            };
            info.text = format!("Y={final_y:.1} <- max(candidates){clamp_note}");
        }
        let _ = context;
        y_debug.insert(node_id.clone(), info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::events::find_event_roots;

    fn chain_model() -> GraphModel {
        let mut model = GraphModel::new("blocks", "blocks");
        let event = model.add_node("实体创建时", "事件节点", &[], &["流程出"]);
        let a = model.add_node("步骤甲", "执行节点", &["流程入"], &["流程出"]);
        let branch = model.add_node("条件分支", "执行节点", &["流程入", "条件"], &["分支真", "分支假"]);
        let b = model.add_node("步骤乙", "执行节点", &["流程入"], &["流程出"]);
        let c = model.add_node("步骤丙", "执行节点", &["流程入"], &["流程出"]);
        model.add_edge(event, "流程出", a.clone(), "流程入");
        model.add_edge(a.clone(), "流程出", branch.clone(), "流程入");
        model.add_edge(branch.clone(), "分支真", b, "流程入");
        model.add_edge(branch, "分支假", c, "流程入");
        model
    }

    #[test]
    fn test_branch_splits_blocks_with_monotone_order() {
        let model = chain_model();
        let context = LayoutContext::build(&model);
        let roots = find_event_roots(&model, true, &context);
        let blocks = identify_blocks_flow_only(&model, &context, &roots);

        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].order_index, 1);
        assert_eq!(blocks[0].flow_nodes.len(), 3);
        assert_eq!(blocks[0].last_node_branches.len(), 2);
        assert_eq!(blocks[1].order_index, 2);
        assert_eq!(blocks[2].order_index, 3);
    }

    #[test]
    fn test_merge_point_starts_new_block() {
        let mut model = GraphModel::new("merge", "merge");
        let event = model.add_node("实体创建时", "事件节点", &[], &["流程出"]);
        let branch = model.add_node("条件分支", "执行节点", &["流程入"], &["分支真", "分支假"]);
        let left = model.add_node("左", "执行节点", &["流程入"], &["流程出"]);
        let right = model.add_node("右", "执行节点", &["流程入"], &["流程出"]);
        let join = model.add_node("汇合", "执行节点", &["流程入"], &["流程出"]);
        model.add_edge(event, "流程出", branch.clone(), "流程入");
        model.add_edge(branch.clone(), "分支真", left.clone(), "流程入");
        model.add_edge(branch, "分支假", right.clone(), "流程入");
        model.add_edge(left, "流程出", join.clone(), "流程入");
        model.add_edge(right, "流程出", join.clone(), "流程入");

        let context = LayoutContext::build(&model);
        let roots = find_event_roots(&model, true, &context);
        let blocks = identify_blocks_flow_only(&model, &context, &roots);
        // event+branch, left, right, join
        assert_eq!(blocks.len(), 4);
        let join_block = blocks
            .iter()
            .find(|b| b.flow_nodes.contains(&join))
            .expect("join block");
        assert_eq!(join_block.flow_nodes, vec![join]);
    }

    #[test]
    fn test_flow_cycle_is_not_reentered() {
        let mut model = GraphModel::new("cycle", "cycle");
        let event = model.add_node("实体创建时", "事件节点", &[], &["流程出"]);
        let a = model.add_node("甲", "执行节点", &["流程入"], &["流程出"]);
        let b = model.add_node("乙", "执行节点", &["流程入"], &["流程出"]);
        model.add_edge(event, "流程出", a.clone(), "流程入");
        model.add_edge(a.clone(), "流程出", b.clone(), "流程入");
        model.add_edge(b, "流程出", a, "流程入");

        let context = LayoutContext::build(&model);
        let roots = find_event_roots(&model, true, &context);
        let blocks = identify_blocks_flow_only(&model, &context, &roots);
        let total_flow: usize = blocks.iter().map(|b| b.flow_nodes.len()).sum();
        assert_eq!(total_flow, 3);
    }

    #[test]
    fn test_orphan_flow_nodes_get_their_own_blocks() {
        let mut model = GraphModel::new("orphan", "orphan");
        model.add_node("孤立步骤", "执行节点", &["流程入"], &["流程出"]);
        let context = LayoutContext::build(&model);
        let blocks = identify_blocks_flow_only(&model, &context, &[]);
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].event_root_id.is_none());
    }

    #[test]
    fn test_data_phase_places_layers_left_of_flow() {
        let mut model = GraphModel::new("phase2", "phase2");
        let event = model.add_node("实体创建时", "事件节点", &[], &["流程出"]);
        let exec = model.add_node("设置变量", "执行节点", &["流程入", "值"], &["流程出"]);
        let direct = model.add_node("直接数据", "查询节点", &["输入"], &["值"]);
        let upstream = model.add_node("上游数据", "查询节点", &[], &["值"]);
        model.add_edge(event, "流程出", exec.clone(), "流程入");
        model.add_edge(direct.clone(), "值", exec, "值");
        model.add_edge(upstream.clone(), "值", direct.clone(), "输入");

        let context = LayoutContext::build(&model);
        let roots = find_event_roots(&model, true, &context);
        let mut blocks = identify_blocks_flow_only(&model, &context, &roots);
        assert_eq!(blocks.len(), 1);

        let data: BTreeSet<String> = [direct.clone(), upstream.clone()].into_iter().collect();
        let settings = Settings::default();
        let mut debug = BTreeMap::new();
        layout_block_data_phase(&model, &context, &mut blocks[0], &data, &settings, &mut debug);

        let block = &blocks[0];
        let (flow_x, _) = block.node_local_pos[block.flow_nodes.first().unwrap()];
        let (direct_x, _) = block.node_local_pos[&direct];
        let (upstream_x, _) = block.node_local_pos[&upstream];
        assert!(direct_x < flow_x);
        assert!(upstream_x < direct_x);
        assert!(block.width > 0.0 && block.height > 0.0);
    }
}
