//! Layout service façade
//!
//! `compute_layout` runs the full multi-stage pipeline: event discovery,
//! flow-only block identification, global cross-block copying, per-block
//! data placement, block-tree positioning and position application. By
//! default the caller's model is cloned and never mutated; opt-outs exist
//! for in-place layout and for writing results back.

use crate::graph::model::{BasicBlock, GraphModel};
use crate::graph::ports::is_flow_port_name;
use crate::layout::apply::PositionApplicator;
use crate::layout::blocks::{
    estimate_node_height, identify_blocks_flow_only, layout_block_data_phase, YDebugInfo,
};
use crate::layout::constants::{
    BLOCK_X_SPACING_DEFAULT, BLOCK_Y_SPACING_DEFAULT, DATA_SLOT_WIDTH, DATA_STACK_GAP,
    EVENT_Y_GAP_DEFAULT, INITIAL_X_DEFAULT, INITIAL_Y_DEFAULT,
};
use crate::layout::context::{LayoutContext, LayoutContextCache};
use crate::layout::copy::{collapse_duplicate_data_copies, GlobalCopyManager};
use crate::layout::events::{find_event_roots, propagate_event_metadata};
use crate::layout::positioning::{
    analyze_block_relations, compute_column_indices, BlockPositioningEngine,
};
use crate::nodes::NodeLibrary;
use crate::settings::Settings;
use crate::LayoutError;
use std::collections::{BTreeMap, BTreeSet};

/// Options of one `compute_layout` call.
#[derive(Debug, Clone, Copy)]
pub struct LayoutOptions {
    /// Clone the model before mutating (default). With `false` the caller's
    /// model is laid out in place and temporary port renames are reverted.
    pub clone_model: bool,
    /// With `clone_model`, copy positions and blocks back to the input model.
    pub write_back_to_input_model: bool,
    /// Return the augmented working model (copies and new edges included).
    pub include_augmented_model: bool,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            clone_model: true,
            write_back_to_input_model: false,
            include_augmented_model: false,
        }
    }
}

/// Pure layout output; the input model is untouched unless opted out.
#[derive(Debug, Default)]
pub struct LayoutResult {
    pub positions: BTreeMap<String, (f64, f64)>,
    pub basic_blocks: Vec<BasicBlock>,
    pub y_debug_info: BTreeMap<String, YDebugInfo>,
    /// Working model after copies and edge rewrites, for UI diff/merge.
    /// `None` when `clone_model=false` (the caller's model is the augmented
    /// model already).
    pub augmented_model: Option<GraphModel>,
}

/// Stateful façade owning the in-memory layout-context cache.
#[derive(Default)]
pub struct LayoutService {
    context_cache: LayoutContextCache,
}

impl LayoutService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn context_cache(&self) -> &LayoutContextCache {
        &self.context_cache
    }

    pub fn compute_layout(
        &mut self,
        model: &mut GraphModel,
        node_library: Option<&NodeLibrary>,
        settings: &Settings,
        options: LayoutOptions,
    ) -> Result<LayoutResult, LayoutError> {
        if options.clone_model {
            let mut working = model.clone();
            // The rename pass stays applied on the clone; callers only ever
            // see it through the augmented model.
            promote_flow_outputs_for_layout(&mut working, node_library);
            let y_debug = self.run_pipeline(&mut working, settings)?;

            if options.write_back_to_input_model {
                write_layout_back(model, &working);
            }

            let positions = collect_positions(&working);
            let basic_blocks = working.basic_blocks.clone();
            Ok(LayoutResult {
                positions,
                basic_blocks,
                y_debug_info: y_debug,
                augmented_model: options.include_augmented_model.then_some(working),
            })
        } else {
            let rename_records = promote_flow_outputs_for_layout(model, node_library);
            let y_debug = self.run_pipeline(model, settings)?;
            revert_promoted_flow_outputs(model, &rename_records);

            let positions = collect_positions(model);
            Ok(LayoutResult {
                positions,
                basic_blocks: model.basic_blocks.clone(),
                y_debug_info: y_debug,
                augmented_model: None,
            })
        }
    }

    /// Event discovery -> blocks -> global copy -> data placement ->
    /// block-tree positioning -> position application.
    fn run_pipeline(
        &mut self,
        working: &mut GraphModel,
        settings: &Settings,
    ) -> Result<BTreeMap<String, YDebugInfo>, LayoutError> {
        let mut y_debug: BTreeMap<String, YDebugInfo> = BTreeMap::new();
        if working.nodes.is_empty() {
            working.basic_blocks.clear();
            return Ok(y_debug);
        }

        collapse_duplicate_data_copies(working);

        let mut context = self.context_cache.get_or_build(working);
        let event_roots = find_event_roots(working, true, &context);
        if event_roots.is_empty() {
            layout_pure_data_graph(working, &context);
            working.basic_blocks.clear();
            return Ok(y_debug);
        }
        propagate_event_metadata(working, &mut context, &event_roots);

        // Phase 1: flow-only block identification.
        let mut blocks = identify_blocks_flow_only(working, &context, &event_roots);

        // Global copy stage. Dependency analysis always runs so each block
        // knows its data nodes; the plan only executes when copying is on.
        let mut copy_manager = GlobalCopyManager::new(working, &context);
        copy_manager.analyze_dependencies(working, &blocks, &context);
        if settings.data_node_cross_block_copy {
            copy_manager.execute_copy_plan(working);
        }

        // The copy stage may have added nodes and edges; rebuild the index.
        let mut context = LayoutContext::build(working);
        propagate_event_metadata(working, &mut context, &event_roots);

        // Phase 2: per-block data placement.
        for block in &mut blocks {
            let block_data_nodes = copy_manager.get_block_data_nodes(&block.block_id());
            layout_block_data_phase(working, &context, block, &block_data_nodes, settings, &mut y_debug);
        }

        // Block-tree positioning, one event group at a time.
        let relations = analyze_block_relations(working, &context, &blocks);
        let mut engine = BlockPositioningEngine::new(
            &mut blocks,
            INITIAL_X_DEFAULT,
            INITIAL_Y_DEFAULT,
            BLOCK_X_SPACING_DEFAULT,
            BLOCK_Y_SPACING_DEFAULT,
            settings.layout_tight_block_packing,
        );
        let mut current_group_top_y = INITIAL_Y_DEFAULT;
        for event_root in &event_roots {
            let Some(start_block) = engine.find_start_block(event_root) else { continue };
            if engine.positioned.contains(&start_block) {
                continue;
            }
            let group = engine.collect_group_blocks(start_block, &relations);
            if group.is_empty() {
                continue;
            }
            let column_of = compute_column_indices(&group, &relations);
            let column_left_x = engine.compute_column_x_positions(&column_of);
            let group_bottom = engine.stack_blocks_in_columns(
                &column_of,
                &column_left_x,
                current_group_top_y,
                &group,
                &relations,
            );
            current_group_top_y = group_bottom + EVENT_Y_GAP_DEFAULT;
        }
        engine.place_orphan_blocks();

        // Debug info was recorded block-local; lift it to canvas space.
        for block in &blocks {
            let block_top_y = block.top_left_pos.1;
            for node_id in block.node_local_pos.keys() {
                if let Some(info) = y_debug.get_mut(node_id) {
                    info.final_y += block_top_y;
                    if let Some(base_y) = info.base_y.as_mut() {
                        *base_y += block_top_y;
                    }
                    if let Some(candidate) = info.candidates.column_bottom.as_mut() {
                        *candidate += block_top_y;
                    }
                    if let Some(candidate) = info.candidates.chain_port.as_mut() {
                        *candidate += block_top_y;
                    }
                    if let Some(candidate) = info.candidates.single_target.as_mut() {
                        *candidate += block_top_y;
                    }
                    if info.chain_port_raw > 0.0 {
                        info.chain_port_raw += block_top_y;
                    }
                }
            }
        }

        PositionApplicator::new(working, &mut blocks).apply_positions()?;
        self.context_cache.store(&working.graph_id, context);
        Ok(y_debug)
    }
}

/// Collected node positions of a laid-out model.
fn collect_positions(model: &GraphModel) -> BTreeMap<String, (f64, f64)> {
    model
        .nodes
        .iter()
        .map(|(node_id, node)| (node_id.clone(), node.pos))
        .collect()
}

/// Copy positions and blocks from the working model to the caller's model.
fn write_layout_back(target: &mut GraphModel, source: &GraphModel) {
    for (node_id, source_node) in &source.nodes {
        if let Some(target_node) = target.nodes.get_mut(node_id) {
            target_node.pos = source_node.pos;
        }
    }
    target.basic_blocks = source.basic_blocks.clone();
}

/// Lossless rename pass: outputs declared with the flow type in the library
/// but named without the flow keyword get promoted so later phases can
/// recognize flow edges by name. Returns node -> (new name -> original).
pub fn promote_flow_outputs_for_layout(
    model: &mut GraphModel,
    node_library: Option<&NodeLibrary>,
) -> BTreeMap<String, BTreeMap<String, String>> {
    let mut rename_records: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    let Some(library) = node_library else {
        return rename_records;
    };

    let node_ids: Vec<String> = model.nodes.keys().cloned().collect();
    for node_id in node_ids {
        let title = model.nodes[&node_id].title.clone();
        let Some(definition) = library.get_by_title(&title) else { continue };
        let mut renames: BTreeMap<String, String> = BTreeMap::new();
        for (port_name, type_name) in &definition.output_types {
            if type_name == "流程" && !is_flow_port_name(port_name) {
                renames.insert(format!("流程·{port_name}"), port_name.clone());
            }
        }
        if renames.is_empty() {
            continue;
        }
        if let Some(node) = model.nodes.get_mut(&node_id) {
            for (new_name, original_name) in &renames {
                if let Some(port) = node.outputs.iter_mut().find(|p| &p.name == original_name) {
                    port.name = new_name.clone();
                }
            }
        }
        for edge in model.edges.values_mut() {
            if edge.src_node != node_id {
                continue;
            }
            for (new_name, original_name) in &renames {
                if &edge.src_port == original_name {
                    edge.src_port = new_name.clone();
                }
            }
        }
        rename_records.insert(node_id, renames);
    }
    rename_records
}

/// Undo the rename pass when the layout ran in place.
pub fn revert_promoted_flow_outputs(
    model: &mut GraphModel,
    rename_records: &BTreeMap<String, BTreeMap<String, String>>,
) {
    for (node_id, renames) in rename_records {
        if let Some(node) = model.nodes.get_mut(node_id) {
            for (new_name, original_name) in renames {
                if let Some(port) = node.outputs.iter_mut().find(|p| &p.name == new_name) {
                    port.name = original_name.clone();
                }
            }
        }
        for edge in model.edges.values_mut() {
            if &edge.src_node != node_id {
                continue;
            }
            if let Some(original_name) = renames.get(&edge.src_port) {
                edge.src_port = original_name.clone();
            }
        }
    }
}

/// Pure-data graphs: each weakly-connected component is laid out
/// left-to-right by data-dependency depth, components stacked vertically.
fn layout_pure_data_graph(model: &mut GraphModel, context: &LayoutContext) {
    // Component labels via repeated neighbor merging over data edges.
    let mut component_of: BTreeMap<String, String> = model
        .nodes
        .keys()
        .map(|node_id| (node_id.clone(), node_id.clone()))
        .collect();
    let mut merged = true;
    while merged {
        merged = false;
        for edge in model.edges.values() {
            let (Some(src_label), Some(dst_label)) = (
                component_of.get(&edge.src_node).cloned(),
                component_of.get(&edge.dst_node).cloned(),
            ) else {
                continue;
            };
            let smaller = src_label.clone().min(dst_label.clone());
            if src_label != smaller {
                component_of.insert(edge.src_node.clone(), smaller.clone());
                merged = true;
            }
            if dst_label != smaller {
                component_of.insert(edge.dst_node.clone(), smaller);
                merged = true;
            }
        }
    }
    // Compress labels transitively.
    let labels: Vec<String> = component_of.keys().cloned().collect();
    for node_id in labels {
        let mut label = component_of[&node_id].clone();
        while component_of[&label] != label {
            label = component_of[&label].clone();
        }
        component_of.insert(node_id, label);
    }

    // Producer depth per node.
    let mut depth_of: BTreeMap<String, usize> = BTreeMap::new();
    let mut pending: Vec<String> = model.nodes.keys().cloned().collect();
    let mut guard = 0usize;
    while !pending.is_empty() && guard <= model.nodes.len() {
        guard += 1;
        pending.retain(|node_id| {
            let mut depth = 1usize;
            for edge_id in context.in_data_edges(node_id) {
                let Some(edge) = model.edges.get(edge_id) else { continue };
                match depth_of.get(&edge.src_node) {
                    Some(source_depth) => depth = depth.max(source_depth + 1),
                    None => return true,
                }
            }
            depth_of.insert(node_id.clone(), depth);
            false
        });
    }
    for node_id in pending {
        depth_of.insert(node_id, 1);
    }

    let components: BTreeSet<String> = component_of.values().cloned().collect();
    let mut component_top_y = INITIAL_Y_DEFAULT;
    for component_label in components {
        let members: Vec<String> = component_of
            .iter()
            .filter(|(_, label)| **label == component_label)
            .map(|(node_id, _)| node_id.clone())
            .collect();
        let max_depth = members.iter().map(|id| depth_of[id]).max().unwrap_or(1);

        let mut component_bottom = component_top_y;
        for depth in 1..=max_depth {
            let x = INITIAL_X_DEFAULT + (depth - 1) as f64 * DATA_SLOT_WIDTH;
            let mut cursor = component_top_y;
            for node_id in members.iter().filter(|id| depth_of[*id] == depth) {
                let height = estimate_node_height(model, node_id);
                if let Some(node) = model.nodes.get_mut(node_id) {
                    node.pos = (x, cursor);
                }
                cursor += height + DATA_STACK_GAP;
            }
            component_bottom = component_bottom.max(cursor);
        }
        component_top_y = component_bottom + EVENT_Y_GAP_DEFAULT;
    }
}
