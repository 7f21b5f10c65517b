//! Global cross-block data-node copy manager
//!
//! After phase-1 block identification, data nodes consumed by more than one
//! block are copied per block so each block owns an independent instance.
//! Two constraints shape everything here:
//!
//! - Reproducible: identical input graphs yield byte-identical plans on any
//!   machine. No random ids; copy ids follow `{canonical}_copy_{block}_{k}`
//!   and new edge ids hash the endpoint quadruple.
//! - Idempotent: running on a graph that already contains copies and
//!   redirected edges reuses them instead of growing the graph.
//!
//! Runs after flow-node identification, before data-node placement.

use crate::fingerprint::sha1_hex_prefix;
use crate::graph::model::{EdgeModel, GraphModel, NodeModel, PortModel};
use crate::graph::ports::is_flow_endpoint;
use crate::layout::blocks::LayoutBlock;
use crate::layout::constants::ORDER_MAX_FALLBACK;
use crate::layout::context::LayoutContext;
use crate::layout::positioning::{analyze_block_relations, compute_column_indices};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Marker embedded in every copy-node id.
pub const COPY_BLOCK_MARKER: &str = "_copy_block_";

// ---------------------------------------------------------------------------
// Copy identity helpers
// ---------------------------------------------------------------------------

/// Strip every `_copy_block_...` suffix, yielding the root original id.
pub fn strip_copy_suffix(node_id: &str) -> String {
    let mut result = node_id.to_string();
    while let Some(index) = result.rfind(COPY_BLOCK_MARKER) {
        result.truncate(index);
    }
    result
}

/// Infer `block_<N>` from a copy id of the form `..._copy_block_<N>_<k>`.
pub fn infer_copy_block_id_from_node_id(node_id: &str) -> String {
    let Some(index) = node_id.rfind(COPY_BLOCK_MARKER) else {
        return String::new();
    };
    let suffix = &node_id[index + COPY_BLOCK_MARKER.len()..];
    let digits: String = suffix.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        String::new()
    } else {
        format!("block_{digits}")
    }
}

/// Trailing copy counter of a copy id, or the order fallback when absent.
pub fn parse_copy_counter(node_id: &str) -> usize {
    let Some((_, suffix)) = node_id.rsplit_once("_copy_") else {
        return ORDER_MAX_FALLBACK;
    };
    for part in suffix.split('_').rev() {
        if !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()) {
            return part.parse().unwrap_or(ORDER_MAX_FALLBACK);
        }
    }
    ORDER_MAX_FALLBACK
}

/// Either the explicit flag or the id suffix marks a copy; both are
/// authoritative, tools preferring the flag fall back to suffix parsing.
pub fn is_copy_node(node: &NodeModel) -> bool {
    node.is_data_node_copy || node.id.contains(COPY_BLOCK_MARKER)
}

/// Block id a copy belongs to, from the field or the id suffix.
pub fn resolve_copy_block_id(node: &NodeModel) -> String {
    if !node.copy_block_id.is_empty() {
        return node.copy_block_id.clone();
    }
    infer_copy_block_id_from_node_id(&node.id)
}

/// Numeric block index of a copy's block id, or the fallback.
pub fn resolve_copy_block_index(node: &NodeModel) -> usize {
    parse_block_index(&resolve_copy_block_id(node))
}

/// `(block index, copy counter)` rank; smaller ranks win when propagating
/// copy positions back to originals.
pub fn compute_copy_rank(node: &NodeModel) -> (usize, usize) {
    (resolve_copy_block_index(node), parse_copy_counter(&node.id))
}

/// Parse `block_<N>`; unknown shapes get the fallback.
pub fn parse_block_index(block_id: &str) -> usize {
    block_id
        .strip_prefix("block_")
        .and_then(|suffix| suffix.parse().ok())
        .unwrap_or(ORDER_MAX_FALLBACK)
}

/// Canonical original id of any data node, copies included.
pub fn resolve_canonical_original_id(node_id: &str, model: &GraphModel) -> String {
    if let Some(node) = model.nodes.get(node_id) {
        if is_copy_node(node) {
            if !node.original_node_id.is_empty() {
                return strip_copy_suffix(&node.original_node_id);
            }
            return strip_copy_suffix(node_id);
        }
        return node_id.to_string();
    }
    strip_copy_suffix(node_id)
}

/// Deterministic edge id for copy-created edges.
pub fn make_deterministic_edge_id(src_node: &str, src_port: &str, dst_node: &str, dst_port: &str) -> String {
    let payload = format!("{src_node}|{src_port}|{dst_node}|{dst_port}");
    format!("edge_copy_{}", sha1_hex_prefix(&payload, 12))
}

/// Stable fallback when the 12-char id is taken by a different edge: same
/// key, longer prefix.
fn make_collision_fallback_edge_id(src_node: &str, src_port: &str, dst_node: &str, dst_port: &str) -> String {
    let payload = format!("{src_node}|{src_port}|{dst_node}|{dst_port}");
    format!("edge_copy_{}", sha1_hex_prefix(&payload, 20))
}

/// Deep-copy a data node into a per-block copy instance.
pub fn create_data_node_copy(
    model: &mut GraphModel,
    original_id: &str,
    block_id: &str,
    copy_counter: usize,
) -> Option<String> {
    let canonical_id = resolve_canonical_original_id(original_id, model);
    let source_id = if model.nodes.contains_key(&canonical_id) {
        canonical_id.clone()
    } else {
        original_id.to_string()
    };
    let source = model.nodes.get(&source_id)?.clone();

    let copy_id = format!("{canonical_id}{COPY_BLOCK_MARKER}{}_{copy_counter}", parse_block_index(block_id));
    let mut copy = source;
    copy.id = copy_id.clone();
    copy.is_data_node_copy = true;
    copy.original_node_id = canonical_id;
    copy.copy_block_id = block_id.to_string();
    copy.inputs = copy.inputs.iter().map(|p| PortModel::input(p.name.clone())).collect();
    copy.outputs = copy.outputs.iter().map(|p| PortModel::output(p.name.clone())).collect();
    model.insert_node(copy);
    Some(copy_id)
}

// ---------------------------------------------------------------------------
// Plans
// ---------------------------------------------------------------------------

/// Dependency information of one block.
#[derive(Debug, Clone)]
pub struct BlockDataDependency {
    pub block_id: String,
    pub block_index: usize,
    pub flow_node_ids: BTreeSet<String>,
    /// Pure-data nodes directly consumed by the block's flow nodes.
    pub direct_data_consumers: BTreeSet<String>,
    /// Canonical upstream closure of the direct consumers.
    pub full_data_closure: BTreeSet<String>,
}

/// Where one shared data node gets copied.
#[derive(Debug, Clone)]
pub struct CopyPlan {
    pub original_node_id: String,
    pub owner_block_id: String,
    pub owner_block_index: usize,
    pub copy_targets: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CopyNodeSpec {
    pub canonical_original_id: String,
    pub block_id: String,
    pub copy_node_id: String,
    pub copy_counter: usize,
}

/// In-place redirect of an existing edge; the edge id is preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeMutation {
    pub edge_id: String,
    pub new_src_node: String,
    pub new_dst_node: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEdgeSpec {
    pub edge_id: String,
    pub src_node: String,
    pub src_port: String,
    pub dst_node: String,
    pub dst_port: String,
}

/// Pure application plan: no model references, fully sorted.
#[derive(Debug, Clone, Default)]
pub struct GlobalCopyApplicationPlan {
    pub copy_nodes: Vec<CopyNodeSpec>,
    pub edge_mutations: Vec<EdgeMutation>,
    pub new_edges: Vec<NewEdgeSpec>,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

fn is_data_edge(edge: &EdgeModel) -> bool {
    !is_flow_endpoint(&edge.src_port) && !is_flow_endpoint(&edge.dst_port)
}

pub struct GlobalCopyManager {
    pub block_dependencies: BTreeMap<String, BlockDataDependency>,
    /// Canonical data node -> consuming block ids, owner first.
    pub data_node_consumers: BTreeMap<String, Vec<String>>,
    pub copy_plans: BTreeMap<String, CopyPlan>,
    /// `(canonical, block)` -> copy id, for copies reused or created.
    created_copies: BTreeMap<(String, String), String>,
    flow_to_block: BTreeMap<String, String>,
    existing_copy_by_original_and_block: BTreeMap<(String, String), String>,
    data_in_edges_by_dst: BTreeMap<String, Vec<EdgeModel>>,
    data_out_edges_by_src: BTreeMap<String, Vec<EdgeModel>>,
    /// Canonical-view dependency index, tolerant of pre-existing copies.
    logical_upstream_by_dst: BTreeMap<String, BTreeSet<String>>,
    /// Canonical incoming-edge templates used to complete copy inputs:
    /// `(src id-or-canonical, src_port, dst_port, src_is_pure_data)`.
    incoming_templates_by_dst: BTreeMap<String, BTreeSet<(String, String, String, bool)>>,
    pure_data_ids: BTreeSet<String>,
    canonical_by_id: BTreeMap<String, String>,
}

impl GlobalCopyManager {
    pub fn new(model: &GraphModel, context: &LayoutContext) -> Self {
        let mut manager = Self {
            block_dependencies: BTreeMap::new(),
            data_node_consumers: BTreeMap::new(),
            copy_plans: BTreeMap::new(),
            created_copies: BTreeMap::new(),
            flow_to_block: BTreeMap::new(),
            existing_copy_by_original_and_block: BTreeMap::new(),
            data_in_edges_by_dst: BTreeMap::new(),
            data_out_edges_by_src: BTreeMap::new(),
            logical_upstream_by_dst: BTreeMap::new(),
            incoming_templates_by_dst: BTreeMap::new(),
            pure_data_ids: BTreeSet::new(),
            canonical_by_id: BTreeMap::new(),
        };

        for (node_id, _) in model.nodes.iter() {
            if context.is_pure_data_node(node_id) {
                manager.pure_data_ids.insert(node_id.clone());
            }
            manager
                .canonical_by_id
                .insert(node_id.clone(), resolve_canonical_original_id(node_id, model));
        }

        manager.build_existing_copy_index(model);
        manager.build_data_edge_indices(model);
        manager.build_logical_dependency_views(model);
        manager
    }

    fn canonical_of(&self, node_id: &str) -> String {
        self.canonical_by_id
            .get(node_id)
            .cloned()
            .unwrap_or_else(|| strip_copy_suffix(node_id))
    }

    fn is_pure_data(&self, node_id: &str) -> bool {
        self.pure_data_ids.contains(node_id)
    }

    fn build_existing_copy_index(&mut self, model: &GraphModel) {
        for node in model.nodes.values() {
            if !is_copy_node(node) {
                continue;
            }
            let canonical = self.canonical_of(&node.id);
            if canonical.is_empty() {
                continue;
            }
            let block_id = resolve_copy_block_id(node);
            if block_id.is_empty() {
                continue;
            }
            self.existing_copy_by_original_and_block
                .entry((canonical, block_id))
                .or_insert_with(|| node.id.clone());
        }
    }

    fn build_data_edge_indices(&mut self, model: &GraphModel) {
        for edge in model.edges.values() {
            if !is_data_edge(edge) {
                continue;
            }
            self.data_in_edges_by_dst
                .entry(edge.dst_node.clone())
                .or_default()
                .push(edge.clone());
            self.data_out_edges_by_src
                .entry(edge.src_node.clone())
                .or_default()
                .push(edge.clone());
        }
        for edges in self.data_in_edges_by_dst.values_mut() {
            edges.sort_by(|a, b| a.id.cmp(&b.id));
        }
        for edges in self.data_out_edges_by_src.values_mut() {
            edges.sort_by(|a, b| a.id.cmp(&b.id));
        }
    }

    fn build_logical_dependency_views(&mut self, model: &GraphModel) {
        for edge in model.edges.values() {
            if !is_data_edge(edge) || edge.src_node.is_empty() || edge.dst_node.is_empty() {
                continue;
            }
            if !model.nodes.contains_key(&edge.dst_node) {
                continue;
            }
            if !self.is_pure_data(&edge.dst_node) {
                continue;
            }
            let dst_canonical = self.canonical_of(&edge.dst_node);
            if dst_canonical.is_empty() {
                continue;
            }

            let src_is_pure = self.is_pure_data(&edge.src_node);
            let src_template = if src_is_pure {
                self.canonical_of(&edge.src_node)
            } else {
                edge.src_node.clone()
            };
            if src_template.is_empty() {
                continue;
            }
            self.incoming_templates_by_dst
                .entry(dst_canonical.clone())
                .or_default()
                .insert((
                    src_template.clone(),
                    edge.src_port.clone(),
                    edge.dst_port.clone(),
                    src_is_pure,
                ));

            // The logical closure extends only through pure-data upstream.
            if !src_is_pure {
                continue;
            }
            self.logical_upstream_by_dst
                .entry(dst_canonical)
                .or_default()
                .insert(src_template);
        }
    }

    // -- Step 1: dependency analysis ---------------------------------------

    pub fn analyze_dependencies(
        &mut self,
        model: &GraphModel,
        layout_blocks: &[LayoutBlock],
        context: &LayoutContext,
    ) {
        self.build_flow_to_block_mapping(layout_blocks);
        self.collect_direct_consumers(layout_blocks);
        self.expand_to_full_closure();
        self.attach_unassigned_output_data_subgraphs(model, layout_blocks, context);
        self.identify_shared_nodes();
        self.generate_copy_plans();
    }

    fn build_flow_to_block_mapping(&mut self, layout_blocks: &[LayoutBlock]) {
        for block in layout_blocks {
            let block_id = block.block_id();
            for flow_id in &block.flow_nodes {
                self.flow_to_block.insert(flow_id.clone(), block_id.clone());
            }
        }
    }

    fn collect_direct_consumers(&mut self, layout_blocks: &[LayoutBlock]) {
        for block in layout_blocks {
            let block_id = block.block_id();
            let flow_ids: BTreeSet<String> = block.flow_nodes.iter().cloned().collect();
            let mut dependency = BlockDataDependency {
                block_id: block_id.clone(),
                block_index: block.order_index,
                flow_node_ids: flow_ids.clone(),
                direct_data_consumers: BTreeSet::new(),
                full_data_closure: BTreeSet::new(),
            };

            for flow_id in &flow_ids {
                for edge in self.data_in_edges_by_dst.get(flow_id).cloned().unwrap_or_default() {
                    if edge.src_node.is_empty() {
                        continue;
                    }
                    if self.is_pure_data(&edge.src_node) {
                        dependency
                            .direct_data_consumers
                            .insert(self.canonical_of(&edge.src_node));
                    }
                }
            }

            self.block_dependencies.insert(block_id, dependency);
        }
    }

    fn expand_to_full_closure(&mut self) {
        let block_ids: Vec<String> = self.block_dependencies.keys().cloned().collect();
        for block_id in block_ids {
            let seeds: Vec<String> = self.block_dependencies[&block_id]
                .direct_data_consumers
                .iter()
                .cloned()
                .collect();
            let mut visited: BTreeSet<String> = BTreeSet::new();
            let mut queue: VecDeque<String> = seeds.into_iter().collect();
            let mut closure: BTreeSet<String> = BTreeSet::new();

            while let Some(current) = queue.pop_front() {
                if current.is_empty() || !visited.insert(current.clone()) {
                    continue;
                }
                closure.insert(current.clone());
                for upstream in self
                    .logical_upstream_by_dst
                    .get(&current)
                    .cloned()
                    .unwrap_or_default()
                {
                    if !visited.contains(&upstream) {
                        queue.push_back(upstream);
                    }
                }
            }

            if let Some(dependency) = self.block_dependencies.get_mut(&block_id) {
                dependency.full_data_closure = closure;
            }
        }
    }

    /// Pure-data tail subgraphs consumed by nothing downstream (sinks) are
    /// not reachable from any flow input and would otherwise stay homeless.
    /// Attach each tail to the connected block with the largest column
    /// index, falling back to the last block.
    fn attach_unassigned_output_data_subgraphs(
        &mut self,
        model: &GraphModel,
        layout_blocks: &[LayoutBlock],
        context: &LayoutContext,
    ) {
        if self.block_dependencies.is_empty() {
            return;
        }

        let mut assigned: BTreeSet<String> = BTreeSet::new();
        let mut canonical_to_max_block_index: BTreeMap<String, usize> = BTreeMap::new();
        let mut max_block_index = 0usize;
        for dependency in self.block_dependencies.values() {
            max_block_index = max_block_index.max(dependency.block_index);
            for canonical in &dependency.full_data_closure {
                assigned.insert(canonical.clone());
                let entry = canonical_to_max_block_index.entry(canonical.clone()).or_insert(0);
                *entry = (*entry).max(dependency.block_index);
            }
        }

        // Canonical-level in/out degrees over pure-data endpoints.
        let mut outgoing: BTreeSet<String> = BTreeSet::new();
        let mut incoming: BTreeSet<String> = BTreeSet::new();
        for edge in model.edges.values() {
            if !is_data_edge(edge) || edge.src_node.is_empty() || edge.dst_node.is_empty() {
                continue;
            }
            if self.is_pure_data(&edge.src_node) {
                outgoing.insert(self.canonical_of(&edge.src_node));
            }
            if self.is_pure_data(&edge.dst_node) {
                incoming.insert(self.canonical_of(&edge.dst_node));
            }
        }

        let mut unassigned_sinks: Vec<String> = Vec::new();
        for node_id in model.nodes.keys() {
            if !self.is_pure_data(node_id) {
                continue;
            }
            let canonical = self.canonical_of(node_id);
            if canonical.is_empty() || !model.nodes.contains_key(&canonical) {
                continue;
            }
            if assigned.contains(&canonical)
                || !incoming.contains(&canonical)
                || outgoing.contains(&canonical)
            {
                continue;
            }
            if !unassigned_sinks.contains(&canonical) {
                unassigned_sinks.push(canonical);
            }
        }
        unassigned_sinks.sort();
        if unassigned_sinks.is_empty() {
            return;
        }

        // Column indices decide "rightmost"; order_index is only a stable
        // label, not a horizontal position.
        let relations = analyze_block_relations(model, context, layout_blocks);
        let all_blocks: BTreeSet<usize> = (0..layout_blocks.len()).collect();
        let column_map = compute_column_indices(&all_blocks, &relations);
        let mut block_to_column: BTreeMap<String, usize> = BTreeMap::new();
        for (block_index, column) in &column_map {
            let block_id = layout_blocks[*block_index].block_id();
            block_to_column.insert(block_id, *column);
        }

        let infer_connected_block_id = |node_instance_id: &str| -> String {
            if node_instance_id.is_empty() {
                return String::new();
            }
            if let Some(block_id) = self.flow_to_block.get(node_instance_id) {
                return block_id.clone();
            }
            let Some(node) = model.nodes.get(node_instance_id) else {
                return String::new();
            };
            if is_copy_node(node) {
                return resolve_copy_block_id(node);
            }
            if self.is_pure_data(node_instance_id) {
                let canonical = self.canonical_of(node_instance_id);
                let owner_index = canonical_to_max_block_index.get(&canonical).copied().unwrap_or(0);
                if owner_index > 0 {
                    return format!("block_{owner_index}");
                }
            }
            String::new()
        };
        let block_column = |block_id: &str| -> isize {
            if block_id.is_empty() {
                return 0;
            }
            if let Some(column) = block_to_column.get(block_id) {
                return *column as isize;
            }
            let parsed = parse_block_index(block_id);
            if parsed == ORDER_MAX_FALLBACK {
                0
            } else {
                parsed as isize
            }
        };

        // Compute all attachments first; the closures above hold shared
        // borrows, so mutation happens in a second pass.
        let mut pending_attachments: Vec<(String, BTreeSet<String>)> = Vec::new();
        for sink_canonical in unassigned_sinks {
            if assigned.contains(&sink_canonical) {
                continue;
            }

            // Collect the still-unassigned tail chain above the sink.
            let mut tail_queue: VecDeque<String> = VecDeque::new();
            tail_queue.push_back(sink_canonical.clone());
            let mut tail_visited: BTreeSet<String> = BTreeSet::new();
            let mut tail_to_attach: BTreeSet<String> = BTreeSet::new();
            while let Some(current) = tail_queue.pop_front() {
                if current.is_empty() || !tail_visited.insert(current.clone()) {
                    continue;
                }
                if assigned.contains(&current) {
                    continue;
                }
                tail_to_attach.insert(current.clone());
                for upstream in self
                    .logical_upstream_by_dst
                    .get(&current)
                    .cloned()
                    .unwrap_or_default()
                {
                    if !tail_visited.contains(&upstream) {
                        tail_queue.push_back(upstream);
                    }
                }
            }
            if tail_to_attach.is_empty() {
                continue;
            }

            // Boundary blocks on both sides of the tail; the largest column
            // wins, ties broken by the scan order over sorted ids.
            let mut best_block_id = String::new();
            let mut best_column: isize = -1;
            for tail_id in &tail_to_attach {
                for edge in self.data_in_edges_by_dst.get(tail_id).cloned().unwrap_or_default() {
                    if edge.src_node.is_empty() || tail_to_attach.contains(&edge.src_node) {
                        continue;
                    }
                    let block_id = infer_connected_block_id(&edge.src_node);
                    let column = block_column(&block_id);
                    if column > best_column {
                        best_block_id = block_id;
                        best_column = column;
                    }
                }
            }
            for tail_id in &tail_to_attach {
                for edge in self.data_out_edges_by_src.get(tail_id).cloned().unwrap_or_default() {
                    if edge.dst_node.is_empty() || tail_to_attach.contains(&edge.dst_node) {
                        continue;
                    }
                    let block_id = infer_connected_block_id(&edge.dst_node);
                    let column = block_column(&block_id);
                    if column > best_column {
                        best_block_id = block_id;
                        best_column = column;
                    }
                }
            }
            let target_block_id = if best_block_id.is_empty() {
                format!("block_{max_block_index}")
            } else {
                best_block_id
            };

            for canonical in &tail_to_attach {
                assigned.insert(canonical.clone());
            }
            pending_attachments.push((target_block_id, tail_to_attach));
        }
        for (target_block_id, tail_to_attach) in pending_attachments {
            let Some(dependency) = self.block_dependencies.get_mut(&target_block_id) else {
                continue;
            };
            for canonical in tail_to_attach {
                dependency.full_data_closure.insert(canonical);
            }
        }
    }

    // -- Step 2: shared nodes ----------------------------------------------

    fn identify_shared_nodes(&mut self) {
        for (block_id, dependency) in &self.block_dependencies {
            for data_id in &dependency.full_data_closure {
                let consumers = self.data_node_consumers.entry(data_id.clone()).or_default();
                if !consumers.contains(block_id) {
                    consumers.push(block_id.clone());
                }
            }
        }
        let indices: BTreeMap<String, usize> = self
            .block_dependencies
            .iter()
            .map(|(id, dep)| (id.clone(), dep.block_index))
            .collect();
        for consumers in self.data_node_consumers.values_mut() {
            consumers.sort_by_key(|block_id| indices.get(block_id).copied().unwrap_or(ORDER_MAX_FALLBACK));
        }
    }

    // -- Step 3: deterministic copy-id assignment --------------------------

    fn generate_copy_plans(&mut self) {
        for (data_id, block_ids) in &self.data_node_consumers {
            if block_ids.len() <= 1 {
                continue;
            }
            let owner_block_id = block_ids[0].clone();
            let owner_index = self.block_dependencies[&owner_block_id].block_index;
            let mut plan = CopyPlan {
                original_node_id: data_id.clone(),
                owner_block_id,
                owner_block_index: owner_index,
                copy_targets: BTreeMap::new(),
            };
            for block_id in &block_ids[1..] {
                let key = (data_id.clone(), block_id.clone());
                let copy_id = match self.existing_copy_by_original_and_block.get(&key) {
                    Some(existing) => existing.clone(),
                    None => format!(
                        "{data_id}{COPY_BLOCK_MARKER}{}_1",
                        parse_block_index(block_id)
                    ),
                };
                plan.copy_targets.insert(block_id.clone(), copy_id);
            }
            self.copy_plans.insert(data_id.clone(), plan);
        }
    }

    // -- Steps 4-5: plan construction and application ----------------------

    /// Execute the copy plan: build the pure plan and apply it.
    pub fn execute_copy_plan(&mut self, model: &mut GraphModel) {
        if self.copy_plans.is_empty() {
            return;
        }
        let plan = self.build_application_plan(model);
        self.apply_application_plan(model, &plan);
    }

    /// Build the pure application plan; the model is not modified.
    pub fn build_application_plan(&self, model: &GraphModel) -> GlobalCopyApplicationPlan {
        let owner_block_by_canonical: BTreeMap<String, String> = self
            .data_node_consumers
            .iter()
            .filter_map(|(canonical, blocks)| {
                blocks.first().map(|owner| (canonical.clone(), owner.clone()))
            })
            .collect();

        let mut copy_nodes: Vec<CopyNodeSpec> = Vec::new();
        for (canonical_id, plan) in &self.copy_plans {
            for (block_id, copy_id) in &plan.copy_targets {
                let parsed_counter = parse_copy_counter(copy_id);
                copy_nodes.push(CopyNodeSpec {
                    canonical_original_id: canonical_id.clone(),
                    block_id: block_id.clone(),
                    copy_node_id: copy_id.clone(),
                    copy_counter: if parsed_counter >= ORDER_MAX_FALLBACK { 1 } else { parsed_counter },
                });
            }
        }
        copy_nodes.sort();

        // Edge redirects: resolve both endpoints of every data edge to the
        // instance owned by the edge's block.
        let mut edge_mutations: Vec<EdgeMutation> = Vec::new();
        for (edge_id, edge) in &model.edges {
            if !is_data_edge(edge) || edge.src_node.is_empty() || edge.dst_node.is_empty() {
                continue;
            }
            let edge_block_id = self.resolve_edge_block_id(model, &edge.dst_node, &owner_block_by_canonical);
            if edge_block_id.is_empty() {
                continue;
            }

            let mut desired_src = edge.src_node.clone();
            if self.is_pure_data(&edge.src_node) {
                let canonical = self.canonical_of(&edge.src_node);
                desired_src =
                    self.resolve_data_instance_id_for_block(&canonical, &edge_block_id, &owner_block_by_canonical);
            }
            let mut desired_dst = edge.dst_node.clone();
            if self.is_pure_data(&edge.dst_node) {
                let canonical = self.canonical_of(&edge.dst_node);
                desired_dst =
                    self.resolve_data_instance_id_for_block(&canonical, &edge_block_id, &owner_block_by_canonical);
            }

            if desired_src != edge.src_node || desired_dst != edge.dst_node {
                edge_mutations.push(EdgeMutation {
                    edge_id: edge_id.clone(),
                    new_src_node: desired_src,
                    new_dst_node: desired_dst,
                });
            }
        }
        edge_mutations.sort_by(|a, b| a.edge_id.cmp(&b.edge_id));

        // Complete every copy's inputs from the canonical templates, with
        // sources resolved into the copy's block.
        let mut new_edges: Vec<NewEdgeSpec> = Vec::new();
        for spec in &copy_nodes {
            let templates = self
                .incoming_templates_by_dst
                .get(&spec.canonical_original_id)
                .cloned()
                .unwrap_or_default();
            for (template_src, src_port, dst_port, src_is_pure) in templates {
                let resolved_src = if src_is_pure {
                    self.resolve_data_instance_id_for_block(
                        &template_src,
                        &spec.block_id,
                        &owner_block_by_canonical,
                    )
                } else {
                    template_src
                };
                let edge_id =
                    make_deterministic_edge_id(&resolved_src, &src_port, &spec.copy_node_id, &dst_port);
                new_edges.push(NewEdgeSpec {
                    edge_id,
                    src_node: resolved_src,
                    src_port,
                    dst_node: spec.copy_node_id.clone(),
                    dst_port,
                });
            }
        }
        new_edges.sort_by(|a, b| a.edge_id.cmp(&b.edge_id));

        GlobalCopyApplicationPlan {
            copy_nodes,
            edge_mutations,
            new_edges,
        }
    }

    /// Apply the plan: create missing copies, redirect edges in place, add
    /// copy-input edges, then deduplicate.
    pub fn apply_application_plan(&mut self, model: &mut GraphModel, plan: &GlobalCopyApplicationPlan) {
        self.ensure_copy_nodes(model, &plan.copy_nodes);
        for mutation in &plan.edge_mutations {
            if let Some(edge) = model.edges.get_mut(&mutation.edge_id) {
                edge.src_node = mutation.new_src_node.clone();
                edge.dst_node = mutation.new_dst_node.clone();
            }
        }
        self.ensure_new_edges(model, &plan.new_edges);
        dedupe_edges(model);
    }

    fn ensure_copy_nodes(&mut self, model: &mut GraphModel, copy_nodes: &[CopyNodeSpec]) {
        for spec in copy_nodes {
            let key = (spec.canonical_original_id.clone(), spec.block_id.clone());
            if let Some(existing) = self.existing_copy_by_original_and_block.get(&key) {
                if model.nodes.contains_key(existing) {
                    self.created_copies.insert(key, existing.clone());
                    continue;
                }
            }
            if model.nodes.contains_key(&spec.copy_node_id) {
                self.created_copies.insert(key, spec.copy_node_id.clone());
                continue;
            }
            if !model.nodes.contains_key(&spec.canonical_original_id) {
                continue;
            }
            if let Some(copy_id) = create_data_node_copy(
                model,
                &spec.canonical_original_id,
                &spec.block_id,
                spec.copy_counter.max(1),
            ) {
                self.created_copies.insert(key, copy_id);
            }
        }
    }

    fn ensure_new_edges(&self, model: &mut GraphModel, new_edges: &[NewEdgeSpec]) {
        let mut existing_keys: BTreeSet<(String, String, String, String)> =
            model.edges.values().map(EdgeModel::endpoints).collect();

        for spec in new_edges {
            let key = (
                spec.src_node.clone(),
                spec.src_port.clone(),
                spec.dst_node.clone(),
                spec.dst_port.clone(),
            );
            if existing_keys.contains(&key) {
                continue;
            }
            let edge_id = if model.edges.contains_key(&spec.edge_id) {
                make_collision_fallback_edge_id(&spec.src_node, &spec.src_port, &spec.dst_node, &spec.dst_port)
            } else {
                spec.edge_id.clone()
            };
            model.insert_edge(EdgeModel::new(
                edge_id,
                spec.src_node.clone(),
                spec.src_port.clone(),
                spec.dst_node.clone(),
                spec.dst_port.clone(),
            ));
            existing_keys.insert(key);
        }
    }

    fn resolve_edge_block_id(
        &self,
        model: &GraphModel,
        dst_node_id: &str,
        owner_block_by_canonical: &BTreeMap<String, String>,
    ) -> String {
        if let Some(block_id) = self.flow_to_block.get(dst_node_id) {
            return block_id.clone();
        }
        let Some(dst_node) = model.nodes.get(dst_node_id) else {
            return String::new();
        };
        if is_copy_node(dst_node) {
            let block_id = resolve_copy_block_id(dst_node);
            if !block_id.is_empty() {
                return block_id;
            }
            return infer_copy_block_id_from_node_id(dst_node_id);
        }
        if self.is_pure_data(dst_node_id) {
            let canonical = self.canonical_of(dst_node_id);
            return owner_block_by_canonical.get(&canonical).cloned().unwrap_or_default();
        }
        String::new()
    }

    /// Which instance of a canonical data node a given block should use.
    fn resolve_data_instance_id_for_block(
        &self,
        canonical_original_id: &str,
        block_id: &str,
        owner_block_by_canonical: &BTreeMap<String, String>,
    ) -> String {
        if canonical_original_id.is_empty() || block_id.is_empty() {
            return canonical_original_id.to_string();
        }
        let Some(owner_block) = owner_block_by_canonical.get(canonical_original_id) else {
            return canonical_original_id.to_string();
        };
        if owner_block == block_id {
            return canonical_original_id.to_string();
        }
        let Some(plan) = self.copy_plans.get(canonical_original_id) else {
            // Not identified as shared; keep the original so later
            // validation can surface the inconsistency.
            return canonical_original_id.to_string();
        };
        plan.copy_targets
            .get(block_id)
            .cloned()
            .unwrap_or_else(|| canonical_original_id.to_string())
    }

    // -- Step 6: queries ----------------------------------------------------

    /// Copy mapping of one block: canonical original -> copy id.
    pub fn get_block_copy_mapping(&self, block_id: &str) -> BTreeMap<String, String> {
        self.created_copies
            .iter()
            .filter(|((_, bid), _)| bid == block_id)
            .map(|((original, _), copy)| (original.clone(), copy.clone()))
            .collect()
    }

    /// Originals the block retains (owner originals + unshared closure).
    pub fn get_block_owned_nodes(&self, block_id: &str) -> BTreeSet<String> {
        let mut owned: BTreeSet<String> = self
            .copy_plans
            .iter()
            .filter(|(_, plan)| plan.owner_block_id == block_id)
            .map(|(original, _)| original.clone())
            .collect();
        if let Some(dependency) = self.block_dependencies.get(block_id) {
            for data_id in &dependency.full_data_closure {
                if !self.copy_plans.contains_key(data_id) {
                    owned.insert(data_id.clone());
                }
            }
        }
        owned
    }

    /// All data-node ids the block should place: owned originals + its copies.
    pub fn get_block_data_nodes(&self, block_id: &str) -> BTreeSet<String> {
        let mut result = self.get_block_owned_nodes(block_id);
        for ((_, bid), copy_id) in &self.created_copies {
            if bid == block_id {
                result.insert(copy_id.clone());
            }
        }
        result
    }
}

/// Merge duplicate copy instances of the same `(original, block)` pair:
/// the first copy becomes canonical, edges are redirected, duplicates
/// removed, and the resulting edge set deduplicated.
pub fn collapse_duplicate_data_copies(model: &mut GraphModel) -> usize {
    let mut seen: BTreeMap<(String, String), String> = BTreeMap::new();
    let mut duplicates: Vec<(String, String)> = Vec::new();

    for node in model.nodes.values() {
        if !is_copy_node(node) {
            continue;
        }
        let original_id = resolve_canonical_original_id(&node.id, model);
        let copy_block_id = resolve_copy_block_id(node);
        if original_id.is_empty() || copy_block_id.is_empty() {
            continue;
        }
        let key = (original_id, copy_block_id);
        match seen.get(&key) {
            Some(canonical_id) => duplicates.push((node.id.clone(), canonical_id.clone())),
            None => {
                seen.insert(key, node.id.clone());
            }
        }
    }

    if duplicates.is_empty() {
        return 0;
    }

    for (duplicate_id, canonical_id) in &duplicates {
        for edge in model.edges.values_mut() {
            if &edge.src_node == duplicate_id {
                edge.src_node = canonical_id.clone();
            }
            if &edge.dst_node == duplicate_id {
                edge.dst_node = canonical_id.clone();
            }
        }
    }
    let removed = duplicates.len();
    for (duplicate_id, _) in duplicates {
        model.nodes.remove(&duplicate_id);
    }
    dedupe_edges(model);
    prune_basic_blocks(model);
    removed
}

/// Drop edges with identical endpoint quadruples, keeping the first id.
pub fn dedupe_edges(model: &mut GraphModel) {
    let mut seen: BTreeSet<(String, String, String, String)> = BTreeSet::new();
    let edge_ids: Vec<String> = model.edges.keys().cloned().collect();
    for edge_id in edge_ids {
        let key = model.edges[&edge_id].endpoints();
        if !seen.insert(key) {
            model.edges.remove(&edge_id);
        }
    }
}

/// Drop node references that no longer resolve from stored basic blocks.
pub fn prune_basic_blocks(model: &mut GraphModel) {
    if model.basic_blocks.is_empty() {
        return;
    }
    let existing: BTreeSet<String> = model.nodes.keys().cloned().collect();
    for block in &mut model.basic_blocks {
        block.nodes.retain(|node_id| existing.contains(node_id));
    }
}
