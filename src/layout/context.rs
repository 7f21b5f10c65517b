//! Layout context
//!
//! Read-only index of ports and edges built once per graph so the layout and
//! flow-tree stages query in O(1). The context never mutates the model; it
//! is stamped with the graph signature and cached by `LayoutService` in an
//! explicit table keyed by graph id (no hidden attributes on the model).

use crate::fingerprint::{graph_signature, GraphSignature};
use crate::graph::model::GraphModel;
use crate::graph::ports::is_flow_endpoint;
use std::collections::{BTreeMap, BTreeSet};

/// Port/edge index of one graph state.
#[derive(Debug, Clone)]
pub struct LayoutContext {
    pub signature: GraphSignature,
    pub virtual_pin_node_ids: BTreeSet<String>,
    pub port_index_by_node_in: BTreeMap<String, BTreeMap<String, usize>>,
    pub port_index_by_node_out: BTreeMap<String, BTreeMap<String, usize>>,
    pub flow_capable_node_ids: BTreeSet<String>,
    /// Edge ids per node, sorted by edge id for determinism.
    pub flow_out_by_node: BTreeMap<String, Vec<String>>,
    pub flow_in_by_node: BTreeMap<String, Vec<String>>,
    pub data_out_by_node: BTreeMap<String, Vec<String>>,
    pub data_in_by_node: BTreeMap<String, Vec<String>>,
    /// Node id -> (event root id, event title), filled by event propagation.
    pub event_metadata_by_node: BTreeMap<String, (String, String)>,
    pure_data_node_ids: BTreeSet<String>,
}

impl LayoutContext {
    pub fn build(model: &GraphModel) -> Self {
        let mut context = Self {
            signature: graph_signature(model),
            virtual_pin_node_ids: BTreeSet::new(),
            port_index_by_node_in: BTreeMap::new(),
            port_index_by_node_out: BTreeMap::new(),
            flow_capable_node_ids: BTreeSet::new(),
            flow_out_by_node: BTreeMap::new(),
            flow_in_by_node: BTreeMap::new(),
            data_out_by_node: BTreeMap::new(),
            data_in_by_node: BTreeMap::new(),
            event_metadata_by_node: BTreeMap::new(),
            pure_data_node_ids: BTreeSet::new(),
        };
        context.build_node_port_caches(model);
        context.build_edge_caches(model);
        context
    }

    fn build_node_port_caches(&mut self, model: &GraphModel) {
        for (node_id, node) in &model.nodes {
            if node.is_virtual_pin {
                self.virtual_pin_node_ids.insert(node_id.clone());
            }
            self.port_index_by_node_in.insert(
                node_id.clone(),
                node.inputs
                    .iter()
                    .enumerate()
                    .map(|(index, port)| (port.name.clone(), index))
                    .collect(),
            );
            self.port_index_by_node_out.insert(
                node_id.clone(),
                node.outputs
                    .iter()
                    .enumerate()
                    .map(|(index, port)| (port.name.clone(), index))
                    .collect(),
            );
            if node.has_flow_port() {
                self.flow_capable_node_ids.insert(node_id.clone());
            } else {
                self.pure_data_node_ids.insert(node_id.clone());
            }
        }
    }

    fn build_edge_caches(&mut self, model: &GraphModel) {
        // BTreeMap iteration gives edge ids in sorted order already, so the
        // per-node buckets stay deterministic.
        for (edge_id, edge) in &model.edges {
            let is_flow = is_flow_endpoint(&edge.dst_port) || is_flow_endpoint(&edge.src_port);
            if is_flow {
                self.flow_out_by_node
                    .entry(edge.src_node.clone())
                    .or_default()
                    .push(edge_id.clone());
                self.flow_in_by_node
                    .entry(edge.dst_node.clone())
                    .or_default()
                    .push(edge_id.clone());
            } else {
                self.data_out_by_node
                    .entry(edge.src_node.clone())
                    .or_default()
                    .push(edge_id.clone());
                self.data_in_by_node
                    .entry(edge.dst_node.clone())
                    .or_default()
                    .push(edge_id.clone());
            }
        }
    }

    /// True iff the node has no flow ports.
    pub fn is_pure_data_node(&self, node_id: &str) -> bool {
        self.pure_data_node_ids.contains(node_id)
    }

    pub fn out_flow_edges(&self, node_id: &str) -> &[String] {
        self.flow_out_by_node.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn in_flow_edges(&self, node_id: &str) -> &[String] {
        self.flow_in_by_node.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn out_data_edges(&self, node_id: &str) -> &[String] {
        self.data_out_by_node.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn in_data_edges(&self, node_id: &str) -> &[String] {
        self.data_in_by_node.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Input-port index with a large default for unknown ports.
    pub fn input_port_index(&self, node_id: &str, port_name: &str) -> usize {
        self.port_index_by_node_in
            .get(node_id)
            .and_then(|ports| ports.get(port_name))
            .copied()
            .unwrap_or(1_000_000)
    }

    /// Output-port index with a 999 default for unknown ports.
    pub fn output_port_index(&self, node_id: &str, port_name: &str) -> usize {
        self.port_index_by_node_out
            .get(node_id)
            .and_then(|ports| ports.get(port_name))
            .copied()
            .unwrap_or(999)
    }

    pub fn set_event_metadata(&mut self, metadata: BTreeMap<String, (String, String)>) {
        self.event_metadata_by_node = metadata;
    }

    pub fn event_metadata(&self, node_id: &str) -> Option<&(String, String)> {
        self.event_metadata_by_node.get(node_id)
    }

    /// Ordered flow successors of a node: `(out port, successor id)` pairs
    /// sorted by output-port index, then edge id.
    pub fn ordered_flow_successors(&self, model: &GraphModel, node_id: &str) -> Vec<(String, String)> {
        let mut successors: Vec<(usize, String, String, String)> = Vec::new();
        for edge_id in self.out_flow_edges(node_id) {
            let Some(edge) = model.edges.get(edge_id) else { continue };
            successors.push((
                self.output_port_index(node_id, &edge.src_port),
                edge_id.clone(),
                edge.src_port.clone(),
                edge.dst_node.clone(),
            ));
        }
        successors.sort();
        successors
            .into_iter()
            .map(|(_, _, port, dst)| (port, dst))
            .collect()
    }
}

/// One cache slot: a context valid for a specific signature.
#[derive(Debug, Clone)]
pub struct LayoutCacheEntry {
    pub context: LayoutContext,
}

/// Explicit in-memory cache table keyed by graph id.
///
/// Entries are reused only when the stored signature equals the model's
/// current signature, so any structural change invalidates them.
#[derive(Debug, Default)]
pub struct LayoutContextCache {
    entries: BTreeMap<String, LayoutCacheEntry>,
}

impl LayoutContextCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a cached context for the model or build (and store) a fresh one.
    pub fn get_or_build(&mut self, model: &GraphModel) -> LayoutContext {
        let signature = graph_signature(model);
        if let Some(entry) = self.entries.get(&model.graph_id) {
            if entry.context.signature == signature {
                return entry.context.clone();
            }
        }
        let context = LayoutContext::build(model);
        self.entries.insert(
            model.graph_id.clone(),
            LayoutCacheEntry { context: context.clone() },
        );
        context
    }

    /// Store a context built elsewhere (e.g. enriched with event metadata).
    pub fn store(&mut self, graph_id: &str, context: LayoutContext) {
        self.entries
            .insert(graph_id.to_string(), LayoutCacheEntry { context });
    }

    pub fn invalidate(&mut self, graph_id: &str) {
        self.entries.remove(graph_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
