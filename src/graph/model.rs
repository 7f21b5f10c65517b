//! Core graph data structures
//!
//! `GraphModel` owns typed nodes and edges in id-keyed BTree maps so every
//! iteration is in sorted key order. That ordering is a correctness contract
//! for the layout engine and the fingerprinting layer, not an optimization.

use crate::graph::ports::is_flow_port_name;
use crate::GraphError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Connection point on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortModel {
    pub name: String,
    pub is_input: bool,
}

impl PortModel {
    pub fn input(name: impl Into<String>) -> Self {
        Self { name: name.into(), is_input: true }
    }

    pub fn output(name: impl Into<String>) -> Self {
        Self { name: name.into(), is_input: false }
    }

    /// True when this port carries control flow rather than data.
    pub fn is_flow(&self) -> bool {
        is_flow_port_name(&self.name)
    }
}

/// A node instance inside a graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeModel {
    pub id: String,
    pub title: String,
    pub category: String,
    pub inputs: Vec<PortModel>,
    pub outputs: Vec<PortModel>,
    #[serde(default)]
    pub input_constants: BTreeMap<String, String>,
    /// Layout output; excluded from content hashes and signatures.
    #[serde(default)]
    pub pos: (f64, f64),
    /// Non-empty for composite/subgraph host nodes.
    #[serde(default)]
    pub composite_id: String,
    /// Composite-editor sentinel pins.
    #[serde(default)]
    pub is_virtual_pin: bool,
    #[serde(default)]
    pub is_virtual_pin_input: bool,
    #[serde(default)]
    pub virtual_pin_index: i64,
    /// Set by the global copy manager on cross-block data-node copies.
    #[serde(default)]
    pub is_data_node_copy: bool,
    #[serde(default)]
    pub original_node_id: String,
    #[serde(default)]
    pub copy_block_id: String,
}

impl NodeModel {
    pub fn new(id: impl Into<String>, title: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            category: category.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            input_constants: BTreeMap::new(),
            pos: (0.0, 0.0),
            composite_id: String::new(),
            is_virtual_pin: false,
            is_virtual_pin_input: false,
            virtual_pin_index: 0,
            is_data_node_copy: false,
            original_node_id: String::new(),
            copy_block_id: String::new(),
        }
    }

    pub fn input_port(&self, name: &str) -> Option<&PortModel> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output_port(&self, name: &str) -> Option<&PortModel> {
        self.outputs.iter().find(|p| p.name == name)
    }

    pub fn input_port_index(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|p| p.name == name)
    }

    pub fn output_port_index(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|p| p.name == name)
    }

    /// True when the node has at least one flow port on either side.
    pub fn has_flow_port(&self) -> bool {
        self.inputs.iter().any(PortModel::is_flow) || self.outputs.iter().any(PortModel::is_flow)
    }

    /// A pure data node carries no flow ports at all.
    pub fn is_pure_data(&self) -> bool {
        !self.has_flow_port()
    }
}

/// A directed connection between two ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeModel {
    pub id: String,
    pub src_node: String,
    pub src_port: String,
    pub dst_node: String,
    pub dst_port: String,
}

impl EdgeModel {
    pub fn new(
        id: impl Into<String>,
        src_node: impl Into<String>,
        src_port: impl Into<String>,
        dst_node: impl Into<String>,
        dst_port: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            src_node: src_node.into(),
            src_port: src_port.into(),
            dst_node: dst_node.into(),
            dst_port: dst_port.into(),
        }
    }

    /// Endpoint tuple used for semantic deduplication.
    pub fn endpoints(&self) -> (String, String, String, String) {
        (
            self.src_node.clone(),
            self.src_port.clone(),
            self.dst_node.clone(),
            self.dst_port.clone(),
        )
    }
}

/// One graph variable declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphVariableConfig {
    pub name: String,
    pub variable_type: String,
    #[serde(default)]
    pub default_value: Value,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_exposed: bool,
}

/// Layout output: flow nodes in execution order followed by attributed data nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BasicBlock {
    pub nodes: Vec<String>,
    pub color: String,
}

/// Container for a complete graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphModel {
    pub graph_id: String,
    pub graph_name: String,
    pub nodes: BTreeMap<String, NodeModel>,
    pub edges: BTreeMap<String, EdgeModel>,
    pub graph_variables: Vec<GraphVariableConfig>,
    pub metadata: BTreeMap<String, Value>,
    /// Layout output.
    #[serde(default)]
    pub basic_blocks: Vec<BasicBlock>,
    /// Monotone on structural mutation.
    #[serde(default)]
    pub graph_revision: u64,
    /// Schema version for serialization compatibility.
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    1
}

impl GraphModel {
    pub fn new(graph_id: impl Into<String>, graph_name: impl Into<String>) -> Self {
        Self {
            graph_id: graph_id.into(),
            graph_name: graph_name.into(),
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
            graph_variables: Vec::new(),
            metadata: BTreeMap::new(),
            basic_blocks: Vec::new(),
            graph_revision: 0,
            version: 1,
        }
    }

    fn touch(&mut self) {
        self.graph_revision += 1;
    }

    fn mint_node_id(&self) -> String {
        let mut sequence = self.nodes.len() + 1;
        loop {
            let candidate = format!("node_{sequence}");
            if !self.nodes.contains_key(&candidate) {
                return candidate;
            }
            sequence += 1;
        }
    }

    fn mint_edge_id(&self) -> String {
        let mut sequence = self.edges.len() + 1;
        loop {
            let candidate = format!("edge_{sequence}");
            if !self.edges.contains_key(&candidate) {
                return candidate;
            }
            sequence += 1;
        }
    }

    /// Create and insert a node with minted id; returns the id.
    pub fn add_node(
        &mut self,
        title: impl Into<String>,
        category: impl Into<String>,
        input_names: &[&str],
        output_names: &[&str],
    ) -> String {
        let id = self.mint_node_id();
        let mut node = NodeModel::new(id.clone(), title, category);
        node.inputs = input_names.iter().map(|n| PortModel::input(*n)).collect();
        node.outputs = output_names.iter().map(|n| PortModel::output(*n)).collect();
        self.nodes.insert(id.clone(), node);
        self.touch();
        id
    }

    /// Insert a fully built node, replacing any node with the same id.
    pub fn insert_node(&mut self, node: NodeModel) {
        self.nodes.insert(node.id.clone(), node);
        self.touch();
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, node_id: &str) -> Result<NodeModel, GraphError> {
        let node = self
            .nodes
            .remove(node_id)
            .ok_or_else(|| GraphError::NodeNotFound(node_id.to_string()))?;
        self.edges
            .retain(|_, edge| edge.src_node != node_id && edge.dst_node != node_id);
        self.touch();
        Ok(node)
    }

    /// Create and insert an edge with minted id; returns the id.
    pub fn add_edge(
        &mut self,
        src_node: impl Into<String>,
        src_port: impl Into<String>,
        dst_node: impl Into<String>,
        dst_port: impl Into<String>,
    ) -> String {
        let id = self.mint_edge_id();
        let edge = EdgeModel::new(id.clone(), src_node, src_port, dst_node, dst_port);
        self.edges.insert(id.clone(), edge);
        self.touch();
        id
    }

    /// Insert a fully built edge, replacing any edge with the same id.
    pub fn insert_edge(&mut self, edge: EdgeModel) {
        self.edges.insert(edge.id.clone(), edge);
        self.touch();
    }

    pub fn remove_edge(&mut self, edge_id: &str) -> Result<EdgeModel, GraphError> {
        let edge = self
            .edges
            .remove(edge_id)
            .ok_or_else(|| GraphError::EdgeNotFound(edge_id.to_string()))?;
        self.touch();
        Ok(edge)
    }

    /// Stable ordering key for nodes: title first, id as tie breaker.
    pub fn node_order_key(&self, node_id: &str) -> (String, String) {
        let title = self
            .nodes
            .get(node_id)
            .map(|node| node.title.clone())
            .unwrap_or_default();
        (title, node_id.to_string())
    }

    /// Stable serialization of the whole graph.
    ///
    /// Nodes and edges appear in id-sorted order; object keys are sorted by
    /// serde_json's default BTreeMap-backed map. `basic_blocks` is included
    /// only when a layout has produced blocks.
    pub fn serialize(&self) -> Value {
        let nodes: Vec<Value> = self.nodes.values().map(serialize_node).collect();
        let edges: Vec<Value> = self
            .edges
            .values()
            .map(|edge| {
                json!({
                    "id": edge.id,
                    "src_node": edge.src_node,
                    "src_port": edge.src_port,
                    "dst_node": edge.dst_node,
                    "dst_port": edge.dst_port,
                })
            })
            .collect();
        let variables: Vec<Value> = self
            .graph_variables
            .iter()
            .map(|var| {
                json!({
                    "name": var.name,
                    "variable_type": var.variable_type,
                    "default_value": var.default_value,
                    "description": var.description,
                    "is_exposed": var.is_exposed,
                })
            })
            .collect();

        let mut root = serde_json::Map::new();
        root.insert("graph_id".into(), json!(self.graph_id));
        root.insert("graph_name".into(), json!(self.graph_name));
        root.insert("nodes".into(), Value::Array(nodes));
        root.insert("edges".into(), Value::Array(edges));
        root.insert("graph_variables".into(), Value::Array(variables));
        root.insert("metadata".into(), json!(self.metadata));
        if !self.basic_blocks.is_empty() {
            let blocks: Vec<Value> = self
                .basic_blocks
                .iter()
                .map(|block| json!({ "nodes": block.nodes, "color": block.color }))
                .collect();
            root.insert("basic_blocks".into(), Value::Array(blocks));
        }
        Value::Object(root)
    }

    /// Rebuild a model from its stable serialization.
    pub fn from_serialized(data: &Value) -> Result<Self, GraphError> {
        let object = data
            .as_object()
            .ok_or_else(|| GraphError::Malformed("top level is not an object".into()))?;
        let graph_id = object
            .get("graph_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let graph_name = object
            .get("graph_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut model = GraphModel::new(graph_id, graph_name);

        for node_value in object.get("nodes").and_then(Value::as_array).into_iter().flatten() {
            let node = deserialize_node(node_value)?;
            model.nodes.insert(node.id.clone(), node);
        }
        for edge_value in object.get("edges").and_then(Value::as_array).into_iter().flatten() {
            let edge_object = edge_value
                .as_object()
                .ok_or_else(|| GraphError::Malformed("edge entry is not an object".into()))?;
            let field = |key: &str| -> Result<String, GraphError> {
                edge_object
                    .get(key)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| GraphError::Malformed(format!("edge missing field {key}")))
            };
            let edge = EdgeModel::new(
                field("id")?,
                field("src_node")?,
                field("src_port")?,
                field("dst_node")?,
                field("dst_port")?,
            );
            model.edges.insert(edge.id.clone(), edge);
        }
        for variable_value in object
            .get("graph_variables")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let variable: GraphVariableConfig = serde_json::from_value(variable_value.clone())
                .map_err(|err| GraphError::Malformed(format!("graph variable: {err}")))?;
            model.graph_variables.push(variable);
        }
        if let Some(metadata) = object.get("metadata").and_then(Value::as_object) {
            for (key, value) in metadata {
                model.metadata.insert(key.clone(), value.clone());
            }
        }
        for block_value in object
            .get("basic_blocks")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let block: BasicBlock = serde_json::from_value(block_value.clone())
                .map_err(|err| GraphError::Malformed(format!("basic block: {err}")))?;
            model.basic_blocks.push(block);
        }
        model.graph_revision = 0;
        Ok(model)
    }
}

fn serialize_node(node: &NodeModel) -> Value {
    let mut entry = serde_json::Map::new();
    entry.insert("id".into(), json!(node.id));
    entry.insert("title".into(), json!(node.title));
    entry.insert("category".into(), json!(node.category));
    entry.insert(
        "inputs".into(),
        json!(node.inputs.iter().map(|p| p.name.clone()).collect::<Vec<_>>()),
    );
    entry.insert(
        "outputs".into(),
        json!(node.outputs.iter().map(|p| p.name.clone()).collect::<Vec<_>>()),
    );
    entry.insert("input_constants".into(), json!(node.input_constants));
    entry.insert("pos".into(), json!([node.pos.0, node.pos.1]));
    if !node.composite_id.is_empty() {
        entry.insert("composite_id".into(), json!(node.composite_id));
    }
    if node.is_virtual_pin {
        entry.insert("is_virtual_pin".into(), json!(true));
        entry.insert("is_virtual_pin_input".into(), json!(node.is_virtual_pin_input));
        entry.insert("virtual_pin_index".into(), json!(node.virtual_pin_index));
    }
    if node.is_data_node_copy {
        entry.insert("is_data_node_copy".into(), json!(true));
        entry.insert("original_node_id".into(), json!(node.original_node_id));
        entry.insert("copy_block_id".into(), json!(node.copy_block_id));
    }
    Value::Object(entry)
}

fn deserialize_node(value: &Value) -> Result<NodeModel, GraphError> {
    let object = value
        .as_object()
        .ok_or_else(|| GraphError::Malformed("node entry is not an object".into()))?;
    let id = object
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| GraphError::Malformed("node missing id".into()))?;
    let title = object.get("title").and_then(Value::as_str).unwrap_or_default();
    let category = object.get("category").and_then(Value::as_str).unwrap_or_default();
    let mut node = NodeModel::new(id, title, category);

    let port_names = |key: &str| -> Vec<String> {
        object
            .get(key)
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    };
    node.inputs = port_names("inputs").into_iter().map(PortModel::input).collect();
    node.outputs = port_names("outputs").into_iter().map(PortModel::output).collect();

    if let Some(constants) = object.get("input_constants").and_then(Value::as_object) {
        for (port, constant) in constants {
            let text = match constant {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            node.input_constants.insert(port.clone(), text);
        }
    }
    if let Some(position) = object.get("pos").and_then(Value::as_array) {
        if position.len() == 2 {
            node.pos = (
                position[0].as_f64().unwrap_or(0.0),
                position[1].as_f64().unwrap_or(0.0),
            );
        }
    }
    if let Some(composite_id) = object.get("composite_id").and_then(Value::as_str) {
        node.composite_id = composite_id.to_string();
    }
    node.is_virtual_pin = object
        .get("is_virtual_pin")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    node.is_virtual_pin_input = object
        .get("is_virtual_pin_input")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    node.virtual_pin_index = object
        .get("virtual_pin_index")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    node.is_data_node_copy = object
        .get("is_data_node_copy")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if let Some(original) = object.get("original_node_id").and_then(Value::as_str) {
        node.original_node_id = original.to_string();
    }
    if let Some(block) = object.get("copy_block_id").and_then(Value::as_str) {
        node.copy_block_id = block.to_string();
    }
    Ok(node)
}
