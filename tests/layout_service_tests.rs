//! End-to-end layout properties: determinism, copy idempotence over
//! augmented models, boundary behaviors and cache invalidation.

use flowscript::fingerprint::{graph_content_hash, graph_signature};
use flowscript::graph::GraphModel;
use flowscript::layout::{LayoutOptions, LayoutService};
use flowscript::settings::Settings;

fn branching_model() -> GraphModel {
    let mut model = GraphModel::new("svc", "服务测试");
    let event = model.add_node("实体创建时", "事件节点", &[], &["流程出", "事件源实体"]);
    let check = model.add_node("条件分支", "执行节点", &["流程入", "条件"], &["分支真", "分支假"]);
    let open = model.add_node("开门", "执行节点", &["流程入", "目标"], &["流程出"]);
    let close = model.add_node("关门", "执行节点", &["流程入", "目标"], &["流程出"]);
    let flag = model.add_node("获取开关状态", "查询节点", &[], &["布尔值"]);
    let target = model.add_node("获取目标实体", "查询节点", &[], &["实体"]);
    model.add_edge(event, "流程出", check.clone(), "流程入");
    model.add_edge(check.clone(), "分支真", open.clone(), "流程入");
    model.add_edge(check.clone(), "分支假", close.clone(), "流程入");
    model.add_edge(flag, "布尔值", check, "条件");
    // The target entity is consumed by both branch blocks.
    model.add_edge(target.clone(), "实体", open, "目标");
    model.add_edge(target, "实体", close, "目标");
    model
}

#[test]
fn test_layout_is_deterministic() {
    let mut model = branching_model();
    let settings = Settings::default();
    let mut service = LayoutService::new();

    let first = service
        .compute_layout(&mut model, None, &settings, LayoutOptions::default())
        .expect("layout one");
    let second = service
        .compute_layout(&mut model, None, &settings, LayoutOptions::default())
        .expect("layout two");

    assert_eq!(
        first.positions.keys().collect::<Vec<_>>(),
        second.positions.keys().collect::<Vec<_>>()
    );
    for (node_id, (x1, y1)) in &first.positions {
        let (x2, y2) = second.positions[node_id];
        assert!((x1 - x2).abs() < 1e-6, "node {node_id} x drifted");
        assert!((y1 - y2).abs() < 1e-6, "node {node_id} y drifted");
    }
    assert_eq!(first.basic_blocks, second.basic_blocks);
}

#[test]
fn test_copy_manager_is_idempotent_across_layout_runs() {
    let mut model = branching_model();
    let settings = Settings::default();
    let mut service = LayoutService::new();

    let options = LayoutOptions {
        include_augmented_model: true,
        ..LayoutOptions::default()
    };
    let first = service
        .compute_layout(&mut model, None, &settings, options)
        .expect("layout one");
    let mut augmented = first.augmented_model.expect("augmented model");
    let node_count = augmented.nodes.len();
    let edge_count = augmented.edges.len();
    assert!(node_count > model.nodes.len(), "copies were created");

    let second = service
        .compute_layout(&mut augmented, None, &settings, options)
        .expect("layout two");
    let re_augmented = second.augmented_model.expect("augmented model");
    assert_eq!(re_augmented.nodes.len(), node_count);
    assert_eq!(re_augmented.edges.len(), edge_count);
}

#[test]
fn test_copy_disabled_keeps_node_set() {
    let mut model = branching_model();
    let mut settings = Settings::default();
    settings.data_node_cross_block_copy = false;
    let mut service = LayoutService::new();
    let options = LayoutOptions {
        include_augmented_model: true,
        ..LayoutOptions::default()
    };
    let result = service
        .compute_layout(&mut model, None, &settings, options)
        .expect("layout");
    let augmented = result.augmented_model.expect("augmented");
    assert_eq!(augmented.nodes.len(), model.nodes.len());
}

#[test]
fn test_all_nodes_receive_positions_and_blocks_cover_flow_nodes() {
    let mut model = branching_model();
    let mut service = LayoutService::new();
    let result = service
        .compute_layout(&mut model, None, &Settings::default(), LayoutOptions::default())
        .expect("layout");

    for node_id in model.nodes.keys() {
        assert!(result.positions.contains_key(node_id), "missing position for {node_id}");
    }
    let block_nodes: Vec<&String> = result.basic_blocks.iter().flat_map(|b| b.nodes.iter()).collect();
    for (node_id, node) in &model.nodes {
        if node.has_flow_port() {
            assert!(block_nodes.contains(&node_id), "flow node {node_id} missing from blocks");
        }
    }
}

#[test]
fn test_flow_cycle_terminates_and_positions_all_nodes() {
    let mut model = GraphModel::new("cycle", "cycle");
    let event = model.add_node("实体创建时", "事件节点", &[], &["流程出"]);
    let a = model.add_node("甲", "执行节点", &["流程入"], &["流程出"]);
    let b = model.add_node("乙", "执行节点", &["流程入"], &["流程出"]);
    model.add_edge(event, "流程出", a.clone(), "流程入");
    model.add_edge(a.clone(), "流程出", b.clone(), "流程入");
    model.add_edge(b, "流程出", a, "流程入");

    let mut service = LayoutService::new();
    let result = service
        .compute_layout(&mut model, None, &Settings::default(), LayoutOptions::default())
        .expect("layout");
    assert_eq!(result.positions.len(), 3);
}

#[test]
fn test_y_debug_info_is_populated_only_on_request() {
    let mut model = branching_model();
    let mut service = LayoutService::new();

    let silent = service
        .compute_layout(&mut model, None, &Settings::default(), LayoutOptions::default())
        .expect("layout");
    assert!(silent.y_debug_info.is_empty());

    let mut settings = Settings::default();
    settings.show_layout_y_debug = true;
    let verbose = service
        .compute_layout(&mut model, None, &settings, LayoutOptions::default())
        .expect("layout");
    assert!(!verbose.y_debug_info.is_empty());
    let any_data = verbose.y_debug_info.values().any(|info| info.node_type == "data");
    assert!(any_data);
}

#[test]
fn test_signature_and_content_hash_invariants() {
    let mut model = branching_model();
    let content_before = graph_content_hash(&model);
    let signature_before = graph_signature(&model);

    // Moving nodes leaves the content hash and node/edge hashes unchanged.
    for node in model.nodes.values_mut() {
        node.pos = (777.0, 888.0);
    }
    assert_eq!(graph_content_hash(&model), content_before);
    let signature_moved = graph_signature(&model);
    assert_eq!(signature_before.nodes_sha1, signature_moved.nodes_sha1);
    assert_eq!(signature_before.edges_sha1, signature_moved.edges_sha1);

    // Adding a node changes the signature, so cached contexts stop matching.
    model.add_node("新增", "查询节点", &[], &["值"]);
    let signature_changed = graph_signature(&model);
    assert_ne!(signature_before.nodes_sha1, signature_changed.nodes_sha1);
}

#[test]
fn test_serialize_roundtrip_preserves_bytes() {
    let model = branching_model();
    let first = model.serialize();
    let rebuilt = GraphModel::from_serialized(&first).expect("rebuild");
    let second = rebuilt.serialize();
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}
