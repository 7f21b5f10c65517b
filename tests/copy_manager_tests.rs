//! Cross-block data-node copying: deterministic plans, copy identity,
//! edge rewrites and idempotence over already-augmented graphs.

use flowscript::graph::GraphModel;
use flowscript::layout::context::LayoutContext;
use flowscript::layout::copy::make_deterministic_edge_id;
use flowscript::layout::events::find_event_roots;
use flowscript::layout::blocks::identify_blocks_flow_only;
use flowscript::layout::GlobalCopyManager;

/// Two events, each with an executor consuming the same data chain
/// `upstream -> shared`.
fn shared_data_model() -> (GraphModel, String, String) {
    let mut model = GraphModel::new("copy_test", "copy_test");
    let event_a = model.add_node("甲事件", "事件节点", &[], &["流程出"]);
    let event_b = model.add_node("乙事件", "事件节点", &[], &["流程出"]);
    let exec_a = model.add_node("设置甲", "执行节点", &["流程入", "值"], &["流程出"]);
    let exec_b = model.add_node("设置乙", "执行节点", &["流程入", "值"], &["流程出"]);
    let upstream = model.add_node("源数据", "查询节点", &[], &["值"]);
    let shared = model.add_node("共享数据", "查询节点", &["输入"], &["值"]);
    model.add_edge(event_a, "流程出", exec_a.clone(), "流程入");
    model.add_edge(event_b, "流程出", exec_b.clone(), "流程入");
    model.add_edge(shared.clone(), "值", exec_a, "值");
    model.add_edge(shared.clone(), "值", exec_b, "值");
    model.add_edge(upstream.clone(), "值", shared.clone(), "输入");
    (model, upstream, shared)
}

fn run_copy_stage(model: &mut GraphModel) -> GlobalCopyManager {
    let context = LayoutContext::build(model);
    let roots = find_event_roots(model, true, &context);
    let blocks = identify_blocks_flow_only(model, &context, &roots);
    let mut manager = GlobalCopyManager::new(model, &context);
    manager.analyze_dependencies(model, &blocks, &context);
    manager.execute_copy_plan(model);
    manager
}

#[test]
fn test_shared_chain_is_copied_into_second_block() {
    let (mut model, upstream, shared) = shared_data_model();
    let manager = run_copy_stage(&mut model);

    let shared_copy = format!("{shared}_copy_block_2_1");
    let upstream_copy = format!("{upstream}_copy_block_2_1");
    let copy_node = model.nodes.get(&shared_copy).expect("shared copy exists");
    assert!(copy_node.is_data_node_copy);
    assert_eq!(copy_node.original_node_id, shared);
    assert_eq!(copy_node.copy_block_id, "block_2");
    assert!(model.nodes.contains_key(&upstream_copy));

    // The copy's input edge was reproduced with the deterministic id.
    let expected_edge_id = make_deterministic_edge_id(&upstream_copy, "值", &shared_copy, "输入");
    assert!(expected_edge_id.starts_with("edge_copy_"));
    let copy_in_edge = model.edges.get(&expected_edge_id).expect("copy input edge");
    assert_eq!(copy_in_edge.src_node, upstream_copy);
    assert_eq!(copy_in_edge.dst_node, shared_copy);

    // Block queries: block 1 owns the originals, block 2 the copies.
    let block1_nodes = manager.get_block_data_nodes("block_1");
    assert!(block1_nodes.contains(&shared));
    assert!(block1_nodes.contains(&upstream));
    let block2_nodes = manager.get_block_data_nodes("block_2");
    assert!(block2_nodes.contains(&shared_copy));
    assert!(block2_nodes.contains(&upstream_copy));
    assert!(!block2_nodes.contains(&shared));
}

#[test]
fn test_edge_to_second_block_consumer_is_rewritten_in_place() {
    let (mut model, _, shared) = shared_data_model();
    let edge_ids_before: Vec<String> = model.edges.keys().cloned().collect();
    run_copy_stage(&mut model);

    let shared_copy = format!("{shared}_copy_block_2_1");
    let exec_b_id = model
        .nodes
        .values()
        .find(|n| n.title == "设置乙")
        .map(|n| n.id.clone())
        .expect("exec_b");
    let rewritten: Vec<_> = model
        .edges
        .values()
        .filter(|e| e.dst_node == exec_b_id && e.dst_port == "值")
        .collect();
    assert_eq!(rewritten.len(), 1);
    assert_eq!(rewritten[0].src_node, shared_copy);
    // The rewrite preserved the original edge id.
    assert!(edge_ids_before.contains(&rewritten[0].id));
}

#[test]
fn test_application_plan_is_deterministic() {
    let (mut model_one, _, _) = shared_data_model();
    let (mut model_two, _, _) = shared_data_model();

    let plan_one = {
        let context = LayoutContext::build(&model_one);
        let roots = find_event_roots(&model_one, true, &context);
        let blocks = identify_blocks_flow_only(&model_one, &context, &roots);
        let mut manager = GlobalCopyManager::new(&model_one, &context);
        manager.analyze_dependencies(&mut model_one, &blocks, &context);
        manager.build_application_plan(&model_one)
    };
    let plan_two = {
        let context = LayoutContext::build(&model_two);
        let roots = find_event_roots(&model_two, true, &context);
        let blocks = identify_blocks_flow_only(&model_two, &context, &roots);
        let mut manager = GlobalCopyManager::new(&model_two, &context);
        manager.analyze_dependencies(&mut model_two, &blocks, &context);
        manager.build_application_plan(&model_two)
    };

    assert_eq!(plan_one.copy_nodes, plan_two.copy_nodes);
    assert_eq!(plan_one.edge_mutations, plan_two.edge_mutations);
    assert_eq!(plan_one.new_edges, plan_two.new_edges);
}

#[test]
fn test_copy_stage_is_idempotent() {
    let (mut model, _, _) = shared_data_model();
    run_copy_stage(&mut model);
    let node_count = model.nodes.len();
    let edge_count = model.edges.len();
    let serialized = serde_json::to_string(&model.serialize()).unwrap();

    run_copy_stage(&mut model);
    assert_eq!(model.nodes.len(), node_count);
    assert_eq!(model.edges.len(), edge_count);
    assert_eq!(serde_json::to_string(&model.serialize()).unwrap(), serialized);
}

#[test]
fn test_unshared_data_stays_with_its_only_block() {
    let mut model = GraphModel::new("unshared", "unshared");
    let event = model.add_node("甲事件", "事件节点", &[], &["流程出"]);
    let exec = model.add_node("设置", "执行节点", &["流程入", "值"], &["流程出"]);
    let data = model.add_node("数据", "查询节点", &[], &["值"]);
    model.add_edge(event, "流程出", exec.clone(), "流程入");
    model.add_edge(data.clone(), "值", exec, "值");

    let manager = run_copy_stage(&mut model);
    assert!(manager.copy_plans.is_empty());
    assert_eq!(model.nodes.len(), 3);
    assert!(manager.get_block_data_nodes("block_1").contains(&data));
}
