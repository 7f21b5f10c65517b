//! Layout throughput over a synthetic multi-event graph.

use criterion::{criterion_group, criterion_main, Criterion};
use flowscript::graph::GraphModel;
use flowscript::layout::{LayoutOptions, LayoutService};
use flowscript::settings::Settings;

/// A graph with `event_count` event chains, one branch per chain and a data
/// node shared by all branches.
fn synthetic_model(event_count: usize) -> GraphModel {
    let mut model = GraphModel::new("bench", "bench");
    let shared = model.add_node("共享数据", "查询节点", &[], &["值"]);
    for event_index in 0..event_count {
        let event = model.add_node(
            format!("事件{event_index:03}"),
            "事件节点",
            &[],
            &["流程出"],
        );
        let branch = model.add_node("条件分支", "执行节点", &["流程入", "条件"], &["分支真", "分支假"]);
        let left = model.add_node("左步骤", "执行节点", &["流程入", "值"], &["流程出"]);
        let right = model.add_node("右步骤", "执行节点", &["流程入", "值"], &["流程出"]);
        model.add_edge(event, "流程出", branch.clone(), "流程入");
        model.add_edge(branch.clone(), "分支真", left.clone(), "流程入");
        model.add_edge(branch, "分支假", right.clone(), "流程入");
        model.add_edge(shared.clone(), "值", left, "值");
        model.add_edge(shared.clone(), "值", right, "值");
    }
    model
}

fn bench_layout(c: &mut Criterion) {
    let settings = Settings::default();
    for event_count in [4usize, 16, 64] {
        c.bench_function(&format!("compute_layout/{event_count}_events"), |b| {
            let model = synthetic_model(event_count);
            b.iter(|| {
                let mut service = LayoutService::new();
                let mut working = model.clone();
                service
                    .compute_layout(&mut working, None, &settings, LayoutOptions::default())
                    .expect("layout")
            });
        });
    }
}

criterion_group!(benches, bench_layout);
criterion_main!(benches);
