use criterion::{black_box, criterion_group, criterion_main, Criterion};
use duragraph_core::execution::{ExecutionContext, GraphEngine};
use duragraph_core::graph::Graph;
use duragraph_core::run::{NewRun, Run};
use serde_json::json;

fn chain(len: usize) -> Graph {
    let mut nodes = vec![json!({"id": "start", "type": "start"})];
    let mut edges = Vec::new();
    let mut prev = "start".to_string();
    for i in 0..len {
        let id = format!("step-{i}");
        let node_type = if i % 2 == 0 { "llm" } else { "tool" };
        nodes.push(json!({"id": id, "type": node_type}));
        edges.push(json!({"source": prev, "target": id}));
        prev = id;
    }
    nodes.push(json!({"id": "end", "type": "end"}));
    edges.push(json!({"source": prev, "target": "end"}));

    Graph::from_value("bench", json!({"nodes": nodes, "edges": edges})).unwrap()
}

fn linear_graph_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let engine = GraphEngine::default();
    let graph = chain(20);

    c.bench_function("execute 20-node chain", |b| {
        b.to_async(&runtime).iter(|| async {
            let ctx = ExecutionContext::new("bench-run", "bench-thread");
            let mut input = serde_json::Map::new();
            input.insert("question".into(), json!("hello"));
            engine
                .execute(&ctx, black_box(&graph), input)
                .await
                .unwrap();
        });
    });
}

fn run_transition_benchmark(c: &mut Criterion) {
    c.bench_function("run create-start-complete", |b| {
        b.iter(|| {
            let mut run = Run::create(NewRun::new("bench-thread", "bench-assistant")).unwrap();
            run.start().unwrap();
            run.complete(serde_json::Map::new()).unwrap();
            black_box(run.take_events());
        });
    });
}

fn graph_build_benchmark(c: &mut Criterion) {
    c.bench_function("validate 50-node graph", |b| {
        b.iter(|| black_box(chain(50)));
    });
}

criterion_group!(
    benches,
    linear_graph_benchmark,
    run_transition_benchmark,
    graph_build_benchmark
);
criterion_main!(benches);
