use criterion::{black_box, criterion_group, criterion_main, Criterion};
use duragraph_checkpoint::{state, CheckpointStore, HistoryQuery, InMemoryCheckpointStore};
use serde_json::json;

fn update_thread_state_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("update thread state", |b| {
        b.to_async(&runtime).iter(|| async {
            let store = InMemoryCheckpointStore::new();
            for i in 0..10 {
                let mut values = serde_json::Map::new();
                values.insert(format!("k{i}"), json!(i));
                state::update_thread_state(&store, "bench-thread", "", black_box(values), None)
                    .await
                    .unwrap();
            }
        });
    });
}

fn history_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryCheckpointStore::new();
    runtime.block_on(async {
        for i in 0..100 {
            let mut values = serde_json::Map::new();
            values.insert("step".to_string(), json!(i));
            state::update_thread_state(&store, "bench-thread", "", values, None)
                .await
                .unwrap();
        }
    });

    c.bench_function("checkpoint history page", |b| {
        b.to_async(&runtime).iter(|| async {
            store
                .find_history("bench-thread", "", black_box(HistoryQuery::new().with_limit(20)))
                .await
                .unwrap();
        });
    });
}

criterion_group!(benches, update_thread_state_benchmark, history_benchmark);
criterion_main!(benches);
