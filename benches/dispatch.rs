use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;
use tabflow::prelude::*;

const HOSTS: usize = 16;
const ROWS_PER_HOST: usize = 4_096;

fn store() -> MemoryStore {
    let schema = ColumnSchema::new(vec![
        ColumnMeta::new("host", ColumnType::String),
        ColumnMeta::new("_value", ColumnType::Float),
    ]);
    let mut ds = Dataset::new(schema)
        .with_key_columns(["host"])
        .sorted_by_key(true);
    for h in 0..HOSTS {
        for i in 0..ROWS_PER_HOST {
            ds.push_row(vec![
                Value::from(format!("host-{h}")),
                Value::from((i % 100) as f64),
            ]);
        }
    }
    MemoryStore::new().with_dataset("cpu", ds)
}

fn run(engine: &Engine, plan: &PhysicalPlan) -> usize {
    let mut query = engine.execute(plan).expect("query starts");
    let results = query.take_results();
    // Sibling results share a producer; drain them side by side.
    let rows = std::thread::scope(|s| {
        let readers: Vec<_> = results
            .into_iter()
            .map(|r| s.spawn(move || r.tables().map(|t| t.num_rows()).sum::<usize>()))
            .collect();
        readers.into_iter().map(|h| h.join().expect("reader")).sum()
    });
    query.wait().expect("query succeeds");
    rows
}

fn bench_pipeline(c: &mut Criterion) {
    let engine = Engine::new(EngineConfig::default()).with_datasets(Arc::new(store()));

    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements((HOSTS * ROWS_PER_HOST) as u64));

    let scan = PhysicalPlan::new(vec![PlanNode::new(1, "from", json!({ "dataset": "cpu" }))]);
    group.bench_function("scan", |b| b.iter(|| run(&engine, &scan)));

    let filter_agg = PhysicalPlan::new(vec![
        PlanNode::new(1, "from", json!({ "dataset": "cpu" })),
        PlanNode::new(2, "filter", json!({ "expr": "_value >= 50" })).after(&[1]),
        PlanNode::new(3, "aggregate", json!({ "fn": "mean" })).after(&[2]),
    ]);
    group.bench_function("filter_mean", |b| b.iter(|| run(&engine, &filter_agg)));

    let fan_out = PhysicalPlan::new(vec![
        PlanNode::new(1, "from", json!({ "dataset": "cpu" })),
        PlanNode::new(2, "aggregate", json!({ "fn": "min" })).after(&[1]),
        PlanNode::new(3, "aggregate", json!({ "fn": "max" })).after(&[1]),
        PlanNode::new(4, "yield", json!({ "name": "min" })).after(&[2]),
        PlanNode::new(5, "yield", json!({ "name": "max" })).after(&[3]),
    ]);
    group.bench_function("multicast", |b| b.iter(|| run(&engine, &fan_out)));

    group.finish();
}

criterion_group!(benches, bench_pipeline);
criterion_main!(benches);
