//! End-to-end pipelines through the engine.


use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use tabflow::prelude::*;
use test_data_gen::{collect, cpu_store, engine, rows_by_key, small_config};

fn histogram_store() -> MemoryStore {
    let schema = ColumnSchema::new(vec![
        ColumnMeta::new("series", ColumnType::String),
        ColumnMeta::new("le", ColumnType::Float),
        ColumnMeta::new("_value", ColumnType::Float),
    ]);
    let a_bounds = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, f64::INFINITY];
    let a_counts = [1.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 8.0, 10.0, 10.0];
    let b_bounds = [f64::NEG_INFINITY, 0.2, 0.4, 0.6, 0.8, 1.0, f64::INFINITY];
    let b_counts = [0.0, 10.0, 15.0, 25.0, 35.0, 45.0, 45.0];

    let mut ds = Dataset::new(schema)
        .with_key_columns(["series"])
        .sorted_by_key(true);
    for (series, bounds, counts) in [("a", &a_bounds[..], &a_counts[..]), ("b", &b_bounds[..], &b_counts[..])] {
        for (le, count) in bounds.iter().zip(counts) {
            ds.push_row(vec![Value::from(series), Value::from(*le), Value::from(*count)]);
        }
    }
    MemoryStore::new().with_dataset("latency", ds)
}

#[test]
fn test_histogram_quantile_interpolation() {
    let engine = engine(histogram_store());
    let plan = PhysicalPlan::new(vec![
        PlanNode::new(1, "from", json!({ "dataset": "latency" })),
        PlanNode::new(2, "histogram_quantile", json!({ "quantile": 0.9 })).after(&[1]),
    ]);

    let mut query = engine.execute(&plan).expect("query starts");
    let results = collect(&mut query);
    query.wait().expect("query succeeds");

    let tables = &results["_result"];
    let mut by_series = BTreeMap::new();
    for (key, rows) in tables {
        assert_eq!(rows.len(), 1, "one row per series");
        let series = key.get("series").and_then(|v| v.as_str()).unwrap().to_string();
        by_series.insert(series, rows[0][1].as_f64().unwrap());
    }
    assert_eq!(by_series.len(), 2);
    assert_eq!(by_series["a"], 0.8500000000000001);
    assert_eq!(by_series["b"], 0.91);
}

#[test]
fn test_rename_then_keep() {
    let schema = ColumnSchema::new(vec![
        ColumnMeta::new("organizationID", ColumnType::String),
        ColumnMeta::new("name", ColumnType::String),
        ColumnMeta::new("id", ColumnType::String),
        ColumnMeta::new("retentionPolicy", ColumnType::String),
        ColumnMeta::new("retentionPeriod", ColumnType::Int),
    ]);
    let ds = Dataset::new(schema).with_rows(vec![
        vec![
            Value::from("org1"),
            Value::from("A"),
            Value::from("aaa"),
            Value::from(""),
            Value::from(0i64),
        ],
        vec![
            Value::from("org1"),
            Value::from("B"),
            Value::from("bbb"),
            Value::from(""),
            Value::from(0i64),
        ],
    ]);
    let engine = engine(MemoryStore::new().with_dataset("buckets", ds));
    let plan = PhysicalPlan::new(vec![
        PlanNode::new(1, "from", json!({ "dataset": "buckets" })),
        PlanNode::new(2, "rename", json!({ "columns": { "name": "value" } })).after(&[1]),
        PlanNode::new(3, "keep", json!({ "columns": ["value"] })).after(&[2]),
    ]);

    let mut query = engine.execute(&plan).unwrap();
    let mut results = query.take_results();
    assert_eq!(results.len(), 1);
    let mut tables: Vec<Table> = results.remove(0).tables().collect();
    query.wait().unwrap();

    assert_eq!(tables.len(), 1);
    let table = &mut tables[0];
    assert_eq!(table.schema().names().collect::<Vec<_>>(), vec!["value"]);
    assert!(table.key().is_empty());
    let rows = table.to_rows().unwrap();
    assert_eq!(rows, vec![vec![Value::from("A")], vec![Value::from("B")]]);
}

#[test]
fn test_filter_then_count_per_host() {
    let engine = engine(cpu_store(4, 100));
    let plan = PhysicalPlan::new(vec![
        PlanNode::new(1, "from", json!({ "dataset": "cpu" })),
        PlanNode::new(2, "filter", json!({ "expr": "_value > 4" })).after(&[1]),
        PlanNode::new(3, "aggregate", json!({ "fn": "count" })).after(&[2]),
        PlanNode::new(4, "yield", json!({ "name": "counts" })).after(&[3]),
    ]);

    let mut query = engine.execute(&plan).unwrap();
    let results = collect(&mut query);
    let stats = query.wait().unwrap();

    let counts = &results["counts"];
    assert_eq!(counts.len(), 4);
    for (key, rows) in counts {
        assert_eq!(rows.len(), 1, "{key}");
        // key column, then the aggregate
        assert_eq!(rows[0][1], Value::Int(50), "{key}");
    }
    assert_eq!(stats.tables_emitted, 4);
    assert_eq!(stats.rows_emitted, 4);
}

#[test]
fn test_sources_split_keys_into_batches_in_order() {
    let mut cfg = small_config();
    cfg.batch_rows = 10;
    let engine = Engine::new(cfg).with_datasets(Arc::new(cpu_store(1, 35)));
    let plan = PhysicalPlan::new(vec![PlanNode::new(1, "from", json!({ "dataset": "cpu" }))]);

    let mut query = engine.execute(&plan).unwrap();
    let results = collect(&mut query);
    query.wait().unwrap();

    let sizes: Vec<usize> = results["_result"].iter().map(|(_, rows)| rows.len()).collect();
    assert_eq!(sizes, vec![10, 10, 10, 5]);
    // Per-key FIFO: values come back in reader order.
    let values: Vec<f64> = results["_result"]
        .iter()
        .flat_map(|(_, rows)| rows.iter().map(|r| r[2].as_f64().unwrap()))
        .collect();
    let expected: Vec<f64> = (0..35).map(|i| (i % 10) as f64).collect();
    assert_eq!(values, expected);
}

#[test]
fn test_multicast_into_two_results() {
    let engine = engine(cpu_store(3, 20));
    let plan = PhysicalPlan::new(vec![
        PlanNode::new(1, "from", json!({ "dataset": "cpu" })),
        PlanNode::new(2, "yield", json!({ "name": "raw" })).after(&[1]),
        PlanNode::new(3, "aggregate", json!({ "fn": "sum" })).after(&[1]),
        PlanNode::new(4, "yield", json!({ "name": "sum" })).after(&[3]),
    ]);

    let mut query = engine.execute(&plan).unwrap();
    let results = collect(&mut query);
    query.wait().unwrap();

    assert_eq!(results.keys().collect::<Vec<_>>(), vec!["raw", "sum"]);
    let raw = rows_by_key(&results["raw"]);
    assert_eq!(raw.len(), 3);
    assert!(raw.values().all(|&n| n == 20));

    // 0..9 twice per host
    for (_, rows) in &results["sum"] {
        assert_eq!(rows[0][1], Value::Float(90.0));
    }
}

#[test]
fn test_union_merges_keys_before_aggregating() {
    let store = cpu_store(2, 10).with_dataset("cpu2", test_data_gen::cpu_dataset(2, 5));
    let engine = engine(store);
    let plan = PhysicalPlan::new(vec![
        PlanNode::new(1, "from", json!({ "dataset": "cpu" })),
        PlanNode::new(2, "from", json!({ "dataset": "cpu2" })),
        PlanNode::new(3, "union", json!({})).after(&[1, 2]),
        PlanNode::new(4, "aggregate", json!({ "fn": "count" })).after(&[3]),
    ]);

    let mut query = engine.execute(&plan).unwrap();
    let results = collect(&mut query);
    query.wait().unwrap();

    let counts: Vec<Value> = results["_result"].iter().map(|(_, rows)| rows[0][1].clone()).collect();
    assert_eq!(counts, vec![Value::Int(15), Value::Int(15)]);
}

#[test]
fn test_allocator_returns_to_zero_after_drain() {
    let engine = engine(cpu_store(4, 500));
    let plan = PhysicalPlan::new(vec![
        PlanNode::new(1, "from", json!({ "dataset": "cpu" })),
        PlanNode::new(2, "filter", json!({ "expr": "region == east" })).after(&[1]),
        PlanNode::new(3, "drop", json!({ "columns": ["region"] })).after(&[2]),
    ]);

    let mut query = engine.execute(&plan).unwrap();
    let results = collect(&mut query);
    let stats = query.wait().unwrap();

    assert_eq!(rows_by_key(&results["_result"]).values().sum::<usize>(), 1000);
    assert_eq!(query.allocator().used(), 0);
    assert!(stats.peak_memory_bytes > 0);
    assert_eq!(stats.peak_memory_bytes, query.allocator().peak());
}

#[test]
fn test_statistics_carry_plan_hash() {
    let engine = engine(cpu_store(1, 10));
    let plan = PhysicalPlan::new(vec![
        PlanNode::new(1, "from", json!({ "dataset": "cpu" })),
        PlanNode::new(2, "keep", json!({ "columns": ["host", "_value"] })).after(&[1]),
    ]);

    let graph = engine.build(&plan).unwrap();
    let hash = graph.plan_hash();
    let mut query = engine
        .start(QueryContext::new(), graph, Allocator::unlimited())
        .unwrap();
    let results = collect(&mut query);
    let stats = query.wait().unwrap();

    assert_eq!(stats.plan_hash, hash);
    assert_eq!(stats.query_id, query.id());
    assert_eq!(stats.rows_emitted, 10);
    assert!(stats.finished_ms >= stats.started_ms);
    assert_eq!(results["_result"][0].1[0].len(), 2);
    assert!(query.is_done());
    assert!(query.err().is_none());
}

#[test]
fn test_same_plan_same_output() {
    let engine = engine(cpu_store(5, 40));
    let plan = PhysicalPlan::new(vec![
        PlanNode::new(1, "from", json!({ "dataset": "cpu" })),
        PlanNode::new(2, "aggregate", json!({ "fn": "mean" })).after(&[1]),
    ]);

    let run = || {
        let mut query = engine.execute(&plan).unwrap();
        let mut rows: Vec<Vec<Value>> = collect(&mut query)
            .remove("_result")
            .unwrap()
            .into_iter()
            .flat_map(|(_, rows)| rows)
            .collect();
        query.wait().unwrap();
        // Cross-key order is not fixed.
        rows.sort();
        rows
    };
    assert_eq!(run(), run());
}

#[test]
fn test_results_are_handed_out_once() {
    let engine = engine(cpu_store(1, 1));
    let plan = PhysicalPlan::new(vec![PlanNode::new(1, "from", json!({ "dataset": "cpu" }))]);
    let mut query = engine.execute(&plan).unwrap();
    let first = query.take_results();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].name(), "_result");
    assert!(query.take_results().is_empty());
    drop(first);
    query.wait().unwrap();
}
