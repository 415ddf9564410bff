//! Errors, panics, memory exhaustion and cancellation.


use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tabflow::prelude::*;
use test_data_gen::{
    cpu_schema, cpu_store, small_config, test_registry, CallLog, EndlessStore, SharedLog,
};

fn faulty_plan(kind: &str) -> PhysicalPlan {
    PhysicalPlan::new(vec![
        PlanNode::new(1, "from", json!({ "dataset": "cpu" })),
        PlanNode::new(2, kind, json!({ "at": 3 })).after(&[1]),
        PlanNode::new(3, "record", json!({})).after(&[2]),
    ])
}

fn faulty_engine(log: &SharedLog) -> Engine {
    let mut cfg = small_config();
    cfg.batch_rows = 10;
    Engine::new(cfg)
        .with_registry(test_registry(Arc::clone(log)))
        .with_datasets(Arc::new(cpu_store(4, 50)))
}

/// Every key the recorder saw a table for was finished exactly once.
fn assert_finished_once(log: &CallLog) {
    let mut finishes: BTreeMap<String, usize> = BTreeMap::new();
    for (key, _) in &log.finished {
        *finishes.entry(key.to_string()).or_default() += 1;
    }
    for key in &log.processed {
        assert_eq!(finishes.get(&key.to_string()), Some(&1), "key {key}");
    }
    assert!(finishes.values().all(|&n| n == 1), "{finishes:?}");
}

#[test]
fn test_operator_error_is_terminal() {
    let log = SharedLog::default();
    let engine = faulty_engine(&log);
    let mut query = engine.execute(&faulty_plan("fail")).unwrap();
    let results = query.take_results();

    let err = query.wait().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Operator);
    assert!(!err.is_internal());
    assert!(err.to_string().contains("boom at table 3"), "{err}");
    assert_eq!(query.err().map(|e| e.to_string()), Some(err.to_string()));

    // The stream stops instead of yielding partial output after a failure.
    for result in results {
        assert_eq!(result.tables().count(), 0);
    }

    let log = log.lock().unwrap();
    assert_finished_once(&log);
    // Keys still open when the query failed carry the error downstream.
    assert!(log.finished.iter().all(|(_, failed)| *failed));
    assert_eq!(log.closed, 0);
    assert_eq!(query.allocator().used(), 0);
}

#[test]
fn test_panic_becomes_internal_error() {
    let log = SharedLog::default();
    let engine = faulty_engine(&log);
    let query = engine.execute(&faulty_plan("panic")).unwrap();

    let err = query.wait().unwrap_err();
    assert!(err.is_internal(), "{err:?}");
    // Recovered panics surface as operator failures.
    assert_eq!(err.kind(), ErrorKind::Operator);
    assert!(err.to_string().contains("panicked"), "{err}");
    assert_finished_once(&log.lock().unwrap());
}

#[test]
fn test_finish_delivered_once_per_key_on_success() {
    let log = Arc::new(Mutex::new(CallLog::default()));
    let engine = faulty_engine(&log);
    let plan = PhysicalPlan::new(vec![
        PlanNode::new(1, "from", json!({ "dataset": "cpu" })),
        PlanNode::new(2, "record", json!({})).after(&[1]),
    ]);
    let mut query = engine.execute(&plan).unwrap();
    let rows: usize = query
        .take_results()
        .into_iter()
        .flat_map(|r| r.tables())
        .map(|t| t.num_rows())
        .sum();
    query.wait().unwrap();

    assert_eq!(rows, 200);
    let log = log.lock().unwrap();
    assert_eq!(log.processed.len(), 20);
    assert_eq!(log.finished.len(), 4);
    assert!(log.finished.iter().all(|(_, failed)| !failed));
    assert_finished_once(&log);
    assert_eq!(log.closed, 1);
}

#[test]
fn test_memory_limit_exhaustion() {
    let cfg = small_config().with_mem_limit(16 * 1024);
    let engine = Engine::new(cfg).with_datasets(Arc::new(cpu_store(8, 2_000)));
    let plan = PhysicalPlan::new(vec![PlanNode::new(1, "from", json!({ "dataset": "cpu" }))]);

    let mut query = engine.execute(&plan).unwrap();
    let err = query.wait().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted, "{err}");
    assert!(query.allocator().peak() <= 16 * 1024);

    // Buffers still queued for the caller are released with the stream.
    drop(query.take_results());
    assert_eq!(query.allocator().used(), 0);
}

#[test]
fn test_slow_reader_stays_within_memory_limit() {
    let mut cfg = small_config().with_mem_limit(64 * 1024);
    cfg.batch_rows = 50;
    let engine = Engine::new(cfg).with_datasets(Arc::new(cpu_store(4, 2_000)));
    let plan = PhysicalPlan::new(vec![PlanNode::new(1, "from", json!({ "dataset": "cpu" }))]);

    let mut query = engine.execute(&plan).unwrap();
    let (mut tables, mut rows) = (0, 0);
    for mut table in query.take_results().remove(0).tables() {
        rows += table.to_rows().unwrap().len();
        tables += 1;
        std::thread::sleep(Duration::from_millis(2));
    }
    let stats = query.wait().unwrap();

    // The whole output is ~600 KiB; the source waits for the reader instead.
    assert_eq!(tables, 160);
    assert_eq!(rows, 8_000);
    assert!(stats.peak_memory_bytes <= 64 * 1024);
    assert_eq!(query.allocator().used(), 0);
}

#[test]
fn test_full_inbox_holds_back_the_source() {
    let mut cfg = small_config().with_queue_capacity(1);
    cfg.batch_rows = 10;
    let engine = Engine::new(cfg)
        .with_registry(test_registry(SharedLog::default()))
        .with_datasets(Arc::new(cpu_store(2, 1_000)));
    let plan = PhysicalPlan::new(vec![
        PlanNode::new(1, "from", json!({ "dataset": "cpu" })),
        PlanNode::new(2, "slow", json!({ "ms": 2 })).after(&[1]),
    ]);

    // Bytes charged for one ten-row source table.
    let table_bytes = {
        let alloc = Allocator::unlimited();
        let key = GroupKey::new(vec![(
            ColumnMeta::new("host", ColumnType::String),
            Value::from("host-0"),
        )])
        .unwrap();
        let rows: Vec<Vec<Value>> = (0..10)
            .map(|i| vec![Value::from("host-0"), Value::from("east"), Value::from(i as f64)])
            .collect();
        let _table = TableBuilder::from_rows(key, &cpu_schema(), rows, &alloc).unwrap();
        alloc.used()
    };

    let mut query = engine.execute(&plan).unwrap();
    let tables = query.take_results().remove(0).tables().count();
    let stats = query.wait().unwrap();

    assert_eq!(tables, 200);
    // A handful of tables in flight between source and reader, not 200.
    assert!(
        stats.peak_memory_bytes <= 16 * table_bytes,
        "peak {} with {table_bytes} bytes per table",
        stats.peak_memory_bytes
    );
}

#[test]
fn test_table_after_finish_is_internal_fault() {
    let log = SharedLog::default();
    let engine = faulty_engine(&log);
    let plan = PhysicalPlan::new(vec![
        PlanNode::new(1, "from", json!({ "dataset": "cpu" })),
        PlanNode::new(2, "late", json!({})).after(&[1]),
    ]);
    let mut query = engine.execute(&plan).unwrap();
    drop(query.take_results());

    let err = query.wait().unwrap_err();
    assert!(err.is_internal(), "{err:?}");
    assert!(err.to_string().contains("while Closed"), "{err}");
    assert_eq!(query.allocator().used(), 0);
}

#[test]
fn test_second_finish_is_internal_fault() {
    let log = SharedLog::default();
    let engine = faulty_engine(&log);
    let plan = PhysicalPlan::new(vec![
        PlanNode::new(1, "from", json!({ "dataset": "cpu" })),
        PlanNode::new(2, "late", json!({ "twice": true })).after(&[1]),
    ]);
    let mut query = engine.execute(&plan).unwrap();
    drop(query.take_results());

    let err = query.wait().unwrap_err();
    assert!(err.is_internal(), "{err:?}");
    assert!(err.to_string().contains("second finish"), "{err}");
    assert_eq!(query.allocator().used(), 0);
}

#[test]
fn test_cancel_token_stops_endless_query() {
    let engine = Engine::new(small_config()).with_datasets(Arc::new(EndlessStore));
    let plan = PhysicalPlan::new(vec![PlanNode::new(1, "from", json!({ "dataset": "metrics" }))]);
    let token = CancelToken::new();
    let ctx = QueryContext::new().with_cancel_token(token.clone());

    let graph = engine.build(&plan).unwrap();
    let mut query = engine.start(ctx, graph, Allocator::unlimited()).unwrap();
    let mut tables = query.take_results().remove(0).tables();
    for _ in 0..5 {
        assert!(tables.next().is_some());
    }
    token.cancel();
    // The stream ends once the cancellation is observed.
    let trailing = tables.by_ref().take(100_000).count();
    assert!(trailing < 100_000);
    assert!(tables.next().is_none());

    let err = query.wait().unwrap_err();
    assert!(matches!(err, ExecError::Canceled(CancelReason::Canceled)), "{err:?}");
    assert_eq!(err.kind(), ErrorKind::Canceled);
    drop(tables);
    assert_eq!(query.allocator().used(), 0);
}

#[test]
fn test_query_cancel() {
    let engine = Engine::new(small_config()).with_datasets(Arc::new(EndlessStore));
    let plan = PhysicalPlan::new(vec![
        PlanNode::new(1, "from", json!({ "dataset": "metrics" })),
        PlanNode::new(2, "filter", json!({ "expr": "_value > 10" })).after(&[1]),
    ]);
    let graph = engine.build(&plan).unwrap();
    let query = engine
        .start(QueryContext::new(), graph, Allocator::unlimited())
        .unwrap();
    std::thread::sleep(Duration::from_millis(20));
    query.cancel();
    let err = query.wait().unwrap_err();
    assert!(err.is_canceled());
}

#[test]
fn test_deadline_exceeded() {
    let engine = Engine::new(small_config()).with_datasets(Arc::new(EndlessStore));
    let plan = PhysicalPlan::new(vec![PlanNode::new(1, "from", json!({ "dataset": "metrics" }))]);
    let ctx = QueryContext::new().with_timeout(Duration::from_millis(50));

    let graph = engine.build(&plan).unwrap();
    let query = engine.start(ctx, graph, Allocator::unlimited()).unwrap();
    let err = query.wait().unwrap_err();
    assert!(
        matches!(err, ExecError::Canceled(CancelReason::DeadlineExceeded)),
        "{err:?}"
    );
}

#[test]
fn test_cancel_after_completion_is_ignored() {
    let engine = Engine::new(small_config()).with_datasets(Arc::new(cpu_store(2, 5)));
    let plan = PhysicalPlan::new(vec![PlanNode::new(1, "from", json!({ "dataset": "cpu" }))]);
    let mut query = engine.execute(&plan).unwrap();
    drop(query.take_results());
    let stats = query.wait().unwrap();

    query.cancel();
    assert!(query.err().is_none());
    assert_eq!(query.wait().unwrap().query_id, stats.query_id);
}

#[test]
fn test_cancel_racing_completion_reports_one_outcome() {
    let engine = Engine::new(small_config()).with_datasets(Arc::new(cpu_store(2, 5)));
    let plan = PhysicalPlan::new(vec![PlanNode::new(1, "from", json!({ "dataset": "cpu" }))]);
    for _ in 0..50 {
        let mut query = engine.execute(&plan).unwrap();
        drop(query.take_results());
        let outcome = std::thread::scope(|s| {
            s.spawn(|| query.cancel());
            query.wait()
        });
        match &outcome {
            Ok(_) => assert!(query.err().is_none()),
            Err(e) => assert_eq!(query.err().map(|first| first.to_string()), Some(e.to_string())),
        }
        query.cancel();
        assert_eq!(query.wait().is_ok(), outcome.is_ok());
    }
}

#[test]
fn test_drop_cancels_running_query() {
    let engine = Engine::new(small_config()).with_datasets(Arc::new(EndlessStore));
    let plan = PhysicalPlan::new(vec![PlanNode::new(1, "from", json!({ "dataset": "metrics" }))]);
    let graph = engine.build(&plan).unwrap();
    let alloc = Allocator::unlimited();
    let query = engine.start(QueryContext::new(), graph, alloc.clone()).unwrap();
    std::thread::sleep(Duration::from_millis(10));
    drop(query);
    assert_eq!(alloc.used(), 0);
}

#[test]
fn test_unknown_dataset_fails_at_run_time() {
    let engine = Engine::new(small_config());
    let plan = PhysicalPlan::new(vec![PlanNode::new(1, "from", json!({ "dataset": "nope" }))]);
    let query = engine.execute(&plan).unwrap();
    let err = query.wait().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Operator);
    assert!(err.to_string().contains("unknown dataset"), "{err}");
}
