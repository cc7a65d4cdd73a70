//! Benchmarks for the RecordQL query engine
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use recordql::config::EngineConfig;
use recordql::query::aggregate::group_and_aggregate;
use recordql::query::dates::DateResolver;
use recordql::query::filter::Evaluator;
use recordql::query::{parse_query, ExecutionMode, FieldPath, QueryExecutor};
use recordql::source::MemorySource;
use recordql::EntityKind;
use serde_json::{json, Value};
use std::sync::Arc;

fn create_test_records(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| {
            json!({
                "id": i,
                "name": format!("Person {}", i),
                "emails": [format!("p{}@{}.com", i, if i % 3 == 0 { "acme" } else { "example" })],
                "lastContacted": format!("2024-01-{:02}T10:00:00Z", i % 28 + 1),
                "fields": {
                    "Status": ["Active", "Closed", "Lead"][i % 3],
                    "Amount": (i % 500) as f64 * 1.5
                }
            })
        })
        .collect()
}

fn bench_parse(c: &mut Criterion) {
    let query = json!({
        "from": "persons",
        "select": ["id", "name", "fields.Status"],
        "where": {"and": [
            {"path": "fields.Status", "op": "eq", "value": "Active"},
            {"or": [
                {"path": "emails", "op": "contains", "value": "acme"},
                {"path": "lastContacted", "op": "gte", "value": "-30d"}
            ]}
        ]},
        "orderBy": [{"field": "name", "direction": "asc"}],
        "limit": 100
    });

    c.bench_function("parse_query", |b| b.iter(|| parse_query(black_box(&query)).unwrap()));
}

fn bench_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter");
    let parsed = parse_query(&json!({
        "from": "persons",
        "where": {"and": [
            {"path": "emails", "op": "contains", "value": "ACME"},
            {"path": "lastContacted", "op": "between", "value": ["2024-01-05", "2024-01-20"]},
            {"not": {"path": "fields.Amount", "op": "lt", "value": 100}}
        ]}
    }))
    .unwrap();
    let clause = parsed.query.where_clause.unwrap();
    let dates = DateResolver::now(chrono::FixedOffset::east_opt(0).unwrap());

    for size in [1000, 10000] {
        let records = create_test_records(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(format!("evaluate_{}", size), |b| {
            let evaluator = Evaluator::new(&dates);
            b.iter(|| {
                records
                    .iter()
                    .filter(|r| evaluator.matches(black_box(&clause), r))
                    .count()
            })
        });
    }

    group.finish();
}

fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");
    let parsed = parse_query(&json!({
        "from": "opportunities",
        "groupBy": "fields.Status",
        "aggregate": {
            "n": {"count": true},
            "total": {"sum": "fields.Amount"},
            "p90": {"percentile": {"field": "fields.Amount", "p": 90}},
            "mean": {"divide": ["total", "n"]}
        }
    }))
    .unwrap();
    let spec = parsed.query.aggregate.unwrap();
    let group_by = FieldPath::parse("fields.Status").unwrap();

    for size in [1000, 10000] {
        let records = create_test_records(size);
        let refs: Vec<&Value> = records.iter().collect();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(format!("group_{}", size), |b| {
            b.iter(|| group_and_aggregate(&spec, &group_by, black_box(&refs)))
        });
    }

    group.finish();
}

fn bench_execute(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let source = Arc::new(MemorySource::new().with_records(EntityKind::Persons, create_test_records(5000)));
    let executor = QueryExecutor::new(source, EngineConfig::default()).unwrap();
    let query = json!({
        "from": "persons",
        "where": {"path": "emails", "op": "contains", "value": "acme"},
        "orderBy": [{"field": "fields.Amount", "direction": "desc"}],
        "limit": 50
    });

    c.bench_function("execute_filter_order_limit_5000", |b| {
        b.iter(|| {
            runtime
                .block_on(executor.run(black_box(&query), ExecutionMode::Live))
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_parse, bench_filter, bench_aggregate, bench_execute);
criterion_main!(benches);
