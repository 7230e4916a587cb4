//! Compilation benchmarks: capacity policy and grouped views over growing snapshots.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use policy_compiler::{
    compile, tuple, Catalog, ColumnRef, DataType, Expr, Query, Snapshot, TableSchema, Value, View,
    ViewSet,
};
use std::time::Duration;

fn node_name() -> ColumnRef {
    ColumnRef::new("NODE", "name", DataType::String)
}

fn node_cap() -> ColumnRef {
    ColumnRef::new("NODE", "cap", DataType::Int)
}

fn pod_demand() -> ColumnRef {
    ColumnRef::new("POD", "demand", DataType::Int)
}

fn pod_node() -> ColumnRef {
    ColumnRef::controllable("POD", "node", DataType::String)
}

fn cluster_catalog() -> Catalog {
    Catalog::new()
        .with_table(
            TableSchema::new("NODE")
                .column("name", DataType::String)
                .column("cap", DataType::Int),
        )
        .expect("node table")
        .with_table(
            TableSchema::new("POD")
                .column("name", DataType::String)
                .column("demand", DataType::Int)
                .controllable_column("node", DataType::String),
        )
        .expect("pod table")
}

fn cluster_snapshot(nodes: usize, pods_per_node: usize) -> Snapshot {
    let node_rows = (0..nodes)
        .map(|i| tuple![format!("n{i}"), 8 + (i % 4) as i64])
        .collect();
    let pod_rows = (0..nodes * pods_per_node)
        .map(|i| tuple![format!("p{i}"), 1 + (i % 3) as i64, Value::Null])
        .collect();
    Snapshot::new()
        .with_rows("NODE", node_rows)
        .with_rows("POD", pod_rows)
}

fn capacity_policy() -> ViewSet {
    ViewSet::new()
        .with(View::constraint(
            "known_node",
            Query::select(vec![Expr::col(pod_node())])
                .from("POD")
                .filter(Expr::col(pod_node()).is_in(Expr::col(node_name()))),
        ))
        .with(View::constraint(
            "capacity",
            Query::select(vec![Expr::col(node_name())])
                .from("NODE")
                .from("POD")
                .filter(Expr::col(pod_node()).equals(Expr::col(node_name())))
                .group_by(vec![node_name(), node_cap()])
                .having(Expr::sum(Expr::col(pod_demand())).le(Expr::col(node_cap()))),
        ))
        .with(View::objective(
            "spread",
            Query::select(vec![Expr::col(node_cap())])
                .from("NODE")
                .filter(Expr::col(node_cap()).gt(Expr::lit(9_i64))),
        ))
}

fn bench_capacity_compile(c: &mut Criterion) {
    let catalog = cluster_catalog();
    let views = capacity_policy();

    let mut group = c.benchmark_group("capacity_compile");
    for nodes in [4usize, 16, 64] {
        let snapshot = cluster_snapshot(nodes, 4);
        group.bench_with_input(BenchmarkId::from_parameter(nodes), &snapshot, |b, snapshot| {
            b.iter(|| compile(&catalog, snapshot, &views).expect("compile"));
        });
    }
    group.finish();
}

fn bench_grouped_view(c: &mut Criterion) {
    let catalog = cluster_catalog();
    let views = ViewSet::new().with(View::relation(
        "demand_by_size",
        Query::select(vec![
            Expr::col(pod_demand()).into(),
            Expr::count(Expr::col(pod_demand())).alias("n"),
        ])
        .from("POD")
        .group_by(vec![pod_demand()]),
    ));

    let mut group = c.benchmark_group("grouped_view");
    for pods in [100usize, 1_000, 10_000] {
        let snapshot = cluster_snapshot(1, pods);
        group.bench_with_input(BenchmarkId::from_parameter(pods), &snapshot, |b, snapshot| {
            b.iter(|| compile(&catalog, snapshot, &views).expect("compile"));
        });
    }
    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .sample_size(20)
        .measurement_time(Duration::from_secs(5));
    targets = bench_capacity_compile, bench_grouped_view
}
criterion_main!(benches);
