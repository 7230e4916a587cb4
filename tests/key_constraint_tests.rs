//! Primary and foreign keys over controllable columns.

use policy_compiler::{
    compile, solve, tuple, Catalog, Constraint, DataType, Domain, ModelError, Snapshot, SolveParams,
    TableSchema, Value, ViewSet, Z3Backend,
};
use std::collections::HashSet;

#[test]
fn test_primary_key_values_are_distinct() {
    let catalog = Catalog::new()
        .with_table(
            TableSchema::new("SLOT")
                .column("owner", DataType::String)
                .controllable_column("id", DataType::Int)
                .primary_key(&["id"]),
        )
        .unwrap();
    let rows: Vec<_> = ["a", "b", "c", "d"]
        .iter()
        .map(|o| tuple![*o, Value::Null])
        .collect();
    let snapshot = Snapshot::new().with_rows("SLOT", rows);

    let compiled = compile(&catalog, &snapshot, &ViewSet::new()).unwrap();
    assert_eq!(compiled.stats().constraints_by_kind.get("all_different"), Some(&1));

    let params = SolveParams {
        default_domain: (0, 9),
        ..SolveParams::default()
    };
    let tables = solve(&compiled, &Z3Backend::new(), &params).unwrap();
    let ids: HashSet<_> = tables["SLOT"].iter().map(|t| t.get(1).cloned()).collect();
    assert_eq!(ids.len(), 4);
}

#[test]
fn test_primary_key_over_too_small_domain_is_infeasible() {
    let catalog = Catalog::new()
        .with_table(
            TableSchema::new("FLAG")
                .controllable_column("on", DataType::Bool)
                .primary_key(&["on"]),
        )
        .unwrap();
    let snapshot = Snapshot::new().with_rows(
        "FLAG",
        vec![tuple![Value::Null], tuple![Value::Null], tuple![Value::Null]],
    );
    let compiled = compile(&catalog, &snapshot, &ViewSet::new()).unwrap();
    let err = solve(&compiled, &Z3Backend::new(), &SolveParams::default()).unwrap_err();
    assert!(err.is_solver_failure());
}

#[test]
fn test_composite_primary_key_only_constrains_controllable_part() {
    let catalog = Catalog::new()
        .with_table(
            TableSchema::new("SHIFT")
                .column("day", DataType::Int)
                .controllable_column("worker", DataType::Int)
                .primary_key(&["day", "worker"]),
        )
        .unwrap();
    let snapshot = Snapshot::new().with_rows(
        "SHIFT",
        vec![tuple![1, Value::Null], tuple![2, Value::Null]],
    );
    let compiled = compile(&catalog, &snapshot, &ViewSet::new()).unwrap();
    assert_eq!(
        compiled.model().constraints(),
        &[Constraint::NotEqual(
            policy_compiler::IntExpr::Var(policy_compiler::VarId(0)),
            policy_compiler::IntExpr::Var(policy_compiler::VarId(1)),
        )]
    );
}

#[test]
fn test_foreign_key_values_come_from_parent() {
    let catalog = Catalog::new()
        .with_table(
            TableSchema::new("ZONE")
                .column("name", DataType::String)
                .primary_key(&["name"]),
        )
        .unwrap()
        .with_table(
            TableSchema::new("RACK")
                .column("name", DataType::String)
                .controllable_column("zone", DataType::String)
                .foreign_key("zone", "ZONE", "name"),
        )
        .unwrap();
    let snapshot = Snapshot::new()
        .with_rows("ZONE", vec![tuple!["east"], tuple!["west"]])
        .with_rows(
            "RACK",
            vec![tuple!["r1", Value::Null], tuple!["r2", Value::Null]],
        );

    let compiled = compile(&catalog, &snapshot, &ViewSet::new()).unwrap();
    let index = &compiled.model().variables()[2];
    assert_eq!(index.name, "RACK.zone[0]->ZONE");
    assert_eq!(index.domain, Domain::range(0, 1));

    let tables = solve(&compiled, &Z3Backend::new(), &SolveParams::default()).unwrap();
    let zones: HashSet<_> = tables["ZONE"].iter().filter_map(|t| t.get(0).cloned()).collect();
    for rack in &tables["RACK"] {
        assert!(zones.contains(rack.get(1).unwrap()));
    }
}

#[test]
fn test_foreign_key_to_empty_parent_is_infeasible() {
    let catalog = Catalog::new()
        .with_table(TableSchema::new("ZONE").column("name", DataType::String))
        .unwrap()
        .with_table(
            TableSchema::new("RACK")
                .controllable_column("zone", DataType::String)
                .foreign_key("zone", "ZONE", "name"),
        )
        .unwrap();
    let snapshot = Snapshot::new().with_rows("RACK", vec![tuple![Value::Null]]);
    let compiled = compile(&catalog, &snapshot, &ViewSet::new()).unwrap();
    assert!(matches!(
        solve(&compiled, &Z3Backend::new(), &SolveParams::default()),
        Err(ModelError::InfeasibleModel { .. })
    ));
}

#[test]
fn test_foreign_key_to_controllable_parent_is_rejected() {
    let catalog = Catalog::new()
        .with_table(TableSchema::new("ZONE").controllable_column("name", DataType::String))
        .unwrap()
        .with_table(
            TableSchema::new("RACK")
                .controllable_column("zone", DataType::String)
                .foreign_key("zone", "ZONE", "name"),
        )
        .unwrap();
    let snapshot = Snapshot::new()
        .with_rows("ZONE", vec![tuple![Value::Null]])
        .with_rows("RACK", vec![tuple![Value::Null]]);
    assert!(matches!(
        compile(&catalog, &snapshot, &ViewSet::new()),
        Err(ModelError::UnsupportedConstraintShape(_))
    ));
}
