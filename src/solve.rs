//! Solve and result extraction
//!
//! Hands a [`CompiledModel`] to a [`SolverBackend`] and maps the assignment
//! back onto relations. Tables without controllable columns pass through
//! untouched; the others are rebuilt row by row with every controllable
//! cell replaced by its decoded solver value.

use crate::compiler::{CompiledModel, CompiledTable};
use crate::error::{ModelError, ModelResult};
use crate::execution::Cancellation;
use crate::model::{SolveOutcome, SolveParams, SolverBackend, SolverStatus};
use crate::value::{Tuple, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

/// Solved relations plus solver metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub status: SolverStatus,
    pub objective: Option<i64>,
    pub elapsed: Duration,
    /// Base tables by declared name
    pub tables: BTreeMap<String, Vec<Tuple>>,
    /// Derived relations under the same assignment, by relation name
    pub views: BTreeMap<String, Vec<Tuple>>,
}

impl Solution {
    pub fn table(&self, name: &str) -> Option<&[Tuple]> {
        self.tables
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, rows)| rows.as_slice())
    }

    pub fn view(&self, name: &str) -> Option<&[Tuple]> {
        self.views
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, rows)| rows.as_slice())
    }
}

/// Solve and return every base table, keyed by table name
pub fn solve(
    compiled: &CompiledModel,
    backend: &dyn SolverBackend,
    params: &SolveParams,
) -> ModelResult<BTreeMap<String, Vec<Tuple>>> {
    solve_detailed(compiled, backend, params, &Cancellation::new()).map(|s| s.tables)
}

/// Solve, returning status, objective and derived relations as well.
///
/// `cancellation` is checked once, before the backend is called.
pub fn solve_detailed(
    compiled: &CompiledModel,
    backend: &dyn SolverBackend,
    params: &SolveParams,
    cancellation: &Cancellation,
) -> ModelResult<Solution> {
    if cancellation.is_cancelled() {
        info!(backend = backend.name(), "solve_cancelled");
        return Err(ModelError::Cancelled);
    }

    let outcome = backend.solve(compiled.model(), params);
    info!(
        backend = backend.name(),
        status = %outcome.status,
        objective = ?outcome.objective,
        elapsed_ms = outcome.elapsed.as_millis() as u64,
        variables = compiled.model().num_vars(),
        "solve_finished"
    );
    if !outcome.status.has_solution() {
        warn!(status = %outcome.status, "no_solution");
        return Err(ModelError::InfeasibleModel {
            status: outcome.status,
        });
    }

    let mut tables = BTreeMap::new();
    for table in compiled.tables() {
        tables.insert(table.schema.name.clone(), rebuild_table(compiled, table, &outcome)?);
    }

    let mut views = BTreeMap::new();
    for relation in compiled.relations() {
        views.insert(
            relation.name().to_string(),
            relation.evaluate(&outcome.values, compiled.encoder())?,
        );
    }

    Ok(Solution {
        status: outcome.status,
        objective: outcome.objective,
        elapsed: outcome.elapsed,
        tables,
        views,
    })
}

fn rebuild_table(
    compiled: &CompiledModel,
    table: &CompiledTable,
    outcome: &SolveOutcome,
) -> ModelResult<Vec<Tuple>> {
    if !table.has_controllable_columns() {
        return Ok(table.rows.clone());
    }

    let mut rows = Vec::with_capacity(table.rows.len());
    for (i, row) in table.rows.iter().enumerate() {
        let mut values = row.values().to_vec();
        for (col, vars) in table.vars.iter().enumerate() {
            let Some(vars) = vars else { continue };
            let column = &table.schema.columns[col];
            let decode_error = |value| ModelError::Decode {
                table: table.schema.name.clone(),
                column: column.name.clone(),
                value,
            };
            let code = vars
                .get(i)
                .and_then(|&v| outcome.value(v))
                .ok_or_else(|| decode_error(0))?;
            let value: Value = compiled
                .encoder()
                .decode(code, column.data_type)
                .ok_or_else(|| decode_error(code))?;
            values[col] = value;
        }
        rows.push(Tuple::new(values));
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Z3Backend;
    use crate::compiler::compile;
    use crate::compiler::tests::{node_pod_catalog, node_pod_snapshot};
    use crate::ir::{ColumnRef, Expr, Query, View, ViewSet};
    use crate::model::Model;
    use crate::tuple;
    use crate::value::DataType;

    struct FixedBackend(SolveOutcome);

    impl SolverBackend for FixedBackend {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn solve(&self, _model: &Model, _params: &SolveParams) -> SolveOutcome {
            self.0.clone()
        }
    }

    fn views() -> ViewSet {
        let feasible = Query::select(vec![Expr::col(ColumnRef::new("NODE", "name", DataType::String))])
            .from("NODE")
            .filter(Expr::col(ColumnRef::new("NODE", "cap", DataType::Int)).ge(Expr::lit(1_i64)));
        let pod_node = ColumnRef::controllable("POD", "node", DataType::String);
        ViewSet::new().with(View::constraint(
            "fits",
            Query::select(vec![Expr::col(pod_node.clone())])
                .from("POD")
                .filter(Expr::col(pod_node).is_in(Expr::subquery(feasible))),
        ))
    }

    #[test]
    fn test_solve_places_pod() {
        let catalog = node_pod_catalog();
        let snapshot = node_pod_snapshot(1);
        let compiled = compile(&catalog, &snapshot, &views()).unwrap();
        let out = solve(&compiled, &Z3Backend::new(), &SolveParams::default()).unwrap();

        assert_eq!(out["NODE"], vec![tuple!["n1", 1]]);
        assert_eq!(out["POD"], vec![tuple!["p1", "n1"]]);
    }

    #[test]
    fn test_solve_reports_infeasible() {
        let catalog = node_pod_catalog();
        let snapshot = node_pod_snapshot(0);
        let compiled = compile(&catalog, &snapshot, &views()).unwrap();
        let err = solve(&compiled, &Z3Backend::new(), &SolveParams::default()).unwrap_err();
        assert_eq!(
            err,
            ModelError::InfeasibleModel {
                status: SolverStatus::Infeasible
            }
        );
        assert!(err.is_solver_failure());
    }

    #[test]
    fn test_undecodable_value() {
        let catalog = node_pod_catalog();
        let snapshot = node_pod_snapshot(1);
        let compiled = compile(&catalog, &snapshot, &views()).unwrap();
        let backend = FixedBackend(SolveOutcome {
            status: SolverStatus::Feasible,
            values: vec![42],
            objective: None,
            elapsed: Duration::ZERO,
        });
        let err = solve(&compiled, &backend, &SolveParams::default()).unwrap_err();
        assert_eq!(
            err,
            ModelError::Decode {
                table: "POD".to_string(),
                column: "node".to_string(),
                value: 42
            }
        );
    }

    #[test]
    fn test_timeout_status_is_kept() {
        let catalog = node_pod_catalog();
        let snapshot = node_pod_snapshot(1);
        let compiled = compile(&catalog, &snapshot, &views()).unwrap();
        let backend = FixedBackend(SolveOutcome::without_solution(
            SolverStatus::Timeout,
            Duration::from_millis(5),
        ));
        assert_eq!(
            solve(&compiled, &backend, &SolveParams::default()),
            Err(ModelError::InfeasibleModel {
                status: SolverStatus::Timeout
            })
        );
    }

    #[test]
    fn test_detailed_includes_views_and_honors_cancel() {
        let catalog = node_pod_catalog();
        let snapshot = node_pod_snapshot(1);
        let compiled = compile(&catalog, &snapshot, &views()).unwrap();
        let backend = Z3Backend::new();
        let solution =
            solve_detailed(&compiled, &backend, &SolveParams::default(), &Cancellation::new())
                .unwrap();
        assert_eq!(solution.status, SolverStatus::Feasible);
        assert_eq!(solution.view("subquery1"), Some(&[tuple!["n1"]][..]));
        assert_eq!(solution.table("pod").map(<[Tuple]>::len), Some(1));

        let cancel = Cancellation::new();
        cancel.cancel();
        assert_eq!(
            solve_detailed(&compiled, &backend, &SolveParams::default(), &cancel),
            Err(ModelError::Cancelled)
        );
    }
}
