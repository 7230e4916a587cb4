//! # Z3 Backend
//!
//! [`SolverBackend`] over the z3 optimizer. The model is lowered to z3
//! integer terms, solved with `Optimize` under the remaining time limit,
//! and read back through the z3 model.
//!
//! ## Status mapping
//!
//! | z3 result | Objective | Status |
//! |-----------|-----------|--------|
//! | `Sat` | yes | OPTIMAL |
//! | `Sat` | no | FEASIBLE |
//! | `Unsat` | | INFEASIBLE |
//! | `Unknown`, time limit hit, valid incumbent | yes | FEASIBLE |
//! | `Unknown`, time limit hit | | TIMEOUT |
//! | `Unknown`, other reason | | UNKNOWN |
//!
//! z3 solves on a single thread; `num_workers` is accepted and ignored.

mod lower;

use crate::execution::SearchDeadline;
use crate::model::{Model, SolveOutcome, SolveParams, SolverBackend, SolverStatus, VarId};
use lower::Lowering;
use std::time::Duration;
use tracing::{debug, info};
use z3::ast::Int;
use z3::{Config, Context, Optimize, SatResult};

/// Solver backend on top of z3's `Optimize`
#[derive(Debug, Clone, Copy, Default)]
pub struct Z3Backend;

impl Z3Backend {
    pub fn new() -> Self {
        Z3Backend
    }
}

impl SolverBackend for Z3Backend {
    fn name(&self) -> &'static str {
        "z3"
    }

    fn solve(&self, model: &Model, params: &SolveParams) -> SolveOutcome {
        let deadline = SearchDeadline::new(params.time_limit);
        if deadline.check().is_err() {
            debug!("solver_deadline_expired");
            return SolveOutcome::without_solution(SolverStatus::Timeout, deadline.elapsed());
        }

        let mut config = Config::new();
        config.set_model_generation(true);
        config.set_param_value("timeout", &timeout_ms(deadline.remaining()).to_string());
        let ctx = Context::new(&config);
        let opt = Optimize::new(&ctx);

        let mut lowering = Lowering::new(&ctx, model.num_vars());
        for (i, var) in model.variables().iter().enumerate() {
            opt.assert(&lowering.domain(VarId(i), &var.domain, params.default_domain));
        }
        for constraint in model.constraints() {
            opt.assert(&lowering.constraint(constraint));
        }
        if let Some(objective) = model.objective() {
            let target = lowering.int(objective.expr());
            opt.maximize(&target);
        }
        for condition in lowering.side_conditions() {
            opt.assert(condition);
        }
        if params.log_search_progress {
            info!(vars = model.num_vars(), smt = %opt, "solver_model_lowered");
        }

        let result = opt.check(&[]);
        let elapsed = deadline.elapsed();
        let outcome = match result {
            SatResult::Sat => {
                let status = if model.objective().is_some() {
                    SolverStatus::Optimal
                } else {
                    SolverStatus::Feasible
                };
                match opt
                    .get_model()
                    .and_then(|m| read_values(&m, lowering.vars()))
                {
                    Some(values) => with_values(model, status, values, elapsed),
                    None => SolveOutcome::without_solution(SolverStatus::Unknown, elapsed),
                }
            }
            SatResult::Unsat => SolveOutcome::without_solution(SolverStatus::Infeasible, elapsed),
            SatResult::Unknown => {
                let reason = opt.get_reason_unknown().unwrap_or_default();
                let timed_out = deadline.check().is_err()
                    || reason.contains("timeout")
                    || reason.contains("canceled");
                debug!(reason = %reason, timed_out, "solver_unknown");
                if !timed_out {
                    SolveOutcome::without_solution(SolverStatus::Unknown, elapsed)
                } else {
                    match incumbent(model, &opt, lowering.vars()) {
                        Some(values) => {
                            with_values(model, SolverStatus::Feasible, values, elapsed)
                        }
                        None => SolveOutcome::without_solution(SolverStatus::Timeout, elapsed),
                    }
                }
            }
        };

        debug!(
            backend = self.name(),
            status = %outcome.status,
            elapsed_ms = elapsed.as_millis() as u64,
            "solver_finished"
        );
        outcome
    }
}

/// Whole milliseconds, at least one
fn timeout_ms(remaining: Duration) -> u64 {
    u64::try_from(remaining.as_millis())
        .unwrap_or(u64::MAX)
        .max(1)
}

fn read_values<'ctx>(z3_model: &z3::Model<'ctx>, vars: &[Int<'ctx>]) -> Option<Vec<i64>> {
    vars.iter()
        .map(|var| z3_model.eval(var, true).and_then(|v| v.as_i64()))
        .collect()
}

/// Best assignment found before the time limit, kept only when optimizing
/// and only if it satisfies every constraint
fn incumbent<'ctx>(model: &Model, opt: &Optimize<'ctx>, vars: &[Int<'ctx>]) -> Option<Vec<i64>> {
    model.objective()?;
    let values = read_values(&opt.get_model()?, vars)?;
    model
        .constraints()
        .iter()
        .all(|c| c.is_satisfied(&values))
        .then_some(values)
}

fn with_values(
    model: &Model,
    status: SolverStatus,
    values: Vec<i64>,
    elapsed: Duration,
) -> SolveOutcome {
    let objective = model.objective().and_then(|o| o.expr().eval(&values));
    SolveOutcome {
        status,
        values,
        objective,
        elapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Constraint, Domain, IntExpr};

    fn params() -> SolveParams {
        SolveParams {
            time_limit: Duration::from_secs(5),
            num_workers: 1,
            default_domain: (-10, 10),
            log_search_progress: false,
        }
    }

    fn var(v: VarId) -> IntExpr {
        IntExpr::Var(v)
    }

    #[test]
    fn test_satisfiable_model() {
        let mut model = Model::new();
        let x = model.new_var("x", Domain::range(0, 5));
        let y = model.new_var("y", Domain::range(0, 5));
        model.add(Constraint::Equal(
            IntExpr::plus(var(x), var(y)),
            IntExpr::Const(7),
        ));
        model.add(Constraint::LessThan(var(x), var(y)));

        let out = Z3Backend.solve(&model, &params());
        assert_eq!(out.status, SolverStatus::Feasible);
        assert_eq!(out.values.len(), 2);
        assert!(model.constraints().iter().all(|c| c.is_satisfied(&out.values)));
        assert_eq!(out.objective, None);
    }

    #[test]
    fn test_empty_in_domain_is_infeasible() {
        let mut model = Model::new();
        let x = model.new_var("x", Domain::values(vec![1, 2]));
        model.add(Constraint::InDomain {
            expr: var(x),
            domain: vec![],
        });
        let out = Z3Backend.solve(&model, &params());
        assert_eq!(out.status, SolverStatus::Infeasible);
        assert!(out.values.is_empty());
    }

    #[test]
    fn test_all_different_over_too_few_values() {
        let mut model = Model::new();
        let vars: Vec<IntExpr> = (0..3)
            .map(|i| var(model.new_var(format!("v{i}"), Domain::range(0, 1))))
            .collect();
        model.add(Constraint::AllDifferent(vars));
        let out = Z3Backend.solve(&model, &params());
        assert_eq!(out.status, SolverStatus::Infeasible);
    }

    #[test]
    fn test_constant_conflict() {
        let mut model = Model::new();
        model.new_var("x", Domain::range(0, 1));
        model.add(Constraint::Holds(IntExpr::Const(0)));
        let out = Z3Backend.solve(&model, &params());
        assert_eq!(out.status, SolverStatus::Infeasible);
    }

    #[test]
    fn test_maximize_reaches_optimal() {
        let mut model = Model::new();
        let x = model.new_var("x", Domain::range(0, 4));
        let y = model.new_var("y", Domain::range(0, 4));
        model.add(Constraint::LessOrEqual(
            IntExpr::plus(var(x), var(y)),
            IntExpr::Const(5),
        ));
        model.maximize(IntExpr::plus(
            IntExpr::mult(var(x), IntExpr::Const(2)),
            var(y),
        ));
        let out = Z3Backend.solve(&model, &params());
        assert_eq!(out.status, SolverStatus::Optimal);
        assert_eq!(out.objective, Some(9));
        assert_eq!(out.values, vec![4, 1]);
    }

    #[test]
    fn test_unbounded_var_uses_default_domain() {
        let mut model = Model::new();
        let x = model.new_var("x", Domain::Unbounded);
        model.maximize(var(x));
        let out = Z3Backend.solve(&model, &params());
        assert_eq!(out.status, SolverStatus::Optimal);
        assert_eq!(out.value(x), Some(10));
    }

    #[test]
    fn test_element_picks_matching_index() {
        let mut model = Model::new();
        let child = model.new_var("child", Domain::Unbounded);
        let index = model.new_var("index", Domain::range(0, 2));
        model.add(Constraint::Element {
            index,
            array: vec![7, 3, 9],
            target: var(child),
        });
        model.add(Constraint::GreaterThan(var(child), IntExpr::Const(8)));
        let mut p = params();
        p.default_domain = (0, 20);
        let out = Z3Backend.solve(&model, &p);
        assert_eq!(out.status, SolverStatus::Feasible);
        assert_eq!(out.value(child), Some(9));
        assert_eq!(out.value(index), Some(2));
    }

    #[test]
    fn test_division_truncates_toward_zero() {
        // x / 2 == -3 holds for x in {-7, -6}; flooring would admit -5
        let mut model = Model::new();
        let x = model.new_var("x", Domain::range(-10, 10));
        model.add(Constraint::Equal(
            IntExpr::div(var(x), IntExpr::Const(2)),
            IntExpr::Const(-3),
        ));
        model.maximize(var(x));
        let out = Z3Backend.solve(&model, &params());
        assert_eq!(out.status, SolverStatus::Optimal);
        assert_eq!(out.value(x), Some(-6));
        assert_eq!(IntExpr::div(IntExpr::Const(-6), IntExpr::Const(2)).eval(&[]), Some(-3));
    }

    #[test]
    fn test_division_by_zero_is_never_satisfied() {
        let mut model = Model::new();
        let x = model.new_var("x", Domain::range(1, 3));
        let y = model.new_var("y", Domain::range(0, 0));
        model.add(Constraint::Holds(IntExpr::geq(
            IntExpr::div(var(x), var(y)),
            IntExpr::Const(0),
        )));
        let out = Z3Backend.solve(&model, &params());
        assert_eq!(out.status, SolverStatus::Infeasible);
    }

    #[test]
    fn test_reified_terms_and_reductions() {
        let mut model = Model::new();
        let x = model.new_var("x", Domain::range(0, 5));
        let y = model.new_var("y", Domain::range(0, 5));
        model.add(Constraint::Holds(IntExpr::or(
            IntExpr::eq(var(x), IntExpr::Const(1)),
            IntExpr::eq(var(x), IntExpr::Const(2)),
        )));
        model.add(Constraint::LessOrEqual(
            IntExpr::max(vec![var(x), var(y)]),
            IntExpr::Const(4),
        ));
        model.maximize(IntExpr::sum(vec![
            var(x),
            var(y),
            IntExpr::min(vec![var(x), var(y)]),
        ]));
        let out = Z3Backend.solve(&model, &params());
        assert_eq!(out.status, SolverStatus::Optimal);
        assert_eq!(out.values, vec![2, 4]);
        assert_eq!(out.objective, Some(8));
    }

    #[test]
    fn test_empty_min_is_undefined() {
        let mut model = Model::new();
        model.new_var("x", Domain::range(0, 1));
        model.add(Constraint::GreaterOrEqual(
            IntExpr::min(vec![]),
            IntExpr::Const(0),
        ));
        let out = Z3Backend.solve(&model, &params());
        assert_eq!(out.status, SolverStatus::Infeasible);
    }

    #[test]
    fn test_zero_time_limit_times_out() {
        let mut model = Model::new();
        let x = model.new_var("x", Domain::range(0, 3));
        model.add(Constraint::GreaterThan(var(x), IntExpr::Const(1)));
        let mut p = params();
        p.time_limit = Duration::ZERO;
        let out = Z3Backend.solve(&model, &p);
        assert_eq!(out.status, SolverStatus::Timeout);
        assert!(out.values.is_empty());
    }

    #[test]
    fn test_timeout_ms_never_zero() {
        assert_eq!(timeout_ms(Duration::ZERO), 1);
        assert_eq!(timeout_ms(Duration::from_millis(1500)), 1500);
    }

    #[test]
    fn test_empty_model() {
        let out = Z3Backend.solve(&Model::new(), &params());
        assert_eq!(out.status, SolverStatus::Feasible);
        assert!(out.values.is_empty());
    }
}
