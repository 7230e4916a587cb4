//! # Solver Model
//!
//! The boundary between the compiler and a constraint solver:
//! decision variables with domains, constraints over [`IntExpr`], and an
//! optional objective. Any backend implementing [`SolverBackend`] can solve
//! a [`Model`]; the crate ships [`crate::backend::Z3Backend`].
//!
//! Models are plain data and compare with `==`, so two compilations of the
//! same input can be checked for equality.

pub mod expr;

pub use expr::{IntExpr, IntOp, Reduction};

use std::fmt;
use std::time::Duration;

/// Index of a decision variable in its model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub usize);

impl VarId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

/// Declared domain of a variable
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Domain {
    /// No declared bounds; the backend applies its default range
    Unbounded,
    Range { lo: i64, hi: i64 },
    /// Explicit sorted set of values
    Values(Vec<i64>),
}

impl Domain {
    pub fn range(lo: i64, hi: i64) -> Self {
        Domain::Range { lo, hi }
    }

    /// Sorted, deduplicated value set
    pub fn values(mut values: Vec<i64>) -> Self {
        values.sort_unstable();
        values.dedup();
        Domain::Values(values)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Unbounded => write!(f, "int"),
            Domain::Range { lo, hi } => write!(f, "[{lo}..{hi}]"),
            Domain::Values(v) => write!(f, "{v:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IntVar {
    pub name: String,
    pub domain: Domain,
}

/// Hard constraints
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constraint {
    Equal(IntExpr, IntExpr),
    NotEqual(IntExpr, IntExpr),
    LessThan(IntExpr, IntExpr),
    LessOrEqual(IntExpr, IntExpr),
    GreaterThan(IntExpr, IntExpr),
    GreaterOrEqual(IntExpr, IntExpr),
    /// `expr` takes one of `domain` (sorted)
    InDomain { expr: IntExpr, domain: Vec<i64> },
    AllDifferent(Vec<IntExpr>),
    /// `array[index] == target`
    Element {
        index: VarId,
        array: Vec<i64>,
        target: IntExpr,
    },
    /// Boolean expression is true (non-zero)
    Holds(IntExpr),
}

impl Constraint {
    /// Stable kind name, used for statistics
    pub fn kind(&self) -> &'static str {
        match self {
            Constraint::Equal(..) => "equal",
            Constraint::NotEqual(..) => "not_equal",
            Constraint::LessThan(..) => "less_than",
            Constraint::LessOrEqual(..) => "less_or_equal",
            Constraint::GreaterThan(..) => "greater_than",
            Constraint::GreaterOrEqual(..) => "greater_or_equal",
            Constraint::InDomain { .. } => "in_domain",
            Constraint::AllDifferent(_) => "all_different",
            Constraint::Element { .. } => "element",
            Constraint::Holds(_) => "holds",
        }
    }

    /// Distinct variables mentioned by the constraint
    pub fn vars(&self) -> Vec<VarId> {
        let mut out = Vec::new();
        match self {
            Constraint::Equal(a, b)
            | Constraint::NotEqual(a, b)
            | Constraint::LessThan(a, b)
            | Constraint::LessOrEqual(a, b)
            | Constraint::GreaterThan(a, b)
            | Constraint::GreaterOrEqual(a, b) => {
                a.collect_vars(&mut out);
                b.collect_vars(&mut out);
            }
            Constraint::InDomain { expr, .. } | Constraint::Holds(expr) => {
                expr.collect_vars(&mut out);
            }
            Constraint::AllDifferent(exprs) => {
                for e in exprs {
                    e.collect_vars(&mut out);
                }
            }
            Constraint::Element { index, target, .. } => {
                out.push(*index);
                target.collect_vars(&mut out);
            }
        }
        out
    }

    /// Check under a full assignment
    pub fn is_satisfied(&self, values: &[i64]) -> bool {
        let pair = |a: &IntExpr, b: &IntExpr, f: fn(i64, i64) -> bool| {
            matches!((a.eval(values), b.eval(values)), (Some(x), Some(y)) if f(x, y))
        };
        match self {
            Constraint::Equal(a, b) => pair(a, b, |x, y| x == y),
            Constraint::NotEqual(a, b) => pair(a, b, |x, y| x != y),
            Constraint::LessThan(a, b) => pair(a, b, |x, y| x < y),
            Constraint::LessOrEqual(a, b) => pair(a, b, |x, y| x <= y),
            Constraint::GreaterThan(a, b) => pair(a, b, |x, y| x > y),
            Constraint::GreaterOrEqual(a, b) => pair(a, b, |x, y| x >= y),
            Constraint::InDomain { expr, domain } => expr
                .eval(values)
                .is_some_and(|v| domain.binary_search(&v).is_ok()),
            Constraint::AllDifferent(exprs) => {
                let mut seen = Vec::with_capacity(exprs.len());
                for e in exprs {
                    match e.eval(values) {
                        Some(v) if !seen.contains(&v) => seen.push(v),
                        _ => return false,
                    }
                }
                true
            }
            Constraint::Element {
                index,
                array,
                target,
            } => {
                let selected = values
                    .get(index.index())
                    .and_then(|&i| usize::try_from(i).ok())
                    .and_then(|i| array.get(i));
                matches!((selected, target.eval(values)), (Some(&a), Some(t)) if a == t)
            }
            Constraint::Holds(e) => e.eval(values).is_some_and(|v| v != 0),
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Equal(a, b) => write!(f, "{a} == {b}"),
            Constraint::NotEqual(a, b) => write!(f, "{a} != {b}"),
            Constraint::LessThan(a, b) => write!(f, "{a} < {b}"),
            Constraint::LessOrEqual(a, b) => write!(f, "{a} <= {b}"),
            Constraint::GreaterThan(a, b) => write!(f, "{a} > {b}"),
            Constraint::GreaterOrEqual(a, b) => write!(f, "{a} >= {b}"),
            Constraint::InDomain { expr, domain } => write!(f, "{expr} in {domain:?}"),
            Constraint::AllDifferent(exprs) => {
                let parts: Vec<String> = exprs.iter().map(ToString::to_string).collect();
                write!(f, "all_different({})", parts.join(", "))
            }
            Constraint::Element {
                index,
                array,
                target,
            } => write!(f, "element({index}, {array:?}) == {target}"),
            Constraint::Holds(e) => write!(f, "holds({e})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Objective {
    Maximize(IntExpr),
}

impl Objective {
    pub fn expr(&self) -> &IntExpr {
        match self {
            Objective::Maximize(e) => e,
        }
    }
}

/// A complete constraint model
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Model {
    variables: Vec<IntVar>,
    constraints: Vec<Constraint>,
    objective: Option<Objective>,
}

impl Model {
    pub fn new() -> Self {
        Model::default()
    }

    /// Declare a variable
    pub fn new_var(&mut self, name: impl Into<String>, domain: Domain) -> VarId {
        let id = VarId(self.variables.len());
        self.variables.push(IntVar {
            name: name.into(),
            domain,
        });
        id
    }

    pub fn set_domain(&mut self, var: VarId, domain: Domain) {
        if let Some(v) = self.variables.get_mut(var.index()) {
            v.domain = domain;
        }
    }

    pub fn add(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
    }

    pub fn maximize(&mut self, expr: IntExpr) {
        self.objective = Some(Objective::Maximize(expr));
    }

    pub fn var(&self, id: VarId) -> Option<&IntVar> {
        self.variables.get(id.index())
    }

    pub fn variables(&self) -> &[IntVar] {
        &self.variables
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn objective(&self) -> Option<&Objective> {
        self.objective.as_ref()
    }

    pub fn num_vars(&self) -> usize {
        self.variables.len()
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.variables.iter().enumerate() {
            writeln!(f, "var x{i} {} : {}", v.name, v.domain)?;
        }
        for c in &self.constraints {
            writeln!(f, "constraint {c}")?;
        }
        if let Some(Objective::Maximize(e)) = &self.objective {
            writeln!(f, "maximize {e}")?;
        }
        Ok(())
    }
}

/// Solver termination status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SolverStatus {
    Feasible,
    Optimal,
    Infeasible,
    Unknown,
    Timeout,
}

impl SolverStatus {
    /// FEASIBLE or OPTIMAL: an assignment is available
    pub fn has_solution(&self) -> bool {
        matches!(self, SolverStatus::Feasible | SolverStatus::Optimal)
    }
}

impl fmt::Display for SolverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SolverStatus::Feasible => "FEASIBLE",
            SolverStatus::Optimal => "OPTIMAL",
            SolverStatus::Infeasible => "INFEASIBLE",
            SolverStatus::Unknown => "UNKNOWN",
            SolverStatus::Timeout => "TIMEOUT",
        };
        write!(f, "{s}")
    }
}

/// Parameters forwarded to the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolveParams {
    /// Wall-clock budget for one solve call
    pub time_limit: Duration,
    /// Worker hint; the backend may ignore it
    pub num_workers: usize,
    /// Range applied to variables with [`Domain::Unbounded`]
    pub default_domain: (i64, i64),
    pub log_search_progress: bool,
}

impl Default for SolveParams {
    fn default() -> Self {
        SolveParams {
            time_limit: Duration::from_secs(10),
            num_workers: 1,
            default_domain: (-1024, 1024),
            log_search_progress: false,
        }
    }
}

/// What a backend returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolveOutcome {
    pub status: SolverStatus,
    /// One value per model variable; empty unless a solution was found
    pub values: Vec<i64>,
    pub objective: Option<i64>,
    pub elapsed: Duration,
}

impl SolveOutcome {
    pub fn without_solution(status: SolverStatus, elapsed: Duration) -> Self {
        SolveOutcome {
            status,
            values: Vec::new(),
            objective: None,
            elapsed,
        }
    }

    /// Assigned value of a variable
    pub fn value(&self, var: VarId) -> Option<i64> {
        self.values.get(var.index()).copied()
    }
}

/// Narrow solver contract: model in, status and assignment out
pub trait SolverBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn solve(&self, model: &Model, params: &SolveParams) -> SolveOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_var_ids_are_sequential() {
        let mut model = Model::new();
        let a = model.new_var("POD.NODE[0]", Domain::Unbounded);
        let b = model.new_var("POD.NODE[1]", Domain::range(0, 1));
        assert_eq!((a, b), (VarId(0), VarId(1)));
        assert_eq!(model.var(b).map(|v| v.name.as_str()), Some("POD.NODE[1]"));
        assert_eq!(model.num_vars(), 2);
    }

    #[test]
    fn test_constraint_satisfaction() {
        let x = IntExpr::Var(VarId(0));
        let y = IntExpr::Var(VarId(1));
        assert!(Constraint::LessThan(x.clone(), y.clone()).is_satisfied(&[1, 2]));
        assert!(!Constraint::Equal(x.clone(), y.clone()).is_satisfied(&[1, 2]));
        assert!(Constraint::InDomain {
            expr: x.clone(),
            domain: vec![1, 3]
        }
        .is_satisfied(&[1, 2]));
        assert!(!Constraint::AllDifferent(vec![x.clone(), y.clone()]).is_satisfied(&[2, 2]));
        let elem = Constraint::Element {
            index: VarId(0),
            array: vec![10, 20],
            target: y.clone(),
        };
        assert!(elem.is_satisfied(&[1, 20]));
        assert!(!elem.is_satisfied(&[2, 20]));
        assert!(Constraint::Holds(IntExpr::or(x, y)).is_satisfied(&[0, 1]));
    }

    #[test]
    fn test_constraint_vars() {
        let c = Constraint::Element {
            index: VarId(3),
            array: vec![1],
            target: IntExpr::Var(VarId(1)),
        };
        assert_eq!(c.vars(), vec![VarId(3), VarId(1)]);
        assert_eq!(c.kind(), "element");
    }

    #[test]
    fn test_model_display_is_deterministic() {
        let mut model = Model::new();
        let x = model.new_var("T.C[0]", Domain::values(vec![3, 1, 3]));
        model.add(Constraint::Holds(IntExpr::geq(IntExpr::Var(x), IntExpr::Const(1))));
        model.maximize(IntExpr::Var(x));
        assert_eq!(
            model.to_string(),
            "var x0 T.C[0] : [1, 3]\nconstraint holds(geq(x0, 1))\nmaximize x0\n"
        );
    }

    #[test]
    fn test_status_display() {
        assert_eq!(SolverStatus::Infeasible.to_string(), "INFEASIBLE");
        assert!(SolverStatus::Optimal.has_solution());
        assert!(!SolverStatus::Timeout.has_solution());
    }
}
