//! Model → z3 AST lowering
//!
//! Every [`IntExpr`] becomes a z3 `Int`. Comparisons and boolean
//! connectives are reified to 0/1 with `ite`, and an integer counts as true
//! when it is nonzero, so nested boolean terms compose the same way
//! [`IntExpr::eval`] computes them.
//!
//! Terms that `eval` leaves undefined (division by zero, `min`/`max` of
//! nothing, unknown variables) add a side condition that rules the
//! assignment out.

use crate::model::{Constraint, Domain, IntExpr, IntOp, Reduction, VarId};
use z3::ast::{Ast, Bool, Int};
use z3::Context;

pub(super) struct Lowering<'ctx> {
    ctx: &'ctx Context,
    vars: Vec<Int<'ctx>>,
    zero: Int<'ctx>,
    one: Int<'ctx>,
    side_conditions: Vec<Bool<'ctx>>,
}

impl<'ctx> Lowering<'ctx> {
    /// One integer constant per model variable, named by index
    pub(super) fn new(ctx: &'ctx Context, num_vars: usize) -> Self {
        Lowering {
            ctx,
            vars: (0..num_vars)
                .map(|i| Int::new_const(ctx, format!("x{i}")))
                .collect(),
            zero: Int::from_i64(ctx, 0),
            one: Int::from_i64(ctx, 1),
            side_conditions: Vec::new(),
        }
    }

    pub(super) fn vars(&self) -> &[Int<'ctx>] {
        &self.vars
    }

    pub(super) fn side_conditions(&self) -> &[Bool<'ctx>] {
        &self.side_conditions
    }

    /// Domain membership of variable `var`; unbounded variables get `default`
    pub(super) fn domain(&self, var: VarId, domain: &Domain, default: (i64, i64)) -> Bool<'ctx> {
        let Some(x) = self.vars.get(var.index()) else {
            return Bool::from_bool(self.ctx, false);
        };
        match domain {
            Domain::Unbounded => self.between(x, default.0, default.1),
            Domain::Range { lo, hi } => self.between(x, *lo, *hi),
            Domain::Values(values) => self.one_of(x, values),
        }
    }

    pub(super) fn constraint(&mut self, constraint: &Constraint) -> Bool<'ctx> {
        match constraint {
            Constraint::Equal(a, b) => self.int(a)._eq(&self.int(b)),
            Constraint::NotEqual(a, b) => self.int(a)._eq(&self.int(b)).not(),
            Constraint::LessThan(a, b) => self.int(a).lt(&self.int(b)),
            Constraint::LessOrEqual(a, b) => self.int(a).le(&self.int(b)),
            Constraint::GreaterThan(a, b) => self.int(a).gt(&self.int(b)),
            Constraint::GreaterOrEqual(a, b) => self.int(a).ge(&self.int(b)),
            Constraint::InDomain { expr, domain } => {
                let x = self.int(expr);
                self.one_of(&x, domain)
            }
            Constraint::AllDifferent(exprs) => {
                let terms: Vec<Int<'ctx>> = exprs.iter().map(|e| self.int(e)).collect();
                if terms.len() < 2 {
                    return Bool::from_bool(self.ctx, true);
                }
                let refs: Vec<&Int<'ctx>> = terms.iter().collect();
                Int::distinct(self.ctx, &refs)
            }
            Constraint::Element {
                index,
                array,
                target,
            } => {
                let target = self.int(target);
                let index = self.int(&IntExpr::Var(*index));
                let cases: Vec<Bool<'ctx>> = array
                    .iter()
                    .enumerate()
                    .map(|(i, &value)| {
                        Bool::and(
                            self.ctx,
                            &[
                                &index._eq(&Int::from_i64(self.ctx, i as i64)),
                                &target._eq(&Int::from_i64(self.ctx, value)),
                            ],
                        )
                    })
                    .collect();
                self.any(&cases)
            }
            Constraint::Holds(e) => {
                let x = self.int(e);
                self.truth(&x)
            }
        }
    }

    pub(super) fn int(&mut self, expr: &IntExpr) -> Int<'ctx> {
        match expr {
            IntExpr::Const(c) => Int::from_i64(self.ctx, *c),
            IntExpr::Var(v) => match self.vars.get(v.index()) {
                Some(x) => x.clone(),
                None => self.undefined(),
            },
            IntExpr::Binary { op, left, right } => {
                let a = self.int(left);
                let b = self.int(right);
                self.binary(*op, &a, &b)
            }
            IntExpr::Reduce { op, terms } => {
                let terms: Vec<Int<'ctx>> = terms.iter().map(|t| self.int(t)).collect();
                self.reduce(*op, terms)
            }
        }
    }

    fn binary(&mut self, op: IntOp, a: &Int<'ctx>, b: &Int<'ctx>) -> Int<'ctx> {
        match op {
            IntOp::Plus => Int::add(self.ctx, &[a, b]),
            IntOp::Minus => Int::sub(self.ctx, &[a, b]),
            IntOp::Mult => Int::mul(self.ctx, &[a, b]),
            IntOp::Div => self.truncating_div(a, b),
            IntOp::Eq => self.reify(&a._eq(b)),
            IntOp::Ne => self.reify(&a._eq(b).not()),
            IntOp::Lt => self.reify(&a.lt(b)),
            IntOp::Le => self.reify(&a.le(b)),
            IntOp::Gt => self.reify(&a.gt(b)),
            IntOp::Ge => self.reify(&a.ge(b)),
            IntOp::And => {
                let both = Bool::and(self.ctx, &[&self.truth(a), &self.truth(b)]);
                self.reify(&both)
            }
            IntOp::Or => {
                let either = Bool::or(self.ctx, &[&self.truth(a), &self.truth(b)]);
                self.reify(&either)
            }
        }
    }

    /// Integer division rounding toward zero, like `i64::checked_div`.
    /// z3's `div` keeps the remainder non-negative, so negative dividends
    /// with a remainder are shifted one step back toward zero.
    fn truncating_div(&mut self, a: &Int<'ctx>, b: &Int<'ctx>) -> Int<'ctx> {
        self.side_conditions.push(b._eq(&self.zero).not());
        let q = a.div(b);
        let exact = Bool::or(
            self.ctx,
            &[&a.ge(&self.zero), &a.modulo(b)._eq(&self.zero)],
        );
        let toward_zero = b.gt(&self.zero).ite(
            &Int::add(self.ctx, &[&q, &self.one]),
            &Int::sub(self.ctx, &[&q, &self.one]),
        );
        exact.ite(&q, &toward_zero)
    }

    fn reduce(&mut self, op: Reduction, terms: Vec<Int<'ctx>>) -> Int<'ctx> {
        if op == Reduction::Sum {
            if terms.is_empty() {
                return self.zero.clone();
            }
            let refs: Vec<&Int<'ctx>> = terms.iter().collect();
            return Int::add(self.ctx, &refs);
        }
        let mut terms = terms.into_iter();
        let Some(first) = terms.next() else {
            return self.undefined();
        };
        terms.fold(first, |acc, t| {
            let better = if op == Reduction::Min {
                t.lt(&acc)
            } else {
                t.gt(&acc)
            };
            better.ite(&t, &acc)
        })
    }

    fn undefined(&mut self) -> Int<'ctx> {
        self.side_conditions.push(Bool::from_bool(self.ctx, false));
        self.zero.clone()
    }

    fn reify(&self, b: &Bool<'ctx>) -> Int<'ctx> {
        b.ite(&self.one, &self.zero)
    }

    fn truth(&self, x: &Int<'ctx>) -> Bool<'ctx> {
        x._eq(&self.zero).not()
    }

    fn between(&self, x: &Int<'ctx>, lo: i64, hi: i64) -> Bool<'ctx> {
        Bool::and(
            self.ctx,
            &[
                &x.ge(&Int::from_i64(self.ctx, lo)),
                &x.le(&Int::from_i64(self.ctx, hi)),
            ],
        )
    }

    fn one_of(&self, x: &Int<'ctx>, values: &[i64]) -> Bool<'ctx> {
        let cases: Vec<Bool<'ctx>> = values
            .iter()
            .map(|&v| x._eq(&Int::from_i64(self.ctx, v)))
            .collect();
        self.any(&cases)
    }

    /// Disjunction; false when there is nothing to choose from
    fn any(&self, cases: &[Bool<'ctx>]) -> Bool<'ctx> {
        if cases.is_empty() {
            return Bool::from_bool(self.ctx, false);
        }
        let refs: Vec<&Bool<'ctx>> = cases.iter().collect();
        Bool::or(self.ctx, &refs)
    }
}
