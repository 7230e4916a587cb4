//! # Rewrite Passes
//!
//! Tree-to-tree normalizations applied before model compilation, always in
//! this order:
//!
//! - Count elimination: `count(T.c)` -> `sum(1)`
//! - Arity normalization: decision-valued row predicates of a summed
//!   comprehension move into the summand as 0/1 factors:
//!   `sum([e | ..., p1, p2])` -> `sum([e * p1 * p2 | ...])`
//!
//! ```text
//! View (from caller) -> [RewritePipeline] -> Normalized View -> Model Compiler
//! ```
//!
//! Arity normalization turns a sum over a decision-dependent number of rows
//! into a sum over a fixed number of rows whose excluded elements
//! contribute zero. `min` and `max` have no such encoding and are left
//! untouched; the compiler rejects them when they still see variable
//! predicates. Both passes are idempotent.

use crate::classify;
use crate::error::{ModelError, ModelResult};
use crate::ir::{AggregateFn, Expr, HeadItem, Qualifier, Query, View};

/// Counters for what the pipeline rewrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteStats {
    /// `count` aggregates replaced by `sum(1)`
    pub counts_eliminated: usize,
    /// Variable predicates folded into sum arguments
    pub predicates_folded: usize,
    /// Comprehensions whose arity was normalized
    pub comprehensions_normalized: usize,
}

/// Fixed-order rewrite pipeline
#[derive(Debug, Default)]
pub struct RewritePipeline {
    stats: RewriteStats,
}

impl RewritePipeline {
    pub fn new() -> Self {
        RewritePipeline::default()
    }

    pub fn stats(&self) -> RewriteStats {
        self.stats
    }

    /// Rewrite a view's comprehension, keeping its name and kind
    pub fn rewrite_view(&mut self, view: &View) -> ModelResult<View> {
        Ok(View {
            name: view.name.clone(),
            kind: view.kind,
            query: self.rewrite(&view.query)?,
        })
    }

    /// Count elimination, then arity normalization
    pub fn rewrite(&mut self, query: &Query) -> ModelResult<Query> {
        let query = self.eliminate_count_query(query.clone())?;
        self.normalize_arity_query(query)
    }

    // Count elimination

    fn eliminate_count_query(&mut self, query: Query) -> ModelResult<Query> {
        let head = query
            .head
            .into_iter()
            .map(|item| {
                Ok(HeadItem {
                    expr: self.eliminate_count(item.expr)?,
                    alias: item.alias,
                })
            })
            .collect::<ModelResult<Vec<_>>>()?;
        let qualifiers = query
            .qualifiers
            .into_iter()
            .map(|q| self.map_qualifier(q, Self::eliminate_count))
            .collect::<ModelResult<Vec<_>>>()?;
        Ok(Query { head, qualifiers })
    }

    /// Rule: `count(column)` -> `sum(1)`
    fn eliminate_count(&mut self, expr: Expr) -> ModelResult<Expr> {
        match expr {
            Expr::Aggregate {
                func: AggregateFn::Count,
                arg,
            } => match *arg {
                Expr::Column(_) => {
                    self.stats.counts_eliminated += 1;
                    Ok(Expr::sum(Expr::lit(1_i64)))
                }
                other => Err(ModelError::InvalidAggregateUsage(format!(
                    "count() expects a column argument, got {other}"
                ))),
            },
            Expr::Aggregate { func, arg } => Ok(Expr::aggregate(func, self.eliminate_count(*arg)?)),
            Expr::Binary { op, left, right } => Ok(Expr::binary(
                op,
                self.eliminate_count(*left)?,
                self.eliminate_count(*right)?,
            )),
            Expr::Subquery(q) => Ok(Expr::subquery(self.eliminate_count_query(*q)?)),
            Expr::Column(_) | Expr::Literal(_) => Ok(expr),
        }
    }

    fn map_qualifier(
        &mut self,
        qualifier: Qualifier,
        f: fn(&mut Self, Expr) -> ModelResult<Expr>,
    ) -> ModelResult<Qualifier> {
        Ok(match qualifier {
            Qualifier::Join(e) => Qualifier::Join(f(self, e)?),
            Qualifier::Filter(e) => Qualifier::Filter(f(self, e)?),
            Qualifier::Aggregate(e) => Qualifier::Aggregate(f(self, e)?),
            other @ (Qualifier::Generator(_) | Qualifier::GroupBy(_)) => other,
        })
    }

    // Arity normalization

    fn normalize_arity_query(&mut self, query: Query) -> ModelResult<Query> {
        // Inner comprehensions first
        let head = query
            .head
            .into_iter()
            .map(|item| {
                Ok(HeadItem {
                    expr: self.normalize_arity(item.expr)?,
                    alias: item.alias,
                })
            })
            .collect::<ModelResult<Vec<_>>>()?;
        let qualifiers = query
            .qualifiers
            .into_iter()
            .map(|q| self.map_qualifier(q, Self::normalize_arity))
            .collect::<ModelResult<Vec<_>>>()?;
        let query = Query { head, qualifiers };

        if !query.is_aggregating() {
            return Ok(query);
        }
        let folded = variable_row_predicates(&query)?;
        if folded.is_empty() || !only_sums(&query) {
            return Ok(query);
        }

        self.stats.comprehensions_normalized += 1;
        self.stats.predicates_folded += folded.len();
        let factors: Vec<Expr> = folded
            .iter()
            .filter_map(|&i| query.qualifiers[i].expr().cloned())
            .collect();

        let head = query
            .head
            .into_iter()
            .map(|item| HeadItem {
                expr: fold_into_sums(item.expr, &factors),
                alias: item.alias,
            })
            .collect();
        let qualifiers = query
            .qualifiers
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !folded.contains(i))
            .map(|(_, q)| match q {
                Qualifier::Aggregate(e) => Qualifier::Aggregate(fold_into_sums(e, &factors)),
                other => other,
            })
            .collect();
        Ok(Query { head, qualifiers })
    }

    /// Rule: `sum([e | ..., p])` with decision-valued `p` and a single head
    /// expression -> `sum([e * p | ...])`
    fn normalize_arity(&mut self, expr: Expr) -> ModelResult<Expr> {
        match expr {
            Expr::Aggregate {
                func: AggregateFn::Sum,
                arg,
            } => match *arg {
                Expr::Subquery(q) => {
                    let inner = self.normalize_arity_query(*q)?;
                    Ok(Expr::sum(Expr::subquery(self.fold_subquery(inner)?)))
                }
                other => Ok(Expr::sum(self.normalize_arity(other)?)),
            },
            Expr::Aggregate { func, arg } => Ok(Expr::aggregate(func, self.normalize_arity(*arg)?)),
            Expr::Binary { op, left, right } => Ok(Expr::binary(
                op,
                self.normalize_arity(*left)?,
                self.normalize_arity(*right)?,
            )),
            Expr::Subquery(q) => Ok(Expr::subquery(self.normalize_arity_query(*q)?)),
            Expr::Column(_) | Expr::Literal(_) => Ok(expr),
        }
    }

    fn fold_subquery(&mut self, query: Query) -> ModelResult<Query> {
        if query.head.len() != 1 || query.is_aggregating() {
            return Ok(query);
        }
        let folded = variable_row_predicates(&query)?;
        if folded.is_empty() {
            return Ok(query);
        }

        self.stats.comprehensions_normalized += 1;
        self.stats.predicates_folded += folded.len();
        let mut head = query.head;
        let mut qualifiers = Vec::with_capacity(query.qualifiers.len());
        for (i, q) in query.qualifiers.into_iter().enumerate() {
            if folded.contains(&i) {
                if let Some(p) = q.expr() {
                    head[0].expr = head[0].expr.clone().times(p.clone());
                }
            } else {
                qualifiers.push(q);
            }
        }
        Ok(Query { head, qualifiers })
    }
}

/// Positions of decision-valued join/filter qualifiers
fn variable_row_predicates(query: &Query) -> ModelResult<Vec<usize>> {
    let mut out = Vec::new();
    for (i, q) in query.qualifiers.iter().enumerate() {
        if let Qualifier::Join(e) | Qualifier::Filter(e) = q {
            if !e.contains_aggregate() && classify::is_decision(e)? {
                out.push(i);
            }
        }
    }
    Ok(out)
}

/// True when every aggregate in the head and aggregate predicates is a sum
fn only_sums(query: &Query) -> bool {
    fn check(expr: &Expr) -> bool {
        match expr {
            Expr::Aggregate { func, .. } => *func == AggregateFn::Sum,
            Expr::Binary { left, right, .. } => check(left) && check(right),
            Expr::Column(_) | Expr::Literal(_) | Expr::Subquery(_) => true,
        }
    }
    query.head.iter().all(|h| check(&h.expr))
        && query.qualifiers.iter().all(|q| match q {
            Qualifier::Aggregate(e) | Qualifier::Filter(e) => check(e),
            _ => true,
        })
}

/// Multiply the argument of every top-level sum by the given factors
fn fold_into_sums(expr: Expr, factors: &[Expr]) -> Expr {
    match expr {
        Expr::Aggregate {
            func: AggregateFn::Sum,
            arg,
        } if !matches!(*arg, Expr::Subquery(_)) => {
            let arg = factors
                .iter()
                .fold(*arg, |acc, p| acc.times(p.clone()));
            Expr::sum(arg)
        }
        Expr::Binary { op, left, right } => Expr::binary(
            op,
            fold_into_sums(*left, factors),
            fold_into_sums(*right, factors),
        ),
        other => other,
    }
}
