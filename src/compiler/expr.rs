//! # Expression Translator
//!
//! Lowers IR expressions to [`Slot`]s. Plain operands are evaluated on the
//! spot; as soon as one operand is decision-valued the operator becomes the
//! matching [`IntExpr`] combinator, with plain operands encoded as
//! constants.
//!
//! Column lookup depends on the scope:
//! - `Row`: the bound row of a table (decision variable for controllable
//!   columns) or of a derived relation
//! - `Group`: the grouping key; anything else is `GroupByColumnNotFound`
//! - `Member`: one member row of a group, inside an aggregate
//!
//! Constraint views go through [`CompileContext::assert_predicate`], the
//! top-level dispatch from predicate to solver constraint.

use super::{CompileContext, Env, Slot};
use crate::error::{ModelError, ModelResult};
use crate::ir::{AggregateFn, BinaryOp, ColumnRef, Expr};
use crate::model::{Constraint, IntExpr, Reduction};
use crate::value::Value;
use std::cmp::Ordering;

/// Rows of one group
#[derive(Debug, Clone)]
pub(crate) struct Group {
    pub key_columns: Vec<ColumnRef>,
    pub key: Vec<Value>,
    /// Member rows laid out as `layout`
    pub members: Vec<Vec<Slot>>,
    pub layout: Vec<ColumnRef>,
}

/// Where column references are looked up
pub(crate) enum Scope<'s> {
    Row(&'s Env),
    Group(&'s Group),
    Member {
        layout: &'s [ColumnRef],
        row: &'s [Slot],
    },
}

impl CompileContext<'_> {
    pub(super) fn lower(&mut self, expr: &Expr, scope: &Scope<'_>) -> ModelResult<Slot> {
        match expr {
            Expr::Column(c) => self.lower_column(c, scope),
            Expr::Literal(v) => Ok(Slot::Value(v.clone())),
            Expr::Binary {
                op: BinaryOp::In,
                left,
                right,
            } => match self.lower(left, scope)? {
                Slot::Var(_) => Err(ModelError::UnsupportedOperator(format!(
                    "decision-valued 'in' nested inside {expr}"
                ))),
                Slot::Value(v) => {
                    let members = self.plain_members(right, false)?;
                    Ok(Slot::Value(Value::Bool(!v.is_null() && members.contains(&v))))
                }
            },
            Expr::Binary { op, left, right } => {
                let l = self.lower(left, scope)?;
                let r = self.lower(right, scope)?;
                match (l, r) {
                    (Slot::Value(a), Slot::Value(b)) => eval_binary(*op, &a, &b).map(Slot::Value),
                    (a, b) => {
                        let a = self.to_int_expr(a)?;
                        let b = self.to_int_expr(b)?;
                        combine(*op, a, b).map(Slot::Var)
                    }
                }
            }
            Expr::Aggregate { func, arg } => self.lower_aggregate(*func, arg, scope),
            Expr::Subquery(q) => {
                let key = self.subquery_relation(q)?;
                let relation = self.relation_by_key(&key)?;
                if relation.len() != 1 {
                    return Err(ModelError::UnsupportedComprehensionShape(format!(
                        "subquery {q} used as a scalar yields {} rows",
                        relation.len()
                    )));
                }
                relation.first_column().next().cloned().ok_or_else(|| {
                    ModelError::UnsupportedComprehensionShape(format!("subquery {q} has no head"))
                })
            }
        }
    }

    fn lower_column(&self, column: &ColumnRef, scope: &Scope<'_>) -> ModelResult<Slot> {
        let not_found = || ModelError::GroupByColumnNotFound {
            table: column.table.clone(),
            column: column.column.clone(),
        };
        match scope {
            Scope::Row(env) => self.column_slot(column, env),
            Scope::Group(group) => group
                .key_columns
                .iter()
                .position(|k| k == column)
                .map(|i| Slot::Value(group.key[i].clone()))
                .ok_or_else(not_found),
            Scope::Member { layout, row } => layout
                .iter()
                .position(|k| k == column)
                .map(|i| row[i].clone())
                .ok_or_else(not_found),
        }
    }

    fn lower_aggregate(
        &mut self,
        func: AggregateFn,
        arg: &Expr,
        scope: &Scope<'_>,
    ) -> ModelResult<Slot> {
        let items: Vec<Slot> = if let Expr::Subquery(q) = arg {
            let key = self.subquery_relation(q)?;
            self.relation_by_key(&key)?.first_column().cloned().collect()
        } else {
            match scope {
                Scope::Group(group) => {
                    let mut items = Vec::with_capacity(group.members.len());
                    for member in &group.members {
                        let member_scope = Scope::Member {
                            layout: &group.layout,
                            row: member,
                        };
                        items.push(self.lower(arg, &member_scope)?);
                    }
                    items
                }
                Scope::Member { .. } => {
                    return Err(ModelError::InvalidAggregateUsage(format!(
                        "nested aggregate {}({arg})",
                        func.name()
                    )))
                }
                Scope::Row(_) => {
                    return Err(ModelError::InvalidAggregateUsage(format!(
                        "{}({arg}) outside an aggregating comprehension",
                        func.name()
                    )))
                }
            }
        };
        self.reduce(func, items)
    }

    /// One reduction contract for `sum`, `min` and `max`
    fn reduce(&mut self, func: AggregateFn, items: Vec<Slot>) -> ModelResult<Slot> {
        let op = match func {
            AggregateFn::Count => {
                return Err(ModelError::InvalidAggregateUsage(
                    "count() reached the compiler without being rewritten".to_string(),
                ))
            }
            AggregateFn::Sum => Reduction::Sum,
            AggregateFn::Min => Reduction::Min,
            AggregateFn::Max => Reduction::Max,
        };

        if items.iter().any(Slot::is_var) {
            let terms = items
                .into_iter()
                .filter(|s| !matches!(s, Slot::Value(Value::Null)))
                .map(|s| self.to_int_expr(s))
                .collect::<ModelResult<Vec<_>>>()?;
            return Ok(Slot::Var(IntExpr::Reduce { op, terms }));
        }

        let values: Vec<Value> = items
            .into_iter()
            .filter_map(|s| match s {
                Slot::Value(v) if !v.is_null() => Some(v),
                _ => None,
            })
            .collect();
        let out = match op {
            Reduction::Sum => sum_values(&values)?,
            Reduction::Min => values.into_iter().min().unwrap_or(Value::Null),
            Reduction::Max => values.into_iter().max().unwrap_or(Value::Null),
        };
        Ok(Slot::Value(out))
    }

    pub(super) fn to_int_expr(&mut self, slot: Slot) -> ModelResult<IntExpr> {
        match slot {
            Slot::Var(e) => Ok(e),
            Slot::Value(v) => self.encoder.encode(&v).map(IntExpr::Const).ok_or_else(|| {
                ModelError::UnsupportedOperator(format!(
                    "value {v} has no integer encoding for the solver"
                ))
            }),
        }
    }

    /// Cells of the relation column or subquery on the right of `in`
    fn membership_slots(&mut self, right: &Expr) -> ModelResult<Vec<Slot>> {
        match right {
            Expr::Column(c) => self.relation_column(&c.table, &c.column),
            Expr::Subquery(q) => {
                let key = self.subquery_relation(q)?;
                Ok(self.relation_by_key(&key)?.first_column().cloned().collect())
            }
            other => Err(ModelError::UnsupportedOperator(format!(
                "right side of 'in' must be a column or a subquery, got {other}"
            ))),
        }
    }

    /// Non-null members of `right`. Decision-valued members are a
    /// constraint-shape error when `asserted`, a comprehension-shape error
    /// anywhere else.
    fn plain_members(&mut self, right: &Expr, asserted: bool) -> ModelResult<Vec<Value>> {
        let mut values = Vec::new();
        for slot in self.membership_slots(right)? {
            match slot {
                Slot::Value(Value::Null) => {}
                Slot::Value(v) => values.push(v),
                Slot::Var(_) => {
                    let msg = format!("members of {right} depend on decision variables");
                    return Err(if asserted {
                        ModelError::UnsupportedConstraintShape(msg)
                    } else {
                        ModelError::UnsupportedComprehensionShape(msg)
                    });
                }
            }
        }
        Ok(values)
    }

    /// Assert a predicate of a constraint view as solver constraints
    pub(super) fn assert_predicate(
        &mut self,
        view: &str,
        expr: &Expr,
        scope: &Scope<'_>,
    ) -> ModelResult<()> {
        let Expr::Binary { op, left, right } = expr else {
            return Err(ModelError::UnsupportedConstraintShape(format!(
                "view '{view}' asserts {expr}, which is not a predicate"
            )));
        };

        let constraint = match op {
            BinaryOp::And => {
                self.assert_predicate(view, left, scope)?;
                return self.assert_predicate(view, right, scope);
            }
            BinaryOp::In => {
                let member = self.lower(left, scope)?;
                let values = self.plain_members(right, true)?;
                match member {
                    Slot::Value(v) => Constraint::Holds(IntExpr::Const(i64::from(
                        !v.is_null() && values.contains(&v),
                    ))),
                    Slot::Var(e) => {
                        let mut domain = values
                            .iter()
                            .map(|v| {
                                self.encoder.encode(v).ok_or_else(|| {
                                    ModelError::UnsupportedConstraintShape(format!(
                                        "member {v} of {right} has no integer encoding"
                                    ))
                                })
                            })
                            .collect::<ModelResult<Vec<i64>>>()?;
                        domain.sort_unstable();
                        domain.dedup();
                        Constraint::InDomain { expr: e, domain }
                    }
                }
            }
            BinaryOp::Or => match self.lower(expr, scope)? {
                Slot::Value(v) => Constraint::Holds(IntExpr::Const(i64::from(truth(&v)))),
                Slot::Var(e) => Constraint::Holds(e),
            },
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => {
                let l = self.lower(left, scope)?;
                let r = self.lower(right, scope)?;
                match (l, r) {
                    (Slot::Value(a), Slot::Value(b)) => {
                        let holds = truth(&eval_binary(*op, &a, &b)?);
                        Constraint::Holds(IntExpr::Const(i64::from(holds)))
                    }
                    (a, b) => {
                        let a = self.to_int_expr(a)?;
                        let b = self.to_int_expr(b)?;
                        comparison(*op, a, b)
                    }
                }
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                return Err(ModelError::UnsupportedConstraintShape(format!(
                    "view '{view}' asserts arithmetic '{}' at top level",
                    op.symbol()
                )))
            }
        };
        self.model.add(constraint);
        Ok(())
    }
}

fn comparison(op: BinaryOp, a: IntExpr, b: IntExpr) -> Constraint {
    match op {
        BinaryOp::Eq => Constraint::Equal(a, b),
        BinaryOp::Ne => Constraint::NotEqual(a, b),
        BinaryOp::Lt => Constraint::LessThan(a, b),
        BinaryOp::Le => Constraint::LessOrEqual(a, b),
        BinaryOp::Gt => Constraint::GreaterThan(a, b),
        _ => Constraint::GreaterOrEqual(a, b),
    }
}

/// Solver combinator for a binary operator
fn combine(op: BinaryOp, a: IntExpr, b: IntExpr) -> ModelResult<IntExpr> {
    Ok(match op {
        BinaryOp::Eq => IntExpr::eq(a, b),
        BinaryOp::Ne => IntExpr::ne(a, b),
        BinaryOp::Lt => IntExpr::lt(a, b),
        BinaryOp::Le => IntExpr::leq(a, b),
        BinaryOp::Gt => IntExpr::gt(a, b),
        BinaryOp::Ge => IntExpr::geq(a, b),
        BinaryOp::And => IntExpr::and(a, b),
        BinaryOp::Or => IntExpr::or(a, b),
        BinaryOp::Add => IntExpr::plus(a, b),
        BinaryOp::Sub => IntExpr::minus(a, b),
        BinaryOp::Mul => IntExpr::mult(a, b),
        BinaryOp::Div => {
            if b == IntExpr::Const(0) {
                return Err(ModelError::UnsupportedOperator(format!(
                    "division of {a} by zero"
                )));
            }
            IntExpr::div(a, b)
        }
        BinaryOp::In => {
            return Err(ModelError::UnsupportedOperator(
                "decision-valued 'in' inside an expression".to_string(),
            ))
        }
    })
}

fn truth(v: &Value) -> bool {
    v.as_bool().unwrap_or(false)
}

/// Order of two plain values; `None` when they are not comparable
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Some(x.cmp(&y));
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

/// Value-level operator. Comparisons involving `Null` are false;
/// arithmetic with `Null` yields `Null`.
pub(super) fn eval_binary(op: BinaryOp, a: &Value, b: &Value) -> ModelResult<Value> {
    let either_null = a.is_null() || b.is_null();
    match op {
        BinaryOp::And => Ok(Value::Bool(truth(a) && truth(b))),
        BinaryOp::Or => Ok(Value::Bool(truth(a) || truth(b))),
        BinaryOp::Eq => Ok(Value::Bool(
            !either_null && compare(a, b) == Some(Ordering::Equal),
        )),
        BinaryOp::Ne => Ok(Value::Bool(
            !either_null && compare(a, b) != Some(Ordering::Equal),
        )),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            if either_null {
                return Ok(Value::Bool(false));
            }
            let ord = compare(a, b).ok_or_else(|| {
                ModelError::UnsupportedOperator(format!("cannot compare {a} with {b}"))
            })?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ord.is_lt(),
                BinaryOp::Le => ord.is_le(),
                BinaryOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            }))
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            if either_null {
                return Ok(Value::Null);
            }
            arithmetic(op, a, b)
        }
        BinaryOp::In => Err(ModelError::UnsupportedOperator(
            "'in' expects a column or subquery on its right side".to_string(),
        )),
    }
}

fn arithmetic(op: BinaryOp, a: &Value, b: &Value) -> ModelResult<Value> {
    let fail = |what: &str| {
        ModelError::UnsupportedOperator(format!("{what} in {a} {} {b}", op.symbol()))
    };

    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        let out = match op {
            BinaryOp::Add => x.checked_add(y),
            BinaryOp::Sub => x.checked_sub(y),
            BinaryOp::Mul => x.checked_mul(y),
            _ => {
                if y == 0 {
                    return Err(fail("division by zero"));
                }
                x.checked_div(y)
            }
        };
        return out.map(Value::Int).ok_or_else(|| fail("integer overflow"));
    }

    let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
        return Err(fail("non-numeric operand"));
    };
    let out = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        _ => {
            if y == 0.0 {
                return Err(fail("division by zero"));
            }
            x / y
        }
    };
    Ok(Value::Float(out))
}

fn sum_values(values: &[Value]) -> ModelResult<Value> {
    let mut int_sum: Option<i64> = Some(0);
    let mut float_sum = 0.0;
    let mut any_float = false;
    for v in values {
        match v {
            Value::Float(f) => {
                any_float = true;
                float_sum += f;
            }
            other => {
                let x = other.as_i64().ok_or_else(|| {
                    ModelError::UnsupportedOperator(format!("sum over non-numeric value {other}"))
                })?;
                int_sum = int_sum.and_then(|s| s.checked_add(x));
                float_sum += x as f64;
            }
        }
    }
    if any_float {
        return Ok(Value::Float(float_sum));
    }
    int_sum
        .map(Value::Int)
        .ok_or_else(|| ModelError::UnsupportedOperator("integer overflow in sum".to_string()))
}
