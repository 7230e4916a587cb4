//! # Type & Variable Classifier
//!
//! Infers, for every expression, its scalar type and whether its value
//! depends on a decision variable. The compiler uses the first to pick the
//! output type of a tuple slot and the second to choose between plain value
//! evaluation and the solver combinator family.

use crate::error::{ModelError, ModelResult};
use crate::ir::{AggregateFn, BinaryOp, Expr, Query};
use crate::value::{DataType, Value};

/// Inferred type of an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExprType {
    pub scalar: DataType,
    /// Depends on at least one controllable column
    pub decision: bool,
}

impl ExprType {
    pub fn constant(scalar: DataType) -> Self {
        ExprType {
            scalar,
            decision: false,
        }
    }

    pub fn decision(scalar: DataType) -> Self {
        ExprType {
            scalar,
            decision: true,
        }
    }
}

/// Infer the type of an expression
pub fn infer(expr: &Expr) -> ModelResult<ExprType> {
    match expr {
        Expr::Column(c) => Ok(ExprType {
            scalar: c.data_type,
            decision: c.controllable,
        }),
        Expr::Literal(v) => Ok(ExprType::constant(literal_type(v))),
        Expr::Binary { op, left, right } => {
            let l = infer(left)?;
            let r = infer(right)?;
            let decision = l.decision || r.decision;
            let scalar = if op.is_predicate() {
                DataType::Bool
            } else {
                promote(*op, l.scalar, r.scalar)?
            };
            Ok(ExprType { scalar, decision })
        }
        Expr::Aggregate { func, arg } => {
            let a = infer(arg)?;
            let scalar = match func {
                AggregateFn::Count => return Ok(ExprType::constant(DataType::Int)),
                AggregateFn::Sum => match a.scalar {
                    DataType::Bool | DataType::Int => DataType::Int,
                    DataType::Float => DataType::Float,
                    DataType::String => {
                        return Err(ModelError::UnsupportedOperator(format!(
                            "sum over string expression {arg}"
                        )))
                    }
                },
                AggregateFn::Min | AggregateFn::Max => a.scalar,
            };
            Ok(ExprType {
                scalar,
                decision: a.decision,
            })
        }
        Expr::Subquery(q) => infer_query(q),
    }
}

/// Type of a nested comprehension: its first head expression's type,
/// decision-valued when any head expression is
pub fn infer_query(query: &Query) -> ModelResult<ExprType> {
    let first = query.head.first().ok_or_else(|| {
        ModelError::UnsupportedComprehensionShape(format!("comprehension without head: {query}"))
    })?;
    let mut ty = infer(&first.expr)?;
    for item in &query.head[1..] {
        ty.decision |= infer(&item.expr)?.decision;
    }
    Ok(ty)
}

/// Shorthand for `infer(expr)?.decision`
pub fn is_decision(expr: &Expr) -> ModelResult<bool> {
    Ok(infer(expr)?.decision)
}

fn literal_type(value: &Value) -> DataType {
    // Null literals carry no type; they behave as int for promotion
    value.data_type().unwrap_or(DataType::Int)
}

/// Numeric promotion for arithmetic: bool widens to int, int+float is float
fn promote(op: BinaryOp, l: DataType, r: DataType) -> ModelResult<DataType> {
    if l == DataType::String || r == DataType::String {
        return Err(ModelError::UnsupportedOperator(format!(
            "arithmetic '{}' on string operands",
            op.symbol()
        )));
    }
    if l == DataType::Float || r == DataType::Float {
        Ok(DataType::Float)
    } else {
        Ok(DataType::Int)
    }
}
