//! Integer expressions over decision variables
//!
//! `IntExpr` is the combinator family the compiler lowers decision-valued IR
//! into. Comparisons and boolean connectives are reified: they evaluate to
//! 0 or 1 and can be multiplied, summed or asserted.

use super::VarId;
use std::fmt;

/// Binary combinators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntOp {
    Plus,
    Minus,
    Mult,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl IntOp {
    pub fn name(&self) -> &'static str {
        match self {
            IntOp::Plus => "plus",
            IntOp::Minus => "minus",
            IntOp::Mult => "mult",
            IntOp::Div => "div",
            IntOp::Eq => "eq",
            IntOp::Ne => "ne",
            IntOp::Lt => "lt",
            IntOp::Le => "leq",
            IntOp::Gt => "gt",
            IntOp::Ge => "geq",
            IntOp::And => "and",
            IntOp::Or => "or",
        }
    }
}

/// Vectorized reductions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reduction {
    Sum,
    Min,
    Max,
}

impl Reduction {
    pub fn name(&self) -> &'static str {
        match self {
            Reduction::Sum => "sum",
            Reduction::Min => "min",
            Reduction::Max => "max",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IntExpr {
    Const(i64),
    Var(VarId),
    Binary {
        op: IntOp,
        left: Box<IntExpr>,
        right: Box<IntExpr>,
    },
    Reduce {
        op: Reduction,
        terms: Vec<IntExpr>,
    },
}

impl IntExpr {
    pub fn binary(op: IntOp, left: IntExpr, right: IntExpr) -> Self {
        IntExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn plus(a: IntExpr, b: IntExpr) -> Self {
        IntExpr::binary(IntOp::Plus, a, b)
    }

    pub fn minus(a: IntExpr, b: IntExpr) -> Self {
        IntExpr::binary(IntOp::Minus, a, b)
    }

    pub fn mult(a: IntExpr, b: IntExpr) -> Self {
        IntExpr::binary(IntOp::Mult, a, b)
    }

    pub fn div(a: IntExpr, b: IntExpr) -> Self {
        IntExpr::binary(IntOp::Div, a, b)
    }

    pub fn eq(a: IntExpr, b: IntExpr) -> Self {
        IntExpr::binary(IntOp::Eq, a, b)
    }

    pub fn ne(a: IntExpr, b: IntExpr) -> Self {
        IntExpr::binary(IntOp::Ne, a, b)
    }

    pub fn lt(a: IntExpr, b: IntExpr) -> Self {
        IntExpr::binary(IntOp::Lt, a, b)
    }

    pub fn leq(a: IntExpr, b: IntExpr) -> Self {
        IntExpr::binary(IntOp::Le, a, b)
    }

    pub fn gt(a: IntExpr, b: IntExpr) -> Self {
        IntExpr::binary(IntOp::Gt, a, b)
    }

    pub fn geq(a: IntExpr, b: IntExpr) -> Self {
        IntExpr::binary(IntOp::Ge, a, b)
    }

    pub fn and(a: IntExpr, b: IntExpr) -> Self {
        IntExpr::binary(IntOp::And, a, b)
    }

    pub fn or(a: IntExpr, b: IntExpr) -> Self {
        IntExpr::binary(IntOp::Or, a, b)
    }

    pub fn sum(terms: Vec<IntExpr>) -> Self {
        IntExpr::Reduce {
            op: Reduction::Sum,
            terms,
        }
    }

    pub fn min(terms: Vec<IntExpr>) -> Self {
        IntExpr::Reduce {
            op: Reduction::Min,
            terms,
        }
    }

    pub fn max(terms: Vec<IntExpr>) -> Self {
        IntExpr::Reduce {
            op: Reduction::Max,
            terms,
        }
    }

    /// Distinct variables in first-occurrence order
    pub fn collect_vars(&self, out: &mut Vec<VarId>) {
        match self {
            IntExpr::Const(_) => {}
            IntExpr::Var(v) => {
                if !out.contains(v) {
                    out.push(*v);
                }
            }
            IntExpr::Binary { left, right, .. } => {
                left.collect_vars(out);
                right.collect_vars(out);
            }
            IntExpr::Reduce { terms, .. } => {
                for t in terms {
                    t.collect_vars(out);
                }
            }
        }
    }

    pub fn vars(&self) -> Vec<VarId> {
        let mut out = Vec::new();
        self.collect_vars(&mut out);
        out
    }

    /// Evaluate under a full assignment.
    ///
    /// `None` when the value is undefined (division by zero, overflow, or a
    /// min/max over no terms).
    pub fn eval(&self, values: &[i64]) -> Option<i64> {
        match self {
            IntExpr::Const(c) => Some(*c),
            IntExpr::Var(v) => values.get(v.index()).copied(),
            IntExpr::Binary { op, left, right } => {
                let a = left.eval(values)?;
                let b = right.eval(values)?;
                apply(*op, a, b)
            }
            IntExpr::Reduce { op, terms } => {
                let mut acc: Option<i64> = None;
                for t in terms {
                    let v = t.eval(values)?;
                    acc = Some(match (op, acc) {
                        (_, None) => v,
                        (Reduction::Sum, Some(a)) => a.checked_add(v)?,
                        (Reduction::Min, Some(a)) => a.min(v),
                        (Reduction::Max, Some(a)) => a.max(v),
                    });
                }
                match (op, acc) {
                    (Reduction::Sum, None) => Some(0),
                    (_, acc) => acc,
                }
            }
        }
    }
}

fn apply(op: IntOp, a: i64, b: i64) -> Option<i64> {
    let truth = |b: bool| Some(i64::from(b));
    match op {
        IntOp::Plus => a.checked_add(b),
        IntOp::Minus => a.checked_sub(b),
        IntOp::Mult => a.checked_mul(b),
        IntOp::Div => a.checked_div(b),
        IntOp::Eq => truth(a == b),
        IntOp::Ne => truth(a != b),
        IntOp::Lt => truth(a < b),
        IntOp::Le => truth(a <= b),
        IntOp::Gt => truth(a > b),
        IntOp::Ge => truth(a >= b),
        IntOp::And => truth(a != 0 && b != 0),
        IntOp::Or => truth(a != 0 || b != 0),
    }
}

impl fmt::Display for IntExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntExpr::Const(c) => write!(f, "{c}"),
            IntExpr::Var(v) => write!(f, "{v}"),
            IntExpr::Binary { op, left, right } => write!(f, "{}({left}, {right})", op.name()),
            IntExpr::Reduce { op, terms } => {
                write!(f, "{}[", op.name())?;
                for (i, t) in terms.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x() -> IntExpr {
        IntExpr::Var(VarId(0))
    }

    fn y() -> IntExpr {
        IntExpr::Var(VarId(1))
    }

    #[test]
    fn test_eval_reified_and_arithmetic() {
        let e = IntExpr::plus(IntExpr::mult(x(), IntExpr::Const(3)), IntExpr::eq(x(), y()));
        assert_eq!(e.eval(&[2, 2]), Some(7));
        assert_eq!(e.eval(&[2, 5]), Some(6));
        assert_eq!(IntExpr::div(x(), y()).eval(&[4, 0]), None);
    }

    #[test]
    fn test_eval_reductions() {
        assert_eq!(IntExpr::sum(vec![]).eval(&[]), Some(0));
        assert_eq!(IntExpr::min(vec![]).eval(&[]), None);
        let e = IntExpr::max(vec![x(), y(), IntExpr::Const(4)]);
        assert_eq!(e.eval(&[1, 9]), Some(9));
    }

    #[test]
    fn test_collect_vars_distinct() {
        let e = IntExpr::sum(vec![x(), y(), IntExpr::mult(x(), IntExpr::Const(2))]);
        assert_eq!(e.vars(), vec![VarId(0), VarId(1)]);
        assert_eq!(e.to_string(), "sum[x0, x1, mult(x0, 2)]");
    }
}
