//! IR types for placement policies, shared by the rewrite passes, the
//! classifiers and the model compiler.
//!
//! A policy is a set of views. Each view is a monoid comprehension:
//!
//! ```text
//! [ head_1, head_2, ... | qualifier_1, qualifier_2, ... ]
//! ```
//!
//! Qualifiers are row generators (`POD`), join predicates
//! (`POD.node = NODE.name`), filter predicates (`NODE.cap >= 1`), aggregate
//! predicates (`sum(POD.cpu) <= NODE.cap`) and at most one group-by.
//!
//! Nodes are plain tagged unions; passes consume them with exhaustive
//! `match` and build new trees instead of mutating shared ones.

use crate::value::{DataType, Value};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Reference to `table.column`.
///
/// Equality and hashing ignore case, so `pod.Node` and `POD.NODE` are the
/// same column.
#[derive(Debug, Clone)]
pub struct ColumnRef {
    /// Table name, or the alias of the generator binding it
    pub table: String,
    pub column: String,
    pub data_type: DataType,
    pub controllable: bool,
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, column: impl Into<String>, data_type: DataType) -> Self {
        ColumnRef {
            table: table.into(),
            column: column.into(),
            data_type,
            controllable: false,
        }
    }

    pub fn controllable(
        table: impl Into<String>,
        column: impl Into<String>,
        data_type: DataType,
    ) -> Self {
        ColumnRef {
            table: table.into(),
            column: column.into(),
            data_type,
            controllable: true,
        }
    }

    /// Normalized `TABLE.COLUMN` key
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.table.to_uppercase(), self.column.to_uppercase())
    }

    /// True when this column is bound by the generator named `binding`
    pub fn is_bound_by(&self, binding: &str) -> bool {
        self.table.eq_ignore_ascii_case(binding)
    }
}

impl PartialEq for ColumnRef {
    fn eq(&self, other: &Self) -> bool {
        self.table.eq_ignore_ascii_case(&other.table)
            && self.column.eq_ignore_ascii_case(&other.column)
    }
}

impl Eq for ColumnRef {}

impl Hash for ColumnRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.table.to_uppercase().hash(state);
        self.column.to_uppercase().hash(state);
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    In,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::In => "in",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }

    /// Parse an operator symbol (SQL spellings accepted)
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let op = match symbol.to_lowercase().as_str() {
            "=" | "==" => BinaryOp::Eq,
            "!=" | "<>" => BinaryOp::Ne,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::Le,
            ">" => BinaryOp::Gt,
            ">=" => BinaryOp::Ge,
            "and" | "&&" => BinaryOp::And,
            "or" | "||" => BinaryOp::Or,
            "in" => BinaryOp::In,
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            _ => return None,
        };
        Some(op)
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div
        )
    }

    /// Operators whose result is a truth value
    pub fn is_predicate(&self) -> bool {
        self.is_comparison() || self.is_logical() || *self == BinaryOp::In
    }
}

/// Aggregate function types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFn {
    /// Number of rows; rewritten to `sum(1)` before compilation
    Count,
    Sum,
    Min,
    Max,
}

impl AggregateFn {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFn::Count => "count",
            AggregateFn::Sum => "sum",
            AggregateFn::Min => "min",
            AggregateFn::Max => "max",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "count" => Some(AggregateFn::Count),
            "sum" => Some(AggregateFn::Sum),
            "min" => Some(AggregateFn::Min),
            "max" => Some(AggregateFn::Max),
            _ => None,
        }
    }
}

/// Expression node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Column(ColumnRef),
    Literal(Value),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Aggregate {
        func: AggregateFn,
        arg: Box<Expr>,
    },
    /// Nested comprehension
    Subquery(Box<Query>),
}

impl Expr {
    pub fn col(column: ColumnRef) -> Self {
        Expr::Column(column)
    }

    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn aggregate(func: AggregateFn, arg: Expr) -> Self {
        Expr::Aggregate {
            func,
            arg: Box::new(arg),
        }
    }

    pub fn subquery(query: Query) -> Self {
        Expr::Subquery(Box::new(query))
    }

    pub fn equals(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Eq, self, other)
    }

    pub fn not_equals(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Ne, self, other)
    }

    pub fn lt(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Lt, self, other)
    }

    pub fn le(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Le, self, other)
    }

    pub fn gt(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Gt, self, other)
    }

    pub fn ge(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Ge, self, other)
    }

    pub fn and(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::And, self, other)
    }

    pub fn or(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Or, self, other)
    }

    pub fn is_in(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::In, self, other)
    }

    pub fn plus(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Add, self, other)
    }

    pub fn minus(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Sub, self, other)
    }

    pub fn times(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Mul, self, other)
    }

    pub fn divided_by(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Div, self, other)
    }

    pub fn sum(arg: Expr) -> Self {
        Expr::aggregate(AggregateFn::Sum, arg)
    }

    pub fn count(arg: Expr) -> Self {
        Expr::aggregate(AggregateFn::Count, arg)
    }

    pub fn min(arg: Expr) -> Self {
        Expr::aggregate(AggregateFn::Min, arg)
    }

    pub fn max(arg: Expr) -> Self {
        Expr::aggregate(AggregateFn::Max, arg)
    }

    /// Attach an output alias, producing a head item
    pub fn alias(self, name: impl Into<String>) -> HeadItem {
        HeadItem {
            expr: self,
            alias: Some(name.into()),
        }
    }

    /// Whether an aggregate appears in this expression.
    /// Nested comprehensions own their aggregates and are not searched.
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expr::Aggregate { .. } => true,
            Expr::Binary { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            Expr::Column(_) | Expr::Literal(_) | Expr::Subquery(_) => false,
        }
    }

    /// Collect distinct column references in first-occurrence order,
    /// without descending into nested comprehensions. A column on the
    /// right of `in` names a whole relation column and is skipped as well.
    pub fn collect_columns(&self, out: &mut Vec<ColumnRef>) {
        match self {
            Expr::Column(c) => {
                if !out.contains(c) {
                    out.push(c.clone());
                }
            }
            Expr::Literal(_) | Expr::Subquery(_) => {}
            Expr::Binary {
                op: BinaryOp::In,
                left,
                right,
            } if matches!(right.as_ref(), Expr::Column(_)) => left.collect_columns(out),
            Expr::Binary { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::Aggregate { arg, .. } => arg.collect_columns(out),
        }
    }

    pub fn columns(&self) -> Vec<ColumnRef> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    pub fn as_column(&self) -> Option<&ColumnRef> {
        match self {
            Expr::Column(c) => Some(c),
            _ => None,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(c) => write!(f, "{c}"),
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Binary { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Expr::Aggregate { func, arg } => write!(f, "{}({arg})", func.name()),
            Expr::Subquery(q) => write!(f, "{q}"),
        }
    }
}

impl From<ColumnRef> for Expr {
    fn from(c: ColumnRef) -> Self {
        Expr::Column(c)
    }
}

/// One output expression of a comprehension head
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HeadItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl HeadItem {
    pub fn new(expr: Expr) -> Self {
        HeadItem { expr, alias: None }
    }

    /// Output field name: the alias, else the column name, else `col{position}`
    pub fn output_name(&self, position: usize) -> String {
        match (&self.alias, &self.expr) {
            (Some(alias), _) => alias.clone(),
            (None, Expr::Column(c)) => c.column.clone(),
            (None, _) => format!("col{position}"),
        }
    }
}

impl From<Expr> for HeadItem {
    fn from(expr: Expr) -> Self {
        HeadItem::new(expr)
    }
}

impl From<ColumnRef> for HeadItem {
    fn from(c: ColumnRef) -> Self {
        HeadItem::new(Expr::Column(c))
    }
}

impl fmt::Display for HeadItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{} as {alias}", self.expr),
            None => write!(f, "{}", self.expr),
        }
    }
}

/// Row generator: iterate the rows of a table or derived view
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Generator {
    pub relation: String,
    pub alias: Option<String>,
}

impl Generator {
    /// Name the generator's columns are qualified with
    pub fn binding(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.relation)
    }
}

/// Comprehension qualifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Qualifier {
    Generator(Generator),
    /// Comparison between columns of different generators
    Join(Expr),
    Filter(Expr),
    /// Predicate over aggregates (HAVING)
    Aggregate(Expr),
    GroupBy(Vec<ColumnRef>),
}

impl Qualifier {
    /// Classify a predicate by shape: aggregate-bearing, join, or filter
    pub fn predicate(expr: Expr) -> Self {
        if expr.contains_aggregate() {
            return Qualifier::Aggregate(expr);
        }
        if let Expr::Binary { op, left, right } = &expr {
            if op.is_comparison() {
                if let (Expr::Column(l), Expr::Column(r)) = (left.as_ref(), right.as_ref()) {
                    if !l.table.eq_ignore_ascii_case(&r.table) {
                        return Qualifier::Join(expr);
                    }
                }
            }
        }
        Qualifier::Filter(expr)
    }

    /// Predicate expression carried by this qualifier, if any
    pub fn expr(&self) -> Option<&Expr> {
        match self {
            Qualifier::Join(e) | Qualifier::Filter(e) | Qualifier::Aggregate(e) => Some(e),
            Qualifier::Generator(_) | Qualifier::GroupBy(_) => None,
        }
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Qualifier::Generator(g) => match &g.alias {
                Some(alias) => write!(f, "{} as {alias}", g.relation),
                None => write!(f, "{}", g.relation),
            },
            Qualifier::Join(e) | Qualifier::Filter(e) => write!(f, "{e}"),
            Qualifier::Aggregate(e) => write!(f, "having {e}"),
            Qualifier::GroupBy(cols) => {
                let cols: Vec<String> = cols.iter().map(ToString::to_string).collect();
                write!(f, "group by ({})", cols.join(", "))
            }
        }
    }
}

/// Monoid comprehension: head plus qualifiers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Query {
    pub head: Vec<HeadItem>,
    pub qualifiers: Vec<Qualifier>,
}

impl Query {
    pub fn select<I, H>(items: I) -> Self
    where
        I: IntoIterator<Item = H>,
        H: Into<HeadItem>,
    {
        Query {
            head: items.into_iter().map(Into::into).collect(),
            qualifiers: Vec::new(),
        }
    }

    /// Add a row generator over a table or view
    pub fn from(mut self, relation: impl Into<String>) -> Self {
        self.qualifiers.push(Qualifier::Generator(Generator {
            relation: relation.into(),
            alias: None,
        }));
        self
    }

    /// Add a row generator bound under an alias
    pub fn from_as(mut self, relation: impl Into<String>, alias: impl Into<String>) -> Self {
        self.qualifiers.push(Qualifier::Generator(Generator {
            relation: relation.into(),
            alias: Some(alias.into()),
        }));
        self
    }

    /// Add a predicate, classified by [`Qualifier::predicate`]
    pub fn filter(mut self, predicate: Expr) -> Self {
        self.qualifiers.push(Qualifier::predicate(predicate));
        self
    }

    pub fn group_by(mut self, columns: Vec<ColumnRef>) -> Self {
        self.qualifiers.push(Qualifier::GroupBy(columns));
        self
    }

    pub fn having(mut self, predicate: Expr) -> Self {
        self.qualifiers.push(Qualifier::Aggregate(predicate));
        self
    }

    pub fn generators(&self) -> impl Iterator<Item = &Generator> {
        self.qualifiers.iter().filter_map(|q| match q {
            Qualifier::Generator(g) => Some(g),
            _ => None,
        })
    }

    /// Grouping columns of the first group-by qualifier
    pub fn group_by_columns(&self) -> Option<&[ColumnRef]> {
        self.qualifiers.iter().find_map(|q| match q {
            Qualifier::GroupBy(cols) => Some(cols.as_slice()),
            _ => None,
        })
    }

    /// Whether the comprehension aggregates its rows (grouped or globally)
    pub fn is_aggregating(&self) -> bool {
        self.group_by_columns().is_some()
            || self.head.iter().any(|h| h.expr.contains_aggregate())
            || self.qualifiers.iter().any(|q| {
                matches!(q, Qualifier::Aggregate(_)) || q.expr().is_some_and(Expr::contains_aggregate)
            })
    }

    /// Multi-line rendering for debugging, in the style of
    /// `IRNode::pretty_print`
    pub fn pretty_print(&self, indent: usize) -> String {
        let prefix = "  ".repeat(indent);
        let mut out = format!("{prefix}Select\n");
        for (i, item) in self.head.iter().enumerate() {
            out.push_str(&format!("{prefix}  [{i}] {item}\n"));
        }
        for q in &self.qualifiers {
            let label = match q {
                Qualifier::Generator(_) => "From",
                Qualifier::Join(_) => "Join",
                Qualifier::Filter(_) => "Where",
                Qualifier::Aggregate(_) => "Having",
                Qualifier::GroupBy(_) => "GroupBy",
            };
            out.push_str(&format!("{prefix}{label} {q}\n"));
        }
        out
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, item) in self.head.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{item}")?;
        }
        write!(f, " |")?;
        for (i, q) in self.qualifiers.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, " {q}")?;
        }
        write!(f, "]")
    }
}

/// How a view's results are used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ViewKind {
    /// Materialized into a derived relation
    NonConstraint,
    /// Predicates become hard constraints
    Constraint,
    /// Head expressions are maximized
    Objective,
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewKind::NonConstraint => write!(f, "view"),
            ViewKind::Constraint => write!(f, "constraint"),
            ViewKind::Objective => write!(f, "objective"),
        }
    }
}

/// Named comprehension
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct View {
    pub name: String,
    pub kind: ViewKind,
    pub query: Query,
}

impl View {
    pub fn new(name: impl Into<String>, kind: ViewKind, query: Query) -> Self {
        View {
            name: name.into(),
            kind,
            query,
        }
    }

    pub fn relation(name: impl Into<String>, query: Query) -> Self {
        View::new(name, ViewKind::NonConstraint, query)
    }

    pub fn constraint(name: impl Into<String>, query: Query) -> Self {
        View::new(name, ViewKind::Constraint, query)
    }

    pub fn objective(name: impl Into<String>, query: Query) -> Self {
        View::new(name, ViewKind::Objective, query)
    }

    pub fn pretty_print(&self, indent: usize) -> String {
        let prefix = "  ".repeat(indent);
        format!(
            "{prefix}{} {}\n{}",
            self.kind,
            self.name,
            self.query.pretty_print(indent + 1)
        )
    }
}

/// The views of one policy, in caller order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewSet {
    views: Vec<View>,
}

impl ViewSet {
    pub fn new() -> Self {
        ViewSet::default()
    }

    pub fn push(&mut self, view: View) {
        self.views.push(view);
    }

    pub fn with(mut self, view: View) -> Self {
        self.views.push(view);
        self
    }

    pub fn views(&self) -> &[View] {
        &self.views
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Compilation order: non-constraint views, then constraint views, then
    /// objective views; caller order within each kind.
    pub fn compilation_order(&self) -> Vec<&View> {
        let mut ordered: Vec<&View> = self.views.iter().collect();
        ordered.sort_by_key(|v| v.kind);
        ordered
    }
}

impl FromIterator<View> for ViewSet {
    fn from_iter<I: IntoIterator<Item = View>>(iter: I) -> Self {
        ViewSet {
            views: iter.into_iter().collect(),
        }
    }
}
