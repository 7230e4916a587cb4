//! Column resolution
//!
//! Stamps every column reference with the declared type and
//! controllability of the column it binds to, so the classifiers see what
//! the catalog and the derived relations actually hold rather than what the
//! caller wrote. Runs before the rewrite passes.
//!
//! A column binds to the innermost generator whose alias (or relation name)
//! matches its table. The right-hand side of `in` names a whole relation
//! column instead: `x in NODE.name` ranges over every row of `NODE`.

use super::CompileContext;
use crate::error::{ModelError, ModelResult};
use crate::ir::{BinaryOp, ColumnRef, Expr, HeadItem, Qualifier, Query};
use crate::schema::name_key;

/// Generator bindings of one comprehension: (binding, relation key)
type Bindings = Vec<(String, String)>;

impl CompileContext<'_> {
    pub(super) fn resolve_query(&self, query: &Query) -> ModelResult<Query> {
        let mut bindings = Bindings::new();
        for g in query.generators() {
            let key = name_key(&g.relation);
            if !self.is_relation(&key) && !self.variable_views.contains(&key) {
                return Err(ModelError::UnknownTable(g.relation.clone()));
            }
            bindings.push((name_key(g.binding()), key));
        }

        let head = query
            .head
            .iter()
            .map(|item| {
                Ok(HeadItem {
                    expr: self.resolve_expr(&item.expr, &bindings)?,
                    alias: item.alias.clone(),
                })
            })
            .collect::<ModelResult<Vec<_>>>()?;

        let qualifiers = query
            .qualifiers
            .iter()
            .map(|q| {
                Ok(match q {
                    Qualifier::Generator(g) => Qualifier::Generator(g.clone()),
                    Qualifier::Join(e) => Qualifier::Join(self.resolve_expr(e, &bindings)?),
                    Qualifier::Filter(e) => Qualifier::Filter(self.resolve_expr(e, &bindings)?),
                    Qualifier::Aggregate(e) => {
                        Qualifier::Aggregate(self.resolve_expr(e, &bindings)?)
                    }
                    Qualifier::GroupBy(cols) => Qualifier::GroupBy(
                        cols.iter()
                            .map(|c| self.resolve_column(c, &bindings))
                            .collect::<ModelResult<Vec<_>>>()?,
                    ),
                })
            })
            .collect::<ModelResult<Vec<_>>>()?;

        Ok(Query { head, qualifiers })
    }

    fn resolve_expr(&self, expr: &Expr, bindings: &Bindings) -> ModelResult<Expr> {
        match expr {
            Expr::Column(c) => Ok(Expr::Column(self.resolve_column(c, bindings)?)),
            Expr::Literal(_) => Ok(expr.clone()),
            Expr::Binary {
                op: BinaryOp::In,
                left,
                right,
            } => {
                let right = match right.as_ref() {
                    Expr::Column(c) => Expr::Column(self.stamp(&name_key(&c.table), c)?),
                    other => self.resolve_expr(other, bindings)?,
                };
                Ok(Expr::binary(
                    BinaryOp::In,
                    self.resolve_expr(left, bindings)?,
                    right,
                ))
            }
            Expr::Binary { op, left, right } => Ok(Expr::binary(
                *op,
                self.resolve_expr(left, bindings)?,
                self.resolve_expr(right, bindings)?,
            )),
            Expr::Aggregate { func, arg } => {
                Ok(Expr::aggregate(*func, self.resolve_expr(arg, bindings)?))
            }
            // Nested comprehensions only see their own generators
            Expr::Subquery(q) => Ok(Expr::subquery(self.resolve_query(q)?)),
        }
    }

    fn resolve_column(&self, column: &ColumnRef, bindings: &Bindings) -> ModelResult<ColumnRef> {
        let Some((_, relation)) = bindings.iter().rev().find(|(b, _)| column.is_bound_by(b)) else {
            return Err(ModelError::UnsupportedComprehensionShape(format!(
                "column {column} is not bound by a generator of its comprehension"
            )));
        };
        self.stamp(relation, column)
    }

    /// Copy of `column` carrying the type and controllability found in
    /// `relation`
    fn stamp(&self, relation: &str, column: &ColumnRef) -> ModelResult<ColumnRef> {
        let mut out = column.clone();
        if let Some(schema) = self.catalog.get(relation) {
            let col = schema
                .get_column(&column.column)
                .ok_or_else(|| ModelError::UnknownColumn {
                    table: schema.name.clone(),
                    column: column.column.clone(),
                })?;
            out.data_type = col.data_type;
            out.controllable = col.controllable;
        } else if let Some(rel) = self.relations.get(relation) {
            let field = &rel.fields()[self.field_slot(relation, &column.column)?];
            out.data_type = field.data_type;
            out.controllable = field.decision;
        } else if !self.variable_views.contains(relation) {
            return Err(ModelError::UnknownTable(column.table.clone()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::tests::{node_pod_catalog, node_pod_snapshot};
    use crate::ir::ViewSet;
    use crate::value::DataType;

    #[test]
    fn test_stamps_catalog_types() {
        let catalog = node_pod_catalog();
        let snapshot = node_pod_snapshot(1);
        let views = ViewSet::new();
        let ctx = CompileContext::new(&catalog, &snapshot, &views);

        // Caller wrote the wrong type and forgot the controllable flag
        let q = Query::select(vec![Expr::col(ColumnRef::new("p", "node", DataType::Int))])
            .from_as("POD", "p");
        let resolved = ctx.resolve_query(&q).unwrap();
        let c = resolved.head[0].expr.as_column().unwrap();
        assert_eq!(c.data_type, DataType::String);
        assert!(c.controllable);
        assert_eq!(c.table, "p");
    }

    #[test]
    fn test_in_right_side_names_a_relation() {
        let catalog = node_pod_catalog();
        let snapshot = node_pod_snapshot(1);
        let views = ViewSet::new();
        let ctx = CompileContext::new(&catalog, &snapshot, &views);

        let q = Query::select(vec![Expr::col(ColumnRef::new("POD", "name", DataType::String))])
            .from("POD")
            .filter(
                Expr::col(ColumnRef::new("POD", "node", DataType::String))
                    .is_in(Expr::col(ColumnRef::new("NODE", "name", DataType::String))),
            );
        assert!(ctx.resolve_query(&q).is_ok());
    }

    #[test]
    fn test_unbound_and_unknown_columns() {
        let catalog = node_pod_catalog();
        let snapshot = node_pod_snapshot(1);
        let views = ViewSet::new();
        let ctx = CompileContext::new(&catalog, &snapshot, &views);

        let unbound = Query::select(vec![Expr::col(ColumnRef::new("NODE", "cap", DataType::Int))])
            .from("POD");
        assert!(matches!(
            ctx.resolve_query(&unbound),
            Err(ModelError::UnsupportedComprehensionShape(_))
        ));

        let unknown = Query::select(vec![Expr::col(ColumnRef::new("POD", "cpu", DataType::Int))])
            .from("POD");
        assert_eq!(
            ctx.resolve_query(&unknown),
            Err(ModelError::UnknownColumn {
                table: "POD".to_string(),
                column: "cpu".to_string()
            })
        );

        let missing = Query::select(vec![Expr::lit(1_i64)]).from("RACK");
        assert_eq!(
            ctx.resolve_query(&missing),
            Err(ModelError::UnknownTable("RACK".to_string()))
        );
    }
}
