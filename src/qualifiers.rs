//! # Qualifier Classifier
//!
//! Splits a comprehension's qualifiers into a variable bag (depends on a
//! decision variable) and a non-variable bag, each partitioned by kind.
//!
//! Rejected shapes:
//! - more than one group-by qualifier
//! - a generator over a relation whose rows depend on decision variables
//!   (constraint and objective views)
//! - an aggregate inside a join predicate

use crate::classify;
use crate::error::{ModelError, ModelResult};
use crate::ir::{ColumnRef, Expr, Generator, Qualifier};
use crate::schema::name_key;
use std::collections::HashSet;

/// Qualifiers of one variability, grouped by kind
#[derive(Debug, Default, Clone, PartialEq)]
pub struct QualifiersByKind<'a> {
    pub generators: Vec<&'a Generator>,
    pub joins: Vec<&'a Expr>,
    pub filters: Vec<&'a Expr>,
    pub aggregates: Vec<&'a Expr>,
}

impl QualifiersByKind<'_> {
    /// Join and filter predicates, in that order
    pub fn row_predicates(&self) -> Vec<&Expr> {
        self.joins.iter().chain(self.filters.iter()).copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
            && self.joins.is_empty()
            && self.filters.is_empty()
            && self.aggregates.is_empty()
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ClassifiedQualifiers<'a> {
    pub var: QualifiersByKind<'a>,
    pub non_var: QualifiersByKind<'a>,
    pub group_by: Option<&'a [ColumnRef]>,
}

/// Classify qualifiers.
///
/// `variable_relations` holds the normalized names of relations whose row
/// membership is decided by the solver; generators over them are rejected.
pub fn classify_qualifiers<'a>(
    qualifiers: &'a [Qualifier],
    variable_relations: &HashSet<String>,
) -> ModelResult<ClassifiedQualifiers<'a>> {
    let mut out = ClassifiedQualifiers::default();

    for qualifier in qualifiers {
        match qualifier {
            Qualifier::Generator(g) => {
                if variable_relations.contains(&name_key(&g.relation)) {
                    return Err(ModelError::UnsupportedComprehensionShape(format!(
                        "generator over '{}' iterates decision-dependent rows",
                        g.relation
                    )));
                }
                out.non_var.generators.push(g);
            }
            Qualifier::Join(expr) => {
                if expr.contains_aggregate() {
                    return Err(ModelError::UnsupportedComprehensionShape(format!(
                        "aggregate in join predicate {expr}"
                    )));
                }
                bag(&mut out, expr)?.joins.push(expr);
            }
            Qualifier::Filter(expr) => {
                if expr.contains_aggregate() {
                    bag(&mut out, expr)?.aggregates.push(expr);
                } else {
                    bag(&mut out, expr)?.filters.push(expr);
                }
            }
            Qualifier::Aggregate(expr) => {
                bag(&mut out, expr)?.aggregates.push(expr);
            }
            Qualifier::GroupBy(columns) => {
                if out.group_by.is_some() {
                    return Err(ModelError::UnsupportedComprehensionShape(
                        "more than one group-by qualifier".to_string(),
                    ));
                }
                out.group_by = Some(columns.as_slice());
            }
        }
    }

    Ok(out)
}

fn bag<'q, 'a>(
    out: &'q mut ClassifiedQualifiers<'a>,
    expr: &Expr,
) -> ModelResult<&'q mut QualifiersByKind<'a>> {
    if classify::is_decision(expr)? {
        Ok(&mut out.var)
    } else {
        Ok(&mut out.non_var)
    }
}
