//! # Pipeline Trace
//!
//! Records what each compilation stage did to every view:
//! Rewrite -> Classify -> Compile. Returned with the compiled model and
//! logged as structured fields; `format_trace` renders it for debugging.

use crate::ir::{View, ViewKind};
use crate::rewrite::RewriteStats;
use std::collections::BTreeMap;
use std::fmt;

/// Per-view record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewTrace {
    pub name: String,
    pub kind: ViewKind,

    /// Comprehension as supplied
    pub before: String,

    /// Comprehension after the rewrite passes
    pub after: String,

    /// Rows of the derived relation (non-constraint views)
    pub rows: usize,

    /// Constraints added while compiling the view
    pub constraints: usize,
}

/// Counters for one compilation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileStats {
    /// Views compiled
    pub views: usize,

    /// Derived relations materialized, intermediate views included
    pub derived_relations: usize,

    /// Decision variables, foreign-key index variables included
    pub variables: usize,

    /// Constraint counts keyed by constraint kind
    pub constraints_by_kind: BTreeMap<&'static str, usize>,

    pub rewrite: RewriteStats,
}

impl CompileStats {
    pub fn total_constraints(&self) -> usize {
        self.constraints_by_kind.values().sum()
    }
}

/// Trace of one compilation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineTrace {
    pub views: Vec<ViewTrace>,
    pub stats: CompileStats,
}

impl PipelineTrace {
    pub fn new() -> Self {
        PipelineTrace::default()
    }

    /// Record a compiled view
    pub fn record_view(
        &mut self,
        original: &View,
        rewritten: &View,
        rows: usize,
        constraints: usize,
    ) {
        self.stats.views += 1;
        self.views.push(ViewTrace {
            name: original.name.clone(),
            kind: original.kind,
            before: original.query.pretty_print(2),
            after: rewritten.query.pretty_print(2),
            rows,
            constraints,
        });
    }

    /// Whether the rewrite passes changed any view
    pub fn rewrote_any(&self) -> bool {
        self.views.iter().any(|v| v.before != v.after)
    }

    /// Format the trace for display
    pub fn format_trace(&self) -> String {
        let mut output = String::new();

        output.push_str("═══════════════════════════════════════════════════════════\n");
        output.push_str("                    COMPILE TRACE                          \n");
        output.push_str("═══════════════════════════════════════════════════════════\n\n");

        for view in &self.views {
            output.push_str("┌---------------------------------------------------------┐\n");
            output.push_str(&format!("| {} {}\n", view.kind, view.name));
            output.push_str("`---------------------------------------------------------┘\n");
            output.push_str(&view.before);
            if view.before != view.after {
                output.push_str("  rewritten to:\n");
                output.push_str(&view.after);
            }
            match view.kind {
                ViewKind::NonConstraint => {
                    output.push_str(&format!("  rows: {}\n", view.rows));
                }
                ViewKind::Constraint | ViewKind::Objective => {
                    output.push_str(&format!("  constraints: {}\n", view.constraints));
                }
            }
            output.push('\n');
        }

        output.push_str(&format!("{}\n", self.stats));
        output
    }
}

impl fmt::Display for CompileStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Compiled {} views: {} derived relations, {} variables, {} constraints",
            self.views,
            self.derived_relations,
            self.variables,
            self.total_constraints()
        )?;
        for (kind, count) in &self.constraints_by_kind {
            writeln!(f, "  - {kind}: {count}")?;
        }
        if self.rewrite.counts_eliminated > 0 {
            writeln!(f, "  - count() rewritten: {}", self.rewrite.counts_eliminated)?;
        }
        if self.rewrite.predicates_folded > 0 {
            writeln!(
                f,
                "  - predicates folded into sums: {}",
                self.rewrite.predicates_folded
            )?;
        }
        Ok(())
    }
}
