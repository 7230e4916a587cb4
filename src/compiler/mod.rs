//! # Model Compiler
//!
//! Turns a catalog, a data snapshot and a set of views into a solver
//! [`Model`].
//!
//! ## Compilation order
//!
//! 1. Decision variables: one per (controllable column, row), table by
//!    table in catalog order, column by column, row by row
//! 2. Key constraints (see `keys`)
//! 3. Views: non-constraint views, then constraint views, then objective
//!    views. Each view is resolved, rewritten, classified and compiled:
//!    - non-constraint views materialize a derived [`Relation`]
//!    - constraint views assert their predicates
//!    - objective views add their head expressions to the maximized sum
//! 4. String variables get the encoder's codes as domain
//!
//! ## Iteration
//!
//! Generators become nested loops over row indices; each non-variable
//! predicate is checked at the shallowest loop where all its columns are
//! bound. Aggregating comprehensions stage their member rows in an
//! intermediate relation (`tmp0`, `tmp1`, ...) and group them by key in
//! first-occurrence order; a comprehension with aggregates but no group-by
//! forms exactly one group. Subqueries compile once into `subquery1`,
//! `subquery2`, ... and are reused when structurally equal.
//!
//! All state lives in a [`CompileContext`] owned by one call.

mod expr;
mod keys;
mod relation;
mod resolve;

pub use relation::{Field, Relation, Slot};

use self::expr::{Group, Scope};
use crate::classify;
use crate::error::{ModelError, ModelResult};
use crate::execution::Cancellation;
use crate::ir::{ColumnRef, Expr, Generator, Qualifier, Query, View, ViewKind, ViewSet};
use crate::model::{Domain, IntExpr, Model, VarId};
use crate::pipeline_trace::{CompileStats, PipelineTrace};
use crate::qualifiers::{classify_qualifiers, ClassifiedQualifiers};
use crate::rewrite::RewritePipeline;
use crate::schema::{name_key, Catalog, Snapshot, TableSchema};
use crate::value::{DataType, Tuple, Value, ValueEncoder};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Compile a policy into a solver model
pub fn compile(catalog: &Catalog, snapshot: &Snapshot, views: &ViewSet) -> ModelResult<CompiledModel> {
    compile_with(catalog, snapshot, views, &Cancellation::new())
}

/// Compile, checking `cancellation` between views
pub fn compile_with(
    catalog: &Catalog,
    snapshot: &Snapshot,
    views: &ViewSet,
    cancellation: &Cancellation,
) -> ModelResult<CompiledModel> {
    snapshot.validate(catalog)?;

    let mut ctx = CompileContext::new(catalog, snapshot, views);
    ctx.declare_variables();
    ctx.compile_keys()?;
    for view in views.compilation_order() {
        if cancellation.is_cancelled() {
            info!(view = %view.name, "compile_cancelled");
            return Err(ModelError::Cancelled);
        }
        ctx.compile_view(view)?;
    }
    Ok(ctx.finish())
}

/// A base table as seen by the compiled model
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledTable {
    pub schema: TableSchema,
    /// Snapshot rows, in order
    pub rows: Vec<Tuple>,
    /// Row variables of each controllable column, by column position
    pub vars: Vec<Option<Vec<VarId>>>,
}

impl CompiledTable {
    pub fn has_controllable_columns(&self) -> bool {
        self.vars.iter().any(Option::is_some)
    }
}

/// Result of compilation: the model plus everything needed to map a
/// solver assignment back onto relations
#[derive(Debug, Clone)]
pub struct CompiledModel {
    model: Model,
    encoder: ValueEncoder,
    tables: Vec<CompiledTable>,
    relations: IndexMap<String, Relation>,
    trace: PipelineTrace,
}

impl CompiledModel {
    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn encoder(&self) -> &ValueEncoder {
        &self.encoder
    }

    /// Base tables in catalog order
    pub fn tables(&self) -> &[CompiledTable] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&CompiledTable> {
        self.tables
            .iter()
            .find(|t| t.schema.name.eq_ignore_ascii_case(name))
    }

    /// Derived relation of a view, intermediate views included
    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.get(&name_key(name))
    }

    /// Derived relations in creation order
    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }

    /// Decision variable of `table.column[row]`
    pub fn var(&self, table: &str, column: &str, row: usize) -> Option<VarId> {
        let t = self.table(table)?;
        let idx = t.schema.column_index(column)?;
        t.vars.get(idx)?.as_ref()?.get(row).copied()
    }

    pub fn stats(&self) -> &CompileStats {
        &self.trace.stats
    }

    pub fn trace(&self) -> &PipelineTrace {
        &self.trace
    }
}

/// A generator bound to a row during iteration
#[derive(Debug, Clone)]
struct Bound {
    /// Normalized alias or relation name
    binding: String,
    /// Normalized relation name
    relation: String,
    base: bool,
    row: usize,
}

/// Current row of every enclosing generator
#[derive(Debug, Clone, Default)]
pub(crate) struct Env {
    bindings: Vec<Bound>,
}

impl Env {
    fn lookup(&self, column: &ColumnRef) -> Option<&Bound> {
        self.bindings
            .iter()
            .rev()
            .find(|b| column.is_bound_by(&b.binding))
    }
}

type RowFn<'f, 'a> = dyn FnMut(&mut CompileContext<'a>, &Env) -> ModelResult<()> + 'f;

/// Per-compilation state
pub(crate) struct CompileContext<'a> {
    catalog: &'a Catalog,
    snapshot: &'a Snapshot,
    model: Model,
    encoder: ValueEncoder,
    /// (TABLE, COLUMN) -> one variable per row
    vars: HashMap<(String, String), Vec<VarId>>,
    relations: IndexMap<String, Relation>,
    /// view -> column -> tuple slot
    field_index: HashMap<String, IndexMap<String, usize>>,
    subqueries: HashMap<Query, String>,
    tmp_counter: usize,
    subquery_counter: usize,
    /// Constraint and objective views; they have no rows to iterate
    variable_views: HashSet<String>,
    /// Every caller view name, reserved against generated names
    view_names: HashSet<String>,
    objective: Option<Vec<IntExpr>>,
    rewriter: RewritePipeline,
    trace: PipelineTrace,
}

impl<'a> CompileContext<'a> {
    pub(crate) fn new(catalog: &'a Catalog, snapshot: &'a Snapshot, views: &ViewSet) -> Self {
        let variable_views = views
            .views()
            .iter()
            .filter(|v| v.kind != ViewKind::NonConstraint)
            .map(|v| name_key(&v.name))
            .collect();
        let view_names = views.views().iter().map(|v| name_key(&v.name)).collect();
        CompileContext {
            catalog,
            snapshot,
            model: Model::new(),
            encoder: ValueEncoder::new(),
            vars: HashMap::new(),
            relations: IndexMap::new(),
            field_index: HashMap::new(),
            subqueries: HashMap::new(),
            tmp_counter: 0,
            subquery_counter: 0,
            variable_views,
            view_names,
            objective: None,
            rewriter: RewritePipeline::new(),
            trace: PipelineTrace::new(),
        }
    }

    fn declare_variables(&mut self) {
        let catalog = self.catalog;
        for schema in catalog.tables() {
            let rows = self.snapshot.row_count(&schema.name);
            for (idx, column) in schema.columns.iter().enumerate() {
                if !column.controllable {
                    continue;
                }
                if column.data_type == DataType::String {
                    // current assignments stay decodable
                    for row in self.snapshot.rows(&schema.name) {
                        if let Some(value) = row.get(idx).filter(|v| !v.is_null()) {
                            self.encoder.encode(value);
                        }
                    }
                }
                let domain = match column.data_type {
                    DataType::Bool => Domain::range(0, 1),
                    // String domains are filled in once every code is known
                    DataType::Int | DataType::String | DataType::Float => Domain::Unbounded,
                };
                let ids = (0..rows)
                    .map(|i| {
                        self.model
                            .new_var(format!("{}.{}[{i}]", schema.name, column.name), domain.clone())
                    })
                    .collect();
                self.vars
                    .insert((name_key(&schema.name), name_key(&column.name)), ids);
            }
        }
        debug!(variables = self.model.num_vars(), "variables_declared");
    }

    fn column_vars(&self, table: &str, column: &str) -> Option<&[VarId]> {
        self.vars
            .get(&(name_key(table), name_key(column)))
            .map(Vec::as_slice)
    }

    fn compile_view(&mut self, view: &View) -> ModelResult<()> {
        let resolved = View {
            name: view.name.clone(),
            kind: view.kind,
            query: self.resolve_query(&view.query)?,
        };
        let rewritten = self.rewriter.rewrite_view(&resolved)?;
        let query = &rewritten.query;
        let before = self.model.constraints().len();

        let rows = match view.kind {
            ViewKind::NonConstraint => {
                let key = name_key(&view.name);
                if self.is_relation(&key) {
                    return Err(ModelError::UnsupportedComprehensionShape(format!(
                        "view '{}' is already defined",
                        view.name
                    )));
                }
                let (relation, aliases) = self.build_relation(&view.name, query)?;
                let rows = relation.len();
                self.register(key, relation, &aliases);
                rows
            }
            ViewKind::Constraint => {
                self.compile_constraint_view(&view.name, query)?;
                0
            }
            ViewKind::Objective => {
                self.compile_objective_view(&view.name, query)?;
                0
            }
        };

        let constraints = self.model.constraints().len() - before;
        debug!(view = %view.name, kind = %view.kind, rows, constraints, "view_compiled");
        self.trace.record_view(view, &rewritten, rows, constraints);
        Ok(())
    }

    fn finish(mut self) -> CompiledModel {
        let codes = self.encoder.string_codes();
        let catalog = self.catalog;
        let mut tables = Vec::with_capacity(catalog.len());
        for schema in catalog.tables() {
            let mut vars = Vec::with_capacity(schema.columns.len());
            for column in &schema.columns {
                let ids = self.column_vars(&schema.name, &column.name).map(<[VarId]>::to_vec);
                if let (Some(ids), DataType::String) = (&ids, column.data_type) {
                    for &id in ids {
                        self.model.set_domain(id, Domain::Values(codes.clone()));
                    }
                }
                vars.push(ids);
            }
            tables.push(CompiledTable {
                schema: schema.clone(),
                rows: self.snapshot.rows(&schema.name).to_vec(),
                vars,
            });
        }

        if let Some(terms) = self.objective.take() {
            self.model.maximize(IntExpr::sum(terms));
        }

        let stats = &mut self.trace.stats;
        stats.derived_relations = self.relations.len();
        stats.variables = self.model.num_vars();
        stats.rewrite = self.rewriter.stats();
        for c in self.model.constraints() {
            *stats.constraints_by_kind.entry(c.kind()).or_insert(0) += 1;
        }
        info!(
            views = stats.views,
            variables = stats.variables,
            constraints = stats.total_constraints(),
            derived_relations = stats.derived_relations,
            "model_built"
        );

        CompiledModel {
            model: self.model,
            encoder: self.encoder,
            tables,
            relations: self.relations,
            trace: self.trace,
        }
    }

    // Relations

    fn is_relation(&self, key: &str) -> bool {
        self.catalog.contains(key) || self.relations.contains_key(key)
    }

    fn relation_by_key(&self, key: &str) -> ModelResult<&Relation> {
        self.relations
            .get(key)
            .ok_or_else(|| ModelError::UnknownTable(key.to_string()))
    }

    /// Store a derived relation and index its fields: aliases first, then
    /// full field names, then bare column names of `TABLE.COLUMN` fields
    fn register(&mut self, key: String, relation: Relation, aliases: &[(String, usize)]) {
        let mut index = IndexMap::new();
        for (alias, slot) in aliases {
            index.entry(name_key(alias)).or_insert(*slot);
        }
        for (slot, field) in relation.fields().iter().enumerate() {
            index.entry(name_key(&field.name)).or_insert(slot);
        }
        for (slot, field) in relation.fields().iter().enumerate() {
            if let Some((_, column)) = field.name.rsplit_once('.') {
                index.entry(name_key(column)).or_insert(slot);
            }
        }
        debug!(relation = %relation.name(), rows = relation.len(), "relation_registered");
        self.field_index.insert(key.clone(), index);
        self.relations.insert(key, relation);
    }

    fn field_slot(&self, relation: &str, column: &str) -> ModelResult<usize> {
        self.field_index
            .get(relation)
            .and_then(|fields| fields.get(&name_key(column)))
            .copied()
            .ok_or_else(|| ModelError::UnknownColumn {
                table: self
                    .relations
                    .get(relation)
                    .map_or_else(|| relation.to_string(), |r| r.name().to_string()),
                column: column.to_string(),
            })
    }

    /// Every cell of `table.column`, for the right side of `in`
    fn relation_column(&self, table: &str, column: &str) -> ModelResult<Vec<Slot>> {
        let key = name_key(table);
        if let Some(schema) = self.catalog.get(&key) {
            let idx = schema
                .column_index(column)
                .ok_or_else(|| ModelError::UnknownColumn {
                    table: schema.name.clone(),
                    column: column.to_string(),
                })?;
            if schema.columns[idx].controllable {
                return Err(ModelError::UnsupportedConstraintShape(format!(
                    "membership domain {}.{} is controllable",
                    schema.name, column
                )));
            }
            return Ok(self
                .snapshot
                .rows(&key)
                .iter()
                .map(|row| Slot::Value(row.get(idx).cloned().unwrap_or(Value::Null)))
                .collect());
        }
        let slot = self.field_slot(&key, column)?;
        Ok(self
            .relation_by_key(&key)?
            .rows()
            .iter()
            .map(|row| row[slot].clone())
            .collect())
    }

    fn fresh_name(&mut self, tmp: bool) -> String {
        loop {
            let name = if tmp {
                self.tmp_counter += 1;
                format!("tmp{}", self.tmp_counter - 1)
            } else {
                self.subquery_counter += 1;
                format!("subquery{}", self.subquery_counter)
            };
            let key = name_key(&name);
            if !self.is_relation(&key) && !self.view_names.contains(&key) {
                return name;
            }
        }
    }

    /// Compile a nested comprehension once per compilation
    fn subquery_relation(&mut self, query: &Query) -> ModelResult<String> {
        if let Some(key) = self.subqueries.get(query) {
            return Ok(key.clone());
        }
        let name = self.fresh_name(false);
        let (relation, aliases) = self.build_relation(&name, query)?;
        let key = name_key(&name);
        self.register(key.clone(), relation, &aliases);
        self.subqueries.insert(query.clone(), key.clone());
        Ok(key)
    }

    // Iteration

    /// Slot of a column for the current rows
    fn column_slot(&self, column: &ColumnRef, env: &Env) -> ModelResult<Slot> {
        let bound = env.lookup(column).ok_or_else(|| {
            ModelError::UnsupportedComprehensionShape(format!(
                "column {column} is not bound by a generator"
            ))
        })?;

        if !bound.base {
            let slot = self.field_slot(&bound.relation, &column.column)?;
            return Ok(self.relation_by_key(&bound.relation)?.rows()[bound.row][slot].clone());
        }

        let schema = self
            .catalog
            .get(&bound.relation)
            .ok_or_else(|| ModelError::UnknownTable(bound.relation.clone()))?;
        let idx = schema
            .column_index(&column.column)
            .ok_or_else(|| ModelError::UnknownColumn {
                table: schema.name.clone(),
                column: column.column.clone(),
            })?;
        if schema.columns[idx].controllable {
            let var = self
                .column_vars(&bound.relation, &column.column)
                .and_then(|vars| vars.get(bound.row))
                .ok_or_else(|| ModelError::UnknownColumn {
                    table: schema.name.clone(),
                    column: column.column.clone(),
                })?;
            return Ok(Slot::Var(IntExpr::Var(*var)));
        }
        let value = self
            .snapshot
            .rows(&bound.relation)
            .get(bound.row)
            .and_then(|row| row.get(idx))
            .cloned()
            .unwrap_or(Value::Null);
        Ok(Slot::Value(value))
    }

    /// Call `f` for every combination of generator rows passing `guards`
    fn for_each_row(
        &mut self,
        generators: &[&Generator],
        guards: &[&Expr],
        f: &mut RowFn<'_, 'a>,
    ) -> ModelResult<()> {
        let mut sources = Vec::with_capacity(generators.len());
        for g in generators {
            let key = name_key(&g.relation);
            let base = self.catalog.contains(&key);
            let rows = if base {
                self.snapshot.row_count(&key)
            } else {
                self.relation_by_key(&key)
                    .map_err(|_| ModelError::UnknownTable(g.relation.clone()))?
                    .len()
            };
            let bound = Bound {
                binding: name_key(g.binding()),
                relation: key,
                base,
                row: 0,
            };
            sources.push((bound, rows));
        }

        // Each guard runs at the shallowest level binding all its columns
        let mut schedule: Vec<Vec<&Expr>> = vec![Vec::new(); sources.len().max(1)];
        for &guard in guards {
            let mut level = 0;
            for c in guard.columns() {
                let depth = sources
                    .iter()
                    .rposition(|(b, _)| c.is_bound_by(&b.binding))
                    .ok_or_else(|| {
                        ModelError::UnsupportedComprehensionShape(format!(
                            "column {c} is not bound by a generator"
                        ))
                    })?;
                level = level.max(depth);
            }
            schedule[level].push(guard);
        }

        let mut env = Env::default();
        self.enumerate(&sources, &schedule, 0, &mut env, f)
    }

    fn enumerate(
        &mut self,
        sources: &[(Bound, usize)],
        schedule: &[Vec<&Expr>],
        depth: usize,
        env: &mut Env,
        f: &mut RowFn<'_, 'a>,
    ) -> ModelResult<()> {
        if depth == sources.len() {
            if sources.is_empty() && !self.guards_hold(&schedule[0], env)? {
                return Ok(());
            }
            return f(self, env);
        }

        let (bound, rows) = &sources[depth];
        for row in 0..*rows {
            env.bindings.push(Bound {
                row,
                ..bound.clone()
            });
            if self.guards_hold(&schedule[depth], env)? {
                self.enumerate(sources, schedule, depth + 1, env, f)?;
            }
            env.bindings.pop();
        }
        Ok(())
    }

    fn guards_hold(&mut self, guards: &[&Expr], env: &Env) -> ModelResult<bool> {
        for guard in guards {
            match self.lower(guard, &Scope::Row(env))? {
                Slot::Value(v) => {
                    if !v.as_bool().unwrap_or(false) {
                        return Ok(false);
                    }
                }
                Slot::Var(_) => {
                    return Err(ModelError::UnsupportedComprehensionShape(format!(
                        "row predicate {guard} depends on decision variables"
                    )))
                }
            }
        }
        Ok(true)
    }

    // Non-constraint views

    /// Materialize a comprehension
    fn build_relation(
        &mut self,
        name: &str,
        query: &Query,
    ) -> ModelResult<(Relation, Vec<(String, usize)>)> {
        let classified = classify_qualifiers(&query.qualifiers, &self.variable_views)?;
        if query.is_aggregating() {
            return self.build_grouped(name, query, &classified);
        }
        if let Some(p) = classified.var.row_predicates().first() {
            return Err(ModelError::UnsupportedComprehensionShape(format!(
                "view '{name}' selects rows with decision-valued predicate {p}"
            )));
        }

        // Distinct head columns first, then one slot per computed head item
        let mut columns: Vec<ColumnRef> = Vec::new();
        for item in &query.head {
            item.expr.collect_columns(&mut columns);
        }
        let mut fields: Vec<Field> = columns
            .iter()
            .map(|c| Field {
                name: c.qualified_name(),
                data_type: c.data_type,
                decision: c.controllable,
            })
            .collect();
        let mut head = Vec::with_capacity(query.head.len());
        let mut aliases = Vec::new();
        let mut computed = Vec::new();
        for (pos, item) in query.head.iter().enumerate() {
            let slot = match &item.expr {
                Expr::Column(c) => columns.iter().position(|x| x == c).unwrap_or_default(),
                other => {
                    let ty = classify::infer(other)?;
                    fields.push(Field {
                        name: item.output_name(pos),
                        data_type: ty.scalar,
                        decision: ty.decision,
                    });
                    computed.push(pos);
                    fields.len() - 1
                }
            };
            if let Some(alias) = &item.alias {
                aliases.push((alias.clone(), slot));
            }
            head.push(slot);
        }

        let mut relation = Relation::new(name, fields, head);
        let generators = classified.non_var.generators.clone();
        let guards = classified.non_var.row_predicates();
        self.for_each_row(&generators, &guards, &mut |ctx, env| {
            let mut row = Vec::with_capacity(columns.len() + computed.len());
            for c in &columns {
                row.push(ctx.column_slot(c, env)?);
            }
            for &pos in &computed {
                row.push(ctx.lower(&query.head[pos].expr, &Scope::Row(env))?);
            }
            relation.push(row);
            Ok(())
        })?;
        Ok((relation, aliases))
    }

    fn build_grouped(
        &mut self,
        name: &str,
        query: &Query,
        classified: &ClassifiedQualifiers<'_>,
    ) -> ModelResult<(Relation, Vec<(String, usize)>)> {
        if let Some(p) = classified.var.row_predicates().first() {
            return Err(ModelError::UnsupportedComprehensionShape(format!(
                "view '{name}' aggregates rows selected by decision-valued predicate {p}"
            )));
        }
        if let Some(p) = classified.var.aggregates.first() {
            return Err(ModelError::UnsupportedComprehensionShape(format!(
                "view '{name}' filters groups with decision-valued predicate {p}"
            )));
        }

        let mut fields = Vec::with_capacity(query.head.len());
        let mut aliases = Vec::new();
        for (pos, item) in query.head.iter().enumerate() {
            let ty = classify::infer(&item.expr)?;
            fields.push(Field {
                name: item.output_name(pos),
                data_type: ty.scalar,
                decision: ty.decision,
            });
            if let Expr::Column(c) = &item.expr {
                aliases.push((c.qualified_name(), pos));
            }
        }
        let mut relation = Relation::new(name, fields, (0..query.head.len()).collect());

        for group in self.collect_groups(name, query, classified)? {
            if !self.having_holds(&classified.non_var.aggregates, &group)? {
                continue;
            }
            let mut row = Vec::with_capacity(query.head.len());
            for item in &query.head {
                row.push(self.lower(&item.expr, &Scope::Group(&group))?);
            }
            relation.push(row);
        }
        Ok((relation, aliases))
    }

    fn having_holds(&mut self, predicates: &[&Expr], group: &Group) -> ModelResult<bool> {
        for p in predicates {
            match self.lower(p, &Scope::Group(group))? {
                Slot::Value(v) => {
                    if !v.as_bool().unwrap_or(false) {
                        return Ok(false);
                    }
                }
                Slot::Var(_) => {
                    return Err(ModelError::UnsupportedComprehensionShape(format!(
                        "group predicate {p} depends on decision variables"
                    )))
                }
            }
        }
        Ok(true)
    }

    /// Stage member rows as an intermediate relation and group them by key
    fn collect_groups(
        &mut self,
        name: &str,
        query: &Query,
        classified: &ClassifiedQualifiers<'_>,
    ) -> ModelResult<Vec<Group>> {
        let key_columns: Vec<ColumnRef> = classified.group_by.map(<[ColumnRef]>::to_vec).unwrap_or_default();
        if let Some(c) = key_columns.iter().find(|c| c.controllable) {
            return Err(ModelError::UnsupportedComprehensionShape(format!(
                "view '{name}' groups by controllable column {c}"
            )));
        }

        let mut layout: Vec<ColumnRef> = Vec::new();
        for item in &query.head {
            item.expr.collect_columns(&mut layout);
        }
        for p in classified.non_var.aggregates.iter().chain(&classified.var.aggregates) {
            p.collect_columns(&mut layout);
        }
        for c in &key_columns {
            if !layout.contains(c) {
                layout.push(c.clone());
            }
        }

        let tmp = self.fresh_name(true);
        let fields = layout
            .iter()
            .map(|c| Field {
                name: c.qualified_name(),
                data_type: c.data_type,
                decision: c.controllable,
            })
            .collect();
        let mut staged = Relation::new(tmp.clone(), fields, (0..layout.len()).collect());
        let mut groups: IndexMap<Vec<Value>, Vec<Vec<Slot>>> = IndexMap::new();

        let generators = classified.non_var.generators.clone();
        let guards = classified.non_var.row_predicates();
        self.for_each_row(&generators, &guards, &mut |ctx, env| {
            let mut key = Vec::with_capacity(key_columns.len());
            for c in &key_columns {
                match ctx.column_slot(c, env)? {
                    Slot::Value(v) => key.push(v),
                    Slot::Var(_) => {
                        return Err(ModelError::UnsupportedComprehensionShape(format!(
                            "group-by column {c} is decision-valued"
                        )))
                    }
                }
            }
            let member = layout
                .iter()
                .map(|c| ctx.column_slot(c, env))
                .collect::<ModelResult<Vec<_>>>()?;
            staged.push(member.clone());
            groups.entry(key).or_default().push(member);
            Ok(())
        })?;

        if key_columns.is_empty() && groups.is_empty() {
            groups.insert(Vec::new(), Vec::new());
        }
        debug!(view = name, staged = %tmp, groups = groups.len(), "groups_collected");
        self.register(name_key(&tmp), staged, &[]);

        Ok(groups
            .into_iter()
            .map(|(key, members)| Group {
                key_columns: key_columns.clone(),
                key,
                members,
                layout: layout.clone(),
            })
            .collect())
    }

    // Constraint and objective views

    fn compile_constraint_view(&mut self, name: &str, query: &Query) -> ModelResult<()> {
        let classified = classify_qualifiers(&query.qualifiers, &self.variable_views)?;
        if let Some(j) = classified.var.joins.first() {
            return Err(ModelError::UnsupportedConstraintShape(format!(
                "view '{name}' joins on decision-valued predicate {j}"
            )));
        }
        let generators = classified.non_var.generators.clone();

        if query.is_aggregating() {
            if let Some(p) = classified.var.filters.first() {
                return Err(ModelError::UnsupportedConstraintShape(format!(
                    "view '{name}' aggregates rows selected by decision-valued predicate {p}"
                )));
            }
            let predicates: Vec<&Expr> = query
                .qualifiers
                .iter()
                .filter_map(Qualifier::expr)
                .filter(|e| e.contains_aggregate())
                .collect();
            for group in self.collect_groups(name, query, &classified)? {
                for p in &predicates {
                    self.assert_predicate(name, p, &Scope::Group(&group))?;
                }
            }
            return Ok(());
        }

        // Joins select combinations; every filter is asserted on each
        let guards = classified.non_var.joins.clone();
        let filters: Vec<&Expr> = query
            .qualifiers
            .iter()
            .filter_map(|q| match q {
                Qualifier::Filter(e) => Some(e),
                _ => None,
            })
            .collect();
        self.for_each_row(&generators, &guards, &mut |ctx, env| {
            for f in &filters {
                ctx.assert_predicate(name, f, &Scope::Row(env))?;
            }
            Ok(())
        })
    }

    fn compile_objective_view(&mut self, name: &str, query: &Query) -> ModelResult<()> {
        let classified = classify_qualifiers(&query.qualifiers, &self.variable_views)?;
        if let Some(p) = classified.var.row_predicates().first() {
            return Err(ModelError::UnsupportedComprehensionShape(format!(
                "objective '{name}' selects rows with decision-valued predicate {p}"
            )));
        }

        let mut slots = Vec::new();
        if query.is_aggregating() {
            if let Some(p) = classified.var.aggregates.first() {
                return Err(ModelError::UnsupportedComprehensionShape(format!(
                    "objective '{name}' filters groups with decision-valued predicate {p}"
                )));
            }
            for group in self.collect_groups(name, query, &classified)? {
                if !self.having_holds(&classified.non_var.aggregates, &group)? {
                    continue;
                }
                for item in &query.head {
                    slots.push(self.lower(&item.expr, &Scope::Group(&group))?);
                }
            }
        } else {
            let generators = classified.non_var.generators.clone();
            let guards = classified.non_var.row_predicates();
            self.for_each_row(&generators, &guards, &mut |ctx, env| {
                for item in &query.head {
                    slots.push(ctx.lower(&item.expr, &Scope::Row(env))?);
                }
                Ok(())
            })?;
        }

        let mut terms = Vec::with_capacity(slots.len());
        for slot in slots {
            terms.push(self.to_int_expr(slot)?);
        }
        self.objective.get_or_insert_with(Vec::new).extend(terms);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::Constraint;
    use crate::tuple;

    pub(crate) fn node_pod_catalog() -> Catalog {
        Catalog::new()
            .with_table(
                TableSchema::new("NODE")
                    .column("name", DataType::String)
                    .column("cap", DataType::Int),
            )
            .unwrap()
            .with_table(
                TableSchema::new("POD")
                    .column("name", DataType::String)
                    .controllable_column("node", DataType::String),
            )
            .unwrap()
    }

    pub(crate) fn node_pod_snapshot(cap: i64) -> Snapshot {
        Snapshot::new()
            .with_rows("NODE", vec![tuple!["n1", cap]])
            .with_rows("POD", vec![tuple!["p1", Value::Null]])
    }

    fn node_name() -> ColumnRef {
        ColumnRef::new("NODE", "name", DataType::String)
    }

    fn node_cap() -> ColumnRef {
        ColumnRef::new("NODE", "cap", DataType::Int)
    }

    fn pod_node() -> ColumnRef {
        ColumnRef::controllable("POD", "node", DataType::String)
    }

    fn placement_views() -> ViewSet {
        let feasible_nodes = Query::select(vec![Expr::col(node_name())])
            .from("NODE")
            .filter(Expr::col(node_cap()).ge(Expr::lit(1_i64)));
        ViewSet::new().with(View::constraint(
            "respect_capacity",
            Query::select(vec![Expr::col(pod_node())])
                .from("POD")
                .filter(Expr::col(pod_node()).is_in(Expr::subquery(feasible_nodes))),
        ))
    }

    #[test]
    fn test_in_subquery_becomes_domain_constraint() {
        let catalog = node_pod_catalog();
        let snapshot = node_pod_snapshot(1);
        let compiled = compile(&catalog, &snapshot, &placement_views()).unwrap();

        let model = compiled.model();
        assert_eq!(model.num_vars(), 1);
        assert_eq!(model.variables()[0].name, "POD.node[0]");
        assert_eq!(model.variables()[0].domain, Domain::Values(vec![0]));
        assert_eq!(
            model.constraints(),
            &[Constraint::InDomain {
                expr: IntExpr::Var(VarId(0)),
                domain: vec![0]
            }]
        );
        assert_eq!(compiled.relation("subquery1").map(Relation::len), Some(1));
        assert_eq!(compiled.var("pod", "node", 0), Some(VarId(0)));
    }

    #[test]
    fn test_empty_subquery_gives_empty_domain() {
        let catalog = node_pod_catalog();
        let snapshot = node_pod_snapshot(0);
        let compiled = compile(&catalog, &snapshot, &placement_views()).unwrap();
        assert!(matches!(
            &compiled.model().constraints()[0],
            Constraint::InDomain { domain, .. } if domain.is_empty()
        ));
    }

    #[test]
    fn test_compilation_is_deterministic() {
        let catalog = node_pod_catalog();
        let snapshot = node_pod_snapshot(1);
        let a = compile(&catalog, &snapshot, &placement_views()).unwrap();
        let b = compile(&catalog, &snapshot, &placement_views()).unwrap();
        assert_eq!(a.model(), b.model());
        assert_eq!(a.model().to_string(), b.model().to_string());
    }

    #[test]
    fn test_structurally_equal_subqueries_are_memoized() {
        let sub = Query::select(vec![Expr::col(node_name())]).from("NODE");
        let views = ViewSet::new().with(View::constraint(
            "twice",
            Query::select(vec![Expr::col(pod_node())])
                .from("POD")
                .filter(Expr::col(pod_node()).is_in(Expr::subquery(sub.clone())))
                .filter(Expr::col(pod_node()).is_in(Expr::subquery(sub))),
        ));
        let catalog = node_pod_catalog();
        let snapshot = node_pod_snapshot(1);
        let compiled = compile(&catalog, &snapshot, &views).unwrap();
        assert!(compiled.relation("subquery1").is_some());
        assert!(compiled.relation("subquery2").is_none());
        assert_eq!(compiled.model().constraints().len(), 2);
    }

    #[test]
    fn test_relation_view_with_guard() {
        let views = ViewSet::new().with(View::relation(
            "big_nodes",
            Query::select(vec![Expr::col(node_name()).alias("node")])
                .from("NODE")
                .filter(Expr::col(node_cap()).gt(Expr::lit(1_i64))),
        ));
        let catalog = node_pod_catalog();
        let snapshot = Snapshot::new()
            .with_rows("NODE", vec![tuple!["n1", 1], tuple!["n2", 4], tuple!["n3", 2]])
            .with_rows("POD", vec![]);
        let compiled = compile(&catalog, &snapshot, &views).unwrap();
        let rel = compiled.relation("big_nodes").unwrap();
        assert_eq!(rel.fields()[0].name, "NODE.NAME");
        let names: Vec<_> = rel.first_column().cloned().collect();
        assert_eq!(
            names,
            vec![
                Slot::Value(Value::string("n2")),
                Slot::Value(Value::string("n3"))
            ]
        );
    }

    #[test]
    fn test_non_constraint_view_rejects_variable_filter() {
        let views = ViewSet::new().with(View::relation(
            "on_n1",
            Query::select(vec![Expr::col(ColumnRef::new("POD", "name", DataType::String))])
                .from("POD")
                .filter(Expr::col(pod_node()).equals(Expr::lit("n1"))),
        ));
        let catalog = node_pod_catalog();
        let snapshot = node_pod_snapshot(1);
        assert!(matches!(
            compile(&catalog, &snapshot, &views),
            Err(ModelError::UnsupportedComprehensionShape(_))
        ));
    }

    #[test]
    fn test_variable_join_in_constraint_view() {
        let views = ViewSet::new().with(View::constraint(
            "joined",
            Query::select(vec![Expr::col(pod_node())])
                .from("POD")
                .from("NODE")
                .filter(Expr::col(pod_node()).equals(Expr::col(node_name())))
                .filter(Expr::col(node_cap()).ge(Expr::lit(1_i64))),
        ));
        let catalog = node_pod_catalog();
        let snapshot = node_pod_snapshot(1);
        assert!(matches!(
            compile(&catalog, &snapshot, &views),
            Err(ModelError::UnsupportedConstraintShape(_))
        ));
    }

    #[test]
    fn test_generator_over_constraint_view_is_rejected() {
        let views = placement_views().with(View::relation(
            "bad",
            Query::select(vec![Expr::lit(1_i64)]).from("respect_capacity"),
        ));
        let catalog = node_pod_catalog();
        let snapshot = node_pod_snapshot(1);
        assert!(matches!(
            compile(&catalog, &snapshot, &views),
            Err(ModelError::UnsupportedComprehensionShape(_))
        ));
    }

    #[test]
    fn test_top_level_arithmetic_is_not_a_constraint() {
        let views = ViewSet::new().with(View::constraint(
            "sum",
            Query::select(vec![Expr::col(node_cap())])
                .from("NODE")
                .filter(Expr::col(node_cap()).plus(Expr::lit(1_i64))),
        ));
        let catalog = node_pod_catalog();
        let snapshot = node_pod_snapshot(1);
        assert!(matches!(
            compile(&catalog, &snapshot, &views),
            Err(ModelError::UnsupportedConstraintShape(_))
        ));
    }

    #[test]
    fn test_cancelled_before_first_view() {
        let catalog = node_pod_catalog();
        let snapshot = node_pod_snapshot(1);
        let cancel = Cancellation::new();
        cancel.cancel();
        assert_eq!(
            compile_with(&catalog, &snapshot, &placement_views(), &cancel).unwrap_err(),
            ModelError::Cancelled
        );
    }

    #[test]
    fn test_stats_and_trace() {
        let catalog = node_pod_catalog();
        let snapshot = node_pod_snapshot(1);
        let compiled = compile(&catalog, &snapshot, &placement_views()).unwrap();
        let stats = compiled.stats();
        assert_eq!(stats.views, 1);
        assert_eq!(stats.variables, 1);
        assert_eq!(stats.derived_relations, 1);
        assert_eq!(stats.constraints_by_kind.get("in_domain"), Some(&1));
        assert_eq!(compiled.trace().views[0].constraints, 1);
    }

    #[test]
    fn test_generated_names_skip_caller_views() {
        let views = ViewSet::new()
            .with(View::relation(
                "per_node",
                Query::select(vec![
                    Expr::col(node_name()).into(),
                    Expr::sum(Expr::col(node_cap())).alias("total"),
                ])
                .from("NODE")
                .group_by(vec![node_name()]),
            ))
            .with(View::relation(
                "tmp0",
                Query::select(vec![Expr::col(node_cap()).alias("cap")]).from("NODE"),
            ));
        let catalog = node_pod_catalog();
        let snapshot = node_pod_snapshot(3);
        let compiled = compile(&catalog, &snapshot, &views).unwrap();

        let caller = compiled.relation("tmp0").unwrap();
        assert_eq!(
            caller.first_column().cloned().collect::<Vec<_>>(),
            vec![Slot::Value(Value::Int(3))]
        );
        // per_node stages its rows under the next free name
        assert!(compiled.relation("tmp1").is_some());
        assert_eq!(compiled.stats().derived_relations, 3);
    }

    #[test]
    fn test_decision_valued_members_error_by_context() {
        let chosen = View::relation(
            "chosen",
            Query::select(vec![Expr::col(pod_node())]).from("POD"),
        );
        let chosen_node = || Expr::col(ColumnRef::new("chosen", "node", DataType::String));
        let catalog = node_pod_catalog();
        let snapshot = node_pod_snapshot(1);

        let computed = ViewSet::new().with(chosen.clone()).with(View::relation(
            "used",
            Query::select(vec![Expr::col(node_name()).is_in(chosen_node()).alias("used")])
                .from("NODE"),
        ));
        assert!(matches!(
            compile(&catalog, &snapshot, &computed),
            Err(ModelError::UnsupportedComprehensionShape(_))
        ));

        let asserted = ViewSet::new().with(chosen).with(View::constraint(
            "follow_chosen",
            Query::select(vec![Expr::col(pod_node())])
                .from("POD")
                .filter(Expr::col(pod_node()).is_in(chosen_node())),
        ));
        assert!(matches!(
            compile(&catalog, &snapshot, &asserted),
            Err(ModelError::UnsupportedConstraintShape(_))
        ));
    }

    #[test]
    fn test_in_domain_rejects_members_without_encoding() {
        let catalog = Catalog::new()
            .with_table(TableSchema::new("RATE").column("value", DataType::Float))
            .unwrap()
            .with_table(TableSchema::new("JOB").controllable_column("rate", DataType::Int))
            .unwrap();
        let snapshot = Snapshot::new()
            .with_rows("RATE", vec![tuple![2.0], tuple![2.5]])
            .with_rows("JOB", vec![tuple![Value::Null]]);
        let job_rate = ColumnRef::controllable("JOB", "rate", DataType::Int);
        let views = ViewSet::new().with(View::constraint(
            "known_rate",
            Query::select(vec![Expr::col(job_rate.clone())])
                .from("JOB")
                .filter(Expr::col(job_rate).is_in(Expr::col(ColumnRef::new(
                    "RATE",
                    "value",
                    DataType::Float,
                )))),
        ));
        assert!(matches!(
            compile(&catalog, &snapshot, &views),
            Err(ModelError::UnsupportedConstraintShape(msg)) if msg.contains("2.5")
        ));
    }
}
