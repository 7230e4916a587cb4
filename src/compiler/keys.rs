//! Key constraints
//!
//! Primary and foreign keys of base tables compile straight into
//! structural constraints, before any view:
//! - single controllable primary-key column: `AllDifferent`
//! - multi-column primary key: pairwise `NotEqual` over every row pair,
//!   restricted to the controllable key columns
//! - controllable foreign key: per child row an index variable over the
//!   parent's rows and an `Element` constraint selecting the parent key

use super::CompileContext;
use crate::error::{ModelError, ModelResult};
use crate::model::{Constraint, Domain, IntExpr, VarId};
use crate::schema::{ForeignKey, TableSchema};
use crate::value::Value;
use tracing::debug;

impl CompileContext<'_> {
    pub(super) fn compile_keys(&mut self) -> ModelResult<()> {
        let catalog = self.catalog;
        for schema in catalog.tables() {
            self.compile_primary_key(schema);
            for fk in &schema.foreign_keys {
                self.compile_foreign_key(schema, fk)?;
            }
        }
        Ok(())
    }

    fn compile_primary_key(&mut self, schema: &TableSchema) {
        let columns: Vec<Vec<VarId>> = schema
            .primary_key
            .iter()
            .filter_map(|c| self.column_vars(&schema.name, c).map(<[VarId]>::to_vec))
            .collect();
        if columns.is_empty() {
            return;
        }

        if schema.primary_key.len() == 1 {
            let vars = columns[0].iter().map(|&v| IntExpr::Var(v)).collect();
            self.model.add(Constraint::AllDifferent(vars));
            debug!(table = %schema.name, "primary_key_all_different");
            return;
        }

        let rows = columns[0].len();
        for i in 0..rows {
            for j in (i + 1)..rows {
                for vars in &columns {
                    self.model
                        .add(Constraint::NotEqual(IntExpr::Var(vars[i]), IntExpr::Var(vars[j])));
                }
            }
        }
        debug!(
            table = %schema.name,
            columns = columns.len(),
            rows,
            "primary_key_pairwise"
        );
    }

    fn compile_foreign_key(&mut self, schema: &TableSchema, fk: &ForeignKey) -> ModelResult<()> {
        // Fixed child columns are checked by whoever owns the data
        let Some(children) = self.column_vars(&schema.name, &fk.column).map(<[VarId]>::to_vec)
        else {
            return Ok(());
        };

        let catalog = self.catalog;
        let snapshot = self.snapshot;
        let parent = catalog
            .get(&fk.parent_table)
            .ok_or_else(|| ModelError::UnknownTable(fk.parent_table.clone()))?;
        let idx = parent
            .column_index(&fk.parent_column)
            .ok_or_else(|| ModelError::UnknownColumn {
                table: parent.name.clone(),
                column: fk.parent_column.clone(),
            })?;
        if parent.columns[idx].controllable {
            return Err(ModelError::UnsupportedConstraintShape(format!(
                "foreign key {}.{} references controllable column {}.{}",
                schema.name, fk.column, parent.name, fk.parent_column
            )));
        }

        let mut array = Vec::new();
        for row in snapshot.rows(&parent.name) {
            let value = row.get(idx).cloned().unwrap_or(Value::Null);
            let code = self.encoder.encode(&value).ok_or_else(|| {
                ModelError::UnsupportedConstraintShape(format!(
                    "parent key {value} of {}.{} has no integer encoding",
                    parent.name, fk.parent_column
                ))
            })?;
            array.push(code);
        }

        let domain = if array.is_empty() {
            Domain::Values(Vec::new())
        } else {
            Domain::range(0, array.len() as i64 - 1)
        };
        for (i, &child) in children.iter().enumerate() {
            let index = self.model.new_var(
                format!("{}.{}[{i}]->{}", schema.name, fk.column, parent.name),
                domain.clone(),
            );
            self.model.add(Constraint::Element {
                index,
                array: array.clone(),
                target: IntExpr::Var(child),
            });
        }
        debug!(
            table = %schema.name,
            column = %fk.column,
            parent = %parent.name,
            parent_rows = array.len(),
            "foreign_key_element"
        );
        Ok(())
    }
}
