//! Per-table data snapshot
//!
//! The rows a compilation runs against. A snapshot is immutable for the
//! duration of one compilation; row order is preserved end to end.

use super::{name_key, Catalog, SchemaError, TableSchema};
use crate::value::Tuple;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    tables: HashMap<String, Vec<Tuple>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Snapshot::default()
    }

    /// Replace the rows of a table
    pub fn insert(&mut self, table: &str, rows: Vec<Tuple>) {
        self.tables.insert(name_key(table), rows);
    }

    /// Builder-style insert
    pub fn with_rows(mut self, table: &str, rows: Vec<Tuple>) -> Self {
        self.insert(table, rows);
        self
    }

    /// Rows of a table; a table without a snapshot entry is empty
    pub fn rows(&self, table: &str) -> &[Tuple] {
        self.tables
            .get(&name_key(table))
            .map_or(&[][..], Vec::as_slice)
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.rows(table).len()
    }

    /// Check every row against the catalog.
    ///
    /// Rows must match the table arity and column types. `Null` is accepted
    /// only in controllable columns, where it marks an unassigned cell.
    pub fn validate(&self, catalog: &Catalog) -> Result<(), SchemaError> {
        for key in self.tables.keys() {
            if !catalog.contains(key) {
                return Err(SchemaError::UnknownTable(key.clone()));
            }
        }
        for schema in catalog.tables() {
            Self::validate_table(schema, self.rows(&schema.name))?;
        }
        Ok(())
    }

    fn validate_table(schema: &TableSchema, rows: &[Tuple]) -> Result<(), SchemaError> {
        for (row_idx, row) in rows.iter().enumerate() {
            if row.arity() != schema.arity() {
                return Err(SchemaError::ArityMismatch {
                    table: schema.name.clone(),
                    row: row_idx,
                    expected: schema.arity(),
                    got: row.arity(),
                });
            }
            for (col, value) in schema.columns.iter().zip(row.values()) {
                if value.is_null() {
                    if !col.controllable {
                        return Err(SchemaError::NullInFixedColumn {
                            table: schema.name.clone(),
                            row: row_idx,
                            column: col.name.clone(),
                        });
                    }
                    continue;
                }
                if !col.data_type.accepts(value) {
                    return Err(SchemaError::TypeMismatch {
                        table: schema.name.clone(),
                        row: row_idx,
                        column: col.name.clone(),
                        expected: col.data_type,
                        got: value
                            .data_type()
                            .map_or_else(|| "null".to_string(), |t| t.to_string()),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple;
    use crate::value::{DataType, Value};

    fn catalog() -> Catalog {
        Catalog::new()
            .with_table(
                TableSchema::new("POD")
                    .column("name", DataType::String)
                    .controllable_column("node", DataType::String),
            )
            .unwrap()
    }

    #[test]
    fn test_missing_table_is_empty() {
        let snapshot = Snapshot::new();
        assert!(snapshot.rows("POD").is_empty());
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let snapshot = Snapshot::new().with_rows("pod", vec![tuple!["p1", Value::Null]]);
        assert_eq!(snapshot.row_count("POD"), 1);
    }

    #[test]
    fn test_validate_accepts_null_in_controllable_column() {
        let snapshot = Snapshot::new().with_rows("POD", vec![tuple!["p1", Value::Null]]);
        assert!(snapshot.validate(&catalog()).is_ok());
    }

    #[test]
    fn test_validate_rejects_null_in_fixed_column() {
        let snapshot = Snapshot::new().with_rows("POD", vec![tuple![Value::Null, "n1"]]);
        assert!(matches!(
            snapshot.validate(&catalog()),
            Err(SchemaError::NullInFixedColumn { row: 0, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_arity_and_type_errors() {
        let snapshot = Snapshot::new().with_rows("POD", vec![tuple!["p1"]]);
        assert!(matches!(
            snapshot.validate(&catalog()),
            Err(SchemaError::ArityMismatch { expected: 2, got: 1, .. })
        ));

        let snapshot = Snapshot::new().with_rows("POD", vec![tuple!["p1", 3_i64]]);
        assert!(matches!(
            snapshot.validate(&catalog()),
            Err(SchemaError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_table() {
        let snapshot = Snapshot::new().with_rows("GHOST", vec![]);
        assert_eq!(
            snapshot.validate(&catalog()),
            Err(SchemaError::UnknownTable("GHOST".to_string()))
        );
    }
}
