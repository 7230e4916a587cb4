//! # Table Schemas
//!
//! Typed table definitions consumed by the compiler:
//! - ordered columns with a declared scalar type and a controllable flag
//! - an optional primary key (one or more columns)
//! - foreign keys mapping a child column to a parent table column
//!
//! Controllable columns hold decision variables. They must be
//! integer-representable (int, bool, string via the encoder); float
//! controllable columns are rejected when the table is registered.
//!
//! ```rust,ignore
//! let pod = TableSchema::new("POD")
//!     .column("name", DataType::String)
//!     .controllable_column("controllable_node", DataType::String)
//!     .primary_key(&["name"])
//!     .foreign_key("controllable_node", "NODE", "name");
//! ```
//!
//! Names are matched case-insensitively everywhere; [`name_key`] produces the
//! normalized lookup key.

pub mod catalog;
pub mod snapshot;

pub use catalog::Catalog;
pub use snapshot::Snapshot;

use crate::value::DataType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized (upper-cased) key for table and column lookups
pub fn name_key(name: &str) -> String {
    name.to_uppercase()
}

/// Errors raised while registering schemas or validating snapshots
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("Table '{0}' is already registered")]
    AlreadyExists(String),
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
    #[error("Duplicate column '{column}' in table '{table}'")]
    DuplicateColumn { table: String, column: String },
    #[error("No schema found for table '{0}'")]
    UnknownTable(String),
    #[error("Row {row} of '{table}' has {got} values, expected {expected}")]
    ArityMismatch {
        table: String,
        row: usize,
        expected: usize,
        got: usize,
    },
    #[error("Row {row} of '{table}': column '{column}' expects {expected}, got {got}")]
    TypeMismatch {
        table: String,
        row: usize,
        column: String,
        expected: DataType,
        got: String,
    },
    #[error("Row {row} of '{table}': fixed column '{column}' is null")]
    NullInFixedColumn {
        table: String,
        row: usize,
        column: String,
    },
}

/// Column definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: DataType,
    /// Values of this column are chosen by the solver
    #[serde(default)]
    pub controllable: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        ColumnSchema {
            name: name.into(),
            data_type,
            controllable: false,
        }
    }

    pub fn controllable(name: impl Into<String>, data_type: DataType) -> Self {
        ColumnSchema {
            name: name.into(),
            data_type,
            controllable: true,
        }
    }
}

impl fmt::Display for ColumnSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.data_type)?;
        if self.controllable {
            write!(f, " @controllable")?;
        }
        Ok(())
    }
}

/// Child column -> parent table column reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub parent_table: String,
    pub parent_column: String,
}

/// Full table definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        TableSchema {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Add a fixed input column
    pub fn column(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.columns.push(ColumnSchema::new(name, data_type));
        self
    }

    /// Add a column whose values are decision variables
    pub fn controllable_column(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.columns.push(ColumnSchema::controllable(name, data_type));
        self
    }

    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }

    pub fn foreign_key(
        mut self,
        column: impl Into<String>,
        parent_table: impl Into<String>,
        parent_column: impl Into<String>,
    ) -> Self {
        self.foreign_keys.push(ForeignKey {
            column: column.into(),
            parent_table: parent_table.into(),
            parent_column: parent_column.into(),
        });
        self
    }

    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    /// Position of a column, matched case-insensitively
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnSchema> {
        self.column_index(name).map(|i| &self.columns[i])
    }

    /// Indices of controllable columns, in declaration order
    pub fn controllable_indices(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.controllable)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn has_controllable_columns(&self) -> bool {
        self.columns.iter().any(|c| c.controllable)
    }

    /// Structural checks that do not need other tables
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.name.trim().is_empty() {
            return Err(SchemaError::InvalidSchema(
                "table name cannot be empty".to_string(),
            ));
        }
        if self.columns.is_empty() {
            return Err(SchemaError::InvalidSchema(format!(
                "table '{}' has no columns",
                self.name
            )));
        }

        for (i, col) in self.columns.iter().enumerate() {
            if self.columns[..i]
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&col.name))
            {
                return Err(SchemaError::DuplicateColumn {
                    table: self.name.clone(),
                    column: col.name.clone(),
                });
            }
            if col.controllable && !col.data_type.is_integer_representable() {
                return Err(SchemaError::InvalidSchema(format!(
                    "controllable column '{}.{}' has non-integer type {}",
                    self.name, col.name, col.data_type
                )));
            }
        }

        for pk in &self.primary_key {
            if self.column_index(pk).is_none() {
                return Err(SchemaError::InvalidSchema(format!(
                    "primary key column '{}' not found in table '{}'",
                    pk, self.name
                )));
            }
        }

        for fk in &self.foreign_keys {
            if self.column_index(&fk.column).is_none() {
                return Err(SchemaError::InvalidSchema(format!(
                    "foreign key column '{}' not found in table '{}'",
                    fk.column, self.name
                )));
            }
        }

        Ok(())
    }
}

impl fmt::Display for TableSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, col) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{col}")?;
        }
        write!(f, ")")?;
        if !self.primary_key.is_empty() {
            write!(f, " primary key ({})", self.primary_key.join(", "))?;
        }
        for fk in &self.foreign_keys {
            write!(
                f,
                " foreign key ({}) references {}({})",
                fk.column, fk.parent_table, fk.parent_column
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod_schema() -> TableSchema {
        TableSchema::new("POD")
            .column("name", DataType::String)
            .controllable_column("controllable_node", DataType::String)
            .primary_key(&["name"])
    }

    #[test]
    fn test_column_lookup_is_case_insensitive() {
        let schema = pod_schema();
        assert_eq!(schema.column_index("NAME"), Some(0));
        assert_eq!(schema.column_index("Controllable_Node"), Some(1));
        assert_eq!(schema.column_index("missing"), None);
        assert_eq!(schema.controllable_indices(), vec![1]);
        assert!(schema.has_controllable_columns());
    }

    #[test]
    fn test_validate_accepts_well_formed_schema() {
        assert!(pod_schema().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_float_controllable() {
        let schema = TableSchema::new("T").controllable_column("x", DataType::Float);
        assert!(matches!(
            schema.validate(),
            Err(SchemaError::InvalidSchema(_))
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_columns() {
        let schema = TableSchema::new("T")
            .column("a", DataType::Int)
            .column("A", DataType::Int);
        assert!(matches!(
            schema.validate(),
            Err(SchemaError::DuplicateColumn { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_key_columns() {
        let schema = TableSchema::new("T")
            .column("a", DataType::Int)
            .primary_key(&["b"]);
        assert!(schema.validate().is_err());

        let schema = TableSchema::new("T")
            .column("a", DataType::Int)
            .foreign_key("b", "P", "id");
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_display() {
        let schema = pod_schema().foreign_key("controllable_node", "NODE", "name");
        assert_eq!(
            schema.to_string(),
            "POD(name: string, controllable_node: string @controllable) primary key (name) \
             foreign key (controllable_node) references NODE(name)"
        );
    }
}
