//! # Table Catalog
//!
//! Registration-ordered set of table schemas. Registration order is the
//! order in which decision variables are declared, so it is part of the
//! compiled model's identity.

use super::{name_key, SchemaError, TableSchema};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    tables: Vec<TableSchema>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl Catalog {
    pub fn new() -> Self {
        Catalog::default()
    }

    /// Register a table.
    ///
    /// Foreign keys must reference a table registered earlier, and the
    /// parent column must exist with the same type as the child column.
    pub fn register(&mut self, schema: TableSchema) -> Result<(), SchemaError> {
        schema.validate()?;

        let key = name_key(&schema.name);
        if self.index.contains_key(&key) {
            return Err(SchemaError::AlreadyExists(schema.name));
        }

        for fk in &schema.foreign_keys {
            let parent = if name_key(&fk.parent_table) == key {
                &schema
            } else {
                self.get(&fk.parent_table).ok_or_else(|| {
                    SchemaError::InvalidSchema(format!(
                        "foreign key {}.{} references unknown table '{}'",
                        schema.name, fk.column, fk.parent_table
                    ))
                })?
            };
            let parent_col = parent.get_column(&fk.parent_column).ok_or_else(|| {
                SchemaError::InvalidSchema(format!(
                    "foreign key {}.{} references unknown column {}.{}",
                    schema.name, fk.column, fk.parent_table, fk.parent_column
                ))
            })?;
            if let Some(child_col) = schema.get_column(&fk.column) {
                if child_col.data_type != parent_col.data_type {
                    return Err(SchemaError::InvalidSchema(format!(
                        "foreign key {}.{} ({}) does not match {}.{} ({})",
                        schema.name,
                        fk.column,
                        child_col.data_type,
                        fk.parent_table,
                        fk.parent_column,
                        parent_col.data_type
                    )));
                }
            }
        }

        self.index.insert(key, self.tables.len());
        self.tables.push(schema);
        Ok(())
    }

    /// Builder-style registration for tests and fixtures
    pub fn with_table(mut self, schema: TableSchema) -> Result<Self, SchemaError> {
        self.register(schema)?;
        Ok(self)
    }

    /// Look up a table by name (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&TableSchema> {
        if self.index.len() != self.tables.len() {
            // deserialized catalog: index was skipped
            return self
                .tables
                .iter()
                .find(|t| t.name.eq_ignore_ascii_case(name));
        }
        self.index.get(&name_key(name)).map(|&i| &self.tables[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Tables in registration order
    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
