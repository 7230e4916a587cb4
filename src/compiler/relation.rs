//! Derived relations
//!
//! A non-constraint view materializes into a [`Relation`]: an ordered list
//! of rows whose slots are either plain values or solver expressions. After
//! solving, [`Relation::evaluate`] turns every row into a plain [`Tuple`].

use crate::error::{ModelError, ModelResult};
use crate::model::IntExpr;
use crate::value::{DataType, Tuple, Value, ValueEncoder};
use std::fmt;

/// One cell of a derived row
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Slot {
    Value(Value),
    /// Decided by the solver
    Var(IntExpr),
}

impl Slot {
    pub fn is_var(&self) -> bool {
        matches!(self, Slot::Var(_))
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Value(v) => write!(f, "{v}"),
            Slot::Var(e) => write!(f, "{e}"),
        }
    }
}

/// Output field of a derived relation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
    /// Slots of this field may hold solver expressions
    pub decision: bool,
}

/// Materialized view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    name: String,
    fields: Vec<Field>,
    /// Slot of each head expression, in head order
    head: Vec<usize>,
    rows: Vec<Vec<Slot>>,
}

impl Relation {
    pub fn new(name: impl Into<String>, fields: Vec<Field>, head: Vec<usize>) -> Self {
        Relation {
            name: name.into(),
            fields,
            head,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<Slot>) {
        debug_assert_eq!(row.len(), self.fields.len());
        self.rows.push(row);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn rows(&self) -> &[Vec<Slot>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Slot holding the head expression at `position`
    pub fn head_slot(&self, position: usize) -> Option<usize> {
        self.head.get(position).copied()
    }

    /// Cells of the first head expression, row by row
    pub fn first_column(&self) -> impl Iterator<Item = &Slot> {
        let slot = self.head.first().copied();
        self.rows
            .iter()
            .filter_map(move |row| slot.and_then(|s| row.get(s)))
    }

    /// Plain tuples under a solver assignment, head columns only
    pub fn evaluate(&self, values: &[i64], encoder: &ValueEncoder) -> ModelResult<Vec<Tuple>> {
        self.rows
            .iter()
            .map(|row| {
                self.head
                    .iter()
                    .map(|&slot| self.evaluate_slot(&row[slot], slot, values, encoder))
                    .collect::<ModelResult<Tuple>>()
            })
            .collect()
    }

    fn evaluate_slot(
        &self,
        cell: &Slot,
        slot: usize,
        values: &[i64],
        encoder: &ValueEncoder,
    ) -> ModelResult<Value> {
        let field = &self.fields[slot];
        match cell {
            Slot::Value(v) => Ok(v.clone()),
            Slot::Var(e) => {
                let decode_error = |value| ModelError::Decode {
                    table: self.name.clone(),
                    column: field.name.clone(),
                    value,
                };
                let code = e.eval(values).ok_or_else(|| decode_error(0))?;
                encoder
                    .decode(code, field.data_type)
                    .ok_or_else(|| decode_error(code))
            }
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.fields.iter().map(|c| c.name.as_str()).collect();
        writeln!(f, "{}({})", self.name, names.join(", "))?;
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(ToString::to_string).collect();
            writeln!(f, "  ({})", cells.join(", "))?;
        }
        Ok(())
    }
}
