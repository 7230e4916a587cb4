//! Integer encoding for non-integer decision values
//!
//! The solver only reasons about `i64`. Booleans map to 0/1, strings get a
//! dense code in order of first encounter, so one compilation always produces
//! the same codes for the same inputs.

use super::{DataType, Value};
use indexmap::IndexSet;
use std::sync::Arc;

/// Bidirectional string/bool <-> integer mapping for one compilation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueEncoder {
    strings: IndexSet<Arc<str>>,
}

impl ValueEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a value as a solver integer, registering unseen strings.
    ///
    /// Floats and `Null` have no integer form and return `None`; integral
    /// floats are accepted so `1.0` can be compared against decision values.
    pub fn encode(&mut self, value: &Value) -> Option<i64> {
        match value {
            Value::Int(v) => Some(*v),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::String(s) => {
                let (index, _) = self.strings.insert_full(Arc::clone(s));
                Some(index as i64)
            }
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            Value::Float(_) | Value::Null => None,
        }
    }

    /// Map a solver integer back to a native value of the given type
    pub fn decode(&self, code: i64, data_type: DataType) -> Option<Value> {
        match data_type {
            DataType::Int => Some(Value::Int(code)),
            DataType::Bool => match code {
                0 => Some(Value::Bool(false)),
                1 => Some(Value::Bool(true)),
                _ => None,
            },
            DataType::String => usize::try_from(code)
                .ok()
                .and_then(|i| self.strings.get_index(i))
                .map(|s| Value::String(Arc::clone(s))),
            DataType::Float => None,
        }
    }

    /// Codes of every string seen so far, ascending
    pub fn string_codes(&self) -> Vec<i64> {
        (0..self.strings.len() as i64).collect()
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}
