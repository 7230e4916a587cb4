//! Model compilation and solve errors

use crate::model::SolverStatus;
use crate::schema::SchemaError;
use thiserror::Error;

/// Errors raised while compiling views into a model or extracting results
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// The comprehension violates a structural rule the compiler cannot lower
    #[error("Unsupported comprehension shape: {0}")]
    UnsupportedComprehensionShape(String),

    /// Operator with no lowering for its operand kinds
    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    /// Constraint view predicate with no constraint form
    #[error("Unsupported constraint shape: {0}")]
    UnsupportedConstraintShape(String),

    /// Group-by head references a column that is neither grouped nor aggregated
    #[error("Could not find group-by column {table}.{column}")]
    GroupByColumnNotFound { table: String, column: String },

    #[error("Invalid aggregate usage: {0}")]
    InvalidAggregateUsage(String),

    /// Solver finished without a usable assignment
    #[error("Model is infeasible (solver status {status})")]
    InfeasibleModel { status: SolverStatus },

    #[error("Unknown table or view '{0}'")]
    UnknownTable(String),

    #[error("Unknown column {table}.{column}")]
    UnknownColumn { table: String, column: String },

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Solver value with no native mapping for the column type
    #[error("Cannot decode solver value {value} for {table}.{column}")]
    Decode {
        table: String,
        column: String,
        value: i64,
    },

    #[error("Compilation cancelled")]
    Cancelled,
}

impl ModelError {
    /// True when the failure comes from the solver outcome rather than from
    /// a malformed policy, catalog or snapshot
    pub fn is_solver_failure(&self) -> bool {
        matches!(self, ModelError::InfeasibleModel { .. })
    }
}

/// Result type for compilation and solve operations
pub type ModelResult<T> = Result<T, ModelError>;
