//! # Policy Compiler
//!
//! Compiles placement policies, written as monoid comprehensions over
//! relational tables, into constraint models. Some columns of some tables
//! are *controllable*: their values are decided by a solver, subject to the
//! policy's constraint views and maximizing its objective views. The solved
//! values are written back into the tables.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! Catalog + Snapshot + ViewSet
//!     ↓
//! [Snapshot validation]         → arity, types, Null only where controllable
//!     ↓
//! [Variable declaration]        → one IntVar per (controllable column, row)
//!     ↓
//! [Key constraints]             → AllDifferent / pairwise NotEqual / Element
//!     ↓
//! per view (non-constraint, then constraint, then objective):
//!     [Column resolution]       → types and controllability from the catalog
//!     [Rewrite passes]          → count → sum(1), predicate folding
//!     [Qualifier classifier]    → variable / non-variable bags
//!     [View compiler]           → derived relation, constraints or objective terms
//!     ↓
//! Model ──► SolverBackend ──► SolveOutcome
//!     ↓
//! [Result extraction]           → tables with solved controllable columns
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use policy_compiler::{compile, solve, Config, Z3Backend};
//!
//! let config = Config::load()?;
//! let compiled = compile(&catalog, &snapshot, &views)?;
//! let tables = solve(&compiled, &Z3Backend::new(), &config.solver.to_params())?;
//! println!("{:?}", tables["POD"]);
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `value` | Scalar values, tuples, solver integer encoding |
//! | `schema` | Table schemas, catalog, data snapshot |
//! | `ir` | Comprehension IR and views |
//! | `classify` | Expression type and decision classification |
//! | `qualifiers` | Qualifier partitioning by variability and kind |
//! | `rewrite` | IR rewrite passes |
//! | `model` | Solver model and backend contract |
//! | `backend` | z3 backend |
//! | `compiler` | IR → model |
//! | `solve` | Solve and result extraction |
//! | `execution` | Solve deadline and cancellation |

pub mod backend;
pub mod classify;
pub mod compiler;
pub mod config;
pub mod error;
pub mod execution;
pub mod ir;
pub mod logging;
pub mod model;
pub mod pipeline_trace;
pub mod qualifiers;
pub mod rewrite;
pub mod schema;
pub mod solve;
pub mod value;

// Re-export public types
pub use backend::Z3Backend;
pub use compiler::{compile, compile_with, CompiledModel, CompiledTable, Relation, Slot};
pub use config::{Config, LoggingConfig, SolverConfig};
pub use error::{ModelError, ModelResult};
pub use execution::Cancellation;
pub use ir::{
    AggregateFn, BinaryOp, ColumnRef, Expr, Generator, HeadItem, Qualifier, Query, View,
    ViewKind, ViewSet,
};
pub use logging::init_tracing;
pub use model::{
    Constraint, Domain, IntExpr, Model, Objective, SolveOutcome, SolveParams, SolverBackend,
    SolverStatus, VarId,
};
pub use pipeline_trace::{CompileStats, PipelineTrace};
pub use schema::{Catalog, ColumnSchema, ForeignKey, SchemaError, Snapshot, TableSchema};
pub use solve::{solve, solve_detailed, Solution};
pub use value::{DataType, Tuple, Value, ValueEncoder};
