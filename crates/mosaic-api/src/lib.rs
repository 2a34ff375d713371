//! Shared types for Mosaic: dynamic values, expressions, schema,
//! context variables and query requests.
//!
//! Every other crate in the workspace speaks in these types, so this crate
//! stays free of async and storage concerns.

pub mod context_var;
pub mod expr;
pub mod query;
pub mod schema;
pub mod value;

pub use context_var::{ContextVar, ContextVarType, ContextVarValue, ContextVarValues, Filter};
pub use expr::{AggrStatus, Expr, ExprUtils, AGGREGATE_OPS};
pub use query::{OrderBy, OrderByDir, QueryOptions, Row};
pub use schema::{Column, Schema, Table};
pub use value::{Value, ValueType};

/// Errors raised by schema lookups and type parsing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown column {column} in table {table}")]
    UnknownColumn { table: String, column: String },

    #[error("Unknown value type: {0}")]
    UnknownValueType(String),
}
