//! Query compiler for Mosaic.
//!
//! Turns a [`QueryOptions`](mosaic_api::QueryOptions) request plus a context
//! variable environment into one flat [`CompiledQuery`] and a [`RowMapper`]
//! that restores the caller's aliases. [`eval`] interprets the compiled form
//! in memory.

pub mod compiler;
pub mod config;
pub mod eval;
pub mod jsonql;

pub use compiler::{CompileError, Compiled, QueryCompiler, RowMapper};
pub use config::CompilerConfig;
pub use jsonql::{
    value_to_sql_literal, CompiledQuery, FromTable, NullsOrder, OrderByOrdinal, Select, SqlExpr,
};
