//! Mosaic database layer and live block instances.
//!
//! - [`database`]: the async [`Database`](database::Database) contract, a
//!   data-source backed implementation, an in-memory backend, a read-only
//!   guard and the staging overlay used by save/cancel editing.
//! - [`instance`]: evaluation of block trees against a database.

pub mod database;
pub mod instance;

pub use mosaic_api as api;
pub use mosaic_core as core;
pub use mosaic_query as query;
