//! Database contract and implementations.

pub mod data_source;
pub mod memory;
pub mod null;
pub mod virtual_db;

use async_trait::async_trait;
use mosaic_api::{ApiError, ContextVar, ContextVarValues, QueryOptions, Row, Value};
use mosaic_query::CompileError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub use data_source::{DataSource, DataSourceDatabase};
pub use memory::MemoryDataSource;
pub use null::NullDatabase;
pub use virtual_db::{Mutation, OverlayPhase, VirtualDatabase, VirtualDatabaseConfig};

/// Primary key of a row.
pub type PrimaryKey = Value;

pub type Result<T> = std::result::Result<T, DatabaseError>;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Not allowed: {0}")]
    NotAllowed(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// The block or its bindings are not usable as configured
    #[error("Invalid block: {0}")]
    Invalid(String),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Schema(#[from] ApiError),

    #[error("Row {key} not found in {table}")]
    RowNotFound { table: String, key: String },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Overlay is {0} and accepts no further changes")]
    OverlayClosed(String),

    #[error("Temporary key {0} has no persisted row")]
    UnresolvedKey(String),

    #[error("Commit failed at mutation {index} ({mutation}): {source}")]
    CommitFailed {
        index: usize,
        mutation: String,
        #[source]
        source: Box<DatabaseError>,
    },
}

/// Callback fired after the data behind a database changed.
pub type ChangeListener = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[async_trait]
pub trait Database: Send + Sync {
    /// Run a query request with the given context variable environment.
    async fn query(
        &self,
        options: &QueryOptions,
        context_vars: &[ContextVar],
        context_var_values: &ContextVarValues,
    ) -> Result<Vec<Row>>;

    async fn add_row(&self, table: &str, values: Row) -> Result<PrimaryKey>;

    async fn update_row(&self, table: &str, primary_key: &PrimaryKey, values: Row) -> Result<()>;

    async fn remove_row(&self, table: &str, primary_key: &PrimaryKey) -> Result<()>;

    /// Start a transaction. Stores without staged transactions refuse.
    fn transaction(&self) -> Result<Box<dyn Transaction>> {
        Err(DatabaseError::NotImplemented("transaction".to_string()))
    }

    fn add_change_listener(&self, listener: ChangeListener) -> ListenerId;

    fn remove_change_listener(&self, id: ListenerId);
}

/// Group of mutations applied together on `commit`.
#[async_trait]
pub trait Transaction: Send + Sync {
    async fn add_row(&self, table: &str, values: Row) -> Result<PrimaryKey>;

    async fn update_row(&self, table: &str, primary_key: &PrimaryKey, values: Row) -> Result<()>;

    async fn remove_row(&self, table: &str, primary_key: &PrimaryKey) -> Result<()>;

    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;
}

/// Registry of change listeners.
#[derive(Default)]
pub struct ChangeListeners {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, ChangeListener)>>,
}

impl ChangeListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: ChangeListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) {
        self.lock().retain(|(existing, _)| *existing != id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every listener. Listeners run outside the lock so they may
    /// register or remove listeners themselves.
    pub fn notify(&self) {
        let snapshot: Vec<ChangeListener> =
            self.lock().iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in snapshot {
            listener();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, ChangeListener)>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
