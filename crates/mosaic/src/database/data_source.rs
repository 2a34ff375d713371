//! Database backed by an opaque data source that executes compiled queries.

use async_trait::async_trait;
use mosaic_api::{ContextVar, ContextVarValues, QueryOptions, Row, Schema};
use mosaic_query::{CompiledQuery, CompilerConfig, QueryCompiler};
use std::sync::Arc;
use tracing::debug;

use super::virtual_db::VirtualDatabase;
use super::{
    ChangeListener, ChangeListeners, Database, DatabaseError, ListenerId, PrimaryKey, Result,
    Transaction,
};

/// Backend executing compiled queries. Result rows are keyed by select alias
/// (`c_N`, `o_N`).
///
/// Mutations are optional; a read-only backend keeps the defaults.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn perform_query(&self, query: &CompiledQuery) -> Result<Vec<Row>>;

    async fn add_row(&self, table: &str, _values: Row) -> Result<PrimaryKey> {
        Err(DatabaseError::NotImplemented(format!("add_row on {}", table)))
    }

    async fn update_row(&self, table: &str, _primary_key: &PrimaryKey, _values: Row) -> Result<()> {
        Err(DatabaseError::NotImplemented(format!("update_row on {}", table)))
    }

    async fn remove_row(&self, table: &str, _primary_key: &PrimaryKey) -> Result<()> {
        Err(DatabaseError::NotImplemented(format!("remove_row on {}", table)))
    }
}

/// [`Database`] that compiles requests and hands them to a [`DataSource`].
///
/// Transactions are staged in a [`VirtualDatabase`] over this database and
/// replayed on commit.
#[derive(Clone)]
pub struct DataSourceDatabase {
    schema: Arc<Schema>,
    data_source: Arc<dyn DataSource>,
    config: CompilerConfig,
    listeners: Arc<ChangeListeners>,
}

impl DataSourceDatabase {
    pub fn new(schema: Arc<Schema>, data_source: Arc<dyn DataSource>) -> Self {
        Self {
            schema,
            data_source,
            config: CompilerConfig::default(),
            listeners: Arc::new(ChangeListeners::new()),
        }
    }

    pub fn with_config(mut self, config: CompilerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Notify listeners of a change made outside this database.
    pub fn trigger_change(&self) {
        self.listeners.notify();
    }
}

#[async_trait]
impl Database for DataSourceDatabase {
    async fn query(
        &self,
        options: &QueryOptions,
        context_vars: &[ContextVar],
        context_var_values: &ContextVarValues,
    ) -> Result<Vec<Row>> {
        let compiled = QueryCompiler::new(&self.schema, context_vars, context_var_values)
            .with_config(self.config.clone())
            .compile_query(options)?;

        let rows = self.data_source.perform_query(&compiled.query).await?;
        debug!(
            "[DataSourceDatabase] {} returned {} rows",
            options.from,
            rows.len()
        );
        Ok(rows
            .into_iter()
            .map(|row| compiled.row_mapper.map_row(row))
            .collect())
    }

    async fn add_row(&self, table: &str, values: Row) -> Result<PrimaryKey> {
        self.schema.require_table(table)?;
        let key = self.data_source.add_row(table, values).await?;
        self.listeners.notify();
        Ok(key)
    }

    async fn update_row(&self, table: &str, primary_key: &PrimaryKey, values: Row) -> Result<()> {
        self.schema.require_table(table)?;
        self.data_source
            .update_row(table, primary_key, values)
            .await?;
        self.listeners.notify();
        Ok(())
    }

    async fn remove_row(&self, table: &str, primary_key: &PrimaryKey) -> Result<()> {
        self.schema.require_table(table)?;
        self.data_source.remove_row(table, primary_key).await?;
        self.listeners.notify();
        Ok(())
    }

    fn transaction(&self) -> Result<Box<dyn Transaction>> {
        let base: Arc<dyn Database> = Arc::new(self.clone());
        Ok(Box::new(VirtualDatabase::new(base, Arc::clone(&self.schema))))
    }

    fn add_change_listener(&self, listener: ChangeListener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn remove_change_listener(&self, id: ListenerId) {
        self.listeners.remove(id);
    }
}
