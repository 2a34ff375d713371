//! Live evaluation of block trees against a [`Database`].
//!
//! An [`InstanceCtx`] carries the context variables in scope, their runtime
//! values and the filters other blocks have put on rowset variables. Blocks
//! use it to fetch the values of their expressions before rendering.

use mosaic_api::{
    ContextVar, ContextVarType, ContextVarValue, ContextVarValues, Expr, ExprUtils, Filter,
    QueryOptions, Row, Schema, Value,
};
use mosaic_core::blocks::{
    AddRowBlockDef, ButtonBlockDef, QueryTableBlockDef, RowBlockDef, SaveCancelBlockDef,
    SearchBlockDef,
};
use mosaic_core::tree::{collect_subtree_expressions, collect_variable_expressions};
use mosaic_core::{BlockCtx, BlockDef};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::database::{
    Database, DatabaseError, PrimaryKey, Result, VirtualDatabase, VirtualDatabaseConfig,
};

/// Values of expressions, keyed by context variable and expression.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExprValues {
    values: HashMap<String, Value>,
}

impl ExprValues {
    fn key(context_var_id: &str, expr: &Expr) -> String {
        format!("{}:{}", context_var_id, expr.canonical_key())
    }

    pub fn insert(&mut self, context_var_id: &str, expr: &Expr, value: Value) {
        self.values.insert(Self::key(context_var_id, expr), value);
    }

    /// Value of `expr` evaluated against `context_var_id`; null when it was
    /// never fetched or the row does not exist.
    pub fn get(&self, context_var_id: &str, expr: &Expr) -> Value {
        self.values
            .get(&Self::key(context_var_id, expr))
            .cloned()
            .unwrap_or_default()
    }

    pub fn extend(&mut self, other: ExprValues) {
        self.values.extend(other.values);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Result of preparing a block for display.
#[derive(Debug, Clone, PartialEq)]
pub enum PreparedBlock {
    /// Validation failed; nothing was fetched.
    Invalid(String),
    Ready(ExprValues),
}

#[derive(Clone)]
pub struct InstanceCtx<'a> {
    pub database: Arc<dyn Database>,
    pub block_ctx: BlockCtx<'a>,
    pub context_vars: Vec<ContextVar>,
    pub context_var_values: ContextVarValues,
    /// Rowset variable id -> filters, unique by filter id
    filters: HashMap<String, Vec<Filter>>,
}

impl<'a> InstanceCtx<'a> {
    pub fn new(database: Arc<dyn Database>, block_ctx: BlockCtx<'a>) -> Self {
        Self {
            database,
            block_ctx,
            context_vars: Vec::new(),
            context_var_values: ContextVarValues::new(),
            filters: HashMap::new(),
        }
    }

    pub fn with_context_var(mut self, context_var: ContextVar, value: ContextVarValue) -> Self {
        self.context_var_values
            .insert(context_var.id.clone(), value);
        self.context_vars.push(context_var);
        self
    }

    pub fn schema(&self) -> &'a Schema {
        self.block_ctx.schema
    }

    pub fn context_var(&self, id: &str) -> Option<&ContextVar> {
        self.context_vars.iter().find(|cv| cv.id == id)
    }

    /// Context for a child block: the child's scope plus values for the
    /// variables its parent introduced. Filters carry over.
    pub fn child(&self, context_vars: Vec<ContextVar>, values: ContextVarValues) -> Self {
        let mut child = self.clone();
        child.context_vars = context_vars;
        child.context_var_values.extend(values);
        child
    }

    /// Same scope against another database, as below a save/cancel block.
    pub fn with_database(&self, database: Arc<dyn Database>) -> Self {
        let mut ctx = self.clone();
        ctx.database = database;
        ctx
    }

    /// Add or replace (by filter id) a filter on a rowset variable.
    pub fn set_filter(&mut self, rowset_id: &str, filter: Filter) {
        let filters = self.filters.entry(rowset_id.to_string()).or_default();
        match filters.iter_mut().find(|f| f.id == filter.id) {
            Some(existing) => *existing = filter,
            None => filters.push(filter),
        }
    }

    pub fn remove_filter(&mut self, rowset_id: &str, filter_id: &str) {
        if let Some(filters) = self.filters.get_mut(rowset_id) {
            filters.retain(|f| f.id != filter_id);
        }
    }

    pub fn filters(&self, rowset_id: &str) -> &[Filter] {
        self.filters.get(rowset_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The rowset's own filter combined with every filter set on it.
    pub fn rowset_filter_expr(&self, rowset_id: &str) -> Option<Expr> {
        let own = self
            .context_var_values
            .get(rowset_id)
            .and_then(ContextVarValue::as_filter)
            .cloned();
        let extra = self
            .filters(rowset_id)
            .iter()
            .filter_map(|f| f.expr.clone());
        Expr::and(own.into_iter().chain(extra).collect())
    }

    /// Context variable values with rowset filters applied.
    pub fn effective_values(&self) -> ContextVarValues {
        let mut values = self.context_var_values.clone();
        for context_var in self.context_vars.iter().filter(|cv| cv.is_rowset()) {
            values.insert(
                context_var.id.clone(),
                ContextVarValue::Filter(self.rowset_filter_expr(&context_var.id)),
            );
        }
        values
    }

    async fn query(&self, options: &QueryOptions) -> Result<Vec<Row>> {
        self.database
            .query(options, &self.context_vars, &self.effective_values())
            .await
    }

    /// Evaluate expressions against a row or rowset variable.
    ///
    /// Row variables select the bound row. Rowset variables only evaluate
    /// aggregate expressions, over the filtered rowset. Scalar variables have
    /// nothing to fetch.
    pub async fn context_var_expr_values(
        &self,
        context_var: &ContextVar,
        exprs: &[Expr],
    ) -> Result<ExprValues> {
        let mut values = ExprValues::default();
        let Some(table) = context_var.table.clone() else {
            return Ok(values);
        };

        let exprs: Vec<&Expr> = match context_var.var_type {
            ContextVarType::Row => exprs.iter().collect(),
            ContextVarType::Rowset => {
                let utils = ExprUtils::new(self.schema(), &self.context_vars);
                exprs.iter().filter(|e| utils.is_aggregate(e)).collect()
            }
            ContextVarType::Scalar(_) => Vec::new(),
        };
        if exprs.is_empty() {
            return Ok(values);
        }

        let mut options = QueryOptions::new(table.clone());
        for (index, expr) in exprs.iter().enumerate() {
            options = options.select(format!("e{}", index), (*expr).clone());
        }
        options = match context_var.var_type {
            ContextVarType::Row => options
                .filter(Expr::op(
                    "=",
                    vec![Expr::id(table), Expr::variable(context_var.id.clone())],
                ))
                .limit(1),
            _ => options.filter(Expr::variable(context_var.id.clone())),
        };

        let rows = self.query(&options).await?;
        if let Some(row) = rows.into_iter().next() {
            for (index, expr) in exprs.iter().enumerate() {
                let value = row.get(&format!("e{}", index)).cloned().unwrap_or_default();
                values.insert(&context_var.id, expr, value);
            }
        }
        Ok(values)
    }

    /// Validate a block, then fetch the values of its own expressions for
    /// every variable in scope.
    pub async fn prepare_block(&self, block: &BlockDef) -> Result<PreparedBlock> {
        if let Some(message) = block.validate(&self.block_ctx, &self.context_vars) {
            debug!("[InstanceCtx] {} is invalid: {}", block.id(), message);
            return Ok(PreparedBlock::Invalid(message));
        }

        let mut values = ExprValues::default();
        for context_var in &self.context_vars {
            let exprs = collect_variable_expressions(
                block,
                context_var,
                false,
                &self.context_vars,
                &self.block_ctx,
            );
            values.extend(self.context_var_expr_values(context_var, &exprs).await?);
        }
        Ok(PreparedBlock::Ready(values))
    }

    /// Rows of a query table: `id` plus one `e<N>` column per expression the
    /// content cells evaluate against the row variable.
    pub async fn query_table_rows(
        &self,
        block: &QueryTableBlockDef,
    ) -> Result<(Vec<Expr>, Vec<Row>)> {
        let rowset = block
            .rowset_context_var_id
            .as_deref()
            .and_then(|id| self.context_var(id))
            .ok_or_else(|| DatabaseError::Invalid("Rowset required".to_string()))?;
        let row_var = block.row_context_var(rowset);

        let mut scope = self.context_vars.clone();
        scope.push(row_var.clone());
        let row_exprs: Vec<Expr> = block
            .contents
            .iter()
            .flatten()
            .flat_map(|cell| collect_subtree_expressions(cell, &row_var, &scope, &self.block_ctx))
            .collect();

        let options = block
            .rows_query(rowset, &row_exprs)
            .ok_or_else(|| DatabaseError::Invalid("Missing table".to_string()))?;
        let rows = self.query(&options).await?;
        Ok((row_exprs, rows))
    }

    /// Primary key of the row a row block binds, if any matches.
    pub async fn resolve_row(&self, block: &RowBlockDef) -> Result<Option<PrimaryKey>> {
        let Some(options) = block.row_query() else {
            return Ok(None);
        };
        let rows = self.query(&options).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|mut row| row.remove("id")))
    }

    /// Apply the search text of a search block as a filter on its rowset.
    pub fn apply_search(&mut self, block: &SearchBlockDef, search_text: &str) {
        let Some(rowset_id) = block.rowset_context_var_id.clone() else {
            return;
        };
        match block.filter_for(search_text) {
            Some(filter) => self.set_filter(&rowset_id, filter),
            None => self.remove_filter(&rowset_id, &block.id),
        }
    }

    /// Insert the row described by an add-row block and return its key.
    pub async fn add_row(&self, block: &AddRowBlockDef) -> Result<PrimaryKey> {
        let table = block
            .table
            .clone()
            .ok_or_else(|| DatabaseError::Invalid("Table required".to_string()))?;

        let mut row = Row::new();
        for (column, value) in &block.column_values {
            let Some(expr) = &value.expr else {
                continue;
            };
            let evaluated = match value.context_var_id.as_deref() {
                Some(cv_id) => {
                    let context_var = self.context_var(cv_id).ok_or_else(|| {
                        DatabaseError::Invalid(format!("Context variable {} not found", cv_id))
                    })?;
                    self.context_var_expr_values(context_var, std::slice::from_ref(expr))
                        .await?
                        .get(cv_id, expr)
                }
                None => match expr {
                    Expr::Literal { value, .. } => value.clone(),
                    _ => Value::Null,
                },
            };
            row.insert(column.clone(), evaluated);
        }

        self.database.add_row(&table, row).await
    }

    /// Run a button's action with the current variable environment.
    pub async fn perform_button(&self, block: &ButtonBlockDef) -> Result<()> {
        let Some(action) = &block.action else {
            return Ok(());
        };
        self.block_ctx
            .action_library
            .perform_action(action, &self.context_vars, &self.effective_values())
            .await
            .map_err(|e| DatabaseError::Backend(e.to_string()))
    }
}

/// Edit session of a save/cancel block: one overlay at a time, replaced after
/// every save, cancel or delete.
pub struct SaveCancelSession {
    base: Arc<dyn Database>,
    schema: Arc<Schema>,
    config: VirtualDatabaseConfig,
    overlay: VirtualDatabase,
}

impl SaveCancelSession {
    pub fn new(base: Arc<dyn Database>, schema: Arc<Schema>) -> Self {
        let overlay = VirtualDatabase::new(Arc::clone(&base), Arc::clone(&schema));
        Self {
            base,
            schema,
            config: VirtualDatabaseConfig::default(),
            overlay,
        }
    }

    pub fn with_config(mut self, config: VirtualDatabaseConfig) -> Self {
        self.overlay = self.overlay.with_config(config.clone());
        self.config = config;
        self
    }

    /// Database the subtree of the block reads and writes through.
    pub fn database(&self) -> Arc<dyn Database> {
        Arc::new(self.overlay.clone())
    }

    pub fn overlay(&self) -> &VirtualDatabase {
        &self.overlay
    }

    pub async fn has_pending_changes(&self) -> bool {
        self.overlay.has_pending_changes().await
    }

    pub async fn save(&mut self) -> Result<()> {
        self.overlay.commit().await?;
        self.reset();
        Ok(())
    }

    pub async fn cancel(&mut self) -> Result<()> {
        self.overlay.rollback().await?;
        self.reset();
        Ok(())
    }

    /// Remove the row bound to the block's delete variable directly in the
    /// base database, discarding staged edits.
    pub async fn delete(&mut self, block: &SaveCancelBlockDef, ctx: &InstanceCtx<'_>) -> Result<()> {
        let context_var = block
            .delete_context_var_id
            .as_deref()
            .and_then(|id| ctx.context_var(id))
            .ok_or_else(|| DatabaseError::Invalid("No delete context variable".to_string()))?;
        let table = context_var
            .table
            .clone()
            .ok_or_else(|| DatabaseError::Invalid("Missing table".to_string()))?;
        let key = ctx
            .context_var_values
            .get(&context_var.id)
            .and_then(ContextVarValue::as_value)
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| DatabaseError::Invalid("No row to delete".to_string()))?;

        let transaction = self.base.transaction()?;
        transaction.remove_row(&table, &key).await?;
        transaction.commit().await?;
        info!("[SaveCancelSession] Deleted {} {}", table, key);

        self.overlay.rollback().await?;
        self.reset();
        Ok(())
    }

    fn reset(&mut self) {
        self.overlay = VirtualDatabase::new(Arc::clone(&self.base), Arc::clone(&self.schema))
            .with_config(self.config.clone());
    }
}
