//! Transactional overlay over another [`Database`].
//!
//! Mutations are staged in memory and become visible to queries through the
//! overlay immediately, while the base database is untouched until
//! [`VirtualDatabase::commit`]. Rows added through the overlay get temporary
//! keys which commit resolves to the keys the base assigns, including where a
//! temporary key was stored as a value of another staged row.

use async_trait::async_trait;
use mosaic_api::{ContextVar, ContextVarValues, Expr, QueryOptions, Row, Schema, Value};
use mosaic_query::eval::{contains_aggregate, eval, order_values};
use mosaic_query::{CompilerConfig, QueryCompiler};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    ChangeListener, ChangeListeners, Database, DatabaseError, ListenerId, PrimaryKey, Result,
    Transaction,
};

const HELPER_PREFIX: &str = "__";

/// Prefix for the helper selects of a rewritten query, lengthened until no
/// caller alias starts with it.
fn helper_prefix(options: &QueryOptions) -> String {
    let mut prefix = HELPER_PREFIX.to_string();
    while options.select.keys().any(|alias| alias.starts_with(&prefix)) {
        prefix.push('_');
    }
    prefix
}

pub const DEFAULT_TEMP_KEY_PREFIX: &str = "pk_";

/// Configuration for [`VirtualDatabase`]
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualDatabaseConfig {
    /// Prefix of temporary primary keys handed out for staged rows
    pub temp_key_prefix: String,
    /// Compiler settings for evaluating staged rows
    pub compiler: CompilerConfig,
}

impl Default for VirtualDatabaseConfig {
    fn default() -> Self {
        Self {
            temp_key_prefix: DEFAULT_TEMP_KEY_PREFIX.to_string(),
            compiler: CompilerConfig::default(),
        }
    }
}

impl VirtualDatabaseConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_temp_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.temp_key_prefix = prefix.into();
        self
    }

    pub fn with_compiler_config(mut self, compiler: CompilerConfig) -> Self {
        self.compiler = compiler;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayPhase {
    Idle,
    Staging,
    Committed,
    RolledBack,
}

impl OverlayPhase {
    pub fn is_closed(self) -> bool {
        matches!(self, OverlayPhase::Committed | OverlayPhase::RolledBack)
    }
}

impl fmt::Display for OverlayPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OverlayPhase::Idle => "idle",
            OverlayPhase::Staging => "staging",
            OverlayPhase::Committed => "committed",
            OverlayPhase::RolledBack => "rolled back",
        };
        f.write_str(name)
    }
}

/// A staged change. Mutations for the same (table, key) are coalesced.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Add {
        table: String,
        key: PrimaryKey,
        values: Row,
    },
    Update {
        table: String,
        key: PrimaryKey,
        values: Row,
    },
    Remove {
        table: String,
        key: PrimaryKey,
    },
}

impl Mutation {
    pub fn table(&self) -> &str {
        match self {
            Mutation::Add { table, .. }
            | Mutation::Update { table, .. }
            | Mutation::Remove { table, .. } => table,
        }
    }

    pub fn key(&self) -> &PrimaryKey {
        match self {
            Mutation::Add { key, .. } | Mutation::Update { key, .. } | Mutation::Remove { key, .. } => {
                key
            }
        }
    }

    fn targets(&self, table: &str, key: &PrimaryKey) -> bool {
        self.table() == table && self.key().loose_eq(key)
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Mutation::Add { .. } => "add",
            Mutation::Update { .. } => "update",
            Mutation::Remove { .. } => "remove",
        };
        write!(f, "{} {} {}", kind, self.table(), self.key())
    }
}

fn row_not_found(table: &str, key: &PrimaryKey) -> DatabaseError {
    DatabaseError::RowNotFound {
        table: table.to_string(),
        key: key.to_string(),
    }
}

#[derive(Debug)]
struct OverlayState {
    phase: OverlayPhase,
    mutations: Vec<Mutation>,
    /// Temporary keys handed out by this overlay
    issued: HashSet<String>,
    /// Temporary key -> key assigned by the base during commit
    resolved: HashMap<String, PrimaryKey>,
}

impl OverlayState {
    fn new() -> Self {
        Self {
            phase: OverlayPhase::Idle,
            mutations: Vec::new(),
            issued: HashSet::new(),
            resolved: HashMap::new(),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.phase.is_closed() {
            return Err(DatabaseError::OverlayClosed(self.phase.to_string()));
        }
        Ok(())
    }

    fn is_temp_key(&self, key: &PrimaryKey) -> bool {
        key.as_string().is_some_and(|k| self.issued.contains(k))
    }

    /// Last staged mutation for the row.
    fn position(&self, table: &str, key: &PrimaryKey) -> Option<usize> {
        self.mutations.iter().rposition(|m| m.targets(table, key))
    }

    /// Position of the staged add that issued `key`.
    fn add_position(&self, key: &PrimaryKey) -> Option<usize> {
        if !self.is_temp_key(key) {
            return None;
        }
        self.mutations
            .iter()
            .position(|m| matches!(m, Mutation::Add { key: k, .. } if k.loose_eq(key)))
    }

    /// An issued key whose add was dropped and never reached the base.
    fn is_discarded(&self, key: &PrimaryKey) -> bool {
        self.is_temp_key(key)
            && self.add_position(key).is_none()
            && key.as_string().is_some_and(|k| !self.resolved.contains_key(k))
    }

    /// Whether a staged mutation of another row holds `key` as a value.
    fn is_referenced(&self, table: &str, key: &PrimaryKey) -> bool {
        self.mutations.iter().any(|m| {
            !m.targets(table, key)
                && match m {
                    Mutation::Add { values, .. } | Mutation::Update { values, .. } => {
                        values.values().any(|v| v.loose_eq(key))
                    }
                    Mutation::Remove { .. } => false,
                }
        })
    }

    /// Whether every temporary key in `values` is added before `index`.
    fn replays_after_adds(&self, values: &Row, index: usize) -> bool {
        values
            .values()
            .all(|v| self.add_position(v).map_or(true, |added| added < index))
    }

    fn check_references(&self, values: &Row) -> Result<()> {
        match values.values().find(|v| self.is_discarded(v)) {
            Some(v) => Err(DatabaseError::UnresolvedKey(v.to_string())),
            None => Ok(()),
        }
    }

    /// Stage a mutation, coalescing it with what is already staged for the
    /// same row.
    ///
    /// An update holding a temporary key added after the row's last staged
    /// mutation is staged on its own at the end, so it replays after that add.
    fn stage(&mut self, mutation: Mutation) -> Result<()> {
        self.ensure_open()?;

        match mutation {
            add @ Mutation::Add { .. } => {
                if let Mutation::Add { values, .. } = &add {
                    self.check_references(values)?;
                }
                if let Some(key) = add.key().as_string() {
                    self.issued.insert(key.to_string());
                }
                self.mutations.push(add);
            }
            Mutation::Update { table, key, values } => {
                self.check_references(&values)?;
                match self.position(&table, &key) {
                    Some(index) if matches!(self.mutations[index], Mutation::Remove { .. }) => {
                        return Err(row_not_found(&table, &key))
                    }
                    Some(index) if self.replays_after_adds(&values, index) => {
                        match &mut self.mutations[index] {
                            Mutation::Add { values: staged, .. }
                            | Mutation::Update { values: staged, .. } => staged.extend(values),
                            Mutation::Remove { .. } => {}
                        }
                    }
                    None if self.is_discarded(&key) => return Err(row_not_found(&table, &key)),
                    _ => self.mutations.push(Mutation::Update { table, key, values }),
                }
            }
            Mutation::Remove { table, key } => {
                let removed = self
                    .mutations
                    .iter()
                    .any(|m| matches!(m, Mutation::Remove { .. }) && m.targets(&table, &key));
                if removed || self.is_discarded(&key) {
                    return Err(row_not_found(&table, &key));
                }

                // A staged row other rows point at is still added, then removed.
                let staged_add = self.add_position(&key).is_some();
                let keep_add = staged_add && self.is_referenced(&table, &key);
                self.mutations.retain(|m| {
                    !m.targets(&table, &key)
                        || (keep_add && matches!(m, Mutation::Add { .. }))
                });
                if !staged_add || keep_add {
                    self.mutations.push(Mutation::Remove { table, key });
                }
            }
        }

        self.phase = OverlayPhase::Staging;
        Ok(())
    }

    fn resolve_key(&self, key: &PrimaryKey) -> Result<PrimaryKey> {
        match key.as_string() {
            Some(temp) if self.issued.contains(temp) => self
                .resolved
                .get(temp)
                .cloned()
                .ok_or_else(|| DatabaseError::UnresolvedKey(temp.to_string())),
            _ => Ok(key.clone()),
        }
    }

    /// Replace temporary keys stored as values (references to staged rows).
    fn resolve_values(&self, values: &Row) -> Result<Row> {
        values
            .iter()
            .map(|(column, value)| Ok((column.clone(), self.resolve_key(value)?)))
            .collect()
    }
}

/// Staging overlay implementing [`Database`] and [`Transaction`].
///
/// Clones share the same staged state and listeners.
#[derive(Clone)]
pub struct VirtualDatabase {
    base: Arc<dyn Database>,
    schema: Arc<Schema>,
    config: VirtualDatabaseConfig,
    state: Arc<Mutex<OverlayState>>,
    listeners: Arc<ChangeListeners>,
}

impl VirtualDatabase {
    pub fn new(base: Arc<dyn Database>, schema: Arc<Schema>) -> Self {
        Self {
            base,
            schema,
            config: VirtualDatabaseConfig::default(),
            state: Arc::new(Mutex::new(OverlayState::new())),
            listeners: Arc::new(ChangeListeners::new()),
        }
    }

    pub fn with_config(mut self, config: VirtualDatabaseConfig) -> Self {
        self.config = config;
        self
    }

    pub fn base(&self) -> &Arc<dyn Database> {
        &self.base
    }

    pub async fn phase(&self) -> OverlayPhase {
        self.state.lock().await.phase
    }

    /// Snapshot of the staged mutations in staging order.
    pub async fn mutations(&self) -> Vec<Mutation> {
        self.state.lock().await.mutations.clone()
    }

    pub async fn has_pending_changes(&self) -> bool {
        !self.state.lock().await.mutations.is_empty()
    }

    async fn stage(&self, mutation: Mutation) -> Result<()> {
        debug!("[VirtualDatabase] Staging {}", mutation);
        self.state.lock().await.stage(mutation)?;
        self.listeners.notify();
        Ok(())
    }

    pub async fn query(
        &self,
        options: &QueryOptions,
        context_vars: &[ContextVar],
        context_var_values: &ContextVarValues,
    ) -> Result<Vec<Row>> {
        let pending: Vec<Mutation> = {
            let state = self.state.lock().await;
            state
                .mutations
                .iter()
                .filter(|m| m.table() == options.from)
                .cloned()
                .collect()
        };
        if pending.is_empty() {
            return self
                .base
                .query(options, context_vars, context_var_values)
                .await;
        }
        self.query_with_pending(options, context_vars, context_var_values, &pending)
            .await
    }

    /// Run the query against the base, then apply the staged mutations to
    /// the result in memory.
    async fn query_with_pending(
        &self,
        options: &QueryOptions,
        context_vars: &[ContextVar],
        context_var_values: &ContextVarValues,
        pending: &[Mutation],
    ) -> Result<Vec<Row>> {
        let table = self.schema.require_table(&options.from)?;
        let compiled = QueryCompiler::new(&self.schema, context_vars, context_var_values)
            .with_config(self.config.compiler.clone())
            .compile_query(options)?;
        let query = &compiled.query;

        if query.selects.iter().any(|s| contains_aggregate(&s.expr)) {
            warn!(
                "[VirtualDatabase] Aggregate query on {} ignores {} pending mutations",
                options.from,
                pending.len()
            );
            return self
                .base
                .query(options, context_vars, context_var_values)
                .await;
        }

        let aliases = compiled.row_mapper.aliases();
        let select_count = aliases.len();
        let pk_column = table.primary_key.clone();

        let mut columns: Vec<String> = Vec::new();
        for expr in query
            .selects
            .iter()
            .map(|s| &s.expr)
            .chain(query.where_.as_ref())
        {
            for column in expr.columns() {
                if column != pk_column && !columns.iter().any(|c| c == column) {
                    columns.push(column.to_string());
                }
            }
        }

        let has_updates = pending
            .iter()
            .any(|m| matches!(m, Mutation::Update { .. }));
        let removals = pending
            .iter()
            .filter(|m| matches!(m, Mutation::Remove { .. }))
            .count() as u64;

        // An update may move a row into the where clause, so updated tables
        // are fetched whole and filtered here.
        let prefix = helper_prefix(options);
        let pk_alias = format!("{}pk", prefix);
        let mut rewritten = options.clone();
        for (index, order) in options.order_by.iter().enumerate() {
            rewritten = rewritten.select(format!("{}order_{}", prefix, index), order.expr.clone());
        }
        rewritten = rewritten.select(pk_alias.clone(), Expr::id(options.from.clone()));
        for (index, column) in columns.iter().enumerate() {
            rewritten = rewritten.select(
                format!("{}col_{}", prefix, index),
                Expr::field(options.from.clone(), column.clone()),
            );
        }
        if has_updates {
            rewritten.where_ = None;
            rewritten.limit = None;
        } else {
            rewritten.limit = options.limit.map(|limit| limit + removals);
        }
        debug!(
            "[VirtualDatabase] Rewrote query on {} over {} pending mutations",
            options.from,
            pending.len()
        );

        let base_rows = self
            .base
            .query(&rewritten, context_vars, context_var_values)
            .await?;

        let passes = |row: &Row| match &query.where_ {
            Some(condition) => eval(condition, row).is_true(),
            None => true,
        };
        let evaluate = |row: &Row| -> (Row, Vec<Value>) {
            let output = aliases
                .iter()
                .zip(&query.selects)
                .map(|(alias, select)| (alias.clone(), eval(&select.expr, row)))
                .collect();
            let order_keys = query.selects[select_count..]
                .iter()
                .map(|select| eval(&select.expr, row))
                .collect();
            (output, order_keys)
        };

        let mut results: Vec<(Row, Vec<Value>)> = Vec::with_capacity(base_rows.len());
        for mut base_row in base_rows {
            let key = base_row.remove(&pk_alias).unwrap_or_default();
            let staged: Vec<&Mutation> = pending.iter().filter(|m| m.key().loose_eq(&key)).collect();
            if staged.iter().any(|m| matches!(m, Mutation::Remove { .. })) {
                continue;
            }
            let updates: Vec<&Row> = staged
                .iter()
                .filter_map(|m| match m {
                    Mutation::Update { values, .. } => Some(values),
                    _ => None,
                })
                .collect();

            let mut row = Row::new();
            row.insert(pk_column.clone(), key);
            for (index, column) in columns.iter().enumerate() {
                let value = base_row
                    .remove(&format!("{}col_{}", prefix, index))
                    .unwrap_or_default();
                row.insert(column.clone(), value);
            }

            if !updates.is_empty() {
                for values in updates {
                    row.extend(values.iter().map(|(c, v)| (c.clone(), v.clone())));
                }
                if passes(&row) {
                    results.push(evaluate(&row));
                }
                continue;
            }
            if has_updates && !passes(&row) {
                continue;
            }
            let order_keys = (0..options.order_by.len())
                .map(|index| {
                    base_row
                        .remove(&format!("{}order_{}", prefix, index))
                        .unwrap_or_default()
                })
                .collect();
            let output = aliases
                .iter()
                .map(|alias| {
                    let value = base_row.remove(alias).unwrap_or_default();
                    (alias.clone(), value)
                })
                .collect();
            results.push((output, order_keys));
        }

        for mutation in pending {
            if let Mutation::Add { key, values, .. } = mutation {
                let later: Vec<&Mutation> = pending
                    .iter()
                    .filter(|m| !matches!(m, Mutation::Add { .. }) && m.key().loose_eq(key))
                    .collect();
                if later.iter().any(|m| matches!(m, Mutation::Remove { .. })) {
                    continue;
                }
                let mut row = values.clone();
                for m in later {
                    if let Mutation::Update { values, .. } = m {
                        row.extend(values.iter().map(|(c, v)| (c.clone(), v.clone())));
                    }
                }
                row.insert(pk_column.clone(), key.clone());
                if passes(&row) {
                    results.push(evaluate(&row));
                }
            }
        }

        results.sort_by(|(_, a), (_, b)| {
            query
                .order_by
                .iter()
                .enumerate()
                .map(|(index, order)| order_values(&a[index], &b[index], order.direction, order.nulls))
                .find(|ord| *ord != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        if let Some(limit) = options.limit {
            results.truncate(limit as usize);
        }

        Ok(results.into_iter().map(|(row, _)| row).collect())
    }

    pub async fn add_row(&self, table: &str, values: Row) -> Result<PrimaryKey> {
        self.schema.require_table(table)?;
        let key = Value::String(format!(
            "{}{}",
            self.config.temp_key_prefix,
            Uuid::new_v4()
        ));
        self.stage(Mutation::Add {
            table: table.to_string(),
            key: key.clone(),
            values,
        })
        .await?;
        Ok(key)
    }

    pub async fn update_row(&self, table: &str, primary_key: &PrimaryKey, values: Row) -> Result<()> {
        self.schema.require_table(table)?;
        self.stage(Mutation::Update {
            table: table.to_string(),
            key: primary_key.clone(),
            values,
        })
        .await
    }

    pub async fn remove_row(&self, table: &str, primary_key: &PrimaryKey) -> Result<()> {
        self.schema.require_table(table)?;
        self.stage(Mutation::Remove {
            table: table.to_string(),
            key: primary_key.clone(),
        })
        .await
    }

    /// Replay staged mutations against the base in staging order.
    ///
    /// Stops at the first failure: mutations already applied leave the
    /// staging list, the rest stay staged and the overlay stays open.
    pub async fn commit(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ensure_open()?;

        let mut applied = 0;
        while let Some(mutation) = state.mutations.first().cloned() {
            if let Err(source) = self.replay(&mut state, &mutation).await {
                warn!(
                    "[VirtualDatabase] Commit stopped at {} after {} mutations: {}",
                    mutation, applied, source
                );
                return Err(DatabaseError::CommitFailed {
                    index: applied,
                    mutation: mutation.to_string(),
                    source: Box::new(source),
                });
            }
            state.mutations.remove(0);
            applied += 1;
        }

        state.phase = OverlayPhase::Committed;
        drop(state);
        info!("[VirtualDatabase] Committed {} mutations", applied);
        self.listeners.notify();
        Ok(())
    }

    async fn replay(&self, state: &mut OverlayState, mutation: &Mutation) -> Result<()> {
        match mutation {
            Mutation::Add { table, key, values } => {
                let values = state.resolve_values(values)?;
                let persisted = self.base.add_row(table, values).await?;
                if let Some(temp) = key.as_string() {
                    state.resolved.insert(temp.to_string(), persisted);
                }
            }
            Mutation::Update { table, key, values } => {
                let key = state.resolve_key(key)?;
                let values = state.resolve_values(values)?;
                self.base.update_row(table, &key, values).await?;
            }
            Mutation::Remove { table, key } => {
                let key = state.resolve_key(key)?;
                self.base.remove_row(table, &key).await?;
            }
        }
        Ok(())
    }

    /// Discard every staged mutation.
    pub async fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ensure_open()?;
        let discarded = state.mutations.len();
        state.mutations.clear();
        state.phase = OverlayPhase::RolledBack;
        drop(state);
        info!("[VirtualDatabase] Rolled back {} mutations", discarded);
        self.listeners.notify();
        Ok(())
    }
}

#[async_trait]
impl Database for VirtualDatabase {
    async fn query(
        &self,
        options: &QueryOptions,
        context_vars: &[ContextVar],
        context_var_values: &ContextVarValues,
    ) -> Result<Vec<Row>> {
        VirtualDatabase::query(self, options, context_vars, context_var_values).await
    }

    async fn add_row(&self, table: &str, values: Row) -> Result<PrimaryKey> {
        VirtualDatabase::add_row(self, table, values).await
    }

    async fn update_row(&self, table: &str, primary_key: &PrimaryKey, values: Row) -> Result<()> {
        VirtualDatabase::update_row(self, table, primary_key, values).await
    }

    async fn remove_row(&self, table: &str, primary_key: &PrimaryKey) -> Result<()> {
        VirtualDatabase::remove_row(self, table, primary_key).await
    }

    /// A nested overlay whose commit stages its mutations into this one.
    fn transaction(&self) -> Result<Box<dyn Transaction>> {
        let parent: Arc<dyn Database> = Arc::new(self.clone());
        Ok(Box::new(
            VirtualDatabase::new(parent, Arc::clone(&self.schema)).with_config(self.config.clone()),
        ))
    }

    fn add_change_listener(&self, listener: ChangeListener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn remove_change_listener(&self, id: ListenerId) {
        self.listeners.remove(id);
    }
}

#[async_trait]
impl Transaction for VirtualDatabase {
    async fn add_row(&self, table: &str, values: Row) -> Result<PrimaryKey> {
        VirtualDatabase::add_row(self, table, values).await
    }

    async fn update_row(&self, table: &str, primary_key: &PrimaryKey, values: Row) -> Result<()> {
        VirtualDatabase::update_row(self, table, primary_key, values).await
    }

    async fn remove_row(&self, table: &str, primary_key: &PrimaryKey) -> Result<()> {
        VirtualDatabase::remove_row(self, table, primary_key).await
    }

    async fn commit(&self) -> Result<()> {
        VirtualDatabase::commit(self).await
    }

    async fn rollback(&self) -> Result<()> {
        VirtualDatabase::rollback(self).await
    }
}
