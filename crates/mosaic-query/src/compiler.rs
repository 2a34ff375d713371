use mosaic_api::{
    ContextVar, ContextVarType, ContextVarValue, ContextVarValues, Expr, ExprUtils, QueryOptions,
    Row, Schema, Value, ValueType,
};
use tracing::debug;

use crate::config::CompilerConfig;
use crate::jsonql::{CompiledQuery, FromTable, NullsOrder, OrderByOrdinal, Select, SqlExpr};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("Context variable {0} not found")]
    UnknownVariable(String),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown column {column} in table {table}")]
    UnknownColumn { table: String, column: String },
}

/// Maps raw result rows keyed `c_N` back to the caller's aliases.
#[derive(Debug, Clone, PartialEq)]
pub struct RowMapper {
    aliases: Vec<String>,
}

impl RowMapper {
    pub fn new(aliases: Vec<String>) -> Self {
        Self { aliases }
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Keep only `c_N` columns, renamed to the N-th requested alias.
    /// Helper `o_N` order columns are dropped.
    pub fn map_row(&self, row: Row) -> Row {
        row.into_iter()
            .filter_map(|(key, value)| {
                let index: usize = key.strip_prefix("c_")?.parse().ok()?;
                let alias = self.aliases.get(index)?;
                Some((alias.clone(), value))
            })
            .collect()
    }
}

/// Output of [`QueryCompiler::compile_query`].
#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    pub query: CompiledQuery,
    pub row_mapper: RowMapper,
}

/// Compiles query requests against a schema and a context variable environment.
pub struct QueryCompiler<'a> {
    schema: &'a Schema,
    context_vars: &'a [ContextVar],
    context_var_values: &'a ContextVarValues,
    config: CompilerConfig,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(
        schema: &'a Schema,
        context_vars: &'a [ContextVar],
        context_var_values: &'a ContextVarValues,
    ) -> Self {
        Self {
            schema,
            context_vars,
            context_var_values,
            config: CompilerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: CompilerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn compile_query(&self, options: &QueryOptions) -> Result<Compiled, CompileError> {
        let table = self
            .schema
            .table(&options.from)
            .ok_or_else(|| CompileError::UnknownTable(options.from.clone()))?;
        let utils = ExprUtils::new(self.schema, self.context_vars);

        // Whole-query decision: any aggregate select or ordering makes every
        // other column a grouping column.
        let is_aggregate = options.select.values().any(|e| utils.is_aggregate(e))
            || options.order_by.iter().any(|o| utils.is_aggregate(&o.expr));

        let mut selects = Vec::with_capacity(options.select.len() + options.order_by.len());
        let mut group_by = Vec::new();
        let mut order_by = Vec::with_capacity(options.order_by.len());

        for (index, expr) in options.select.values().enumerate() {
            let mut compiled = self.compile_expr(expr)?;
            if utils.expr_type(expr) == Some(ValueType::Geometry) {
                compiled = self.wrap_geometry(compiled);
            }
            selects.push(Select {
                expr: compiled,
                alias: format!("c_{}", index),
            });
            if is_aggregate && !utils.is_aggregate(expr) {
                group_by.push(index + 1);
            }
        }

        for (index, order) in options.order_by.iter().enumerate() {
            let ordinal = options.select.len() + index + 1;
            selects.push(Select {
                expr: self.compile_expr(&order.expr)?,
                alias: format!("o_{}", index),
            });
            order_by.push(OrderByOrdinal {
                ordinal,
                direction: order.dir,
                nulls: NullsOrder::for_direction(order.dir),
            });
            if is_aggregate && !utils.is_aggregate(&order.expr) {
                group_by.push(ordinal);
            }
        }

        let where_ = options
            .where_
            .as_ref()
            .map(|w| self.compile_expr(w))
            .transpose()?;

        let query = CompiledQuery {
            selects,
            from: FromTable {
                table: table.id.clone(),
                alias: self.config.table_alias.clone(),
            },
            where_,
            group_by,
            order_by,
            limit: options.limit,
        };
        debug!("[QueryCompiler] {}", query.to_sql());

        Ok(Compiled {
            query,
            row_mapper: RowMapper::new(options.select.keys().cloned().collect()),
        })
    }

    /// Compile a single expression, substituting context variables.
    pub fn compile_expr(&self, expr: &Expr) -> Result<SqlExpr, CompileError> {
        match expr {
            Expr::Field { table, column } => {
                let table_def = self
                    .schema
                    .table(table)
                    .ok_or_else(|| CompileError::UnknownTable(table.clone()))?;
                if table_def.column(column).is_none() {
                    return Err(CompileError::UnknownColumn {
                        table: table.clone(),
                        column: column.clone(),
                    });
                }
                Ok(self.field(column))
            }
            Expr::Id { table } => {
                let table_def = self
                    .schema
                    .table(table)
                    .ok_or_else(|| CompileError::UnknownTable(table.clone()))?;
                Ok(self.field(&table_def.primary_key))
            }
            Expr::Literal { value, .. } => Ok(SqlExpr::literal(value.clone())),
            Expr::Variable { variable_id } => self.compile_variable(variable_id),
            Expr::Op { op, exprs, .. } => Ok(SqlExpr::op(
                op.clone(),
                exprs
                    .iter()
                    .map(|e| self.compile_expr(e))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
        }
    }

    fn compile_variable(&self, variable_id: &str) -> Result<SqlExpr, CompileError> {
        let context_var = self
            .context_vars
            .iter()
            .find(|cv| cv.id == variable_id)
            .ok_or_else(|| CompileError::UnknownVariable(variable_id.to_string()))?;
        let value = self.context_var_values.get(variable_id);

        match context_var.var_type {
            ContextVarType::Rowset => match value.and_then(ContextVarValue::as_filter) {
                Some(filter) => self.compile_expr(filter),
                None => Ok(SqlExpr::literal(true)),
            },
            ContextVarType::Row | ContextVarType::Scalar(_) => Ok(SqlExpr::literal(
                value
                    .and_then(ContextVarValue::as_value)
                    .cloned()
                    .unwrap_or(Value::Null),
            )),
        }
    }

    fn field(&self, column: &str) -> SqlExpr {
        SqlExpr::Field {
            table_alias: self.config.table_alias.clone(),
            column: column.to_string(),
        }
    }

    /// Reproject to the configured SRID and serialize as GeoJSON. The explicit
    /// cast keeps a null input from failing the transform.
    fn wrap_geometry(&self, expr: SqlExpr) -> SqlExpr {
        SqlExpr::op(
            "ST_AsGeoJSON",
            vec![SqlExpr::op(
                "ST_Transform",
                vec![
                    SqlExpr::op("::geometry", vec![expr]),
                    SqlExpr::literal(self.config.geometry_srid),
                ],
            )],
        )
    }
}
