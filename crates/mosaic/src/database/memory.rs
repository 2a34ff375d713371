//! In-memory [`DataSource`] executing the compiled query shape directly.

use async_trait::async_trait;
use mosaic_api::{Row, Schema, Value};
use mosaic_query::eval::{contains_aggregate, eval, eval_group, order_values};
use mosaic_query::CompiledQuery;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::data_source::DataSource;
use super::{DatabaseError, PrimaryKey, Result};

/// Table id -> rows keyed by column id, in insertion order.
type Tables = HashMap<String, Vec<Row>>;

pub struct MemoryDataSource {
    schema: Arc<Schema>,
    tables: RwLock<Tables>,
}

impl MemoryDataSource {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Seed a table. Rows must carry the table's primary key column.
    pub fn with_rows(mut self, table: impl Into<String>, rows: Vec<Row>) -> Self {
        self.tables.get_mut().entry(table.into()).or_default().extend(rows);
        self
    }

    /// Copy of a table's current rows.
    pub async fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .read()
            .await
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    fn primary_key_column(&self, table: &str) -> Result<String> {
        Ok(self.schema.require_table(table)?.primary_key.clone())
    }
}

#[async_trait]
impl DataSource for MemoryDataSource {
    async fn perform_query(&self, query: &CompiledQuery) -> Result<Vec<Row>> {
        let tables = self.tables.read().await;
        let empty = Vec::new();
        let source = tables.get(&query.from.table).unwrap_or(&empty);

        let matching: Vec<&Row> = source
            .iter()
            .filter(|row| match &query.where_ {
                Some(condition) => eval(condition, row).is_true(),
                None => true,
            })
            .collect();

        let aggregate = !query.group_by.is_empty()
            || query.selects.iter().any(|s| contains_aggregate(&s.expr));

        let mut output: Vec<Vec<Value>> = if aggregate {
            group_rows(query, &matching)
                .iter()
                .map(|group| {
                    query
                        .selects
                        .iter()
                        .map(|s| eval_group(&s.expr, group))
                        .collect()
                })
                .collect()
        } else {
            matching
                .iter()
                .map(|row| query.selects.iter().map(|s| eval(&s.expr, row)).collect())
                .collect()
        };

        output.sort_by(|a, b| {
            query
                .order_by
                .iter()
                .map(|o| {
                    let index = o.ordinal - 1;
                    order_values(&a[index], &b[index], o.direction, o.nulls)
                })
                .find(|ord| *ord != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        if let Some(limit) = query.limit {
            output.truncate(limit as usize);
        }

        debug!(
            "[MemoryDataSource] {} rows from {}",
            output.len(),
            query.from.table
        );
        Ok(output
            .into_iter()
            .map(|values| {
                query
                    .selects
                    .iter()
                    .map(|s| s.alias.clone())
                    .zip(values)
                    .collect()
            })
            .collect())
    }

    async fn add_row(&self, table: &str, mut values: Row) -> Result<PrimaryKey> {
        let pk_column = self.primary_key_column(table)?;
        let key = match values.get(&pk_column) {
            Some(key) if !key.is_null() => key.clone(),
            _ => Value::String(Uuid::new_v4().to_string()),
        };
        values.insert(pk_column, key.clone());
        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default()
            .push(values);
        Ok(key)
    }

    async fn update_row(&self, table: &str, primary_key: &PrimaryKey, values: Row) -> Result<()> {
        let pk_column = self.primary_key_column(table)?;
        let mut tables = self.tables.write().await;
        let row = tables
            .get_mut(table)
            .and_then(|rows| {
                rows.iter_mut()
                    .find(|row| row.get(&pk_column).is_some_and(|k| k.loose_eq(primary_key)))
            })
            .ok_or_else(|| DatabaseError::RowNotFound {
                table: table.to_string(),
                key: primary_key.to_string(),
            })?;
        for (column, value) in values {
            if column != pk_column {
                row.insert(column, value);
            }
        }
        Ok(())
    }

    async fn remove_row(&self, table: &str, primary_key: &PrimaryKey) -> Result<()> {
        let pk_column = self.primary_key_column(table)?;
        let mut tables = self.tables.write().await;
        let rows = tables.get_mut(table);
        let position = rows.as_ref().and_then(|rows| {
            rows.iter()
                .position(|row| row.get(&pk_column).is_some_and(|k| k.loose_eq(primary_key)))
        });
        match (rows, position) {
            (Some(rows), Some(position)) => {
                rows.remove(position);
                Ok(())
            }
            _ => Err(DatabaseError::RowNotFound {
                table: table.to_string(),
                key: primary_key.to_string(),
            }),
        }
    }
}

/// Split rows into groups sharing the values of the GROUP BY ordinals, in
/// order of first appearance. Without GROUP BY everything is one group, which
/// may be empty.
fn group_rows<'a>(query: &CompiledQuery, rows: &[&'a Row]) -> Vec<Vec<&'a Row>> {
    if query.group_by.is_empty() {
        return vec![rows.to_vec()];
    }

    let mut groups: Vec<Vec<&Row>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for row in rows {
        let key_values: Vec<serde_json::Value> = query
            .group_by
            .iter()
            .filter_map(|ordinal| query.selects.get(ordinal - 1))
            .map(|select| eval(&select.expr, row).to_json())
            .collect();
        let key = serde_json::Value::Array(key_values).to_string();
        match index.get(&key) {
            Some(&position) => groups[position].push(row),
            None => {
                index.insert(key, groups.len());
                groups.push(vec![row]);
            }
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{DataSourceDatabase, Database};
    use mosaic_api::{ContextVarValues, Expr, OrderByDir, QueryOptions, Table, ValueType};

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new().with_table(
                Table::new("t1", "id")
                    .with_column("text", ValueType::Text)
                    .with_column("number", ValueType::Number),
            ),
        )
    }

    fn row(id: &str, text: &str, number: i64) -> Row {
        Row::from([
            ("id".to_string(), Value::from(id)),
            ("text".to_string(), Value::from(text)),
            ("number".to_string(), Value::from(number)),
        ])
    }

    fn database() -> DataSourceDatabase {
        let schema = schema();
        let source = MemoryDataSource::new(Arc::clone(&schema)).with_rows(
            "t1",
            vec![row("1", "a", 3), row("2", "b", 1), row("3", "a", 2)],
        );
        DataSourceDatabase::new(schema, Arc::new(source))
    }

    #[tokio::test]
    async fn filters_orders_and_limits() {
        let db = database();
        let options = QueryOptions::new("t1")
            .select("n", Expr::field("t1", "number"))
            .filter(Expr::op(
                "=",
                vec![Expr::field("t1", "text"), Expr::text("a")],
            ))
            .order_by(Expr::field("t1", "number"), OrderByDir::Desc)
            .limit(1);

        let rows = db.query(&options, &[], &ContextVarValues::new()).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["n"], Value::from(3));
        assert!(!rows[0].contains_key("o_0"));
    }

    #[tokio::test]
    async fn groups_by_non_aggregate_selects() {
        let db = database();
        let options = QueryOptions::new("t1")
            .select("text", Expr::field("t1", "text"))
            .select("total", Expr::op("sum", vec![Expr::field("t1", "number")]))
            .order_by(Expr::field("t1", "text"), OrderByDir::Asc);

        let rows = db.query(&options, &[], &ContextVarValues::new()).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["text"], Value::from("a"));
        assert_eq!(rows[0]["total"].as_f64(), Some(5.0));
        assert_eq!(rows[1]["total"].as_f64(), Some(1.0));
    }

    #[tokio::test]
    async fn mutations_round_trip_through_database() {
        let db = database();
        let key = db
            .add_row("t1", Row::from([("text".to_string(), Value::from("c"))]))
            .await
            .unwrap();
        db.update_row("t1", &key, Row::from([("number".to_string(), Value::from(9))]))
            .await
            .unwrap();
        db.remove_row("t1", &Value::from("2")).await.unwrap();

        let options = QueryOptions::new("t1").select("id", Expr::id("t1"));
        let rows = db.query(&options, &[], &ContextVarValues::new()).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().any(|r| r["id"] == key));

        let missing = db.remove_row("t1", &Value::from("nope")).await;
        assert!(matches!(missing, Err(DatabaseError::RowNotFound { .. })));
    }
}
