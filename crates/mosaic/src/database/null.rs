use async_trait::async_trait;
use mosaic_api::{ContextVar, ContextVarValues, QueryOptions, Row};

use super::{
    ChangeListener, ChangeListeners, Database, DatabaseError, ListenerId, PrimaryKey, Result,
    Transaction,
};

/// Database that refuses everything. Stands in where no data may be read or
/// written, such as previews of widgets without a bound data source.
#[derive(Default)]
pub struct NullDatabase {
    listeners: ChangeListeners,
}

impl NullDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_allowed<T>(operation: &str) -> Result<T> {
    Err(DatabaseError::NotAllowed(operation.to_string()))
}

#[async_trait]
impl Database for NullDatabase {
    async fn query(
        &self,
        options: &QueryOptions,
        _context_vars: &[ContextVar],
        _context_var_values: &ContextVarValues,
    ) -> Result<Vec<Row>> {
        not_allowed(&format!("query on {}", options.from))
    }

    async fn add_row(&self, table: &str, _values: Row) -> Result<PrimaryKey> {
        not_allowed(&format!("add_row on {}", table))
    }

    async fn update_row(&self, table: &str, _primary_key: &PrimaryKey, _values: Row) -> Result<()> {
        not_allowed(&format!("update_row on {}", table))
    }

    async fn remove_row(&self, table: &str, _primary_key: &PrimaryKey) -> Result<()> {
        not_allowed(&format!("remove_row on {}", table))
    }

    fn transaction(&self) -> Result<Box<dyn Transaction>> {
        not_allowed("transaction")
    }

    fn add_change_listener(&self, listener: ChangeListener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn remove_change_listener(&self, id: ListenerId) {
        self.listeners.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_api::Value;

    #[tokio::test]
    async fn rejects_every_call() {
        let db = NullDatabase::new();
        let query = db
            .query(&QueryOptions::new("t1"), &[], &ContextVarValues::new())
            .await;
        assert!(matches!(query, Err(DatabaseError::NotAllowed(_))));
        assert!(matches!(
            db.add_row("t1", Row::new()).await,
            Err(DatabaseError::NotAllowed(_))
        ));
        assert!(matches!(
            db.remove_row("t1", &Value::from(1)).await,
            Err(DatabaseError::NotAllowed(_))
        ));
        assert!(db.transaction().is_err());
    }
}
