use serde::{Deserialize, Serialize};

use crate::value::ValueType;
use crate::ApiError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ValueType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub id: String,
    pub name: String,
    pub primary_key: String,
    #[serde(default)]
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(id: impl Into<String>, primary_key: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            primary_key: primary_key.into(),
            columns: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_column(mut self, id: impl Into<String>, column_type: ValueType) -> Self {
        let id = id.into();
        self.columns.push(Column {
            name: id.clone(),
            id,
            column_type,
        });
        self
    }

    pub fn column(&self, id: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == id)
    }
}

/// Tables known to the query layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub tables: Vec<Table>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    pub fn table(&self, id: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.id == id)
    }

    pub fn column(&self, table: &str, column: &str) -> Option<&Column> {
        self.table(table).and_then(|t| t.column(column))
    }

    pub fn require_table(&self, id: &str) -> Result<&Table, ApiError> {
        self.table(id)
            .ok_or_else(|| ApiError::UnknownTable(id.to_string()))
    }

    pub fn require_column(&self, table: &str, column: &str) -> Result<&Column, ApiError> {
        self.require_table(table)?
            .column(column)
            .ok_or_else(|| ApiError::UnknownColumn {
                table: table.to_string(),
                column: column.to_string(),
            })
    }
}
