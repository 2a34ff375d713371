use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::expr::Expr;
use crate::value::{Value, ValueType};
use crate::ApiError;

/// Kind of a context variable: a single row, a filterable set of rows, or a
/// scalar of some value type.
///
/// Serialized as the flat type name (`"row"`, `"rowset"`, `"text"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ContextVarType {
    Row,
    Rowset,
    Scalar(ValueType),
}

impl TryFrom<String> for ContextVarType {
    type Error = ApiError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "row" => Ok(ContextVarType::Row),
            "rowset" => Ok(ContextVarType::Rowset),
            other => other.parse().map(ContextVarType::Scalar),
        }
    }
}

impl From<ContextVarType> for String {
    fn from(t: ContextVarType) -> Self {
        t.to_string()
    }
}

impl fmt::Display for ContextVarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextVarType::Row => f.write_str("row"),
            ContextVarType::Rowset => f.write_str("rowset"),
            ContextVarType::Scalar(t) => f.write_str(t.as_str()),
        }
    }
}

/// A named, typed binding introduced by a block and visible to its descendants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextVar {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: ContextVarType,
    /// Table of a row or rowset variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggr_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selectable: Option<bool>,
}

impl ContextVar {
    pub fn row(id: impl Into<String>, name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            var_type: ContextVarType::Row,
            table: Some(table.into()),
            aggr_only: None,
            selectable: None,
        }
    }

    pub fn rowset(id: impl Into<String>, name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            var_type: ContextVarType::Rowset,
            ..Self::row(id, name, table)
        }
    }

    pub fn scalar(id: impl Into<String>, name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            var_type: ContextVarType::Scalar(value_type),
            table: None,
            aggr_only: None,
            selectable: None,
        }
    }

    pub fn is_row(&self) -> bool {
        self.var_type == ContextVarType::Row
    }

    pub fn is_rowset(&self) -> bool {
        self.var_type == ContextVarType::Rowset
    }
}

/// Runtime value bound to a context variable.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextVarValue {
    /// Primary key for row variables, plain value for scalars.
    Value(Value),
    /// Restricting boolean expression for rowset variables; `None` is unfiltered.
    Filter(Option<Expr>),
}

impl ContextVarValue {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            ContextVarValue::Value(v) => Some(v),
            ContextVarValue::Filter(_) => None,
        }
    }

    pub fn as_filter(&self) -> Option<&Expr> {
        match self {
            ContextVarValue::Filter(f) => f.as_ref(),
            ContextVarValue::Value(_) => None,
        }
    }
}

/// Values of context variables keyed by variable id.
pub type ContextVarValues = HashMap<String, ContextVarValue>;

/// Extra restriction on a rowset variable, keyed by `id` so a later filter
/// with the same id replaces the earlier one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub id: String,
    /// Opaque state of whatever produced the filter (e.g. the search text).
    #[serde(default)]
    pub memo: serde_json::Value,
    pub expr: Option<Expr>,
}
