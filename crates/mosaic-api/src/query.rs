use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::expr::Expr;
use crate::value::Value;

/// One result row, keyed by alias or column id.
pub type Row = HashMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderByDir {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub expr: Expr,
    pub dir: OrderByDir,
}

/// A query request: ordered select map plus optional filter, ordering and limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    pub select: IndexMap<String, Expr>,
    pub from: String,
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub where_: Option<Expr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

impl QueryOptions {
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            select: IndexMap::new(),
            from: from.into(),
            where_: None,
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn select(mut self, alias: impl Into<String>, expr: Expr) -> Self {
        self.select.insert(alias.into(), expr);
        self
    }

    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_ = Some(expr);
        self
    }

    pub fn order_by(mut self, expr: Expr, dir: OrderByDir) -> Self {
        self.order_by.push(OrderBy { expr, dir });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}
