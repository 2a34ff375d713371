//! Compiled query shape and its SQL rendering.

use mosaic_api::{OrderByDir, Value};
use serde::{Deserialize, Serialize};

/// Backend expression: the result of compiling an [`Expr`](mosaic_api::Expr).
///
/// Variables are already substituted and table references are resolved to
/// the query's table alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SqlExpr {
    Field {
        #[serde(rename = "tableAlias")]
        table_alias: String,
        column: String,
    },
    Literal {
        value: Value,
    },
    Op {
        op: String,
        exprs: Vec<SqlExpr>,
    },
}

impl SqlExpr {
    pub fn literal(value: impl Into<Value>) -> Self {
        SqlExpr::Literal {
            value: value.into(),
        }
    }

    pub fn op(op: impl Into<String>, exprs: Vec<SqlExpr>) -> Self {
        SqlExpr::Op {
            op: op.into(),
            exprs,
        }
    }

    /// Columns read by the expression, depth first, duplicates kept.
    pub fn columns(&self) -> Vec<&str> {
        match self {
            SqlExpr::Field { column, .. } => vec![column.as_str()],
            SqlExpr::Literal { .. } => Vec::new(),
            SqlExpr::Op { exprs, .. } => exprs.iter().flat_map(|e| e.columns()).collect(),
        }
    }

    pub fn to_sql(&self) -> String {
        match self {
            SqlExpr::Field {
                table_alias,
                column,
            } => format!("{}.{}", quote_identifier(table_alias), quote_identifier(column)),
            SqlExpr::Literal { value } => value_to_sql_literal(value),
            SqlExpr::Op { op, exprs } => render_op(op, exprs),
        }
    }
}

fn render_op(op: &str, exprs: &[SqlExpr]) -> String {
    let args: Vec<String> = exprs.iter().map(SqlExpr::to_sql).collect();
    match op {
        "and" | "or" if args.is_empty() => if op == "and" { "TRUE" } else { "FALSE" }.to_string(),
        "and" | "or" => format!("({})", args.join(&format!(" {} ", op.to_uppercase()))),
        "=" | "<>" | "<" | ">" | "<=" | ">=" | "+" | "-" | "*" | "/" | "~*" | "like" | "ilike"
            if args.len() >= 2 =>
        {
            format!("({})", args.join(&format!(" {} ", op)))
        }
        "-" if args.len() == 1 => format!("(-{})", args[0]),
        "not" => format!("(NOT {})", args.join(", ")),
        "is null" => format!("({} IS NULL)", args.join(", ")),
        "is not null" => format!("({} IS NOT NULL)", args.join(", ")),
        "::geometry" => format!("({})::geometry", args.join(", ")),
        "count" if args.is_empty() => "count(*)".to_string(),
        _ => format!("{}({})", op, args.join(", ")),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Select {
    pub expr: SqlExpr,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FromTable {
    pub table: String,
    pub alias: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NullsOrder {
    First,
    Last,
}

impl NullsOrder {
    /// Nulls go last when descending and first when ascending.
    pub fn for_direction(dir: OrderByDir) -> Self {
        match dir {
            OrderByDir::Desc => NullsOrder::Last,
            OrderByDir::Asc => NullsOrder::First,
        }
    }
}

/// ORDER BY entry referencing a select by its 1-based position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderByOrdinal {
    pub ordinal: usize,
    pub direction: OrderByDir,
    pub nulls: NullsOrder,
}

/// One flat query against a single table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledQuery {
    pub selects: Vec<Select>,
    pub from: FromTable,
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub where_: Option<SqlExpr>,
    /// 1-based select ordinals
    #[serde(default)]
    pub group_by: Vec<usize>,
    #[serde(default)]
    pub order_by: Vec<OrderByOrdinal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

impl CompiledQuery {
    pub fn to_sql(&self) -> String {
        let selects: Vec<String> = self
            .selects
            .iter()
            .map(|s| format!("{} AS {}", s.expr.to_sql(), quote_identifier(&s.alias)))
            .collect();

        let mut sql = format!(
            "SELECT {} FROM {} AS {}",
            selects.join(", "),
            quote_identifier(&self.from.table),
            quote_identifier(&self.from.alias)
        );

        if let Some(where_) = &self.where_ {
            sql.push_str(&format!(" WHERE {}", where_.to_sql()));
        }
        if !self.group_by.is_empty() {
            let ordinals: Vec<String> = self.group_by.iter().map(|o| o.to_string()).collect();
            sql.push_str(&format!(" GROUP BY {}", ordinals.join(", ")));
        }
        if !self.order_by.is_empty() {
            let orders: Vec<String> = self
                .order_by
                .iter()
                .map(|o| {
                    let dir = match o.direction {
                        OrderByDir::Asc => "ASC",
                        OrderByDir::Desc => "DESC",
                    };
                    let nulls = match o.nulls {
                        NullsOrder::First => "NULLS FIRST",
                        NullsOrder::Last => "NULLS LAST",
                    };
                    format!("{} {} {}", o.ordinal, dir, nulls)
                })
                .collect();
            sql.push_str(&format!(" ORDER BY {}", orders.join(", ")));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        sql
    }
}

/// Quote an identifier, doubling embedded quotes.
pub fn quote_identifier(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Render a Value as a SQL literal.
pub fn value_to_sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Array(_) | Value::Object(_) => {
            let s = value.to_json().to_string();
            format!("'{}'", s.replace('\'', "''"))
        }
    }
}
