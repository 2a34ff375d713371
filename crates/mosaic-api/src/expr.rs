use serde::{Deserialize, Serialize};

use crate::context_var::{ContextVar, ContextVarType};
use crate::schema::Schema;
use crate::value::{Value, ValueType};

/// Operators that collapse a group of rows into one value.
pub const AGGREGATE_OPS: &[&str] = &["count", "sum", "avg", "min", "max"];

/// Operators whose result is always boolean.
const BOOLEAN_OPS: &[&str] = &[
    "=", "<>", "<", ">", "<=", ">=", "and", "or", "not", "is null", "is not null", "~*",
];

const NUMERIC_OPS: &[&str] = &["+", "-", "*", "/", "count", "sum", "avg"];

/// Expression AST shared by blocks, query requests and filters.
///
/// The core treats expressions as opaque apart from the classification done by
/// [`ExprUtils`]. Operator semantics are interpreted only on the compiled form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Expr {
    /// Column of a table.
    Field { table: String, column: String },

    /// Primary key of a table.
    Id { table: String },

    Literal {
        #[serde(rename = "valueType")]
        value_type: ValueType,
        value: Value,
    },

    /// Reference to a context variable, resolved at compile time.
    Variable {
        #[serde(rename = "variableId")]
        variable_id: String,
    },

    Op {
        op: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        table: Option<String>,
        exprs: Vec<Expr>,
    },
}

impl Expr {
    pub fn field(table: impl Into<String>, column: impl Into<String>) -> Self {
        Expr::Field {
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn id(table: impl Into<String>) -> Self {
        Expr::Id {
            table: table.into(),
        }
    }

    pub fn literal(value_type: ValueType, value: impl Into<Value>) -> Self {
        Expr::Literal {
            value_type,
            value: value.into(),
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Expr::literal(ValueType::Text, Value::String(value.into()))
    }

    pub fn number(value: impl Into<Value>) -> Self {
        Expr::literal(ValueType::Number, value)
    }

    pub fn boolean(value: bool) -> Self {
        Expr::literal(ValueType::Boolean, value)
    }

    pub fn variable(variable_id: impl Into<String>) -> Self {
        Expr::Variable {
            variable_id: variable_id.into(),
        }
    }

    pub fn op(op: impl Into<String>, exprs: Vec<Expr>) -> Self {
        Expr::Op {
            op: op.into(),
            table: None,
            exprs,
        }
    }

    /// Conjunction of the given expressions, flattening to the single operand
    /// when there is only one.
    pub fn and(mut exprs: Vec<Expr>) -> Option<Expr> {
        match exprs.len() {
            0 => None,
            1 => exprs.pop(),
            _ => Some(Expr::op("and", exprs)),
        }
    }

    /// Ids of every variable referenced anywhere in the expression, in
    /// depth-first order, duplicates kept.
    pub fn variable_ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        self.collect_variable_ids(&mut ids);
        ids
    }

    fn collect_variable_ids<'a>(&'a self, ids: &mut Vec<&'a str>) {
        match self {
            Expr::Variable { variable_id } => ids.push(variable_id),
            Expr::Op { exprs, .. } => exprs.iter().for_each(|e| e.collect_variable_ids(ids)),
            _ => {}
        }
    }

    pub fn references_variable(&self, variable_id: &str) -> bool {
        self.variable_ids().contains(&variable_id)
    }

    /// Rewrites every variable reference through `map`.
    pub fn map_variables(&self, map: &dyn Fn(&str) -> String) -> Expr {
        match self {
            Expr::Variable { variable_id } => Expr::Variable {
                variable_id: map(variable_id),
            },
            Expr::Op { op, table, exprs } => Expr::Op {
                op: op.clone(),
                table: table.clone(),
                exprs: exprs.iter().map(|e| e.map_variables(map)).collect(),
            },
            other => other.clone(),
        }
    }

    /// Stable textual key for the expression.
    ///
    /// Goes through `serde_json::Value`, whose maps are sorted, so two equal
    /// expressions always produce the same key.
    pub fn canonical_key(&self) -> String {
        serde_json::to_value(self)
            .map(|v| v.to_string())
            .unwrap_or_else(|_| format!("{:?}", self))
    }
}

/// How an expression behaves with respect to grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggrStatus {
    /// Constant for the whole query.
    Literal,
    /// One value per row.
    Individual,
    /// One value per group.
    Aggregate,
}

/// Classifies expressions against a schema and a set of context variables.
pub struct ExprUtils<'a> {
    schema: &'a Schema,
    context_vars: &'a [ContextVar],
}

impl<'a> ExprUtils<'a> {
    pub fn new(schema: &'a Schema, context_vars: &'a [ContextVar]) -> Self {
        Self {
            schema,
            context_vars,
        }
    }

    fn context_var(&self, id: &str) -> Option<&'a ContextVar> {
        self.context_vars.iter().find(|cv| cv.id == id)
    }

    pub fn aggr_status(&self, expr: &Expr) -> AggrStatus {
        match expr {
            Expr::Field { .. } | Expr::Id { .. } => AggrStatus::Individual,
            Expr::Literal { .. } => AggrStatus::Literal,
            Expr::Variable { variable_id } => match self.context_var(variable_id) {
                // A rowset variable compiles to a per-row filter
                Some(cv) if cv.var_type == ContextVarType::Rowset => AggrStatus::Individual,
                _ => AggrStatus::Literal,
            },
            Expr::Op { op, exprs, .. } => {
                if AGGREGATE_OPS.contains(&op.as_str()) {
                    return AggrStatus::Aggregate;
                }
                exprs
                    .iter()
                    .map(|e| self.aggr_status(e))
                    .max()
                    .unwrap_or(AggrStatus::Literal)
            }
        }
    }

    pub fn is_aggregate(&self, expr: &Expr) -> bool {
        self.aggr_status(expr) == AggrStatus::Aggregate
    }

    /// Result type of the expression, if it can be determined.
    pub fn expr_type(&self, expr: &Expr) -> Option<ValueType> {
        match expr {
            Expr::Field { table, column } => {
                self.schema.column(table, column).map(|c| c.column_type)
            }
            Expr::Id { .. } => Some(ValueType::Id),
            Expr::Literal { value_type, .. } => Some(*value_type),
            Expr::Variable { variable_id } => {
                let cv = self.context_var(variable_id)?;
                match cv.var_type {
                    ContextVarType::Row => Some(ValueType::Id),
                    ContextVarType::Rowset => Some(ValueType::Boolean),
                    ContextVarType::Scalar(t) => Some(t),
                }
            }
            Expr::Op { op, exprs, .. } => {
                if BOOLEAN_OPS.contains(&op.as_str()) {
                    Some(ValueType::Boolean)
                } else if NUMERIC_OPS.contains(&op.as_str()) {
                    Some(ValueType::Number)
                } else {
                    exprs.first().and_then(|e| self.expr_type(e))
                }
            }
        }
    }
}
