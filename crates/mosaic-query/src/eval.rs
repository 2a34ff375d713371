//! In-memory interpretation of compiled expressions.
//!
//! Backs the in-memory data source and the overlay's re-evaluation of staged
//! rows. Comparisons follow SQL three-valued logic: any comparison with null
//! yields null, and only `true` passes a where clause.

use mosaic_api::{OrderByDir, Row, Value, AGGREGATE_OPS};
use regex::RegexBuilder;
use std::cmp::Ordering;
use tracing::warn;

use crate::jsonql::{NullsOrder, SqlExpr};

/// True when the expression contains an aggregate operator anywhere.
pub fn contains_aggregate(expr: &SqlExpr) -> bool {
    match expr {
        SqlExpr::Op { op, exprs } => {
            AGGREGATE_OPS.contains(&op.as_str()) || exprs.iter().any(contains_aggregate)
        }
        _ => false,
    }
}

/// Evaluate a non-aggregate expression against one row.
pub fn eval(expr: &SqlExpr, row: &Row) -> Value {
    match expr {
        SqlExpr::Field { column, .. } => row.get(column).cloned().unwrap_or(Value::Null),
        SqlExpr::Literal { value } => value.clone(),
        SqlExpr::Op { op, exprs } => {
            let args = exprs.iter().map(|e| eval(e, row)).collect();
            apply_op(op, args)
        }
    }
}

/// Evaluate an expression against a group of rows. Aggregate operators fold
/// the group; anything else is read from the group's first row.
pub fn eval_group(expr: &SqlExpr, rows: &[&Row]) -> Value {
    match expr {
        SqlExpr::Op { op, exprs } if AGGREGATE_OPS.contains(&op.as_str()) => {
            aggregate(op, exprs.first(), rows)
        }
        SqlExpr::Op { op, exprs } => {
            let args = exprs.iter().map(|e| eval_group(e, rows)).collect();
            apply_op(op, args)
        }
        other => rows
            .first()
            .map(|row| eval(other, row))
            .unwrap_or(Value::Null),
    }
}

/// Ordering of two values under an ORDER BY entry. Null placement is fixed by
/// `nulls` and does not flip with the direction.
pub fn order_values(a: &Value, b: &Value, direction: OrderByDir, nulls: NullsOrder) -> Ordering {
    let null_first = nulls == NullsOrder::First;
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) if null_first => Ordering::Less,
        (true, false) => Ordering::Greater,
        (false, true) if null_first => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let ord = a.compare(b).unwrap_or(Ordering::Equal);
            match direction {
                OrderByDir::Asc => ord,
                OrderByDir::Desc => ord.reverse(),
            }
        }
    }
}

fn aggregate(op: &str, arg: Option<&SqlExpr>, rows: &[&Row]) -> Value {
    let values: Vec<Value> = match arg {
        Some(arg) => rows
            .iter()
            .map(|row| eval(arg, row))
            .filter(|v| !v.is_null())
            .collect(),
        None if op == "count" => return Value::Integer(rows.len() as i64),
        None => Vec::new(),
    };

    match op {
        "count" => Value::Integer(values.len() as i64),
        "sum" => sum(&values),
        "avg" => {
            let numbers: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
            if numbers.is_empty() {
                Value::Null
            } else {
                Value::Float(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        "min" => extreme(values, Ordering::Less),
        "max" => extreme(values, Ordering::Greater),
        _ => Value::Null,
    }
}

fn sum(values: &[Value]) -> Value {
    if values.is_empty() {
        return Value::Null;
    }
    if values.iter().all(|v| matches!(v, Value::Integer(_))) {
        let total = values
            .iter()
            .filter_map(Value::as_i64)
            .try_fold(0i64, |acc, i| acc.checked_add(i));
        if let Some(total) = total {
            return Value::Integer(total);
        }
    }
    Value::Float(values.iter().filter_map(Value::as_f64).sum())
}

fn extreme(values: Vec<Value>, wanted: Ordering) -> Value {
    values
        .into_iter()
        .reduce(|best, v| {
            if v.compare(&best) == Some(wanted) {
                v
            } else {
                best
            }
        })
        .unwrap_or(Value::Null)
}

fn apply_op(op: &str, args: Vec<Value>) -> Value {
    match op {
        "=" | "<>" | "<" | ">" | "<=" | ">=" => compare(op, &args),
        "and" => {
            if args.iter().any(|v| v.as_bool() == Some(false)) {
                Value::Boolean(false)
            } else if args.iter().any(|v| !v.is_true()) {
                Value::Null
            } else {
                Value::Boolean(true)
            }
        }
        "or" => {
            if args.iter().any(Value::is_true) {
                Value::Boolean(true)
            } else if args.iter().any(|v| v.as_bool() != Some(false)) {
                Value::Null
            } else {
                Value::Boolean(false)
            }
        }
        "not" => match args.first().and_then(Value::as_bool) {
            Some(b) => Value::Boolean(!b),
            None => Value::Null,
        },
        "is null" => Value::Boolean(args.first().map_or(true, Value::is_null)),
        "is not null" => Value::Boolean(args.first().map_or(false, |v| !v.is_null())),
        "+" | "-" | "*" | "/" => arithmetic(op, &args),
        "~*" => match (args.first(), args.get(1)) {
            (Some(Value::String(text)), Some(Value::String(pattern))) => {
                match RegexBuilder::new(pattern).case_insensitive(true).build() {
                    Ok(re) => Value::Boolean(re.is_match(text)),
                    Err(e) => {
                        warn!("[eval] Invalid pattern {:?}: {}", pattern, e);
                        Value::Null
                    }
                }
            }
            _ => Value::Null,
        },
        "coalesce" => args.into_iter().find(|v| !v.is_null()).unwrap_or(Value::Null),
        // Geometry is kept in its stored form in memory
        "::geometry" | "ST_Transform" | "ST_AsGeoJSON" => {
            args.into_iter().next().unwrap_or(Value::Null)
        }
        other => {
            warn!("[eval] Unsupported operator {:?}, evaluating to null", other);
            Value::Null
        }
    }
}

fn compare(op: &str, args: &[Value]) -> Value {
    let (Some(a), Some(b)) = (args.first(), args.get(1)) else {
        return Value::Null;
    };
    if a.is_null() || b.is_null() {
        return Value::Null;
    }
    let result = match op {
        "=" => a.loose_eq(b),
        "<>" => !a.loose_eq(b),
        _ => match a.compare(b) {
            Some(ord) => match op {
                "<" => ord == Ordering::Less,
                ">" => ord == Ordering::Greater,
                "<=" => ord != Ordering::Greater,
                _ => ord != Ordering::Less,
            },
            None => return Value::Null,
        },
    };
    Value::Boolean(result)
}

fn arithmetic(op: &str, args: &[Value]) -> Value {
    if args.is_empty() || args.iter().any(Value::is_null) {
        return Value::Null;
    }
    if op == "-" && args.len() == 1 {
        return match &args[0] {
            Value::Integer(i) => Value::Integer(-i),
            other => other.as_f64().map(|f| Value::Float(-f)).unwrap_or(Value::Null),
        };
    }

    if op != "/" {
        let ints: Option<Vec<i64>> = args.iter().map(Value::as_i64).collect();
        if let Some(ints) = ints {
            let folded = ints[1..].iter().try_fold(ints[0], |acc, &i| match op {
                "+" => acc.checked_add(i),
                "-" => acc.checked_sub(i),
                _ => acc.checked_mul(i),
            });
            if let Some(result) = folded {
                return Value::Integer(result);
            }
        }
    }

    let floats: Option<Vec<f64>> = args.iter().map(Value::as_f64).collect();
    let Some(floats) = floats else {
        return Value::Null;
    };
    let mut result = floats[0];
    for f in &floats[1..] {
        match op {
            "+" => result += f,
            "-" => result -= f,
            "*" => result *= f,
            _ => {
                if *f == 0.0 {
                    return Value::Null;
                }
                result /= f;
            }
        }
    }
    Value::Float(result)
}
