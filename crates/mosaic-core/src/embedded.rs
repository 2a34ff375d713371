//! Expressions embedded in text as `{0}`, `{1}`, ... placeholders.

use mosaic_api::{ContextVar, Expr, ExprUtils, Schema, Value, ValueType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedExpr {
    /// Row or rowset variable the expression is evaluated against
    pub context_var_id: Option<String>,
    pub expr: Option<Expr>,
    /// Number format such as `.2f`
    #[serde(default)]
    pub format: Option<String>,
}

/// Replace each `{i}` in `text` with the formatted i-th value. Null values
/// render as empty strings.
pub fn format_embedded_text(
    text: &str,
    embedded_exprs: &[EmbeddedExpr],
    values: &[Value],
    schema: &Schema,
    context_vars: &[ContextVar],
) -> String {
    let utils = ExprUtils::new(schema, context_vars);
    let mut out = text.to_string();

    for (index, value) in values.iter().enumerate() {
        let Some(embedded) = embedded_exprs.get(index) else {
            break;
        };
        let value_type = embedded.expr.as_ref().and_then(|e| utils.expr_type(e));
        let formatted = format_value(value, value_type, embedded.format.as_deref());
        out = out.replace(&format!("{{{}}}", index), &formatted);
    }
    out
}

fn format_value(value: &Value, value_type: Option<ValueType>, format: Option<&str>) -> String {
    match (value, value_type) {
        (Value::Null, _) => String::new(),
        (v, Some(ValueType::Number)) => match (v.as_f64(), format.and_then(precision)) {
            (Some(f), Some(places)) => format!("{:.*}", places, f),
            _ => v.to_string(),
        },
        (v, _) => v.to_string(),
    }
}

/// Decimal places of a `.Nf` style format.
fn precision(format: &str) -> Option<usize> {
    format.strip_prefix('.')?.strip_suffix('f')?.parse().ok()
}

/// First message about an embedded expression that is not usable in scope.
pub fn validate_embedded_exprs(
    embedded_exprs: &[EmbeddedExpr],
    context_vars: &[ContextVar],
) -> Option<String> {
    for embedded in embedded_exprs {
        let in_scope = context_vars.iter().any(|cv| {
            Some(&cv.id) == embedded.context_var_id.as_ref() && (cv.is_row() || cv.is_rowset())
        });
        if !in_scope {
            return Some("Context variable required".to_string());
        }
        if embedded.expr.is_none() {
            return Some("Expression required".to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_api::Table;

    #[test]
    fn substitutes_placeholders_in_order() {
        let schema = Schema::new().with_table(
            Table::new("t1", "id")
                .with_column("name", ValueType::Text)
                .with_column("price", ValueType::Number),
        );
        let cvs = vec![ContextVar::row("r", "Row", "t1")];
        let exprs = vec![
            EmbeddedExpr {
                context_var_id: Some("r".into()),
                expr: Some(Expr::field("t1", "name")),
                format: None,
            },
            EmbeddedExpr {
                context_var_id: Some("r".into()),
                expr: Some(Expr::field("t1", "price")),
                format: Some(".2f".into()),
            },
        ];

        let text = format_embedded_text(
            "{0} costs {1}",
            &exprs,
            &[Value::from("Tea"), Value::Float(3.5)],
            &schema,
            &cvs,
        );
        assert_eq!(text, "Tea costs 3.50");

        let text = format_embedded_text("[{0}]", &exprs, &[Value::Null], &schema, &cvs);
        assert_eq!(text, "[]");
    }

    #[test]
    fn requires_row_or_rowset_variable() {
        let cvs = vec![ContextVar::scalar("s", "S", ValueType::Text)];
        let exprs = vec![EmbeddedExpr {
            context_var_id: Some("s".into()),
            expr: Some(Expr::text("x")),
            format: None,
        }];
        assert_eq!(
            validate_embedded_exprs(&exprs, &cvs).as_deref(),
            Some("Context variable required")
        );
    }
}
