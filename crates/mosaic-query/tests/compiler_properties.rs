use indexmap::IndexMap;
use mosaic_api::{ContextVarValues, Expr, QueryOptions, Row, Schema, Table, Value, ValueType};
use mosaic_query::QueryCompiler;
use proptest::prelude::*;

fn schema() -> Schema {
    Schema::new().with_table(
        Table::new("t1", "id")
            .with_column("a", ValueType::Text)
            .with_column("b", ValueType::Number),
    )
}

fn column_expr() -> impl Strategy<Value = Expr> {
    prop_oneof![
        Just(Expr::field("t1", "a")),
        Just(Expr::field("t1", "b")),
        Just(Expr::id("t1")),
        Just(Expr::op("count", vec![])),
        Just(Expr::op("sum", vec![Expr::field("t1", "b")])),
        any::<i64>().prop_map(Expr::number),
    ]
}

fn aliases() -> impl Strategy<Value = Vec<String>> {
    // Any unicode, including spaces, quotes and names that look like c_N
    prop::collection::hash_set("\\PC{0,12}|c_[0-9]{1,2}|o_[0-9]", 1..8)
        .prop_map(|set| set.into_iter().collect())
}

proptest! {
    #[test]
    fn row_mapper_recovers_original_aliases(
        aliases in aliases(),
        exprs in prop::collection::vec(column_expr(), 8),
        values in prop::collection::vec(any::<i64>(), 8),
    ) {
        let schema = schema();
        let ctx_values = ContextVarValues::new();
        let compiler = QueryCompiler::new(&schema, &[], &ctx_values);

        let select: IndexMap<String, Expr> = aliases
            .iter()
            .cloned()
            .zip(exprs.iter().cloned())
            .collect();
        let options = QueryOptions { select, ..QueryOptions::new("t1") }
            .order_by(Expr::field("t1", "a"), mosaic_api::OrderByDir::Asc);
        let compiled = compiler.compile_query(&options).unwrap();

        // A raw row shaped like the compiled selects
        let raw: Row = compiled
            .query
            .selects
            .iter()
            .zip(values.iter())
            .map(|(s, v)| (s.alias.clone(), Value::Integer(*v)))
            .collect();

        let mapped = compiled.row_mapper.map_row(raw);
        prop_assert_eq!(mapped.len(), aliases.len());
        for (index, alias) in aliases.iter().enumerate() {
            prop_assert_eq!(&mapped[alias], &Value::Integer(values[index]));
        }
    }
}

#[test]
fn group_by_holds_exactly_the_plain_ordinal() {
    let schema = schema();
    let ctx_values = ContextVarValues::new();
    let compiler = QueryCompiler::new(&schema, &[], &ctx_values);

    let options = QueryOptions::new("t1")
        .select("x", Expr::op("sum", vec![Expr::field("t1", "b")]))
        .select("y", Expr::field("t1", "a"));
    let compiled = compiler.compile_query(&options).unwrap();

    assert_eq!(compiled.query.group_by, vec![2]);
    assert!(compiled.query.to_sql().ends_with("GROUP BY 2"));
}
