//! Integration tests for block instances and save/cancel sessions.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use mosaic::api::{
    ContextVar, ContextVarValue, Expr, OrderBy, OrderByDir, Row, Schema, Table, Value, ValueType,
};
use mosaic::core::blocks::{
    AddRowBlockDef, ButtonBlockDef, ContextVarExpr, ExpressionBlockDef, QueryTableBlockDef,
    QueryTableMode, SaveCancelBlockDef, SearchBlockDef,
};
use mosaic::core::{ActionDef, BlockCtx, BlockDef, NullActionLibrary, WidgetLibrary};
use mosaic::database::{DataSourceDatabase, Database, DatabaseError, MemoryDataSource};
use mosaic::instance::{InstanceCtx, PreparedBlock, SaveCancelSession};

fn schema() -> Arc<Schema> {
    Arc::new(
        Schema::new().with_table(
            Table::new("tasks", "id")
                .with_column("title", ValueType::Text)
                .with_column("priority", ValueType::Number),
        ),
    )
}

fn task(id: &str, title: &str, priority: i64) -> Row {
    Row::from([
        ("id".to_string(), Value::from(id)),
        ("title".to_string(), Value::from(title)),
        ("priority".to_string(), Value::from(priority)),
    ])
}

struct Fixture {
    schema: Arc<Schema>,
    source: Arc<MemoryDataSource>,
    database: Arc<dyn Database>,
    widgets: WidgetLibrary,
    actions: NullActionLibrary,
}

impl Fixture {
    fn new() -> Self {
        let schema = schema();
        let source = Arc::new(MemoryDataSource::new(Arc::clone(&schema)).with_rows(
            "tasks",
            vec![task("t1", "Write", 2), task("t2", "Review", 1), task("t3", "Ship", 3)],
        ));
        let database: Arc<dyn Database> =
            Arc::new(DataSourceDatabase::new(Arc::clone(&schema), source.clone()));
        Self {
            schema,
            source,
            database,
            widgets: WidgetLibrary::new(),
            actions: NullActionLibrary,
        }
    }

    fn ctx(&self) -> InstanceCtx<'_> {
        InstanceCtx::new(
            Arc::clone(&self.database),
            BlockCtx::new(&self.schema, &self.widgets, &self.actions),
        )
        .with_context_var(
            ContextVar::row("task", "Task", "tasks"),
            ContextVarValue::Value(Value::from("t1")),
        )
        .with_context_var(
            ContextVar::rowset("all", "All tasks", "tasks"),
            ContextVarValue::Filter(None),
        )
    }
}

fn expression(id: &str, context_var_id: &str, expr: Expr) -> BlockDef {
    BlockDef::Expression(ExpressionBlockDef {
        id: id.to_string(),
        context_var_id: Some(context_var_id.to_string()),
        expr: Some(expr),
        format: None,
    })
}

fn title() -> Expr {
    Expr::field("tasks", "title")
}

#[tokio::test]
async fn test_invalid_block_fetches_nothing() -> Result<()> {
    let f = Fixture::new();
    let block = BlockDef::Expression(ExpressionBlockDef {
        id: "e1".to_string(),
        context_var_id: None,
        expr: Some(title()),
        format: None,
    });

    let prepared = f.ctx().prepare_block(&block).await?;

    assert_eq!(
        prepared,
        PreparedBlock::Invalid("Context variable required".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn test_row_variable_expression_values() -> Result<()> {
    let f = Fixture::new();
    let block = expression("e1", "task", title());

    let PreparedBlock::Ready(values) = f.ctx().prepare_block(&block).await? else {
        anyhow::bail!("block should be valid");
    };

    assert_eq!(values.get("task", &title()), Value::from("Write"));
    Ok(())
}

#[tokio::test]
async fn test_search_filter_narrows_rowset_aggregates() -> Result<()> {
    let f = Fixture::new();
    let count = Expr::op("count", vec![Expr::id("tasks")]);
    let search = SearchBlockDef {
        id: "s1".to_string(),
        placeholder: None,
        rowset_context_var_id: Some("all".to_string()),
        search_exprs: vec![Some(title())],
    };

    let mut ctx = f.ctx();
    ctx.apply_search(&search, "SHIP");
    let rowset = ctx.context_var("all").cloned().expect("rowset in scope");
    let values = ctx
        .context_var_expr_values(&rowset, &[count.clone(), title()])
        .await?;

    assert_eq!(values.get("all", &count).as_f64(), Some(1.0));
    assert!(values.get("all", &title()).is_null());

    ctx.apply_search(&search, "");
    assert!(ctx.filters("all").is_empty());
    Ok(())
}

#[tokio::test]
async fn test_query_table_rows_follow_contents_and_order() -> Result<()> {
    let f = Fixture::new();
    let block = QueryTableBlockDef {
        id: "qt".to_string(),
        mode: QueryTableMode::SingleRow,
        headers: vec![None],
        contents: vec![Some(expression("c1", "qt_row", title()))],
        rowset_context_var_id: Some("all".to_string()),
        limit: Some(2),
        where_: None,
        order_by: vec![OrderBy {
            expr: Expr::field("tasks", "priority"),
            dir: OrderByDir::Asc,
        }],
        row_click_action: None,
    };

    let (exprs, rows) = f.ctx().query_table_rows(&block).await?;

    assert_eq!(exprs, vec![title()]);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["id"], Value::from("t2"));
    assert_eq!(rows[0]["e0"], Value::from("Review"));
    Ok(())
}

#[tokio::test]
async fn test_save_commits_rows_added_in_session() -> Result<()> {
    let f = Fixture::new();
    let mut session = SaveCancelSession::new(Arc::clone(&f.database), Arc::clone(&f.schema));
    let ctx = f.ctx().with_database(session.database());
    let add = AddRowBlockDef {
        id: "add".to_string(),
        name: None,
        table: Some("tasks".to_string()),
        column_values: BTreeMap::from([
            (
                "title".to_string(),
                ContextVarExpr {
                    context_var_id: None,
                    expr: Some(Expr::text("Celebrate")),
                },
            ),
            (
                "priority".to_string(),
                ContextVarExpr {
                    context_var_id: Some("task".to_string()),
                    expr: Some(Expr::field("tasks", "priority")),
                },
            ),
        ]),
        content: None,
    };

    ctx.add_row(&add).await?;
    assert!(session.has_pending_changes().await);
    assert_eq!(f.source.rows("tasks").await.len(), 3);

    session.save().await?;

    assert!(!session.has_pending_changes().await);
    let rows = f.source.rows("tasks").await;
    let added = rows
        .iter()
        .find(|r| r["title"] == Value::from("Celebrate"))
        .expect("row committed");
    assert_eq!(added["priority"], Value::from(2));
    Ok(())
}

#[tokio::test]
async fn test_cancel_discards_session_edits() -> Result<()> {
    let f = Fixture::new();
    let mut session = SaveCancelSession::new(Arc::clone(&f.database), Arc::clone(&f.schema));
    session
        .database()
        .remove_row("tasks", &Value::from("t3"))
        .await?;

    session.cancel().await?;

    assert!(!session.has_pending_changes().await);
    assert_eq!(f.source.rows("tasks").await.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_delete_removes_bound_row_and_discards_edits() -> Result<()> {
    let f = Fixture::new();
    let mut session = SaveCancelSession::new(Arc::clone(&f.database), Arc::clone(&f.schema));
    session
        .database()
        .update_row(
            "tasks",
            &Value::from("t2"),
            Row::from([("title".to_string(), Value::from("Changed"))]),
        )
        .await?;
    let block = SaveCancelBlockDef {
        id: "sc".to_string(),
        save_label: "Save".to_string(),
        cancel_label: "Cancel".to_string(),
        child: None,
        confirm_discard_message: "Discard changes?".to_string(),
        delete_context_var_id: Some("task".to_string()),
        delete_label: Some("Delete".to_string()),
        confirm_delete_message: None,
    };

    session.delete(&block, &f.ctx()).await?;

    let rows = f.source.rows("tasks").await;
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r["id"] != Value::from("t1")));
    assert!(rows.iter().all(|r| r["title"] != Value::from("Changed")));
    assert!(!session.has_pending_changes().await);
    Ok(())
}

#[tokio::test]
async fn test_button_reports_unknown_action() -> Result<()> {
    let f = Fixture::new();
    let button = ButtonBlockDef {
        id: "b1".to_string(),
        label: "Go".to_string(),
        action: Some(ActionDef::new("launch")),
    };

    let result = f.ctx().perform_button(&button).await;

    assert!(matches!(result, Err(DatabaseError::Backend(_))));
    Ok(())
}

#[tokio::test]
async fn test_unbound_blocks_report_invalid_configuration() -> Result<()> {
    let f = Fixture::new();
    let table = QueryTableBlockDef {
        id: "qt".to_string(),
        mode: QueryTableMode::SingleRow,
        headers: vec![None],
        contents: vec![None],
        rowset_context_var_id: Some("missing".to_string()),
        limit: None,
        where_: None,
        order_by: vec![],
        row_click_action: None,
    };
    let add = AddRowBlockDef {
        id: "a1".to_string(),
        name: None,
        table: None,
        column_values: BTreeMap::new(),
        content: None,
    };

    let rows = f.ctx().query_table_rows(&table).await;
    let added = f.ctx().add_row(&add).await;

    assert!(matches!(rows, Err(DatabaseError::Invalid(ref m)) if m == "Rowset required"));
    assert!(matches!(added, Err(DatabaseError::Invalid(ref m)) if m == "Table required"));
    assert_eq!(f.source.rows("tasks").await.len(), 3);
    Ok(())
}
