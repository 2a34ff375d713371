//! Integration tests for VirtualDatabase staging over an in-memory data source.
//!
//! These tests verify:
//! 1. Staged rows are visible through the overlay and only reach the base on commit
//! 2. Coalescing leaves nothing to send for add-then-remove
//! 3. Temporary keys resolve to persisted keys, including inside row values
//! 4. Updates holding keys of later adds replay after those adds
//! 5. A failing commit stops at the failing mutation and keeps the rest staged

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use mosaic::api::{
    ContextVarValues, Expr, OrderByDir, QueryOptions, Row, Schema, Table, Value, ValueType,
};
use mosaic::database::{
    DataSourceDatabase, Database, DatabaseError, MemoryDataSource, OverlayPhase, VirtualDatabase,
};

fn schema() -> Arc<Schema> {
    Arc::new(
        Schema::new().with_table(
            Table::new("tasks", "id")
                .with_name("Tasks")
                .with_column("title", ValueType::Text)
                .with_column("priority", ValueType::Number)
                .with_column("parent", ValueType::Id),
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

fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

struct Fixture {
    source: Arc<MemoryDataSource>,
    base: Arc<DataSourceDatabase>,
    overlay: VirtualDatabase,
}

fn fixture() -> Fixture {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let schema = schema();
    let source = Arc::new(MemoryDataSource::new(Arc::clone(&schema)).with_rows(
        "tasks",
        vec![task("t1", "Write", 2), task("t2", "Review", 1), task("t3", "Ship", 3)],
    ));
    let base = Arc::new(DataSourceDatabase::new(Arc::clone(&schema), source.clone()));
    let overlay = VirtualDatabase::new(base.clone(), schema);
    Fixture {
        source,
        base,
        overlay,
    }
}

fn titles_query() -> QueryOptions {
    QueryOptions::new("tasks")
        .select("title", Expr::field("tasks", "title"))
        .order_by(Expr::field("tasks", "priority"), OrderByDir::Asc)
}

async fn titles(db: &dyn Database, options: &QueryOptions) -> Result<Vec<String>> {
    let rows = db.query(options, &[], &ContextVarValues::new()).await?;
    Ok(rows
        .iter()
        .map(|r| r["title"].as_string().unwrap_or_default().to_string())
        .collect())
}

#[tokio::test]
async fn test_staged_add_visible_before_commit_and_gone_after_rollback() -> Result<()> {
    let f = fixture();
    f.overlay
        .add_row("tasks", row(&[("title", Value::from("Plan")), ("priority", Value::from(0))]))
        .await?;

    assert_eq!(
        titles(&f.overlay, &titles_query()).await?,
        vec!["Plan", "Review", "Write", "Ship"]
    );
    assert_eq!(titles(&*f.base, &titles_query()).await?.len(), 3);

    f.overlay.rollback().await?;
    assert_eq!(f.overlay.phase().await, OverlayPhase::RolledBack);
    assert_eq!(
        titles(&f.overlay, &titles_query()).await?,
        vec!["Review", "Write", "Ship"]
    );
    Ok(())
}

#[tokio::test]
async fn test_update_then_remove_of_staged_add_commits_nothing() -> Result<()> {
    let f = fixture();
    let base_changes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&base_changes);
    f.base.add_change_listener(Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let key = f
        .overlay
        .add_row("tasks", row(&[("title", Value::from("Temp"))]))
        .await?;
    f.overlay
        .update_row("tasks", &key, row(&[("priority", Value::from(5))]))
        .await?;
    f.overlay.remove_row("tasks", &key).await?;

    assert!(!f.overlay.has_pending_changes().await);
    f.overlay.commit().await?;

    assert_eq!(base_changes.load(Ordering::SeqCst), 0);
    assert_eq!(f.source.rows("tasks").await.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_base_untouched_until_commit() -> Result<()> {
    let f = fixture();
    let base_changes = Arc::new(AtomicUsize::new(0));
    let overlay_changes = Arc::new(AtomicUsize::new(0));
    let (b, o) = (Arc::clone(&base_changes), Arc::clone(&overlay_changes));
    f.base.add_change_listener(Arc::new(move || {
        b.fetch_add(1, Ordering::SeqCst);
    }));
    f.overlay.add_change_listener(Arc::new(move || {
        o.fetch_add(1, Ordering::SeqCst);
    }));

    f.overlay
        .update_row("tasks", &"t1".into(), row(&[("title", Value::from("Draft"))]))
        .await?;
    f.overlay.remove_row("tasks", &"t2".into()).await?;

    assert_eq!(base_changes.load(Ordering::SeqCst), 0);
    assert_eq!(overlay_changes.load(Ordering::SeqCst), 2);
    assert_eq!(f.source.rows("tasks").await.len(), 3);

    f.overlay.commit().await?;

    assert_eq!(f.overlay.phase().await, OverlayPhase::Committed);
    assert_eq!(base_changes.load(Ordering::SeqCst), 2);
    assert_eq!(
        titles(&*f.base, &titles_query()).await?,
        vec!["Draft", "Ship"]
    );
    Ok(())
}

#[tokio::test]
async fn test_query_applies_updates_to_where_and_order() -> Result<()> {
    let f = fixture();
    let options = titles_query()
        .filter(Expr::op(
            ">=",
            vec![Expr::field("tasks", "priority"), Expr::number(2)],
        ))
        .limit(2);

    // t2 moves into the filter, t3 leaves it.
    f.overlay
        .update_row(
            "tasks",
            &"t2".into(),
            row(&[("priority", Value::from(5)), ("title", Value::from("Reviewed"))]),
        )
        .await?;
    f.overlay
        .update_row("tasks", &"t3".into(), row(&[("priority", Value::from(0))]))
        .await?;

    assert_eq!(
        titles(&f.overlay, &options).await?,
        vec!["Write", "Reviewed"]
    );
    Ok(())
}

#[tokio::test]
async fn test_query_drops_removed_rows_within_limit() -> Result<()> {
    let f = fixture();
    f.overlay.remove_row("tasks", &"t2".into()).await?;

    assert_eq!(
        titles(&f.overlay, &titles_query().limit(2)).await?,
        vec!["Write", "Ship"]
    );
    Ok(())
}

#[tokio::test]
async fn test_aggregate_query_passes_through() -> Result<()> {
    let f = fixture();
    f.overlay
        .add_row("tasks", row(&[("title", Value::from("Extra"))]))
        .await?;

    let options =
        QueryOptions::new("tasks").select("count", Expr::op("count", vec![Expr::id("tasks")]));
    let rows = f
        .overlay
        .query(&options, &[], &ContextVarValues::new())
        .await?;

    assert_eq!(rows[0]["count"].as_f64(), Some(3.0));
    Ok(())
}

#[tokio::test]
async fn test_commit_resolves_temp_keys_in_values() -> Result<()> {
    let f = fixture();
    let parent = f
        .overlay
        .add_row("tasks", row(&[("title", Value::from("Epic"))]))
        .await?;
    f.overlay
        .add_row(
            "tasks",
            row(&[("title", Value::from("Story")), ("parent", parent.clone())]),
        )
        .await?;
    assert!(parent.as_string().is_some_and(|k| k.starts_with("pk_")));

    f.overlay.commit().await?;

    let rows = f.source.rows("tasks").await;
    let epic = rows.iter().find(|r| r["title"] == Value::from("Epic")).map(|r| r["id"].clone());
    let story = rows.iter().find(|r| r["title"] == Value::from("Story"));
    let (Some(epic), Some(story)) = (epic, story) else {
        anyhow::bail!("committed rows missing");
    };
    assert_ne!(epic, parent);
    assert_eq!(story["parent"], epic);
    Ok(())
}

#[tokio::test]
async fn test_commit_links_persisted_row_to_later_added_row() -> Result<()> {
    let f = fixture();
    f.overlay
        .update_row("tasks", &Value::from("t1"), row(&[("title", Value::from("Draft"))]))
        .await?;
    let child = f
        .overlay
        .add_row("tasks", row(&[("title", Value::from("New"))]))
        .await?;
    f.overlay
        .update_row("tasks", &Value::from("t1"), row(&[("parent", child.clone())]))
        .await?;

    assert_eq!(f.overlay.mutations().await.len(), 3);
    let staged = f
        .overlay
        .query(
            &QueryOptions::new("tasks")
                .select("title", Expr::field("tasks", "title"))
                .select("parent", Expr::field("tasks", "parent"))
                .filter(Expr::op("=", vec![Expr::id("tasks"), Expr::text("t1")])),
            &[],
            &ContextVarValues::new(),
        )
        .await?;
    assert_eq!(staged.len(), 1);
    assert_eq!(staged[0]["title"], Value::from("Draft"));
    assert_eq!(staged[0]["parent"], child);

    f.overlay.commit().await?;

    let rows = f.source.rows("tasks").await;
    let new_id = rows.iter().find(|r| r["title"] == Value::from("New")).map(|r| r["id"].clone());
    let t1 = rows.iter().find(|r| r["id"] == Value::from("t1"));
    let (Some(new_id), Some(t1)) = (new_id, t1) else {
        anyhow::bail!("committed rows missing");
    };
    assert_eq!(t1["title"], Value::from("Draft"));
    assert_eq!(t1["parent"], new_id);
    Ok(())
}

#[tokio::test]
async fn test_commit_links_added_row_to_later_added_row() -> Result<()> {
    let f = fixture();
    let first = f
        .overlay
        .add_row("tasks", row(&[("title", Value::from("First"))]))
        .await?;
    let second = f
        .overlay
        .add_row("tasks", row(&[("title", Value::from("Second"))]))
        .await?;
    f.overlay
        .update_row("tasks", &first, row(&[("parent", second.clone())]))
        .await?;

    f.overlay.commit().await?;

    let rows = f.source.rows("tasks").await;
    let second_id = rows
        .iter()
        .find(|r| r["title"] == Value::from("Second"))
        .map(|r| r["id"].clone());
    let first_row = rows.iter().find(|r| r["title"] == Value::from("First"));
    let (Some(second_id), Some(first_row)) = (second_id, first_row) else {
        anyhow::bail!("committed rows missing");
    };
    assert_eq!(first_row["parent"], second_id);
    Ok(())
}

#[tokio::test]
async fn test_removing_referenced_staged_add_keeps_reference_resolvable() -> Result<()> {
    let f = fixture();
    let child = f
        .overlay
        .add_row("tasks", row(&[("title", Value::from("Child"))]))
        .await?;
    f.overlay
        .update_row("tasks", &Value::from("t2"), row(&[("parent", child.clone())]))
        .await?;
    f.overlay.remove_row("tasks", &child).await?;

    assert_eq!(
        titles(&f.overlay, &titles_query()).await?,
        vec!["Review", "Write", "Ship"]
    );
    let again = f.overlay.remove_row("tasks", &child).await;
    assert!(matches!(again, Err(DatabaseError::RowNotFound { .. })));

    f.overlay.commit().await?;

    let rows = f.source.rows("tasks").await;
    assert_eq!(rows.len(), 3);
    let t2 = rows.iter().find(|r| r["id"] == Value::from("t2"));
    let Some(t2) = t2 else {
        anyhow::bail!("t2 missing");
    };
    assert!(!t2["parent"].is_null());
    assert_ne!(t2["parent"], child);
    Ok(())
}

#[tokio::test]
async fn test_reference_to_discarded_add_is_rejected() -> Result<()> {
    let f = fixture();
    let temp = f
        .overlay
        .add_row("tasks", row(&[("title", Value::from("Temp"))]))
        .await?;
    f.overlay.remove_row("tasks", &temp).await?;

    let update = f
        .overlay
        .update_row("tasks", &Value::from("t1"), row(&[("parent", temp)]))
        .await;
    assert!(matches!(update, Err(DatabaseError::UnresolvedKey(_))));
    assert!(!f.overlay.has_pending_changes().await);
    Ok(())
}

#[tokio::test]
async fn test_query_keeps_caller_aliases_shaped_like_helper_columns() -> Result<()> {
    let f = fixture();
    f.overlay.remove_row("tasks", &Value::from("t3")).await?;

    let options = QueryOptions::new("tasks")
        .select("__pk", Expr::field("tasks", "title"))
        .select("__col_0", Expr::field("tasks", "priority"))
        .order_by(Expr::field("tasks", "priority"), OrderByDir::Asc);
    let rows = f
        .overlay
        .query(&options, &[], &ContextVarValues::new())
        .await?;

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["__pk"], Value::from("Review"));
    assert_eq!(rows[0]["__col_0"], Value::from(1));
    assert_eq!(rows[1]["__pk"], Value::from("Write"));
    Ok(())
}

#[tokio::test]
async fn test_commit_failure_keeps_remaining_mutations_staged() -> Result<()> {
    let f = fixture();
    f.overlay
        .add_row("tasks", row(&[("title", Value::from("Kept"))]))
        .await?;
    f.overlay
        .update_row("tasks", &"missing".into(), row(&[("title", Value::from("Nope"))]))
        .await?;
    f.overlay.remove_row("tasks", &"t1".into()).await?;

    let err = f.overlay.commit().await.expect_err("commit should fail");
    match err {
        DatabaseError::CommitFailed { index, source, .. } => {
            assert_eq!(index, 1);
            assert!(matches!(*source, DatabaseError::RowNotFound { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(f.overlay.phase().await, OverlayPhase::Staging);
    assert_eq!(f.overlay.mutations().await.len(), 2);
    assert_eq!(f.source.rows("tasks").await.len(), 4);

    f.overlay.rollback().await?;
    assert_eq!(f.source.rows("tasks").await.len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_closed_overlay_rejects_changes() -> Result<()> {
    let f = fixture();
    f.overlay.commit().await?;

    let add = f.overlay.add_row("tasks", Row::new()).await;
    assert!(matches!(add, Err(DatabaseError::OverlayClosed(_))));
    assert!(matches!(
        f.overlay.rollback().await,
        Err(DatabaseError::OverlayClosed(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_nested_transaction_stages_into_overlay_on_commit() -> Result<()> {
    let f = fixture();
    let transaction = Database::transaction(&f.overlay)?;
    transaction.remove_row("tasks", &"t3".into()).await?;
    assert!(!f.overlay.has_pending_changes().await);

    transaction.commit().await?;

    assert_eq!(f.overlay.mutations().await.len(), 1);
    assert_eq!(f.source.rows("tasks").await.len(), 3);
    assert_eq!(
        titles(&f.overlay, &titles_query()).await?,
        vec!["Review", "Write"]
    );
    Ok(())
}

#[tokio::test]
async fn test_base_transaction_applies_on_commit() -> Result<()> {
    let f = fixture();
    let transaction = f.base.transaction()?;
    transaction
        .add_row("tasks", row(&[("title", Value::from("Later"))]))
        .await?;
    assert_eq!(f.source.rows("tasks").await.len(), 3);

    transaction.commit().await?;
    assert_eq!(f.source.rows("tasks").await.len(), 4);
    Ok(())
}
