#![cfg(feature = "sqlite")]

//! Integration tests for the SQLite driver, driven through the registry

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use polysql_drivers::{
    CancellationToken, ColumnDef, DriverRegistry, DriverType, Grip, Kind, PolysqlError, Source,
    TableDef, TableName, Value,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("polysql=debug")
        .with_test_writer()
        .try_init();
}

/// Opens a fresh database file in its own temp dir. The dir must outlive the grip.
async fn open_temp_db() -> (TempDir, Arc<dyn Grip>) {
    init_tracing();
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("sakila.db");
    let source = Source::new(
        "@sakila",
        DriverType::SQLITE,
        format!("sqlite3://{}", path.display()),
    );

    let registry = DriverRegistry::with_defaults();
    let driver = registry
        .driver_for(&DriverType::SQLITE)
        .expect("sqlite driver registered");
    let grip = driver.open(&source).await.expect("open sqlite database");
    (dir, grip)
}

fn actor_def() -> TableDef {
    TableDef::new(
        "actor",
        vec![
            ColumnDef::new("actor_id", Kind::Int).primary_key(),
            ColumnDef::new("first_name", Kind::Text).not_null(),
            ColumnDef::new("rating", Kind::Float),
            ColumnDef::new("active", Kind::Bool),
        ],
    )
}

fn names(cols: &[&str]) -> Vec<String> {
    cols.iter().map(|c| c.to_string()).collect()
}

async fn count(grip: &Arc<dyn Grip>, table: &str) -> i64 {
    let out = grip
        .query(&format!("SELECT COUNT(*) FROM \"{}\"", table), &[])
        .await
        .expect("count rows");
    match &out.records[0][0] {
        Value::Int64(n) => *n,
        other => panic!("unexpected count value {:?}", other),
    }
}

#[tokio::test]
async fn test_open_ping_and_close_once() {
    let (_dir, grip) = open_temp_db().await;
    grip.ping().await.expect("ping");
    assert_eq!(grip.source().handle, "@sakila");
    assert_eq!(grip.driver().driver_type(), DriverType::SQLITE);

    grip.close().await.expect("first close");
    grip.close().await.expect("second close returns the same outcome");
    assert!(grip.is_closed());

    let err = grip.ping().await.unwrap_err();
    assert!(matches!(err, PolysqlError::Closed(_)), "{}", err);
}

#[tokio::test]
async fn test_close_releases_connection_for_prepared_statements() -> anyhow::Result<()> {
    let (dir, grip) = open_temp_db().await;
    grip.create_table(&actor_def()).await?;
    let stmt = grip
        .prepare_insert_stmt(&TableName::new("actor"), &names(&["actor_id", "first_name"]), 1)
        .await?;
    assert_eq!(stmt.exec(&[Value::Int64(1), "PENELOPE".into()]).await?, 1);

    grip.close().await?;
    assert!(grip.is_closed());

    let err = stmt
        .exec(&[Value::Int64(2), "NICK".into()])
        .await
        .unwrap_err();
    assert!(matches!(err, PolysqlError::Closed(_)), "{}", err);
    assert!(matches!(
        grip.exec("DELETE FROM actor", &[]).await,
        Err(PolysqlError::Closed(_))
    ));

    // The file is no longer held open and the earlier row was kept.
    let reopened = rusqlite::Connection::open(dir.path().join("sakila.db"))?;
    let rows: i64 = reopened.query_row("SELECT COUNT(*) FROM actor", [], |row| row.get(0))?;
    assert_eq!(rows, 1);
    Ok(())
}

#[tokio::test]
async fn test_create_table_and_read_metadata() -> anyhow::Result<()> {
    let (_dir, grip) = open_temp_db().await;
    grip.create_table(&actor_def()).await?;
    grip.exec(
        "CREATE VIEW active_actor AS SELECT * FROM actor WHERE active = 1",
        &[],
    )
    .await?;
    grip.exec(
        "INSERT INTO actor (actor_id, first_name, rating, active) VALUES (?, ?, ?, ?)",
        &[Value::Int64(1), "PENELOPE".into(), Value::Float64(4.5), Value::Int64(1)],
    )
    .await?;

    assert!(grip.table_exists(&TableName::new("actor")).await?);
    assert!(!grip.table_exists(&TableName::new("film")).await?);
    assert_eq!(grip.list_table_names(None, true, false).await?, vec!["actor"]);
    assert_eq!(grip.list_table_names(None, false, true).await?, vec!["active_actor"]);
    assert_eq!(grip.current_schema().await?, "main");
    assert_eq!(grip.list_schemas().await?, vec!["main"]);

    let col_types = grip
        .table_column_types(&TableName::new("actor"), &names(&["rating", "actor_id"]))
        .await?;
    assert_eq!(col_types[0].name, "rating");
    assert_eq!(col_types[0].db_type, "REAL");
    assert_eq!(col_types[1].name, "actor_id");

    let md = grip.table_metadata(&TableName::new("actor")).await?;
    assert_eq!(md.row_count, 1);
    assert_eq!(md.fq_name, "main.actor");
    assert_eq!(md.columns.len(), 4);
    assert!(md.columns[0].primary_key);
    assert_eq!(md.columns[0].position, 1);
    assert_eq!(md.columns[1].kind, Kind::Text);
    assert!(!md.columns[1].nullable);
    assert_eq!(md.columns[3].kind, Kind::Bool);

    let src = grip.source_metadata(false).await?;
    assert_eq!(src.db_driver, "rusqlite");
    assert_eq!(src.name, "sakila");
    assert_eq!(src.table_count, 1);
    assert_eq!(src.view_count, 1);
    assert_eq!(src.tables.len(), 2);
    assert!(src.size.is_some());
    assert!(src.db_properties.contains_key("journal_mode"));

    let bare = grip.source_metadata(true).await?;
    assert!(bare.tables.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_query_decodes_kinds_and_keeps_meta_on_empty_results() -> anyhow::Result<()> {
    let (_dir, grip) = open_temp_db().await;
    grip.create_table(&actor_def()).await?;
    grip.exec(
        "INSERT INTO actor VALUES (1, 'NICK', 3.25, 0), (2, 'ED', NULL, 1)",
        &[],
    )
    .await?;

    let out = grip
        .query("SELECT * FROM actor ORDER BY actor_id", &[])
        .await?;
    assert_eq!(out.meta.names(), vec!["actor_id", "first_name", "rating", "active"]);
    assert_eq!(
        out.records,
        vec![
            vec![Value::Int64(1), "NICK".into(), Value::Float64(3.25), Value::Bool(false)],
            vec![Value::Int64(2), "ED".into(), Value::Null, Value::Bool(true)],
        ]
    );

    let empty = grip
        .query("SELECT first_name FROM actor WHERE actor_id = ?", &[Value::Int64(99)])
        .await?;
    assert!(empty.records.is_empty());
    assert_eq!(empty.meta.names(), vec!["first_name"]);

    let expr = grip.query("SELECT 40 + 2 AS answer", &[]).await?;
    assert_eq!(expr.meta.kinds(), vec![Kind::Int]);
    Ok(())
}

#[tokio::test]
async fn test_native_errors_are_classified() {
    let (_dir, grip) = open_temp_db().await;
    grip.create_table(&actor_def()).await.expect("create actor");
    grip.exec("INSERT INTO actor (actor_id, first_name) VALUES (1, 'A')", &[])
        .await
        .expect("insert");

    let dup = grip
        .exec("INSERT INTO actor (actor_id, first_name) VALUES (1, 'B')", &[])
        .await
        .unwrap_err();
    assert!(dup.is_constraint_violation(), "{}", dup);

    let missing = grip
        .table_metadata(&TableName::new("film"))
        .await
        .unwrap_err();
    assert!(missing.is_not_exist(), "{}", missing);

    let missing_col = grip
        .table_column_types(&TableName::new("actor"), &names(&["last_name"]))
        .await
        .unwrap_err();
    assert!(missing_col.is_not_exist(), "{}", missing_col);

    assert!(grip.current_catalog().await.unwrap_err().is_unsupported());
    assert!(grip.list_catalogs().await.unwrap_err().is_unsupported());
    assert!(grip.create_schema("staging").await.unwrap_err().is_unsupported());
    let catalog_qualified = TableName::with_schema("main", "actor").with_catalog("sakila");
    assert!(grip
        .table_exists(&catalog_qualified)
        .await
        .unwrap_err()
        .is_unsupported());
}

#[tokio::test]
async fn test_prepared_insert_and_update() -> anyhow::Result<()> {
    let (_dir, grip) = open_temp_db().await;
    grip.create_table(&actor_def()).await?;
    let table = TableName::new("actor");
    let cols = names(&["actor_id", "first_name", "active"]);

    let stmt = grip.prepare_insert_stmt(&table, &cols, 2).await?;
    assert_eq!(stmt.dest_meta().kinds(), vec![Kind::Int, Kind::Text, Kind::Bool]);
    let mut args: Vec<Value> = vec![
        "1".into(),
        "GRACE".into(),
        "true".into(),
        Value::Int64(2),
        "MATTHEW".into(),
        Value::Bool(false),
    ];
    stmt.munge(&mut args)?;
    assert_eq!(args[0], Value::Int64(1));
    assert_eq!(args[2], Value::Int64(1));
    assert_eq!(stmt.exec(&args).await?, 2);
    stmt.close().await?;

    let update = grip
        .prepare_update_stmt(&table, &names(&["first_name"]), Some("\"actor_id\" = ?"))
        .await?;
    let mut args = vec![Value::from("JOE"), Value::Int64(2)];
    update.munge(&mut args)?;
    assert_eq!(update.exec(&args).await?, 1);
    update.close().await?;

    let out = grip
        .query("SELECT first_name FROM actor ORDER BY actor_id", &[])
        .await?;
    assert_eq!(out.records, vec![vec![Value::from("GRACE")], vec![Value::from("JOE")]]);

    let short = grip.prepare_insert_stmt(&table, &cols, 2).await?;
    let mut too_few = vec![Value::Int64(3)];
    assert!(short.munge(&mut too_few).is_err());
    Ok(())
}

#[tokio::test]
async fn test_batch_insert_writes_every_row() -> anyhow::Result<()> {
    let (_dir, grip) = open_temp_db().await;
    grip.create_table(&actor_def()).await?;
    let cancel = CancellationToken::new();

    let mut batch = grip
        .new_batch_insert(
            &cancel,
            "actor-load",
            &TableName::new("actor"),
            &names(&["actor_id", "first_name", "rating"]),
        )
        .await?;
    assert_eq!(batch.label(), "actor-load");

    // Spans several batches of the dialect's batch size
    for id in 1..=1000 {
        batch
            .send(vec![
                Value::String(id.to_string()),
                Value::String(format!("ACTOR{}", id)),
                Value::Float64(id as f64 / 10.0),
            ])
            .await?;
    }
    assert_eq!(batch.finish().await?, 1000);
    assert_eq!(count(&grip, "actor").await, 1000);

    let last = grip
        .query("SELECT first_name FROM actor WHERE actor_id = ?", &[Value::Int64(1000)])
        .await?;
    assert_eq!(last.records, vec![vec![Value::from("ACTOR1000")]]);
    Ok(())
}

#[tokio::test]
async fn test_batch_insert_cancel_discards_pending_rows() -> anyhow::Result<()> {
    let (_dir, grip) = open_temp_db().await;
    grip.create_table(&actor_def()).await?;
    let cancel = CancellationToken::new();

    let mut batch = grip
        .new_batch_insert(
            &cancel,
            "actor-cancel",
            &TableName::new("actor"),
            &names(&["actor_id", "first_name"]),
        )
        .await?;
    for id in 1..=10 {
        batch
            .send(vec![Value::Int64(id), Value::String(format!("A{}", id))])
            .await?;
    }
    cancel.cancel();

    let err = batch.finish().await.unwrap_err();
    assert!(err.is_cancelled(), "{}", err);
    assert_eq!(count(&grip, "actor").await, 0);
    Ok(())
}

#[tokio::test]
async fn test_batch_insert_reports_bad_rows() -> anyhow::Result<()> {
    let (_dir, grip) = open_temp_db().await;
    grip.create_table(&actor_def()).await?;
    let cancel = CancellationToken::new();

    let mut batch = grip
        .new_batch_insert(
            &cancel,
            "actor-bad",
            &TableName::new("actor"),
            &names(&["actor_id", "first_name"]),
        )
        .await?;
    let err = batch
        .send(vec![Value::from("not a number"), Value::from("X")])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("column 0"), "{}", err);
    assert_eq!(batch.finish().await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_table_ddl_operations() -> anyhow::Result<()> {
    let (_dir, grip) = open_temp_db().await;
    grip.create_table(&TableDef::new(
        "payment",
        vec![
            ColumnDef::new("payment_id", Kind::Int).primary_key(),
            ColumnDef::new("amount", Kind::Text),
        ],
    ))
    .await?;
    grip.exec("INSERT INTO payment (amount) VALUES ('1'), ('2'), ('3')", &[])
        .await?;
    let payment = TableName::new("payment");

    // Copy with and without data
    assert_eq!(
        grip.copy_table(&payment, &TableName::new("payment_copy"), true)
            .await?,
        3
    );
    assert_eq!(
        grip.copy_table(&payment, &TableName::new("payment_shape"), false)
            .await?,
        0
    );
    assert_eq!(count(&grip, "payment_shape").await, 0);

    // Retyping keeps the data
    grip.alter_table_column_kinds(&payment, &names(&["amount"]), &[Kind::Int])
        .await?;
    let col_types = grip.table_column_types(&payment, &[]).await?;
    assert_eq!(col_types[1].db_type, "INTEGER");
    assert_eq!(count(&grip, "payment").await, 3);
    assert!(
        grip.alter_table_column_kinds(&payment, &names(&["amount"]), &[])
            .await
            .is_err()
    );

    // Truncate resets the rowid sequence when asked
    assert_eq!(grip.truncate(&payment, true).await?, 3);
    grip.exec("INSERT INTO payment (amount) VALUES (9)", &[])
        .await?;
    let out = grip.query("SELECT payment_id FROM payment", &[]).await?;
    assert_eq!(out.records, vec![vec![Value::Int64(1)]]);

    grip.alter_table_add_column(&payment, "note", Kind::Text)
        .await?;
    grip.alter_table_rename_column(&payment, "note", "memo")
        .await?;
    grip.alter_table_rename(&payment, "payment_v2").await?;
    let renamed = TableName::new("payment_v2");
    let cols: Vec<String> = grip
        .table_column_types(&renamed, &[])
        .await?
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(cols, names(&["payment_id", "amount", "memo"]));

    grip.drop_table(&renamed, false).await?;
    grip.drop_table(&renamed, true).await?;
    assert!(grip.drop_table(&renamed, false).await.is_err());
    assert!(!grip.table_exists(&renamed).await?);
    Ok(())
}

#[tokio::test]
async fn test_in_memory_source() -> anyhow::Result<()> {
    init_tracing();
    let registry = DriverRegistry::with_defaults();
    let driver = registry.driver_for(&DriverType::SQLITE)?;
    let grip = driver
        .open(&Source::new("@mem", DriverType::SQLITE, ":memory:"))
        .await?;
    grip.create_table(&actor_def()).await?;

    // The bulk loader shares the single in-memory connection
    let cancel = CancellationToken::new();
    let mut batch = grip
        .new_batch_insert(
            &cancel,
            "mem-load",
            &TableName::new("actor"),
            &names(&["actor_id", "first_name"]),
        )
        .await?;
    batch.send(vec![Value::Int64(1), "UMA".into()]).await?;
    assert_eq!(batch.finish().await?, 1);
    assert_eq!(count(&grip, "actor").await, 1);

    let md = grip.source_metadata(true).await?;
    assert_eq!(md.name, ":memory:");
    assert_eq!(md.size, None);
    grip.close().await?;
    Ok(())
}
