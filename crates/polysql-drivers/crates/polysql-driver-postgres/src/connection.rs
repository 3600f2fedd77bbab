//! PostgreSQL grip implementation

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use polysql_core::{
    BatchInsert, BatchOptions, CancellationToken, CloseGuard, ColumnMetadata, ColumnTypeData,
    Dialect, Driver, Grip, Kind, PolysqlError, QueryOutput, Record, RecordMeta, Result, RowMungeFn,
    Source, SourceMetadata, StmtExecer, TableDef, TableMetadata, TableName, TableType, Value,
    base_type_name, collect_tables, create_table_sql, insert_sql, munge_for_meta, munge_rows,
    update_sql,
};
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row, Statement};

use crate::error::{pool_err, wrap_err};
use crate::types::{as_params, row_value, values_for_types};
use crate::{
    PgCopyLoader, PgLocation, PostgresDriver, PostgresTlsConnector, db_type_for_kind,
    kind_from_pg_type,
};

/// Server settings reported as database properties.
const PROPERTY_SETTINGS: &[&str] = &[
    "server_version",
    "server_encoding",
    "client_encoding",
    "TimeZone",
    "DateStyle",
    "max_connections",
    "search_path",
    "default_transaction_isolation",
    "standard_conforming_strings",
];

const TABLE_COLUMNS_SQL: &str = "\
SELECT c.column_name::text, c.data_type::text, c.udt_name::text, c.is_nullable::text,
       c.character_maximum_length::int8, c.numeric_precision::int8, c.numeric_scale::int8,
       c.ordinal_position::int8, c.column_default::text,
       col_description(to_regclass($4::text), c.ordinal_position::int4),
       EXISTS (
           SELECT 1
           FROM information_schema.table_constraints tc
           JOIN information_schema.key_column_usage kcu
             ON kcu.constraint_name = tc.constraint_name
            AND kcu.table_schema = tc.table_schema
            AND kcu.table_name = tc.table_name
           WHERE tc.constraint_type = 'PRIMARY KEY'
             AND tc.table_schema = c.table_schema
             AND tc.table_name = c.table_name
             AND kcu.column_name = c.column_name
       )
FROM information_schema.columns c
WHERE c.table_catalog = COALESCE($1::text, current_database())
  AND c.table_schema = COALESCE($2::text, current_schema())
  AND c.table_name = $3::text
ORDER BY c.ordinal_position";

/// One row of `information_schema.columns`.
struct ColumnRow {
    name: String,
    data_type: String,
    udt_name: String,
    nullable: bool,
    length: Option<i64>,
    precision: Option<i64>,
    scale: Option<i64>,
    position: i64,
    default_value: Option<String>,
    comment: Option<String>,
    primary_key: bool,
}

impl ColumnRow {
    fn from_row(row: &Row) -> std::result::Result<Self, tokio_postgres::Error> {
        Ok(Self {
            name: row.try_get(0)?,
            data_type: row.try_get(1)?,
            udt_name: row.try_get(2)?,
            nullable: row.try_get::<_, String>(3)? == "YES",
            length: row.try_get(4)?,
            precision: row.try_get(5)?,
            scale: row.try_get(6)?,
            position: row.try_get(7)?,
            default_value: row.try_get(8)?,
            comment: row.try_get(9)?,
            primary_key: row.try_get(10)?,
        })
    }

    /// Type name as used for kind mapping.
    fn db_type(&self) -> &str {
        match self.data_type.as_str() {
            "USER-DEFINED" | "ARRAY" => &self.udt_name,
            other => other,
        }
    }

    /// Full declared type, such as `character varying(40)`.
    fn column_type(&self) -> String {
        match (self.data_type.as_str(), self.length, self.precision, self.scale) {
            ("character varying" | "character", Some(len), _, _) => {
                format!("{}({})", self.data_type, len)
            }
            ("numeric", _, Some(precision), Some(scale)) => {
                format!("numeric({},{})", precision, scale)
            }
            _ => self.db_type().to_string(),
        }
    }

    fn type_data(&self) -> ColumnTypeData {
        let mut col = ColumnTypeData::new(self.name.clone(), self.db_type()).nullable(self.nullable);
        col.length = self.length;
        col.precision = self.precision;
        col.scale = self.scale;
        col
    }
}

/// A live handle to one PostgreSQL database, backed by a connection pool
pub struct PostgresGrip {
    driver: Arc<PostgresDriver>,
    source: Source,
    location: PgLocation,
    pool: Pool,
    guard: CloseGuard,
}

impl PostgresGrip {
    pub(crate) async fn open(
        driver: Arc<PostgresDriver>,
        source: Source,
        location: PgLocation,
    ) -> Result<Self> {
        let config = driver.config();
        let max_size = location.pool_max_conns.unwrap_or(config.conn_max_open);
        tracing::info!(
            database = ?location.dbname(),
            user = ?location.user(),
            ssl_mode = ?location.tls.mode,
            max_size,
            "connecting to PostgreSQL database"
        );

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = match PostgresTlsConnector::build(&location.tls)? {
            Some(tls) => Manager::from_config(location.config.clone(), tls, mgr_config),
            None => Manager::from_config(location.config.clone(), NoTls, mgr_config),
        };
        let pool = Pool::builder(mgr)
            .max_size(max_size)
            .wait_timeout(Some(config.acquire_timeout()))
            .create_timeout(Some(config.acquire_timeout()))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| {
                PolysqlError::generic_with(
                    format!("source {}: create connection pool: {}", source.handle, e),
                    e,
                )
            })?;

        let grip = Self {
            driver,
            source,
            location,
            pool,
            guard: CloseGuard::new(),
        };
        grip.ping().await?;
        Ok(grip)
    }

    fn pg_dialect(&self) -> &'static Dialect {
        crate::postgres_dialect()
    }

    /// A pooled connection, unless the grip is closed.
    async fn client(&self) -> Result<Object> {
        self.guard.ensure_open(&self.source.handle)?;
        self.pool
            .get()
            .await
            .map_err(|e| pool_err(format!("acquire connection for {}", self.source.handle), e))
    }

    async fn query_rows(
        &self,
        what: &str,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>> {
        let client = self.client().await?;
        client.query(sql, params).await.map_err(|e| wrap_err(what, e))
    }

    async fn query_one_row(
        &self,
        what: &str,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Row> {
        let client = self.client().await?;
        client.query_one(sql, params).await.map_err(|e| wrap_err(what, e))
    }

    async fn batch_execute(&self, what: &str, sql: &str) -> Result<()> {
        tracing::debug!(sql = %sql, "{}", what);
        let client = self.client().await?;
        client.batch_execute(sql).await.map_err(|e| wrap_err(what, e))
    }

    fn render(&self, table: &TableName) -> Result<String> {
        table.render(self.pg_dialect())
    }

    async fn resolve_schema(&self, table: &TableName) -> Result<String> {
        match &table.schema {
            Some(schema) => Ok(schema.clone()),
            None => self.current_schema().await,
        }
    }

    async fn column_rows(&self, table: &TableName) -> Result<Vec<ColumnRow>> {
        let schema = self.resolve_schema(table).await?;
        let regclass = self.render(&TableName::with_schema(schema.clone(), table.table.clone()))?;
        let rows = self
            .query_rows(
                "read table columns",
                TABLE_COLUMNS_SQL,
                &[&table.catalog, &schema, &table.table, &regclass],
            )
            .await?;
        if rows.is_empty() {
            return Err(PolysqlError::not_exist(format!(
                "table {} does not exist",
                table
            )));
        }
        rows.iter()
            .map(|row| {
                ColumnRow::from_row(row).map_err(|e| wrap_err(format!("read columns of {}", table), e))
            })
            .collect()
    }

    /// Column types of `table`, all of them when `cols` is empty.
    async fn column_types(&self, table: &TableName, cols: &[String]) -> Result<Vec<ColumnTypeData>> {
        let rows = self.column_rows(table).await?;
        if cols.is_empty() {
            return Ok(rows.iter().map(ColumnRow::type_data).collect());
        }
        cols.iter()
            .map(|col| {
                rows.iter()
                    .find(|row| &row.name == col)
                    .map(ColumnRow::type_data)
                    .ok_or_else(|| {
                        PolysqlError::not_exist(format!(
                            "column {} does not exist in table {}",
                            col, table
                        ))
                    })
            })
            .collect()
    }

    async fn dest_meta(&self, table: &TableName, cols: &[String]) -> Result<RecordMeta> {
        let col_types = self.column_types(table, cols).await?;
        Ok(self.driver.record_meta(&col_types))
    }

    fn dest_munge(&self, meta: &RecordMeta) -> RowMungeFn {
        munge_for_meta(meta, self.pg_dialect().int_bool)
    }

    async fn prepare_stmt(
        &self,
        sql: String,
        meta: RecordMeta,
        num_rows: usize,
    ) -> Result<Box<dyn StmtExecer>> {
        let client = self.client().await?;
        let stmt = client
            .prepare_cached(&sql)
            .await
            .map_err(|e| wrap_err("prepare statement", e))?;
        let munge = self.dest_munge(&meta);
        Ok(Box::new(PostgresStmt {
            client,
            stmt,
            meta,
            munge,
            num_rows,
        }))
    }
}

fn setting_to_json(setting: String) -> serde_json::Value {
    match setting.parse::<i64>() {
        Ok(n) => serde_json::Value::from(n),
        Err(_) => serde_json::Value::String(setting),
    }
}

#[async_trait]
impl Grip for PostgresGrip {
    fn source(&self) -> &Source {
        &self.source
    }

    fn driver(&self) -> Arc<dyn Driver> {
        self.driver.clone()
    }

    fn dialect(&self) -> &'static Dialect {
        self.pg_dialect()
    }

    async fn ping(&self) -> Result<()> {
        let client = self.client().await?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| wrap_err("ping", e))?;
        Ok(())
    }

    #[tracing::instrument(skip(self, sql, args), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query(&self, sql: &str, args: &[Value]) -> Result<QueryOutput> {
        let start_time = std::time::Instant::now();
        let client = self.client().await?;

        // Prepare first so we know the target types of the parameters
        let stmt = client
            .prepare(sql)
            .await
            .map_err(|e| wrap_err("prepare query", e))?;
        let params = values_for_types(args, stmt.params())?;
        let rows = client
            .query(&stmt, &as_params(&params))
            .await
            .map_err(|e| wrap_err("execute query", e))?;

        // Column metadata comes from the statement so empty results keep it
        let cols: Vec<ColumnTypeData> = stmt
            .columns()
            .iter()
            .map(|col| ColumnTypeData::new(col.name(), col.type_().name()))
            .collect();
        let meta = self.driver.record_meta(&cols);

        let records = rows
            .iter()
            .map(|row| (0..cols.len()).map(|idx| row_value(row, idx)).collect::<Result<Record>>())
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            row_count = records.len(),
            execution_time_ms = start_time.elapsed().as_millis() as u64,
            "query executed successfully"
        );
        Ok(QueryOutput { meta, records })
    }

    #[tracing::instrument(skip(self, sql, args), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn exec(&self, sql: &str, args: &[Value]) -> Result<u64> {
        let client = self.client().await?;
        let stmt = client
            .prepare(sql)
            .await
            .map_err(|e| wrap_err("prepare statement", e))?;
        let params = values_for_types(args, stmt.params())?;
        let affected = client
            .execute(&stmt, &as_params(&params))
            .await
            .map_err(|e| wrap_err("execute statement", e))?;
        tracing::debug!(affected_rows = affected, "statement executed");
        Ok(affected)
    }

    async fn current_catalog(&self) -> Result<String> {
        let row = self
            .query_one_row("read current database", "SELECT current_database()::text", &[])
            .await?;
        row.try_get(0).map_err(|e| wrap_err("read current database", e))
    }

    async fn current_schema(&self) -> Result<String> {
        let row = self
            .query_one_row("read current schema", "SELECT current_schema()::text", &[])
            .await?;
        let schema: Option<String> = row
            .try_get(0)
            .map_err(|e| wrap_err("read current schema", e))?;
        schema.ok_or_else(|| {
            PolysqlError::not_exist("no current schema: search_path names no existing schema")
        })
    }

    async fn list_catalogs(&self) -> Result<Vec<String>> {
        let rows = self
            .query_rows(
                "list databases",
                "SELECT datname::text FROM pg_database WHERE NOT datistemplate ORDER BY datname",
                &[],
            )
            .await?;
        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(|e| wrap_err("list databases", e)))
            .collect()
    }

    async fn list_schemas(&self) -> Result<Vec<String>> {
        let rows = self
            .query_rows(
                "list schemas",
                "SELECT schema_name::text FROM information_schema.schemata ORDER BY schema_name",
                &[],
            )
            .await?;
        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(|e| wrap_err("list schemas", e)))
            .collect()
    }

    async fn list_table_names(
        &self,
        schema: Option<&str>,
        tables: bool,
        views: bool,
    ) -> Result<Vec<String>> {
        let mut types: Vec<&str> = Vec::with_capacity(2);
        if tables {
            types.push("BASE TABLE");
        }
        if views {
            types.push("VIEW");
        }
        if types.is_empty() {
            return Ok(Vec::new());
        }

        let rows = self
            .query_rows(
                "list tables",
                "SELECT table_name::text FROM information_schema.tables \
                 WHERE table_schema = COALESCE($1::text, current_schema()) \
                 AND table_type = ANY($2::text[]) ORDER BY table_name",
                &[&schema, &types],
            )
            .await?;
        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(|e| wrap_err("list tables", e)))
            .collect()
    }

    async fn catalog_exists(&self, catalog: &str) -> Result<bool> {
        let row = self
            .query_one_row(
                "check database",
                "SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1::text)",
                &[&catalog],
            )
            .await?;
        row.try_get(0).map_err(|e| wrap_err("check database", e))
    }

    async fn schema_exists(&self, schema: &str) -> Result<bool> {
        let row = self
            .query_one_row(
                "check schema",
                "SELECT EXISTS (SELECT 1 FROM information_schema.schemata WHERE schema_name = $1::text)",
                &[&schema],
            )
            .await?;
        row.try_get(0).map_err(|e| wrap_err("check schema", e))
    }

    async fn table_exists(&self, table: &TableName) -> Result<bool> {
        let row = self
            .query_one_row(
                "check table",
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                 WHERE table_catalog = COALESCE($1::text, current_database()) \
                 AND table_schema = COALESCE($2::text, current_schema()) \
                 AND table_name = $3::text)",
                &[&table.catalog, &table.schema, &table.table],
            )
            .await?;
        row.try_get(0).map_err(|e| wrap_err("check table", e))
    }

    async fn table_column_types(
        &self,
        table: &TableName,
        cols: &[String],
    ) -> Result<Vec<ColumnTypeData>> {
        self.column_types(table, cols).await
    }

    #[tracing::instrument(skip(self), fields(handle = %self.source.handle))]
    async fn table_metadata(&self, table: &TableName) -> Result<TableMetadata> {
        let schema = self.resolve_schema(table).await?;
        let qualified = TableName::with_schema(schema.clone(), table.table.clone());
        let rendered = self.render(&qualified)?;

        let rows = self
            .query_rows(
                "read table",
                "SELECT table_type::text, obj_description(to_regclass($3::text), 'pg_class'), \
                        pg_total_relation_size(to_regclass($3::text))::int8 \
                 FROM information_schema.tables \
                 WHERE table_schema = $1::text AND table_name = $2::text",
                &[&schema, &table.table, &rendered],
            )
            .await?;
        let Some(row) = rows.first() else {
            return Err(PolysqlError::not_exist(format!("table {} does not exist", table)));
        };
        let read = |e: tokio_postgres::Error| wrap_err(format!("read table {}", table), e);
        let db_table_type: String = row.try_get(0).map_err(read)?;
        let comment: Option<String> = row.try_get(1).map_err(read)?;
        let size: Option<i64> = row.try_get(2).map_err(read)?;

        let count_row = self
            .query_one_row("count rows", &format!("SELECT COUNT(*) FROM {}", rendered), &[])
            .await?;
        let row_count: i64 = count_row.try_get(0).map_err(read)?;

        let columns = self
            .column_rows(&qualified)
            .await?
            .into_iter()
            .map(|col| ColumnMetadata {
                position: col.position,
                primary_key: col.primary_key,
                base_type: base_type_name(col.db_type()).to_string(),
                column_type: col.column_type(),
                kind: kind_from_pg_type(col.db_type()),
                nullable: col.nullable,
                default_value: col.default_value,
                comment: col.comment,
                name: col.name,
            })
            .collect();

        Ok(TableMetadata {
            name: table.table.clone(),
            fq_name: format!("{}.{}", schema, table.table),
            table_type: if db_table_type == "VIEW" {
                TableType::View
            } else {
                TableType::Table
            },
            db_table_type,
            row_count,
            size,
            comment,
            columns,
        })
    }

    #[tracing::instrument(skip(self), fields(handle = %self.source.handle))]
    async fn source_metadata(&self, no_schema: bool) -> Result<SourceMetadata> {
        let client = self.client().await?;
        let (version, product, names, size, counts) = futures::try_join!(
            client.query_one("SHOW server_version", &[]),
            client.query_one("SELECT version()", &[]),
            client.query_one(
                "SELECT current_database()::text, current_schema()::text, current_user::text",
                &[],
            ),
            client.query_one("SELECT pg_database_size(current_database())::int8", &[]),
            client.query_one(
                "SELECT COUNT(*) FILTER (WHERE table_type = 'BASE TABLE'), \
                        COUNT(*) FILTER (WHERE table_type = 'VIEW') \
                 FROM information_schema.tables WHERE table_schema = current_schema()",
                &[],
            ),
        )
        .map_err(|e| wrap_err("read source metadata", e))?;
        drop(client);

        let read = |e: tokio_postgres::Error| wrap_err("read source metadata", e);
        let db_version: String = version.try_get(0).map_err(read)?;
        let db_product: String = product.try_get(0).map_err(read)?;
        let database: String = names.try_get(0).map_err(read)?;
        let schema: Option<String> = names.try_get(1).map_err(read)?;
        let user: String = names.try_get(2).map_err(read)?;
        let size: i64 = size.try_get(0).map_err(read)?;
        let table_count: i64 = counts.try_get(0).map_err(read)?;
        let view_count: i64 = counts.try_get(1).map_err(read)?;

        let tables = match (&schema, no_schema) {
            (Some(schema), false) => {
                let names: Vec<TableName> = self
                    .list_table_names(Some(schema), true, true)
                    .await?
                    .into_iter()
                    .map(|name| TableName::with_schema(schema.clone(), name))
                    .collect();
                collect_tables(self, &names).await
            }
            _ => Vec::new(),
        };

        Ok(SourceMetadata {
            handle: self.source.handle.clone(),
            location: self.source.redacted_location(),
            driver: self.source.driver.clone(),
            db_driver: "tokio-postgres".to_string(),
            db_product,
            db_version,
            user: Some(user),
            catalog: Some(database.clone()),
            fq_name: match &schema {
                Some(schema) => format!("{}.{}", database, schema),
                None => database.clone(),
            },
            schema,
            name: database,
            size: Some(size),
            table_count: table_count as usize,
            view_count: view_count as usize,
            tables,
            db_properties: self.db_properties().await?,
        })
    }

    async fn db_properties(&self) -> Result<BTreeMap<String, serde_json::Value>> {
        let rows = self
            .query_rows(
                "read server settings",
                "SELECT name::text, setting::text FROM pg_settings WHERE name = ANY($1::text[])",
                &[&PROPERTY_SETTINGS],
            )
            .await?;
        let read = |e: tokio_postgres::Error| wrap_err("read server settings", e);
        let mut props = BTreeMap::new();
        for row in &rows {
            let name: String = row.try_get(0).map_err(read)?;
            let setting: String = row.try_get(1).map_err(read)?;
            props.insert(name, setting_to_json(setting));
        }
        Ok(props)
    }

    #[tracing::instrument(skip(self, def), fields(handle = %self.source.handle, table = %def.name))]
    async fn create_table(&self, def: &TableDef) -> Result<()> {
        let sql = create_table_sql(self.pg_dialect(), def, db_type_for_kind)?;
        self.batch_execute("create table", &sql).await?;
        tracing::info!(columns = def.columns.len(), "table created");
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(handle = %self.source.handle))]
    async fn drop_table(&self, table: &TableName, if_exists: bool) -> Result<()> {
        let sql = format!(
            "DROP TABLE {}{}",
            if if_exists { "IF EXISTS " } else { "" },
            self.render(table)?
        );
        self.batch_execute("drop table", &sql).await
    }

    #[tracing::instrument(skip(self), fields(handle = %self.source.handle))]
    async fn create_schema(&self, schema: &str) -> Result<()> {
        let sql = format!("CREATE SCHEMA {}", (self.pg_dialect().enquote)(schema));
        self.batch_execute("create schema", &sql).await
    }

    #[tracing::instrument(skip(self), fields(handle = %self.source.handle))]
    async fn drop_schema(&self, schema: &str, cascade: bool) -> Result<()> {
        let sql = format!(
            "DROP SCHEMA {}{}",
            (self.pg_dialect().enquote)(schema),
            if cascade { " CASCADE" } else { "" }
        );
        self.batch_execute("drop schema", &sql).await
    }

    #[tracing::instrument(skip(self), fields(handle = %self.source.handle))]
    async fn alter_table_rename(&self, table: &TableName, new_name: &str) -> Result<()> {
        let sql = format!(
            "ALTER TABLE {} RENAME TO {}",
            self.render(table)?,
            (self.pg_dialect().enquote)(new_name)
        );
        self.batch_execute("rename table", &sql).await
    }

    #[tracing::instrument(skip(self), fields(handle = %self.source.handle))]
    async fn alter_table_add_column(&self, table: &TableName, col: &str, kind: Kind) -> Result<()> {
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            self.render(table)?,
            (self.pg_dialect().enquote)(col),
            db_type_for_kind(kind)
        );
        self.batch_execute("add column", &sql).await
    }

    #[tracing::instrument(skip(self), fields(handle = %self.source.handle))]
    async fn alter_table_rename_column(
        &self,
        table: &TableName,
        col: &str,
        new_name: &str,
    ) -> Result<()> {
        let enquote = self.pg_dialect().enquote;
        let sql = format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            self.render(table)?,
            enquote(col),
            enquote(new_name)
        );
        self.batch_execute("rename column", &sql).await
    }

    #[tracing::instrument(skip(self), fields(handle = %self.source.handle))]
    async fn alter_table_column_kinds(
        &self,
        table: &TableName,
        cols: &[String],
        kinds: &[Kind],
    ) -> Result<()> {
        if cols.len() != kinds.len() {
            return Err(PolysqlError::InvalidSql(format!(
                "alter {}: {} columns but {} kinds",
                table,
                cols.len(),
                kinds.len()
            )));
        }
        if cols.is_empty() {
            return Ok(());
        }

        let enquote = self.pg_dialect().enquote;
        let alterations: Vec<String> = cols
            .iter()
            .zip(kinds)
            .map(|(col, kind)| {
                let db_type = db_type_for_kind(*kind);
                format!(
                    "ALTER COLUMN {col} TYPE {db_type} USING {col}::{db_type}",
                    col = enquote(col)
                )
            })
            .collect();
        let sql = format!("ALTER TABLE {} {}", self.render(table)?, alterations.join(", "));
        self.batch_execute("alter column types", &sql).await?;
        tracing::info!(columns = cols.len(), "column kinds altered");
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(handle = %self.source.handle))]
    async fn truncate(&self, table: &TableName, reset_seq: bool) -> Result<u64> {
        let rendered = self.render(table)?;
        let mut client = self.client().await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| wrap_err("begin truncate", e))?;

        let count_sql = format!("SELECT COUNT(*) FROM {}", rendered);
        let count: i64 = tx
            .query_one(count_sql.as_str(), &[])
            .await
            .and_then(|row| row.try_get(0))
            .map_err(|e| wrap_err(format!("count rows of {}", table), e))?;
        tx.batch_execute(&format!(
            "TRUNCATE TABLE {}{}",
            rendered,
            if reset_seq { " RESTART IDENTITY" } else { "" }
        ))
        .await
        .map_err(|e| wrap_err(format!("truncate {}", table), e))?;
        tx.commit()
            .await
            .map_err(|e| wrap_err("commit truncate", e))?;

        tracing::info!(rows = count, "table truncated");
        Ok(count as u64)
    }

    #[tracing::instrument(skip(self), fields(handle = %self.source.handle))]
    async fn copy_table(&self, from: &TableName, to: &TableName, copy_data: bool) -> Result<u64> {
        let sql = format!(
            "CREATE TABLE {} AS TABLE {}{}",
            self.render(to)?,
            self.render(from)?,
            if copy_data { "" } else { " WITH NO DATA" }
        );
        let client = self.client().await?;
        let copied = client
            .execute(sql.as_str(), &[])
            .await
            .map_err(|e| wrap_err("copy table", e))?;
        tracing::info!(rows = copied, "table copied");
        Ok(copied)
    }

    async fn prepare_insert_stmt(
        &self,
        table: &TableName,
        cols: &[String],
        num_rows: usize,
    ) -> Result<Box<dyn StmtExecer>> {
        let meta = self.dest_meta(table, cols).await?;
        let names: Vec<String> = meta.names().into_iter().map(String::from).collect();
        let sql = insert_sql(self.pg_dialect(), table, &names, num_rows)?;
        self.prepare_stmt(sql, meta, num_rows).await
    }

    async fn prepare_update_stmt(
        &self,
        table: &TableName,
        cols: &[String],
        where_clause: Option<&str>,
    ) -> Result<Box<dyn StmtExecer>> {
        let meta = self.dest_meta(table, cols).await?;
        let names: Vec<String> = meta.names().into_iter().map(String::from).collect();
        let sql = update_sql(self.pg_dialect(), table, &names, where_clause)?;
        self.prepare_stmt(sql, meta, 1).await
    }

    #[tracing::instrument(skip(self, cancel), fields(handle = %self.source.handle))]
    async fn new_batch_insert(
        &self,
        cancel: &CancellationToken,
        label: &str,
        table: &TableName,
        cols: &[String],
    ) -> Result<BatchInsert> {
        let meta = self.dest_meta(table, cols).await?;
        let names: Vec<String> = meta.names().into_iter().map(String::from).collect();
        let options =
            BatchOptions::for_columns(self.driver.config(), self.pg_dialect(), names.len());

        self.guard.ensure_open(&self.source.handle)?;
        let loader =
            PgCopyLoader::connect(&self.location, self.pg_dialect(), table.clone(), &names).await?;

        let munge = self.dest_munge(&meta);
        Ok(BatchInsert::spawn(label, Box::new(loader), meta, munge, options, cancel))
    }

    async fn close(&self) -> Result<()> {
        self.guard
            .close_once(|| async {
                self.pool.close();
                tracing::info!(handle = %self.source.handle, "PostgreSQL grip closed");
                Ok(())
            })
            .await
    }

    fn is_closed(&self) -> bool {
        self.guard.is_closed()
    }
}

/// A prepared INSERT or UPDATE holding its pooled connection until closed
pub struct PostgresStmt {
    client: Object,
    stmt: Statement,
    meta: RecordMeta,
    munge: RowMungeFn,
    num_rows: usize,
}

#[async_trait]
impl StmtExecer for PostgresStmt {
    fn dest_meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn munge(&self, row: &mut [Value]) -> Result<()> {
        munge_rows(&self.munge, self.meta.len(), self.num_rows, row)
    }

    async fn exec(&self, args: &[Value]) -> Result<u64> {
        let params = values_for_types(args, self.stmt.params())?;
        self.client
            .execute(&self.stmt, &as_params(&params))
            .await
            .map_err(|e| wrap_err("execute statement", e))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        drop(self.client);
        Ok(())
    }
}
