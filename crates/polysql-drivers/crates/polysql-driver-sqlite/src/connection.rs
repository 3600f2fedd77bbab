//! SQLite grip implementation

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use polysql_core::{
    BatchInsert, BatchOptions, CancellationToken, CloseGuard, ColumnMetadata, ColumnTypeData,
    Dialect, Driver, Grip, Kind, PolysqlError, QueryOutput, RecordMeta, Result, RowMungeFn,
    Source, SourceMetadata, StmtExecer, TableDef, TableMetadata, TableName, TableType, Value,
    base_type_name, collect_tables, create_table_sql, insert_sql, munge_for_meta, munge_rows,
    parse_bool, parse_duration, update_sql,
};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params_from_iter};

use crate::error::wrap_err;
use crate::types::{rusqlite_to_value, value_ref_to_json, values_to_rusqlite};
use crate::{SqliteBulkLoader, SqliteDriver, db_type_for_kind, kind_from_decl_type};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const MEMORY_PATH: &str = ":memory:";

/// Pragmas reported as database properties.
const PROPERTY_PRAGMAS: &[&str] = &[
    "application_id",
    "auto_vacuum",
    "busy_timeout",
    "encoding",
    "foreign_keys",
    "journal_mode",
    "page_count",
    "page_size",
    "synchronous",
    "user_version",
];

/// Where and how to open a SQLite database.
#[derive(Debug, Clone)]
pub(crate) struct SqliteLocation {
    path: String,
    flags: OpenFlags,
    foreign_keys: bool,
    busy_timeout: Duration,
    journal_mode: Option<String>,
}

impl SqliteLocation {
    /// Accepts `sqlite3:///path/to.db?mode=ro`, a bare path, or `:memory:`.
    pub(crate) fn parse(source: &Source) -> Result<Self> {
        let raw = source.location.trim();
        let without_scheme = ["sqlite3://", "sqlite://"]
            .iter()
            .find_map(|scheme| raw.strip_prefix(scheme))
            .unwrap_or(raw);
        let path = without_scheme
            .split_once('?')
            .map_or(without_scheme, |(path, _)| path);
        if path.is_empty() {
            return Err(PolysqlError::Config(format!(
                "source {}: SQLite location has no path",
                source.handle
            )));
        }

        let mode = source.param("mode");
        let in_memory = path == MEMORY_PATH || mode.as_deref() == Some("memory");
        let access = match mode.as_deref() {
            Some("ro") => OpenFlags::SQLITE_OPEN_READ_ONLY,
            Some("rw") => OpenFlags::SQLITE_OPEN_READ_WRITE,
            _ => OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        };

        Ok(Self {
            path: if in_memory {
                MEMORY_PATH.to_string()
            } else {
                expand_path(path)?
            },
            flags: access | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            foreign_keys: source
                .param("foreign_keys")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(true),
            busy_timeout: source
                .param("busy_timeout")
                .and_then(|v| parse_duration(&v))
                .unwrap_or(DEFAULT_BUSY_TIMEOUT),
            journal_mode: source.param("journal_mode"),
        })
    }

    pub(crate) fn in_memory(&self) -> bool {
        self.path == MEMORY_PATH
    }

    pub(crate) fn open(&self) -> Result<Connection> {
        let conn = if self.in_memory() {
            Connection::open_in_memory().map_err(|e| wrap_err("open in-memory database", e))?
        } else {
            if self.flags.contains(OpenFlags::SQLITE_OPEN_CREATE)
                && let Some(parent) = Path::new(&self.path).parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                return Err(PolysqlError::Config(format!(
                    "parent directory does not exist: {}",
                    parent.display()
                )));
            }
            Connection::open_with_flags(&self.path, self.flags)
                .map_err(|e| wrap_err(format!("open SQLite database at {}", self.path), e))?
        };

        conn.pragma_update(None, "foreign_keys", if self.foreign_keys { "ON" } else { "OFF" })
            .map_err(|e| wrap_err("set foreign_keys", e))?;
        conn.busy_timeout(self.busy_timeout)
            .map_err(|e| wrap_err("set busy_timeout", e))?;
        if let Some(journal_mode) = &self.journal_mode {
            conn.pragma_update(None, "journal_mode", journal_mode.as_str())
                .map_err(|e| wrap_err("set journal_mode", e))?;
        }
        Ok(conn)
    }
}

/// Expands `~/` and makes relative paths absolute.
fn expand_path(path: &str) -> Result<String> {
    if path.starts_with("file:") {
        return Ok(path.to_string());
    }

    let expanded = if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .ok_or_else(|| PolysqlError::Config("unable to determine home directory".into()))?
            .join(rest)
    } else if path.starts_with('~') {
        return Err(PolysqlError::Config(
            "user-specific home directories (~user) are not supported".into(),
        ));
    } else {
        PathBuf::from(path)
    };

    let absolute = if expanded.is_relative() {
        std::env::current_dir()?.join(expanded)
    } else {
        expanded
    };
    Ok(absolute.to_string_lossy().to_string())
}

/// One row of `pragma_table_info`.
struct TableInfoRow {
    cid: i64,
    name: String,
    decl_type: String,
    not_null: bool,
    pk: i64,
    default_value: Option<String>,
}

/// Connection slot shared by a grip with its statements and, for in-memory
/// databases, its batch loaders. Emptied when the grip closes.
pub type SharedConnection = Arc<Mutex<Option<Connection>>>;

/// Runs `f` against the connection in `conn`, or fails with `Closed`
/// naming `handle` once the slot has been emptied.
pub(crate) fn with_shared<T>(
    conn: &SharedConnection,
    handle: &str,
    f: impl FnOnce(&Connection) -> Result<T>,
) -> Result<T> {
    let slot = conn.lock();
    let conn = slot
        .as_ref()
        .ok_or_else(|| PolysqlError::Closed(handle.to_string()))?;
    f(conn)
}

/// A live handle to one SQLite database
pub struct SqliteGrip {
    driver: Arc<SqliteDriver>,
    source: Source,
    location: SqliteLocation,
    conn: SharedConnection,
    guard: CloseGuard,
}

impl SqliteGrip {
    pub(crate) fn open(driver: Arc<SqliteDriver>, source: Source) -> Result<Self> {
        let location = SqliteLocation::parse(&source)?;
        tracing::info!(path = %location.path, "opening SQLite database");
        let conn = location.open()?;
        Ok(Self {
            driver,
            source,
            location,
            conn: Arc::new(Mutex::new(Some(conn))),
            guard: CloseGuard::new(),
        })
    }

    fn sqlite_dialect(&self) -> &'static Dialect {
        crate::sqlite_dialect()
    }

    /// Runs `f` against the connection unless the grip is closed.
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        self.guard.ensure_open(&self.source.handle)?;
        with_shared(&self.conn, &self.source.handle, f)
    }

    fn render(&self, table: &TableName) -> Result<String> {
        table.render(self.sqlite_dialect())
    }

    fn schema_of<'a>(&self, table: &'a TableName) -> Result<&'a str> {
        if table.catalog.is_some() {
            return Err(PolysqlError::Unsupported(
                "sqlite3: catalog-qualified table names".to_string(),
            ));
        }
        Ok(table.schema.as_deref().unwrap_or("main"))
    }

    fn exec_batch(&self, what: &str, sql: &str) -> Result<()> {
        tracing::debug!(sql = %sql, "{}", what);
        self.with_conn(|conn| conn.execute_batch(sql).map_err(|e| wrap_err(what, e)))
    }

    fn table_info(&self, table: &TableName) -> Result<Vec<TableInfoRow>> {
        let schema = self.schema_of(table)?;
        let rows = self.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT cid, name, type, \"notnull\", pk, dflt_value \
                     FROM pragma_table_info(?1, ?2) ORDER BY cid",
                )
                .map_err(|e| wrap_err("prepare table info", e))?;
            let rows = stmt
                .query_map([table.table.as_str(), schema], |row| {
                    Ok(TableInfoRow {
                        cid: row.get(0)?,
                        name: row.get(1)?,
                        decl_type: row.get(2)?,
                        not_null: row.get::<_, i64>(3)? != 0,
                        pk: row.get(4)?,
                        default_value: row.get(5)?,
                    })
                })
                .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
                .map_err(|e| wrap_err(format!("table info for {}", table), e))?;
            Ok(rows)
        })?;

        if rows.is_empty() {
            return Err(PolysqlError::not_exist(format!(
                "table {} does not exist",
                table
            )));
        }
        Ok(rows)
    }

    fn count_rows(&self, table: &TableName) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.render(table)?);
        self.with_conn(|conn| {
            conn.query_row(&sql, [], |row| row.get(0))
                .map_err(|e| wrap_err(format!("count rows of {}", table), e))
        })
    }

    /// Column types of `table`, all of them when `cols` is empty.
    fn column_types(&self, table: &TableName, cols: &[String]) -> Result<Vec<ColumnTypeData>> {
        let info = self.table_info(table)?;
        let to_col = |row: &TableInfoRow| {
            ColumnTypeData::new(row.name.clone(), row.decl_type.clone()).nullable(!row.not_null)
        };

        if cols.is_empty() {
            return Ok(info.iter().map(to_col).collect());
        }
        cols.iter()
            .map(|col| {
                info.iter().find(|row| &row.name == col).map(to_col).ok_or_else(|| {
                    PolysqlError::not_exist(format!(
                        "column {} does not exist in table {}",
                        col, table
                    ))
                })
            })
            .collect()
    }

    fn dest_meta(&self, table: &TableName, cols: &[String]) -> Result<RecordMeta> {
        let col_types = self.column_types(table, cols)?;
        Ok(self.driver.record_meta(&col_types))
    }

    fn dest_munge(&self, meta: &RecordMeta) -> RowMungeFn {
        munge_for_meta(meta, self.sqlite_dialect().int_bool)
    }
}

/// Assigns kinds to expression columns from the first non-null value.
fn refine_unknown_kinds(meta: RecordMeta, records: &[Vec<Value>]) -> RecordMeta {
    if !meta.kinds().contains(&Kind::Unknown) || records.is_empty() {
        return meta;
    }
    let fields = meta
        .fields()
        .iter()
        .enumerate()
        .map(|(idx, field)| {
            let mut field = field.clone();
            if field.kind == Kind::Unknown
                && let Some(value) = records
                    .iter()
                    .filter_map(|r| r.get(idx))
                    .find(|v| !v.is_null())
            {
                field.kind = value.kind();
                field.scan_type = polysql_core::ScanType::for_kind(field.kind);
            }
            field
        })
        .collect();
    RecordMeta::new(fields)
}

#[async_trait]
impl Grip for SqliteGrip {
    fn source(&self) -> &Source {
        &self.source
    }

    fn driver(&self) -> Arc<dyn Driver> {
        self.driver.clone()
    }

    fn dialect(&self) -> &'static Dialect {
        self.sqlite_dialect()
    }

    async fn ping(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(|e| wrap_err("ping", e))
        })
    }

    #[tracing::instrument(skip(self, sql, args), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query(&self, sql: &str, args: &[Value]) -> Result<QueryOutput> {
        let start_time = std::time::Instant::now();
        let output = self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql).map_err(|e| wrap_err("prepare query", e))?;

            let cols: Vec<ColumnTypeData> = stmt
                .columns()
                .iter()
                .map(|col| ColumnTypeData::new(col.name(), col.decl_type().unwrap_or("")))
                .collect();
            let meta = self.driver.record_meta(&cols);
            let kinds = meta.kinds();

            let params = values_to_rusqlite(args);
            let mut rows = stmt
                .query(params_from_iter(params.iter()))
                .map_err(|e| wrap_err("execute query", e))?;

            let mut records = Vec::new();
            while let Some(row) = rows.next().map_err(|e| wrap_err("fetch row", e))? {
                let mut record = Vec::with_capacity(kinds.len());
                for (idx, kind) in kinds.iter().enumerate() {
                    let value_ref = row.get_ref(idx).map_err(|e| wrap_err("read column", e))?;
                    record.push(rusqlite_to_value(value_ref, *kind));
                }
                records.push(record);
            }

            Ok(QueryOutput {
                meta: refine_unknown_kinds(meta, &records),
                records,
            })
        })?;

        tracing::debug!(
            row_count = output.records.len(),
            execution_time_ms = start_time.elapsed().as_millis() as u64,
            "query executed successfully"
        );
        Ok(output)
    }

    #[tracing::instrument(skip(self, sql, args), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn exec(&self, sql: &str, args: &[Value]) -> Result<u64> {
        let affected = self.with_conn(|conn| {
            let params = values_to_rusqlite(args);
            conn.execute(sql, params_from_iter(params.iter()))
                .map_err(|e| wrap_err("execute statement", e))
        })?;
        tracing::debug!(affected_rows = affected, "statement executed");
        Ok(affected as u64)
    }

    async fn current_catalog(&self) -> Result<String> {
        Err(PolysqlError::Unsupported(
            "sqlite3: catalogs".to_string(),
        ))
    }

    async fn current_schema(&self) -> Result<String> {
        self.guard.ensure_open(&self.source.handle)?;
        Ok("main".to_string())
    }

    async fn list_catalogs(&self) -> Result<Vec<String>> {
        Err(PolysqlError::Unsupported(
            "sqlite3: catalogs".to_string(),
        ))
    }

    async fn list_schemas(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT name FROM pragma_database_list ORDER BY seq")
                .map_err(|e| wrap_err("list schemas", e))?;
            stmt.query_map([], |row| row.get(0))
                .and_then(|rows| rows.collect::<rusqlite::Result<Vec<String>>>())
                .map_err(|e| wrap_err("list schemas", e))
        })
    }

    async fn list_table_names(
        &self,
        schema: Option<&str>,
        tables: bool,
        views: bool,
    ) -> Result<Vec<String>> {
        let mut types = Vec::with_capacity(2);
        if tables {
            types.push("'table'");
        }
        if views {
            types.push("'view'");
        }
        if types.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT name FROM {}.sqlite_master WHERE type IN ({}) \
             AND name NOT LIKE 'sqlite_%' ORDER BY name",
            (self.sqlite_dialect().enquote)(schema.unwrap_or("main")),
            types.join(", ")
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql).map_err(|e| wrap_err("list tables", e))?;
            stmt.query_map([], |row| row.get(0))
                .and_then(|rows| rows.collect::<rusqlite::Result<Vec<String>>>())
                .map_err(|e| wrap_err("list tables", e))
        })
    }

    async fn catalog_exists(&self, _catalog: &str) -> Result<bool> {
        Err(PolysqlError::Unsupported(
            "sqlite3: catalogs".to_string(),
        ))
    }

    async fn schema_exists(&self, schema: &str) -> Result<bool> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM pragma_database_list WHERE name = ?1",
                [schema],
                |row| row.get::<_, i64>(0),
            )
            .map(|count| count > 0)
            .map_err(|e| wrap_err("check schema", e))
        })
    }

    async fn table_exists(&self, table: &TableName) -> Result<bool> {
        let schema = self.schema_of(table)?;
        if !self.schema_exists(schema).await? {
            return Ok(false);
        }
        let sql = format!(
            "SELECT COUNT(*) FROM {}.sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
            (self.sqlite_dialect().enquote)(schema)
        );
        self.with_conn(|conn| {
            conn.query_row(&sql, [table.table.as_str()], |row| row.get::<_, i64>(0))
                .map(|count| count > 0)
                .map_err(|e| wrap_err("check table", e))
        })
    }

    async fn table_column_types(
        &self,
        table: &TableName,
        cols: &[String],
    ) -> Result<Vec<ColumnTypeData>> {
        self.column_types(table, cols)
    }

    #[tracing::instrument(skip(self), fields(handle = %self.source.handle))]
    async fn table_metadata(&self, table: &TableName) -> Result<TableMetadata> {
        let schema = self.schema_of(table)?;
        let master_sql = format!(
            "SELECT type FROM {}.sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
            (self.sqlite_dialect().enquote)(schema)
        );
        let db_table_type: String = self
            .with_conn(|conn| {
                conn.query_row(&master_sql, [table.table.as_str()], |row| row.get(0))
                    .optional()
                    .map_err(|e| wrap_err("read table type", e))
            })?
            .ok_or_else(|| PolysqlError::not_exist(format!("table {} does not exist", table)))?;

        let columns = self
            .table_info(table)?
            .into_iter()
            .map(|row| ColumnMetadata {
                position: row.cid + 1,
                primary_key: row.pk > 0,
                base_type: base_type_name(&row.decl_type).to_string(),
                kind: kind_from_decl_type(&row.decl_type),
                nullable: !row.not_null,
                default_value: row.default_value,
                comment: None,
                column_type: row.decl_type,
                name: row.name,
            })
            .collect();

        Ok(TableMetadata {
            name: table.table.clone(),
            fq_name: format!("{}.{}", schema, table.table),
            table_type: if db_table_type == "view" {
                TableType::View
            } else {
                TableType::Table
            },
            db_table_type,
            row_count: self.count_rows(table)?,
            size: None,
            comment: None,
            columns,
        })
    }

    #[tracing::instrument(skip(self), fields(handle = %self.source.handle))]
    async fn source_metadata(&self, no_schema: bool) -> Result<SourceMetadata> {
        let version: String = self.with_conn(|conn| {
            conn.query_row("SELECT sqlite_version()", [], |row| row.get(0))
                .map_err(|e| wrap_err("read SQLite version", e))
        })?;
        let (table_count, view_count): (i64, i64) = self.with_conn(|conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(type = 'table'), 0), COALESCE(SUM(type = 'view'), 0) \
                 FROM sqlite_master WHERE name NOT LIKE 'sqlite_%'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| wrap_err("count tables", e))
        })?;

        let tables = if no_schema {
            Vec::new()
        } else {
            let names: Vec<TableName> = self
                .list_table_names(None, true, true)
                .await?
                .into_iter()
                .map(|name| TableName::with_schema("main", name))
                .collect();
            collect_tables(self, &names).await
        };

        let (name, size) = if self.location.in_memory() {
            (MEMORY_PATH.to_string(), None)
        } else {
            let path = Path::new(&self.location.path);
            let name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_else(|| self.location.path.clone());
            let size = std::fs::metadata(path).ok().map(|m| m.len() as i64);
            (name, size)
        };

        Ok(SourceMetadata {
            handle: self.source.handle.clone(),
            location: self.source.redacted_location(),
            driver: self.source.driver.clone(),
            db_driver: "rusqlite".to_string(),
            db_product: format!("SQLite3 v{}", version),
            db_version: version,
            user: None,
            catalog: None,
            schema: Some("main".to_string()),
            fq_name: format!("{}.main", name),
            name,
            size,
            table_count: table_count as usize,
            view_count: view_count as usize,
            tables,
            db_properties: self.db_properties().await?,
        })
    }

    async fn db_properties(&self) -> Result<BTreeMap<String, serde_json::Value>> {
        self.with_conn(|conn| {
            let mut props = BTreeMap::new();
            for pragma in PROPERTY_PRAGMAS {
                let value = conn
                    .query_row(&format!("PRAGMA {}", pragma), [], |row| {
                        Ok(value_ref_to_json(row.get_ref(0)?))
                    })
                    .optional()
                    .map_err(|e| wrap_err(format!("read pragma {}", pragma), e))?;
                if let Some(value) = value {
                    props.insert(pragma.to_string(), value);
                }
            }
            Ok(props)
        })
    }

    #[tracing::instrument(skip(self, def), fields(handle = %self.source.handle, table = %def.name))]
    async fn create_table(&self, def: &TableDef) -> Result<()> {
        let sql = create_table_sql(self.sqlite_dialect(), def, db_type_for_kind)?;
        self.exec_batch("create table", &sql)?;
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
        self.exec_batch("drop table", &sql)
    }

    async fn create_schema(&self, schema: &str) -> Result<()> {
        Err(PolysqlError::Unsupported(format!(
            "sqlite3: create schema {}; attach a database file instead",
            schema
        )))
    }

    async fn drop_schema(&self, schema: &str, _cascade: bool) -> Result<()> {
        Err(PolysqlError::Unsupported(format!(
            "sqlite3: drop schema {}; detach the database instead",
            schema
        )))
    }

    #[tracing::instrument(skip(self), fields(handle = %self.source.handle))]
    async fn alter_table_rename(&self, table: &TableName, new_name: &str) -> Result<()> {
        let sql = format!(
            "ALTER TABLE {} RENAME TO {}",
            self.render(table)?,
            (self.sqlite_dialect().enquote)(new_name)
        );
        self.exec_batch("rename table", &sql)
    }

    #[tracing::instrument(skip(self), fields(handle = %self.source.handle))]
    async fn alter_table_add_column(&self, table: &TableName, col: &str, kind: Kind) -> Result<()> {
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            self.render(table)?,
            (self.sqlite_dialect().enquote)(col),
            db_type_for_kind(kind)
        );
        self.exec_batch("add column", &sql)
    }

    #[tracing::instrument(skip(self), fields(handle = %self.source.handle))]
    async fn alter_table_rename_column(
        &self,
        table: &TableName,
        col: &str,
        new_name: &str,
    ) -> Result<()> {
        let enquote = self.sqlite_dialect().enquote;
        let sql = format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            self.render(table)?,
            enquote(col),
            enquote(new_name)
        );
        self.exec_batch("rename column", &sql)
    }

    /// SQLite cannot change a column's type in place, so the table is
    /// rebuilt in one transaction. Constraints other than NOT NULL and the
    /// primary key are not carried over.
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

        let info = self.table_info(table)?;
        if let Some(missing) = cols.iter().find(|c| !info.iter().any(|row| &row.name == *c)) {
            return Err(PolysqlError::not_exist(format!(
                "column {} does not exist in table {}",
                missing, table
            )));
        }

        let enquote = self.sqlite_dialect().enquote;
        let mut col_defs: Vec<String> = info
            .iter()
            .map(|row| {
                let db_type = match cols.iter().position(|c| c == &row.name) {
                    Some(idx) => db_type_for_kind(kinds[idx]).to_string(),
                    None => row.decl_type.clone(),
                };
                let not_null = if row.not_null { " NOT NULL" } else { "" };
                format!("{} {}{}", enquote(&row.name), db_type, not_null)
            })
            .collect();

        let mut pk_rows: Vec<&TableInfoRow> = info.iter().filter(|row| row.pk > 0).collect();
        pk_rows.sort_by_key(|row| row.pk);
        if !pk_rows.is_empty() {
            let pk_cols: Vec<String> = pk_rows.iter().map(|row| enquote(&row.name)).collect();
            col_defs.push(format!("PRIMARY KEY ({})", pk_cols.join(", ")));
        }

        let tmp = TableName {
            catalog: None,
            schema: table.schema.clone(),
            table: format!("{}__rebuild", table.table),
        };
        let all_cols: Vec<String> = info.iter().map(|row| enquote(&row.name)).collect();
        let all_cols = all_cols.join(", ");
        let original = self.render(table)?;
        let rebuilt = self.render(&tmp)?;

        let sql = format!(
            "CREATE TABLE {rebuilt} ({defs}); \
             INSERT INTO {rebuilt} ({all_cols}) SELECT {all_cols} FROM {original}; \
             DROP TABLE {original}; \
             ALTER TABLE {rebuilt} RENAME TO {name};",
            defs = col_defs.join(", "),
            name = enquote(&table.table),
        );

        self.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| wrap_err("begin table rebuild", e))?;
            tx.execute_batch(&sql)
                .map_err(|e| wrap_err(format!("rebuild {}", table), e))?;
            tx.commit().map_err(|e| wrap_err("commit table rebuild", e))
        })?;
        tracing::info!(columns = cols.len(), "column kinds altered");
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(handle = %self.source.handle))]
    async fn truncate(&self, table: &TableName, reset_seq: bool) -> Result<u64> {
        let schema = (self.sqlite_dialect().enquote)(self.schema_of(table)?);
        let delete_sql = format!("DELETE FROM {}", self.render(table)?);
        let affected = self.with_conn(|conn| {
            let affected = conn
                .execute(&delete_sql, [])
                .map_err(|e| wrap_err(format!("truncate {}", table), e))?;

            if reset_seq {
                let has_sequence: i64 = conn
                    .query_row(
                        &format!(
                            "SELECT COUNT(*) FROM {}.sqlite_master WHERE name = 'sqlite_sequence'",
                            schema
                        ),
                        [],
                        |row| row.get(0),
                    )
                    .map_err(|e| wrap_err("check sqlite_sequence", e))?;
                if has_sequence > 0 {
                    conn.execute(
                        &format!("DELETE FROM {}.sqlite_sequence WHERE name = ?1", schema),
                        [table.table.as_str()],
                    )
                    .map_err(|e| wrap_err("reset sequence", e))?;
                }
            }
            Ok(affected as u64)
        })?;

        tracing::info!(rows = affected, "table truncated");
        Ok(affected)
    }

    #[tracing::instrument(skip(self), fields(handle = %self.source.handle))]
    async fn copy_table(&self, from: &TableName, to: &TableName, copy_data: bool) -> Result<u64> {
        let sql = format!(
            "CREATE TABLE {} AS SELECT * FROM {}{}",
            self.render(to)?,
            self.render(from)?,
            if copy_data { "" } else { " WHERE 0" }
        );
        self.exec_batch("copy table", &sql)?;

        let copied = if copy_data {
            self.count_rows(to)? as u64
        } else {
            0
        };
        tracing::info!(rows = copied, "table copied");
        Ok(copied)
    }

    async fn prepare_insert_stmt(
        &self,
        table: &TableName,
        cols: &[String],
        num_rows: usize,
    ) -> Result<Box<dyn StmtExecer>> {
        let meta = self.dest_meta(table, cols)?;
        let names: Vec<String> = meta.names().into_iter().map(String::from).collect();
        let sql = insert_sql(self.sqlite_dialect(), table, &names, num_rows)?;
        let munge = self.dest_munge(&meta);
        SqliteStmt::prepare(self, sql, meta, munge, num_rows)
    }

    async fn prepare_update_stmt(
        &self,
        table: &TableName,
        cols: &[String],
        where_clause: Option<&str>,
    ) -> Result<Box<dyn StmtExecer>> {
        let meta = self.dest_meta(table, cols)?;
        let names: Vec<String> = meta.names().into_iter().map(String::from).collect();
        let sql = update_sql(self.sqlite_dialect(), table, &names, where_clause)?;
        let munge = self.dest_munge(&meta);
        SqliteStmt::prepare(self, sql, meta, munge, 1)
    }

    #[tracing::instrument(skip(self, cancel), fields(handle = %self.source.handle))]
    async fn new_batch_insert(
        &self,
        cancel: &CancellationToken,
        label: &str,
        table: &TableName,
        cols: &[String],
    ) -> Result<BatchInsert> {
        let meta = self.dest_meta(table, cols)?;
        let names: Vec<String> = meta.names().into_iter().map(String::from).collect();
        let options =
            BatchOptions::for_columns(self.driver.config(), self.sqlite_dialect(), names.len());

        self.guard.ensure_open(&self.source.handle)?;
        let conn = if self.location.in_memory() {
            self.conn.clone()
        } else {
            Arc::new(Mutex::new(Some(self.location.open()?)))
        };
        let loader = SqliteBulkLoader::new(
            conn,
            self.sqlite_dialect(),
            table.clone(),
            names,
            options.batch_rows,
        );

        let munge = self.dest_munge(&meta);
        Ok(BatchInsert::spawn(label, Box::new(loader), meta, munge, options, cancel))
    }

    async fn close(&self) -> Result<()> {
        self.guard
            .close_once(|| async {
                let taken = self.conn.lock().take();
                let closed = match taken {
                    Some(conn) => conn
                        .close()
                        .map_err(|(_, e)| wrap_err("close SQLite database", e)),
                    None => Ok(()),
                };
                tracing::info!(handle = %self.source.handle, "SQLite grip closed");
                closed
            })
            .await
    }

    fn is_closed(&self) -> bool {
        self.guard.is_closed()
    }
}

/// A prepared INSERT or UPDATE on a SQLite table
pub struct SqliteStmt {
    conn: SharedConnection,
    handle: String,
    sql: String,
    meta: RecordMeta,
    munge: RowMungeFn,
    num_rows: usize,
}

impl SqliteStmt {
    fn prepare(
        grip: &SqliteGrip,
        sql: String,
        meta: RecordMeta,
        munge: RowMungeFn,
        num_rows: usize,
    ) -> Result<Box<dyn StmtExecer>> {
        grip.with_conn(|conn| {
            conn.prepare_cached(&sql)
                .map(|_| ())
                .map_err(|e| wrap_err("prepare statement", e))
        })?;
        Ok(Box::new(Self {
            conn: grip.conn.clone(),
            handle: grip.source.handle.clone(),
            sql,
            meta,
            munge,
            num_rows,
        }))
    }
}

#[async_trait]
impl StmtExecer for SqliteStmt {
    fn dest_meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn munge(&self, row: &mut [Value]) -> Result<()> {
        munge_rows(&self.munge, self.meta.len(), self.num_rows, row)
    }

    async fn exec(&self, args: &[Value]) -> Result<u64> {
        let params = values_to_rusqlite(args);
        let affected = with_shared(&self.conn, &self.handle, |conn| {
            let mut stmt = conn
                .prepare_cached(&self.sql)
                .map_err(|e| wrap_err("prepare statement", e))?;
            stmt.execute(params_from_iter(params.iter()))
                .map_err(|e| wrap_err("execute statement", e))
        })?;
        Ok(affected as u64)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
