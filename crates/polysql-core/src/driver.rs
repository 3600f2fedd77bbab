//! The capability contract every database backend implements

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::{
    BatchInsert, ColumnTypeData, ConnParam, Dialect, DriverConfig, DriverType, Kind,
    PolysqlError, QueryOutput, RecordMeta, Result, Source, SourceMetadata, TableDef,
    TableMetadata, TableName, Value, validate_conn_params,
};

/// Static description of a driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverMetadata {
    #[serde(rename = "type")]
    pub driver_type: DriverType,
    pub description: String,
    pub doc: String,
    /// Whether the engine speaks SQL.
    pub is_sql: bool,
}

/// A database driver: a stateless factory for [`Grip`]s.
#[async_trait]
pub trait Driver: Send + Sync {
    fn driver_type(&self) -> DriverType;

    fn metadata(&self) -> DriverMetadata;

    /// The dialect shared by every grip of this driver.
    fn dialect(&self) -> &'static Dialect;

    fn config(&self) -> &DriverConfig;

    /// Connection parameters this driver accepts in a source location.
    fn conn_params(&self) -> &'static [ConnParam];

    /// Checks that `source` belongs to this driver and that its parameters
    /// are understood.
    fn validate_source(&self, source: &Source) -> Result<()> {
        source.validate()?;
        if source.driver != self.driver_type() {
            return Err(PolysqlError::Config(format!(
                "source {} has driver type {}, not {}",
                source.handle,
                source.driver,
                self.driver_type()
            )));
        }
        validate_conn_params(source, self.conn_params())
    }

    /// Opens a live handle to `source`.
    async fn open(&self, source: &Source) -> Result<Arc<dyn Grip>>;

    /// Opens, pings and closes a handle to `source`.
    async fn ping(&self, source: &Source) -> Result<()> {
        let grip = self.open(source).await?;
        let pinged = grip.ping().await;
        grip.close().await?;
        pinged
    }

    /// Maps a native type name to a kind. Unrecognized names map to
    /// `Kind::Unknown`.
    fn kind_from_db_type(&self, db_type: &str) -> Kind;

    /// Native DDL type used to create a column of `kind`.
    fn db_type_for_kind(&self, kind: Kind) -> &'static str;

    fn record_meta(&self, cols: &[ColumnTypeData]) -> RecordMeta {
        RecordMeta::from_column_types(cols, |db_type| self.kind_from_db_type(db_type))
    }
}

/// A live handle to one source. Owns its connection pool.
///
/// After [`Grip::close`], every operation fails with `PolysqlError::Closed`.
#[async_trait]
pub trait Grip: Send + Sync {
    fn source(&self) -> &Source;

    fn driver(&self) -> Arc<dyn Driver>;

    fn dialect(&self) -> &'static Dialect {
        self.driver().dialect()
    }

    async fn ping(&self) -> Result<()>;

    /// Runs a statement returning rows.
    async fn query(&self, sql: &str, args: &[Value]) -> Result<QueryOutput>;

    /// Runs a statement, returning the number of affected rows.
    async fn exec(&self, sql: &str, args: &[Value]) -> Result<u64>;

    // Metadata

    async fn current_catalog(&self) -> Result<String>;

    async fn current_schema(&self) -> Result<String>;

    async fn list_catalogs(&self) -> Result<Vec<String>>;

    async fn list_schemas(&self) -> Result<Vec<String>>;

    /// Names of tables and/or views in `schema`, or the current schema.
    async fn list_table_names(
        &self,
        schema: Option<&str>,
        tables: bool,
        views: bool,
    ) -> Result<Vec<String>>;

    async fn catalog_exists(&self, catalog: &str) -> Result<bool>;

    async fn schema_exists(&self, schema: &str) -> Result<bool>;

    async fn table_exists(&self, table: &TableName) -> Result<bool>;

    /// Native column types of `table`, restricted to `cols` in that order
    /// when non-empty. A missing table or column is `NotExist`.
    async fn table_column_types(
        &self,
        table: &TableName,
        cols: &[String],
    ) -> Result<Vec<ColumnTypeData>>;

    async fn table_metadata(&self, table: &TableName) -> Result<TableMetadata>;

    /// Metadata for the whole source. With `no_schema`, table details are
    /// left out.
    async fn source_metadata(&self, no_schema: bool) -> Result<SourceMetadata>;

    async fn db_properties(&self) -> Result<BTreeMap<String, serde_json::Value>>;

    // DDL

    async fn create_table(&self, def: &TableDef) -> Result<()>;

    async fn drop_table(&self, table: &TableName, if_exists: bool) -> Result<()>;

    async fn create_schema(&self, schema: &str) -> Result<()>;

    async fn drop_schema(&self, schema: &str, cascade: bool) -> Result<()>;

    async fn alter_table_rename(&self, table: &TableName, new_name: &str) -> Result<()>;

    async fn alter_table_add_column(&self, table: &TableName, col: &str, kind: Kind)
    -> Result<()>;

    async fn alter_table_rename_column(
        &self,
        table: &TableName,
        col: &str,
        new_name: &str,
    ) -> Result<()>;

    /// Changes the kind of each of `cols` to the matching entry of `kinds`.
    async fn alter_table_column_kinds(
        &self,
        table: &TableName,
        cols: &[String],
        kinds: &[Kind],
    ) -> Result<()>;

    /// Deletes every row, returning how many were removed. With `reset_seq`,
    /// identity sequences restart.
    async fn truncate(&self, table: &TableName, reset_seq: bool) -> Result<u64>;

    /// Creates `to` with the shape of `from`, copying rows when `copy_data`.
    /// Returns the number of rows copied.
    async fn copy_table(&self, from: &TableName, to: &TableName, copy_data: bool) -> Result<u64>;

    // Statements

    /// Prepares an insert of `num_rows` rows into `cols` of `table`.
    async fn prepare_insert_stmt(
        &self,
        table: &TableName,
        cols: &[String],
        num_rows: usize,
    ) -> Result<Box<dyn StmtExecer>>;

    /// Prepares an update of `cols`. Parameters of `where_clause` follow the
    /// column parameters.
    async fn prepare_update_stmt(
        &self,
        table: &TableName,
        cols: &[String],
        where_clause: Option<&str>,
    ) -> Result<Box<dyn StmtExecer>>;

    /// Starts a concurrent bulk load into `cols` of `table`.
    async fn new_batch_insert(
        &self,
        cancel: &CancellationToken,
        label: &str,
        table: &TableName,
        cols: &[String],
    ) -> Result<BatchInsert>;

    /// Releases the handle. Only the first call has effect; later calls
    /// return the same outcome.
    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// A prepared statement bound to a destination table.
#[async_trait]
pub trait StmtExecer: Send + Sync {
    /// Shape of the destination columns, in parameter order.
    fn dest_meta(&self) -> &RecordMeta;

    /// Converts a generic row into the shape the statement binds.
    fn munge(&self, row: &mut [Value]) -> Result<()>;

    async fn exec(&self, args: &[Value]) -> Result<u64>;

    async fn close(self: Box<Self>) -> Result<()>;
}

/// Tracks the open/closed state of a grip and caches its close outcome.
#[derive(Debug, Default)]
pub struct CloseGuard {
    closed: AtomicBool,
    outcome: OnceCell<std::result::Result<(), String>>,
}

impl CloseGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Fails with `Closed` once the guarded handle has been closed.
    pub fn ensure_open(&self, handle: &str) -> Result<()> {
        if self.is_closed() {
            return Err(PolysqlError::Closed(handle.to_string()));
        }
        Ok(())
    }

    /// Runs `close` on the first call only. Every call returns its outcome.
    pub async fn close_once<F, Fut>(&self, close: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.closed.store(true, Ordering::Release);
        self.outcome
            .get_or_init(|| async { close().await.map_err(|e| e.to_string()) })
            .await
            .clone()
            .map_err(|message| PolysqlError::generic(message))
    }
}
