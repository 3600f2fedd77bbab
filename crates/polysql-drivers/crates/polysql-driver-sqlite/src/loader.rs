//! Bulk loading into SQLite
//!
//! Rows of a batch are buffered and written by one multi-row INSERT inside
//! a single transaction at submit time.

use async_trait::async_trait;
use polysql_core::{BulkLoader, Dialect, PolysqlError, Record, Result, TableName, insert_sql};
use rusqlite::params_from_iter;

use crate::SharedConnection;
use crate::connection::with_shared;
use crate::error::wrap_err;
use crate::types::value_to_rusqlite;

/// Loader owning a dedicated connection, or sharing the grip's connection
/// for in-memory databases.
pub struct SqliteBulkLoader {
    conn: SharedConnection,
    dialect: &'static Dialect,
    table: TableName,
    cols: Vec<String>,
    rows: Vec<Record>,
}

impl SqliteBulkLoader {
    pub fn new(
        conn: SharedConnection,
        dialect: &'static Dialect,
        table: TableName,
        cols: Vec<String>,
        batch_rows: usize,
    ) -> Self {
        Self {
            conn,
            dialect,
            table,
            cols,
            rows: Vec::with_capacity(batch_rows),
        }
    }
}

#[async_trait]
impl BulkLoader for SqliteBulkLoader {
    async fn begin(&mut self) -> Result<()> {
        self.rows.clear();
        Ok(())
    }

    async fn append(&mut self, record: Record) -> Result<()> {
        if record.len() != self.cols.len() {
            return Err(PolysqlError::generic(format!(
                "insert into {}: record has {} values, expected {}",
                self.table,
                record.len(),
                self.cols.len()
            )));
        }
        self.rows.push(record);
        Ok(())
    }

    async fn submit(&mut self) -> Result<u64> {
        if self.rows.is_empty() {
            return Ok(0);
        }

        let sql = insert_sql(self.dialect, &self.table, &self.cols, self.rows.len())?;
        let params: Vec<rusqlite::types::Value> = self
            .rows
            .drain(..)
            .flatten()
            .map(|value| value_to_rusqlite(&value))
            .collect();

        let table = &self.table;
        let affected = with_shared(&self.conn, &table.to_string(), |conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| wrap_err("begin batch transaction", e))?;
            let affected = {
                let mut stmt = tx
                    .prepare_cached(&sql)
                    .map_err(|e| wrap_err(format!("prepare insert into {}", table), e))?;
                stmt.execute(params_from_iter(params.iter()))
                    .map_err(|e| wrap_err(format!("insert into {}", table), e))?
            };
            tx.commit()
                .map_err(|e| wrap_err("commit batch transaction", e))?;
            Ok(affected)
        })?;

        tracing::trace!(table = %self.table, rows = affected, "sqlite batch committed");
        Ok(affected as u64)
    }

    async fn abort(&mut self) -> Result<()> {
        tracing::debug!(table = %self.table, discarded = self.rows.len(), "sqlite batch aborted");
        self.rows.clear();
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
