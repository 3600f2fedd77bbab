//! Bulk loading into PostgreSQL with binary COPY
//!
//! Each batch is one `COPY ... FROM STDIN (FORMAT BINARY)` statement on a
//! connection owned by the loader. Dropping the writer before `finish`
//! aborts the COPY and nothing of the batch is committed.

use std::pin::Pin;

use async_trait::async_trait;
use polysql_core::{BulkLoader, Dialect, PolysqlError, Record, Result, TableName};
use postgres_types::Type;
use tokio_postgres::Client;
use tokio_postgres::binary_copy::BinaryCopyInWriter;

use crate::error::wrap_err;
use crate::types::{PgValue, as_params};
use crate::{PgLocation, PostgresTlsConnector};

pub struct PgCopyLoader {
    client: Client,
    table: TableName,
    copy_sql: String,
    types: Vec<Type>,
    writer: Option<Pin<Box<BinaryCopyInWriter>>>,
    pending: u64,
}

impl PgCopyLoader {
    /// Opens a dedicated connection and resolves the column types of
    /// `table`.
    pub async fn connect(
        location: &PgLocation,
        dialect: &Dialect,
        table: TableName,
        cols: &[String],
    ) -> Result<Self> {
        let client = connect_dedicated(location).await?;

        let target = table.render(dialect)?;
        let col_list = dialect.enquote_all(cols).join(", ");
        let probe = client
            .prepare(&format!("SELECT {} FROM {} LIMIT 0", col_list, target))
            .await
            .map_err(|e| wrap_err(format!("resolve columns of {}", table), e))?;
        let types = probe.columns().iter().map(|c| c.type_().clone()).collect();

        Ok(Self {
            client,
            copy_sql: format!(
                "COPY {} ({}) FROM STDIN (FORMAT BINARY)",
                target, col_list
            ),
            table,
            types,
            writer: None,
            pending: 0,
        })
    }

    fn writer(&mut self) -> Result<Pin<&mut BinaryCopyInWriter>> {
        match self.writer.as_mut() {
            Some(writer) => Ok(writer.as_mut()),
            None => Err(PolysqlError::generic(format!(
                "copy into {}: no batch in progress",
                self.table
            ))),
        }
    }
}

/// Connects outside the grip's pool and drives the connection on its own
/// task.
pub(crate) async fn connect_dedicated(location: &PgLocation) -> Result<Client> {
    let client = match PostgresTlsConnector::build(&location.tls)? {
        Some(tls) => {
            let (client, connection) = location
                .config
                .connect(tls)
                .await
                .map_err(|e| wrap_err("connect to PostgreSQL", e))?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::error!(error = %e, "PostgreSQL connection error");
                }
            });
            client
        }
        None => {
            let (client, connection) = location
                .config
                .connect(tokio_postgres::NoTls)
                .await
                .map_err(|e| wrap_err("connect to PostgreSQL", e))?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::error!(error = %e, "PostgreSQL connection error");
                }
            });
            client
        }
    };
    Ok(client)
}

#[async_trait]
impl BulkLoader for PgCopyLoader {
    async fn begin(&mut self) -> Result<()> {
        let sink = self
            .client
            .copy_in(&self.copy_sql)
            .await
            .map_err(|e| wrap_err(format!("start copy into {}", self.table), e))?;
        self.writer = Some(Box::pin(BinaryCopyInWriter::new(sink, &self.types)));
        self.pending = 0;
        Ok(())
    }

    async fn append(&mut self, record: Record) -> Result<()> {
        if record.len() != self.types.len() {
            return Err(PolysqlError::generic(format!(
                "copy into {}: record has {} values, expected {}",
                self.table,
                record.len(),
                self.types.len()
            )));
        }
        let values = record
            .iter()
            .zip(&self.types)
            .map(|(value, ty)| PgValue::for_type(value, ty))
            .collect::<Result<Vec<_>>>()?;

        let table = self.table.to_string();
        self.writer()?
            .write(&as_params(&values))
            .await
            .map_err(|e| wrap_err(format!("copy into {}", table), e))?;
        self.pending += 1;
        Ok(())
    }

    async fn submit(&mut self) -> Result<u64> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(0);
        };
        let written = writer
            .as_mut()
            .finish()
            .await
            .map_err(|e| wrap_err(format!("finish copy into {}", self.table), e))?;
        tracing::trace!(table = %self.table, rows = written, "postgres copy committed");
        self.pending = 0;
        Ok(written)
    }

    async fn abort(&mut self) -> Result<()> {
        if self.writer.take().is_some() {
            tracing::debug!(table = %self.table, discarded = self.pending, "postgres copy aborted");
        }
        self.pending = 0;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        drop(self.client);
        Ok(())
    }
}
