//! Concurrent batch inserts
//!
//! A [`BatchInsert`] handle owns one consumer task. The producer sends rows
//! through a bounded intake channel; the consumer appends them to a
//! driver-specific [`BulkLoader`] and submits each time a batch fills up.
//! The single outcome of the load arrives on a oneshot channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{Dialect, DriverConfig, PolysqlError, Record, RecordMeta, Result, RowMungeFn};

/// A driver's native bulk-load mechanism over a dedicated connection.
///
/// Calls arrive in the order `begin`, `append`..., then `submit` or
/// `abort`, repeated per batch, and finally `close`.
#[async_trait]
pub trait BulkLoader: Send {
    async fn begin(&mut self) -> Result<()>;

    async fn append(&mut self, record: Record) -> Result<()>;

    /// Commits the current batch, returning the number of rows written.
    async fn submit(&mut self) -> Result<u64>;

    /// Discards the current batch.
    async fn abort(&mut self) -> Result<()>;

    async fn close(self: Box<Self>) -> Result<()>;
}

/// Progress after a batch was submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress<'a> {
    pub label: &'a str,
    pub batches: u64,
    pub written: u64,
}

pub type BatchProgressFn = Arc<dyn Fn(BatchProgress<'_>) + Send + Sync>;

/// Sizing of a batch insert.
#[derive(Clone)]
pub struct BatchOptions {
    pub batch_rows: usize,
    pub queue_capacity: usize,
    pub progress: Option<BatchProgressFn>,
}

impl BatchOptions {
    pub fn new(batch_rows: usize, queue_capacity: usize) -> Self {
        Self {
            batch_rows: batch_rows.max(1),
            queue_capacity: queue_capacity.max(1),
            progress: None,
        }
    }

    /// Sizes batches so one batch binds at most the dialect's (or the
    /// configured) maximum number of values.
    pub fn for_columns(config: &DriverConfig, dialect: &Dialect, num_cols: usize) -> Self {
        let batch_rows = config.batch_rows(dialect, num_cols);
        Self::new(batch_rows, config.queue_capacity(batch_rows))
    }

    pub fn with_progress(mut self, progress: BatchProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }
}

impl std::fmt::Debug for BatchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOptions")
            .field("batch_rows", &self.batch_rows)
            .field("queue_capacity", &self.queue_capacity)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Handle to a running batch insert.
///
/// Dropping the handle before [`BatchInsert::finish`] cancels the load and
/// discards the batch in flight.
pub struct BatchInsert {
    label: String,
    dest_meta: RecordMeta,
    rec_tx: Option<mpsc::Sender<Record>>,
    err_rx: Option<oneshot::Receiver<Result<()>>>,
    written: Arc<AtomicU64>,
    munge: RowMungeFn,
    cancel: CancellationToken,
}

impl BatchInsert {
    /// Spawns the consumer task. It stops when `parent` is cancelled.
    pub fn spawn(
        label: impl Into<String>,
        loader: Box<dyn BulkLoader>,
        dest_meta: RecordMeta,
        munge: RowMungeFn,
        options: BatchOptions,
        parent: &CancellationToken,
    ) -> Self {
        let label = label.into();
        let cancel = parent.child_token();
        let written = Arc::new(AtomicU64::new(0));
        let (rec_tx, rec_rx) = mpsc::channel(options.queue_capacity.max(1));
        let (err_tx, err_rx) = oneshot::channel();

        tracing::debug!(
            label = %label,
            columns = dest_meta.len(),
            batch_rows = options.batch_rows,
            queue_capacity = options.queue_capacity,
            "starting batch insert"
        );

        let consumer = Consumer {
            label: label.clone(),
            rec_rx,
            batch_rows: options.batch_rows.max(1),
            written: written.clone(),
            cancel: cancel.clone(),
            progress: options.progress,
        };
        tokio::spawn(async move {
            let outcome = consumer.run(loader).await;
            // The receiver is gone when the handle was dropped.
            let _ = err_tx.send(outcome);
        });

        Self {
            label,
            dest_meta,
            rec_tx: Some(rec_tx),
            err_rx: Some(err_rx),
            written,
            munge,
            cancel,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Shape of the destination columns.
    pub fn dest_meta(&self) -> &RecordMeta {
        &self.dest_meta
    }

    /// Rows of successfully submitted batches so far.
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Acquire)
    }

    /// Converts a generic row into the destination shape in place.
    pub fn munge(&self, record: &mut Record) -> Result<()> {
        (self.munge)(record)
    }

    /// Intake sender for rows that are already munged.
    pub fn sender(&self) -> Result<mpsc::Sender<Record>> {
        self.rec_tx
            .clone()
            .ok_or_else(|| PolysqlError::Closed(format!("batch insert {}", self.label)))
    }

    /// Munges `record` and queues it, waiting while the intake is full.
    ///
    /// If the load has already terminated, its error is returned and the
    /// handle is finished.
    pub async fn send(&mut self, mut record: Record) -> Result<()> {
        self.munge(&mut record)?;
        let tx = self.sender()?;
        if tx.send(record).await.is_ok() {
            return Ok(());
        }

        match self.err_rx.take() {
            Some(err_rx) => match err_rx.await {
                Ok(Err(e)) => Err(e),
                Ok(Ok(())) | Err(_) => Err(PolysqlError::generic(format!(
                    "batch insert {} stopped accepting rows",
                    self.label
                ))),
            },
            None => Err(PolysqlError::Closed(format!("batch insert {}", self.label))),
        }
    }

    /// Closes the intake and waits for the outcome. Returns the number of
    /// rows written.
    pub async fn finish(mut self) -> Result<u64> {
        drop(self.rec_tx.take());
        let Some(err_rx) = self.err_rx.take() else {
            return Err(PolysqlError::Closed(format!("batch insert {}", self.label)));
        };

        let outcome = err_rx.await.unwrap_or_else(|_| {
            Err(PolysqlError::generic(format!(
                "batch insert {}: consumer task ended without an outcome",
                self.label
            )))
        });
        let written = self.written();
        match &outcome {
            Ok(()) => tracing::debug!(label = %self.label, rows = written, "batch insert finished"),
            Err(e) => tracing::warn!(
                label = %self.label,
                rows = written,
                error = %e,
                "batch insert failed"
            ),
        }
        outcome.map(|()| written)
    }

    /// Splits the handle into its raw intake sender and outcome receiver.
    /// The caller then owns termination: dropping the sender ends the load.
    pub fn into_parts(mut self) -> Result<(mpsc::Sender<Record>, oneshot::Receiver<Result<()>>)> {
        match (self.rec_tx.take(), self.err_rx.take()) {
            (Some(rec_tx), Some(err_rx)) => Ok((rec_tx, err_rx)),
            _ => Err(PolysqlError::Closed(format!("batch insert {}", self.label))),
        }
    }
}

impl Drop for BatchInsert {
    fn drop(&mut self) {
        if self.err_rx.is_some() {
            tracing::debug!(label = %self.label, "batch insert dropped unfinished, cancelling");
            self.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for BatchInsert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchInsert")
            .field("label", &self.label)
            .field("written", &self.written())
            .finish_non_exhaustive()
    }
}

struct Consumer {
    label: String,
    rec_rx: mpsc::Receiver<Record>,
    batch_rows: usize,
    written: Arc<AtomicU64>,
    cancel: CancellationToken,
    progress: Option<BatchProgressFn>,
}

impl Consumer {
    async fn run(mut self, mut loader: Box<dyn BulkLoader>) -> Result<()> {
        let mut in_batch = false;
        let outcome = self.consume(loader.as_mut(), &mut in_batch).await;

        if outcome.is_err() && in_batch {
            if let Err(e) = loader.abort().await {
                tracing::warn!(label = %self.label, error = %e, "failed to abort batch");
            }
        }
        let closed = loader.close().await;
        outcome.and(closed)
    }

    #[tracing::instrument(skip_all, fields(label = %self.label, batch_rows = self.batch_rows))]
    async fn consume(&mut self, loader: &mut dyn BulkLoader, in_batch: &mut bool) -> Result<()> {
        let mut pending = 0usize;
        let mut batches = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::debug!(pending, "batch insert cancelled");
                    return Err(PolysqlError::Cancelled(format!("batch insert {}", self.label)));
                }
                next = self.rec_rx.recv() => next,
            };

            let Some(record) = next else {
                if *in_batch {
                    self.submit(loader, &mut batches).await?;
                    *in_batch = false;
                }
                return Ok(());
            };

            if !*in_batch {
                loader.begin().await?;
                *in_batch = true;
            }
            loader.append(record).await?;
            pending += 1;

            if pending >= self.batch_rows {
                self.submit(loader, &mut batches).await?;
                *in_batch = false;
                pending = 0;
            }
        }
    }

    async fn submit(&self, loader: &mut dyn BulkLoader, batches: &mut u64) -> Result<()> {
        let rows = loader.submit().await?;
        *batches += 1;
        let written = self.written.fetch_add(rows, Ordering::AcqRel) + rows;
        tracing::trace!(batch = *batches, rows, written, "submitted batch");

        if let Some(progress) = &self.progress {
            progress(BatchProgress {
                label: &self.label,
                batches: *batches,
                written,
            });
        }
        Ok(())
    }
}
