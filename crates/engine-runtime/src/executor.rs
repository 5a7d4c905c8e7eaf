use crate::error::MigrationError;
use connectors::{source::SourceReader, target::router::ConnectionRouter};
use engine_config::config::{InsertMode, MigrationConfig};
use engine_core::{
    checkpoint::CheckpointStore,
    encode::{CsvDialect, RowEncoder},
    error::{EncodeError, SinkError},
    metrics::Counters,
    sink::{EncodedRow, Sink, copy::StreamCopySink, insert::BatchInsertSink},
};
use futures::StreamExt;
use model::{
    core::row::Row,
    migration::{partition::PartitionDescriptor, status::PartitionStatus},
};
use std::sync::Arc;
use tokio_postgres::{Client, Transaction};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, Default)]
pub struct PartitionOutcome {
    pub rows_read: u64,
    pub rows_written: u64,
    pub rows_skipped: u64,
    pub rows_skipped_duplicates: u64,
}

#[derive(Debug, Default)]
struct Progress {
    read: u64,
    skipped: u64,
}

pub(crate) fn sink_mode_label(config: &MigrationConfig) -> &'static str {
    match (config.insert.mode, config.copy.replace) {
        (InsertMode::Insert, _) => "INSERT",
        (InsertMode::Copy, true) => "COPY+REPLACE",
        (InsertMode::Copy, false) => "COPY",
    }
}

/// Runs one partition end-to-end: one routed connection, one transaction,
/// one sink, checkpoint bookkeeping around it. Owned by exactly one worker;
/// parallelism lives across partitions, never inside one.
pub struct PartitionExecutor {
    pub(crate) config: Arc<MigrationConfig>,
    pub(crate) source: Arc<dyn SourceReader>,
    pub(crate) router: Arc<ConnectionRouter>,
    pub(crate) checkpoint: Arc<dyn CheckpointStore>,
    pub(crate) encoder: Arc<RowEncoder>,
    pub(crate) pk_columns: Arc<Vec<String>>,
    pub(crate) counters: Counters,
    pub(crate) cancel: CancellationToken,
    pub(crate) checkpoint_table: String,
    pub(crate) run_id: i64,
}

impl PartitionExecutor {
    pub async fn run(
        &self,
        descriptor: PartitionDescriptor,
    ) -> Result<PartitionOutcome, MigrationError> {
        let partition_id = descriptor.partition_id;
        info!(
            partition_id,
            token_min = descriptor.token_min,
            token_max = descriptor.token_max,
            "Partition started"
        );

        self.update_checkpoint(&descriptor, PartitionStatus::Started, None)
            .await;

        let mut progress = Progress::default();
        let result = self.attempt(&descriptor, &mut progress).await;

        match result {
            Ok(outcome) => {
                self.counters.add_rows_written(outcome.rows_written);
                self.counters
                    .add_rows_skipped_duplicates(outcome.rows_skipped_duplicates);
                self.counters.partition_completed();

                let summary = format!(
                    "rows_read={}, rows_written={}, rows_skipped={}, duplicates={}, mode={}",
                    outcome.rows_read,
                    outcome.rows_written,
                    outcome.rows_skipped,
                    outcome.rows_skipped_duplicates,
                    sink_mode_label(&self.config),
                );
                self.update_checkpoint(&descriptor, PartitionStatus::Pass, Some(&summary))
                    .await;
                info!(
                    partition_id,
                    rows_read = outcome.rows_read,
                    rows_written = outcome.rows_written,
                    rows_skipped = outcome.rows_skipped,
                    "Partition committed"
                );
                Ok(outcome)
            }
            Err(err) => {
                // Everything read into the rolled-back transaction is lost
                // to this run; it stays pending for a resume.
                self.counters
                    .add_rows_lost(progress.read.saturating_sub(progress.skipped));
                self.counters.partition_failed();

                let mut message = format!(
                    "rows_read={}, rows_skipped={}: {err}",
                    progress.read, progress.skipped
                );
                if err.is_constraint_violation() {
                    message.push_str(
                        "; duplicate key on a non-idempotent sink: resume with \
                         copy.replace=true or insert.mode=INSERT",
                    );
                }
                error!(partition_id, rows_read = progress.read, %err, "Partition failed");
                self.update_checkpoint(&descriptor, PartitionStatus::Fail, Some(&message))
                    .await;
                Err(err)
            }
        }
    }

    async fn attempt(
        &self,
        descriptor: &PartitionDescriptor,
        progress: &mut Progress,
    ) -> Result<PartitionOutcome, MigrationError> {
        let mut conn = self.router.open(descriptor.partition_id).await?;
        // The connection drops (and closes) on every path out of here.
        self.run_transaction(descriptor, &mut conn.client, progress)
            .await
    }

    async fn run_transaction(
        &self,
        descriptor: &PartitionDescriptor,
        client: &mut Client,
        progress: &mut Progress,
    ) -> Result<PartitionOutcome, MigrationError> {
        let tx = client.transaction().await.map_err(SinkError::from)?;
        let mut sink = self.build_sink(&tx);

        let driven = self.drive_sink(descriptor, sink.as_mut(), progress).await;

        match driven {
            Ok((rows_written, rows_skipped_duplicates)) => {
                drop(sink);
                tx.commit().await.map_err(SinkError::from)?;
                Ok(PartitionOutcome {
                    rows_read: progress.read,
                    rows_written,
                    rows_skipped: progress.skipped,
                    rows_skipped_duplicates,
                })
            }
            Err(err) => {
                sink.cancel().await;
                drop(sink);
                if let Err(rollback_err) = tx.rollback().await {
                    debug!(%rollback_err, "Rollback after partition failure");
                }
                Err(err)
            }
        }
    }

    /// start → drain the reader → end. Returns the committed row count and
    /// duplicate skips; any error leaves rollback/cancel to the caller.
    async fn drive_sink(
        &self,
        descriptor: &PartitionDescriptor,
        sink: &mut dyn Sink,
        progress: &mut Progress,
    ) -> Result<(u64, u64), MigrationError> {
        sink.start().await?;

        let mut stream = self.source.read(descriptor).await?;
        let mut since_checkpoint: u64 = 0;

        while let Some(item) = stream.next().await {
            if self.cancel.is_cancelled() {
                return Err(MigrationError::Cancelled);
            }

            let row = item?;
            progress.read += 1;
            self.counters.add_rows_read(1);

            match self.encode(&row) {
                Ok(encoded) => {
                    sink.add_row(encoded).await?;
                    since_checkpoint += 1;
                    if since_checkpoint >= self.config.checkpoint.interval {
                        since_checkpoint = 0;
                        let note = format!(
                            "rows_written={}, rows_skipped={}",
                            progress.read - progress.skipped,
                            progress.skipped
                        );
                        self.update_checkpoint(descriptor, PartitionStatus::Started, Some(&note))
                            .await;
                    }
                }
                Err(err) => {
                    // Poison rows must not kill the partition; they are
                    // observable through the counter.
                    progress.skipped += 1;
                    self.counters.add_rows_skipped(1);
                    debug!(partition_id = descriptor.partition_id, %err, "Skipping row");
                }
            }
        }
        drop(stream);

        let rows_written = sink.end().await?;
        Ok((rows_written, sink.rows_skipped_duplicates()))
    }

    fn build_sink<'t>(&self, tx: &'t Transaction<'t>) -> Box<dyn Sink + 't> {
        let columns = self.encoder.columns().names();
        let table = &self.config.table;
        match self.config.insert.mode {
            InsertMode::Copy => {
                let dialect = CsvDialect {
                    delimiter: self.config.copy.delimiter,
                    quote: self.config.copy.quote,
                };
                Box::new(StreamCopySink::new(
                    tx,
                    &table.target_schema,
                    &table.target_table,
                    columns,
                    &dialect,
                    self.config.copy.replace,
                    self.config.copy.flush_every,
                    self.config.copy.buffer_size,
                ))
            }
            InsertMode::Insert => Box::new(BatchInsertSink::new(
                tx,
                &table.target_schema,
                &table.target_table,
                columns,
                &self.pk_columns,
                self.config.insert.batch_size,
            )),
        }
    }

    fn encode(&self, row: &Row) -> Result<EncodedRow, EncodeError> {
        match self.config.insert.mode {
            InsertMode::Copy => self.encoder.encode_csv(row).map(EncodedRow::CsvLine),
            InsertMode::Insert => self.encoder.encode_params(row).map(EncodedRow::Params),
        }
    }

    async fn update_checkpoint(
        &self,
        descriptor: &PartitionDescriptor,
        status: PartitionStatus,
        run_info: Option<&str>,
    ) {
        self.checkpoint
            .update_run(
                &self.checkpoint_table,
                self.run_id,
                descriptor.token_min,
                descriptor.partition_id,
                status,
                run_info,
            )
            .await;
    }
}
