use crate::{
    error::MigrationError,
    executor::{PartitionExecutor, sink_mode_label},
    planner::plan_split_size,
    validation::{ValidationReport, validate_counters},
};
use chrono::Utc;
use connectors::{
    source::{SourceReader, SplitHint},
    target::{pk::discover_primary_key, router::ConnectionRouter},
};
use engine_config::config::{InsertMode, MigrationConfig};
use engine_core::{
    checkpoint::CheckpointStore,
    encode::{CsvDialect, RowEncoder, TargetColumns, constants::parse_constant},
    error::SinkError,
    metrics::{Counters, CountersSnapshot},
    sink::quote_ident,
};
use model::migration::partition::PartitionDescriptor;
use std::{collections::HashSet, sync::Arc};
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: i64,
    pub partitions_total: usize,
    pub snapshot: CountersSnapshot,
    pub validation: Option<ValidationReport>,
    pub succeeded: bool,
}

/// Top-level orchestrator: planner → checkpoint init → partition fan-out →
/// counter validation → run finalization. A partition failure is counted,
/// never fatal mid-run; the final exit depends on `partitions_failed` and
/// the validation verdict.
pub struct MigrationCoordinator {
    config: Arc<MigrationConfig>,
    source: Arc<dyn SourceReader>,
    router: Arc<ConnectionRouter>,
    checkpoint: Arc<dyn CheckpointStore>,
    counters: Counters,
    cancel: tokio_util::sync::CancellationToken,
}

impl MigrationCoordinator {
    pub fn new(
        config: Arc<MigrationConfig>,
        source: Arc<dyn SourceReader>,
        router: Arc<ConnectionRouter>,
        checkpoint: Arc<dyn CheckpointStore>,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Self {
        Self {
            config,
            source,
            router,
            checkpoint,
            counters: Counters::new(),
            cancel,
        }
    }

    pub async fn run(&self) -> Result<RunSummary, MigrationError> {
        let run_id = self
            .config
            .run
            .run_id
            .unwrap_or_else(|| Utc::now().timestamp());
        let prev_run_id = self.config.run.prev_run_id;
        let checkpoint_table = format!(
            "{}.{}",
            self.config.table.source_keyspace, self.config.table.source_table
        );

        info!(
            run_id,
            prev_run_id,
            table = %checkpoint_table,
            mode = sink_mode_label(&self.config),
            "Migration run starting"
        );

        // The split size is the one knob that must be settled before the
        // source enumerates partitions.
        let estimate = self.source.estimate().await;
        let split_mb = plan_split_size(&self.config.split, estimate);

        self.checkpoint.init_tables().await?;

        if self.config.truncate_target {
            self.truncate_target().await?;
        }

        let canonical = self
            .source
            .enumerate_partitions(SplitHint { split_mb })
            .await?;

        let work = if prev_run_id > 0 {
            let pending = self
                .checkpoint
                .get_pending_partitions(&checkpoint_table, prev_run_id)
                .await?;
            if self.config.insert.mode == InsertMode::Copy
                && !self.config.copy.replace
                && !self.config.truncate_target
            {
                warn!(
                    "Resuming STARTED partitions with plain COPY is safe only against an \
                     empty target; prefer copy.replace=true or insert.mode=INSERT"
                );
            }
            let filtered = intersect_pending(&canonical, &pending);
            info!(
                pending = pending.len(),
                canonical = canonical.len(),
                work = filtered.len(),
                "Resuming from previous run"
            );
            filtered
        } else {
            canonical
        };

        self.checkpoint
            .init_run(
                &checkpoint_table,
                run_id,
                prev_run_id,
                &work,
                &self.config.run.run_type,
            )
            .await?;

        let encoder = Arc::new(self.build_encoder().await?);
        let pk_columns = Arc::new(self.resolve_primary_key(&encoder).await?);

        let executor = Arc::new(PartitionExecutor {
            config: self.config.clone(),
            source: self.source.clone(),
            router: self.router.clone(),
            checkpoint: self.checkpoint.clone(),
            encoder,
            pk_columns,
            counters: self.counters.clone(),
            cancel: self.cancel.clone(),
            checkpoint_table: checkpoint_table.clone(),
            run_id,
        });

        let partitions_total = work.len();
        self.fan_out(executor, work).await?;

        let snapshot = self.counters.snapshot();
        let validation = self
            .config
            .validation_enabled
            .then(|| validate_counters(&snapshot));
        if let Some(report) = &validation {
            if report.matched {
                info!(summary = %report.summary, "Validation passed");
            } else {
                error!(summary = %report.summary, "Validation failed");
            }
        }

        let summary = format!(
            "partitions={partitions_total}, completed={}, failed={}, rows_read={}, \
             rows_written={}, rows_skipped={}, duplicates={}, rows_lost={}, mode={}",
            snapshot.partitions_completed,
            snapshot.partitions_failed,
            snapshot.rows_read,
            snapshot.rows_written,
            snapshot.rows_skipped,
            snapshot.rows_skipped_duplicates,
            snapshot.rows_lost,
            sink_mode_label(&self.config),
        );
        self.checkpoint
            .end_run(&checkpoint_table, run_id, &summary)
            .await?;

        let succeeded = snapshot.partitions_failed == 0
            && validation.as_ref().is_none_or(|report| report.matched);
        info!(run_id, succeeded, %summary, "Migration run ended");

        Ok(RunSummary {
            run_id,
            partitions_total,
            snapshot,
            validation,
            succeeded,
        })
    }

    /// One worker per descriptor, bounded so concurrent target transactions
    /// stay under the server's client budget.
    async fn fan_out(
        &self,
        executor: Arc<PartitionExecutor>,
        work: Vec<PartitionDescriptor>,
    ) -> Result<(), MigrationError> {
        let semaphore = Arc::new(Semaphore::new(self.config.run.parallelism));
        let mut tasks = JoinSet::new();

        for descriptor in work {
            let executor = executor.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return Err(MigrationError::Cancelled),
                };
                executor.run(descriptor).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                // The executor has already counted, logged, and
                // checkpointed both outcomes.
                Ok(_) => {}
                Err(join_err) => {
                    error!(%join_err, "Partition task aborted");
                    self.counters.partition_failed();
                }
            }
        }
        Ok(())
    }

    async fn truncate_target(&self) -> Result<(), MigrationError> {
        let conn = self.router.open(0).await?;
        let sql = format!(
            "TRUNCATE TABLE {}.{}",
            quote_ident(&self.config.table.target_schema),
            quote_ident(&self.config.table.target_table)
        );
        conn.client
            .batch_execute(&sql)
            .await
            .map_err(SinkError::from)?;
        info!(
            table = %self.config.table.target_table,
            "Target table truncated before run"
        );
        Ok(())
    }

    async fn build_encoder(&self) -> Result<RowEncoder, MigrationError> {
        let source_columns = self.source.columns().await?;
        let constant_names: Vec<String> = self
            .config
            .table
            .constant_columns
            .iter()
            .map(|(name, _)| name.clone())
            .collect();
        let columns = TargetColumns::build(
            &source_columns,
            &self.config.table.column_mapping,
            &constant_names,
        );

        let run_start = Utc::now();
        let constants = self
            .config
            .table
            .constant_columns
            .iter()
            .map(|(_, raw)| parse_constant(raw, run_start))
            .collect();

        let dialect = CsvDialect {
            delimiter: self.config.copy.delimiter,
            quote: self.config.copy.quote,
        };
        Ok(RowEncoder::new(columns, constants, dialect))
    }

    /// PK columns for the idempotent insert path: config wins, then target
    /// catalog discovery, then the first target column with a warning.
    async fn resolve_primary_key(
        &self,
        encoder: &RowEncoder,
    ) -> Result<Vec<String>, MigrationError> {
        if self.config.insert.mode != InsertMode::Insert {
            return Ok(Vec::new());
        }
        if !self.config.table.primary_key.is_empty() {
            return Ok(self.config.table.primary_key.clone());
        }

        let conn = self.router.open(0).await?;
        let discovered = discover_primary_key(
            &conn.client,
            &self.config.table.target_schema,
            &self.config.table.target_table,
        )
        .await;

        match discovered {
            Ok(columns) if !columns.is_empty() => Ok(columns),
            Ok(_) => Ok(self.first_column_fallback(encoder, "table has no primary key")),
            Err(err) => Ok(self.first_column_fallback(encoder, &err.to_string())),
        }
    }

    fn first_column_fallback(&self, encoder: &RowEncoder, reason: &str) -> Vec<String> {
        let first = encoder
            .columns()
            .names()
            .first()
            .cloned()
            .unwrap_or_default();
        warn!(
            column = %first,
            reason,
            "Primary-key discovery failed; falling back to the first target column"
        );
        vec![first]
    }
}

pub(crate) fn intersect_pending(
    canonical: &[PartitionDescriptor],
    pending: &[PartitionDescriptor],
) -> Vec<PartitionDescriptor> {
    let ids: HashSet<i32> = pending.iter().map(|p| p.partition_id).collect();
    canonical
        .iter()
        .filter(|p| ids.contains(&p.partition_id))
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::migration::partition::split_token_ring;

    #[test]
    fn resume_keeps_only_pending_ids() {
        let canonical = split_token_ring(10);
        let pending = vec![
            PartitionDescriptor::rangeless(1),
            PartitionDescriptor::rangeless(4),
            PartitionDescriptor::rangeless(7),
        ];
        let work = intersect_pending(&canonical, &pending);
        assert_eq!(work.len(), 3);
        // The canonical (ranged) descriptors survive, not the checkpoint's
        // rangeless echoes.
        assert_eq!(work[0], canonical[1]);
        assert_eq!(work[1], canonical[4]);
        assert_eq!(work[2], canonical[7]);
    }

    #[test]
    fn fresh_run_with_no_pending_means_no_work() {
        let canonical = split_token_ring(4);
        assert!(intersect_pending(&canonical, &[]).is_empty());
    }

    #[test]
    fn pending_ids_outside_the_canonical_plan_are_dropped() {
        let canonical = split_token_ring(2);
        let pending = vec![
            PartitionDescriptor::rangeless(1),
            PartitionDescriptor::rangeless(9),
        ];
        let work = intersect_pending(&canonical, &pending);
        assert_eq!(work.len(), 1);
        assert_eq!(work[0].partition_id, 1);
    }
}
