use crate::{
    checkpoint::{CheckpointStore, RunDetail, RunInfo},
    error::CheckpointError,
    retry::RetryPolicy,
    sink::quote_ident,
};
use async_trait::async_trait;
use connectors::target::router::ConnectionRouter;
use model::migration::{
    partition::PartitionDescriptor,
    status::{PartitionStatus, RunStatus},
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_postgres::Client;
use tracing::{error, info, warn};

/// Checkpoint store backed by the target database itself.
///
/// Holds one dedicated connection (routed like partition 0), separate from
/// every bulk-load connection; all statements are short point reads/writes
/// that the driver interleaves safely across concurrent executors. The
/// explicit `init_run` transaction takes the write lock.
pub struct PgCheckpointStore {
    client: Arc<RwLock<Client>>,
    schema: String,
    retry: RetryPolicy,
}

impl PgCheckpointStore {
    pub async fn connect(
        router: &ConnectionRouter,
        schema: &str,
    ) -> Result<Self, CheckpointError> {
        let conn = router.open(0).await?;
        Ok(Self {
            client: Arc::new(RwLock::new(conn.client)),
            schema: schema.to_string(),
            retry: RetryPolicy::for_checkpoint(),
        })
    }

    fn table(&self, name: &str) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(name))
    }

    /// The status predicate only matches rows in a legal predecessor state,
    /// so an illegal transition (PASS rewritten, NOT_STARTED jumping straight
    /// to PASS) updates nothing and surfaces as a warning in `update_run`.
    async fn try_update_detail(
        &self,
        table: &str,
        run_id: i64,
        token_min: i64,
        partition_id: i32,
        status: PartitionStatus,
        run_info: Option<&str>,
    ) -> Result<u64, CheckpointError> {
        let allowed_from: Vec<&str> = PartitionStatus::legal_predecessors(status)
            .iter()
            .map(PartitionStatus::as_str)
            .collect();
        let sql = format!(
            "UPDATE {} SET status = $5, \
                    run_info = COALESCE($6, run_info), \
                    start_time = CASE WHEN $5 = 'STARTED' THEN now() ELSE start_time END \
              WHERE table_name = $1 AND run_id = $2 AND token_min = $3 AND partition_id = $4 \
                AND status = ANY($7)",
            self.table("run_details")
        );
        let client = self.client.read().await;
        let updated = client
            .execute(
                &sql,
                &[
                    &table,
                    &run_id,
                    &token_min,
                    &partition_id,
                    &status.as_str(),
                    &run_info,
                    &allowed_from,
                ],
            )
            .await?;
        Ok(updated)
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn init_tables(&self) -> Result<(), CheckpointError> {
        let client = self.client.read().await;

        if let Err(err) = client
            .batch_execute(&format!(
                "CREATE SCHEMA IF NOT EXISTS {}",
                quote_ident(&self.schema)
            ))
            .await
        {
            warn!(%err, schema = %self.schema, "Could not ensure checkpoint schema");
        }

        client
            .batch_execute(&format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                    table_name    text, \
                    run_id        bigint, \
                    run_type      text, \
                    prev_run_id   bigint, \
                    start_time    timestamptz DEFAULT now(), \
                    end_time      timestamptz, \
                    run_info      text, \
                    status        text, \
                    PRIMARY KEY (table_name, run_id))",
                self.table("run_info")
            ))
            .await?;

        client
            .batch_execute(&format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                    table_name    text, \
                    run_id        bigint, \
                    start_time    timestamptz DEFAULT now(), \
                    token_min     bigint, \
                    token_max     bigint, \
                    partition_id  int, \
                    status        text, \
                    run_info      text, \
                    PRIMARY KEY (table_name, run_id, token_min, partition_id))",
                self.table("run_details")
            ))
            .await?;

        for (name, sql) in [
            (
                "run_details_status_idx",
                format!(
                    "CREATE INDEX IF NOT EXISTS run_details_status_idx \
                     ON {} (table_name, run_id, status)",
                    self.table("run_details")
                ),
            ),
            (
                "run_info_status_idx",
                format!(
                    "CREATE INDEX IF NOT EXISTS run_info_status_idx \
                     ON {} (table_name, status)",
                    self.table("run_info")
                ),
            ),
        ] {
            if let Err(err) = client.batch_execute(&sql).await {
                warn!(%err, index = name, "Could not create checkpoint index");
            }
        }
        Ok(())
    }

    async fn get_pending_partitions(
        &self,
        table: &str,
        prev_run_id: i64,
    ) -> Result<Vec<PartitionDescriptor>, CheckpointError> {
        if prev_run_id <= 0 {
            warn!(table, "No previous run id; nothing to resume");
            return Ok(Vec::new());
        }

        match self.load_run_info(table, prev_run_id).await? {
            None => {
                warn!(table, prev_run_id, "Previous run not found; nothing to resume");
                return Ok(Vec::new());
            }
            Some(info) if info.status == RunStatus::NotStarted => {
                warn!(table, prev_run_id, "Previous run never started; nothing to resume");
                return Ok(Vec::new());
            }
            Some(_) => {}
        }

        let pending: Vec<&str> = PartitionStatus::pending_states()
            .iter()
            .map(PartitionStatus::as_str)
            .collect();
        let sql = format!(
            "SELECT token_min, token_max, partition_id FROM {} \
              WHERE table_name = $1 AND run_id = $2 AND status = ANY($3) \
              ORDER BY partition_id",
            self.table("run_details")
        );
        let client = self.client.read().await;
        let rows = client.query(&sql, &[&table, &prev_run_id, &pending]).await?;
        Ok(rows
            .iter()
            .map(|row| PartitionDescriptor {
                token_min: row.get(0),
                token_max: row.get(1),
                partition_id: row.get(2),
            })
            .collect())
    }

    async fn init_run(
        &self,
        table: &str,
        run_id: i64,
        prev_run_id: i64,
        partitions: &[PartitionDescriptor],
        run_type: &str,
    ) -> Result<(), CheckpointError> {
        let mut client = self.client.write().await;
        let tx = client.transaction().await?;

        let exists_sql = format!(
            "SELECT 1 FROM {} WHERE table_name = $1 AND run_id = $2",
            self.table("run_info")
        );
        if tx.query_opt(&exists_sql, &[&table, &run_id]).await?.is_some() {
            return Err(CheckpointError::DuplicateRun {
                table: table.to_string(),
                run_id,
            });
        }

        let insert_info_sql = format!(
            "INSERT INTO {} (table_name, run_id, run_type, prev_run_id, status) \
             VALUES ($1, $2, $3, $4, $5)",
            self.table("run_info")
        );
        tx.execute(
            &insert_info_sql,
            &[
                &table,
                &run_id,
                &run_type,
                &prev_run_id,
                &RunStatus::NotStarted.as_str(),
            ],
        )
        .await?;

        let insert_detail_sql = format!(
            "INSERT INTO {} (table_name, run_id, token_min, token_max, partition_id, status) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            self.table("run_details")
        );
        let statement = tx.prepare(&insert_detail_sql).await?;
        let tx_ref = &tx;
        futures::future::try_join_all(partitions.iter().map(|p| {
            let statement = statement.clone();
            async move {
                tx_ref
                    .execute(
                        &statement,
                        &[
                            &table,
                            &run_id,
                            &p.token_min,
                            &p.token_max,
                            &p.partition_id,
                            &PartitionStatus::NotStarted.as_str(),
                        ],
                    )
                    .await
            }
        }))
        .await?;

        let start_sql = format!(
            "UPDATE {} SET status = $3 WHERE table_name = $1 AND run_id = $2",
            self.table("run_info")
        );
        tx.execute(&start_sql, &[&table, &run_id, &RunStatus::Started.as_str()])
            .await?;

        tx.commit().await?;
        info!(
            table,
            run_id,
            prev_run_id,
            partitions = partitions.len(),
            "Run registered in checkpoint store"
        );
        Ok(())
    }

    async fn update_run(
        &self,
        table: &str,
        run_id: i64,
        token_min: i64,
        partition_id: i32,
        status: PartitionStatus,
        run_info: Option<&str>,
    ) {
        let outcome = self
            .retry
            .run(|| {
                self.try_update_detail(table, run_id, token_min, partition_id, status, run_info)
            })
            .await;

        match outcome {
            Ok(0) => warn!(
                table,
                run_id,
                partition_id,
                status = %status,
                "Checkpoint update matched no detail row in a legal predecessor state"
            ),
            Ok(_) => {}
            Err(err) => {
                // Checkpoint staleness must not mask the migration outcome.
                error!(
                    table,
                    run_id,
                    partition_id,
                    status = %status,
                    %err,
                    "Checkpoint update failed; continuing"
                );
            }
        }
    }

    async fn end_run(
        &self,
        table: &str,
        run_id: i64,
        summary: &str,
    ) -> Result<(), CheckpointError> {
        let sql = format!(
            "UPDATE {} SET end_time = now(), run_info = $3, status = $4 \
              WHERE table_name = $1 AND run_id = $2",
            self.table("run_info")
        );
        let client = self.client.read().await;
        client
            .execute(
                &sql,
                &[&table, &run_id, &summary, &RunStatus::Ended.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn load_run_info(
        &self,
        table: &str,
        run_id: i64,
    ) -> Result<Option<RunInfo>, CheckpointError> {
        let sql = format!(
            "SELECT table_name, run_id, run_type, prev_run_id, start_time, end_time, \
                    run_info, status \
               FROM {} WHERE table_name = $1 AND run_id = $2",
            self.table("run_info")
        );
        let client = self.client.read().await;
        let row = client.query_opt(&sql, &[&table, &run_id]).await?;
        row.map(|row| {
            let status: String = row.get(7);
            Ok(RunInfo {
                table_name: row.get(0),
                run_id: row.get(1),
                run_type: row.get(2),
                prev_run_id: row.get(3),
                start_time: row.get(4),
                end_time: row.get(5),
                run_info: row.get(6),
                status: status
                    .parse()
                    .map_err(|e| CheckpointError::Corrupt(format!("run_info.status: {e}")))?,
            })
        })
        .transpose()
    }

    async fn run_details(
        &self,
        table: &str,
        run_id: i64,
    ) -> Result<Vec<RunDetail>, CheckpointError> {
        let sql = format!(
            "SELECT table_name, run_id, start_time, token_min, token_max, partition_id, \
                    status, run_info \
               FROM {} WHERE table_name = $1 AND run_id = $2 ORDER BY partition_id",
            self.table("run_details")
        );
        let client = self.client.read().await;
        let rows = client.query(&sql, &[&table, &run_id]).await?;
        rows.iter()
            .map(|row| {
                let status: String = row.get(6);
                Ok(RunDetail {
                    table_name: row.get(0),
                    run_id: row.get(1),
                    start_time: row.get(2),
                    token_min: row.get(3),
                    token_max: row.get(4),
                    partition_id: row.get(5),
                    status: status
                        .parse()
                        .map_err(|e| CheckpointError::Corrupt(format!("run_details.status: {e}")))?,
                    run_info: row.get(7),
                })
            })
            .collect()
    }
}
