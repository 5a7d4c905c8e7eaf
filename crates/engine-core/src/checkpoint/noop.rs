use crate::{
    checkpoint::{CheckpointStore, RunDetail, RunInfo},
    error::CheckpointError,
};
use async_trait::async_trait;
use model::migration::{partition::PartitionDescriptor, status::PartitionStatus};
use tracing::warn;

/// Store used when checkpointing is disabled: every write is dropped and a
/// resume finds nothing. The run still executes, it just cannot be resumed.
pub struct NoopCheckpointStore;

#[async_trait]
impl CheckpointStore for NoopCheckpointStore {
    async fn init_tables(&self) -> Result<(), CheckpointError> {
        Ok(())
    }

    async fn get_pending_partitions(
        &self,
        table: &str,
        _prev_run_id: i64,
    ) -> Result<Vec<PartitionDescriptor>, CheckpointError> {
        warn!(table, "Checkpointing is disabled; nothing to resume");
        Ok(Vec::new())
    }

    async fn init_run(
        &self,
        _table: &str,
        _run_id: i64,
        _prev_run_id: i64,
        _partitions: &[PartitionDescriptor],
        _run_type: &str,
    ) -> Result<(), CheckpointError> {
        Ok(())
    }

    async fn update_run(
        &self,
        _table: &str,
        _run_id: i64,
        _token_min: i64,
        _partition_id: i32,
        _status: PartitionStatus,
        _run_info: Option<&str>,
    ) {
    }

    async fn end_run(
        &self,
        _table: &str,
        _run_id: i64,
        _summary: &str,
    ) -> Result<(), CheckpointError> {
        Ok(())
    }

    async fn load_run_info(
        &self,
        _table: &str,
        _run_id: i64,
    ) -> Result<Option<RunInfo>, CheckpointError> {
        Ok(None)
    }

    async fn run_details(
        &self,
        _table: &str,
        _run_id: i64,
    ) -> Result<Vec<RunDetail>, CheckpointError> {
        Ok(Vec::new())
    }
}
