use crate::error::CheckpointError;
use async_trait::async_trait;
use model::migration::{partition::PartitionDescriptor, status::PartitionStatus};

pub mod models;
pub mod noop;
pub mod pg;

pub use models::{RunDetail, RunInfo};

/// The resumable checkpoint state machine, persisted in the target database
/// as the `run_info` / `run_details` pair. Each operation is its own short
/// transaction and tolerates concurrent callers from parallel partition
/// executors; no two executors ever write the same detail row.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Creates both tables if absent; secondary indexes are best-effort.
    async fn init_tables(&self) -> Result<(), CheckpointError>;

    /// All partitions of `prev_run_id` still worth processing (NOT_STARTED,
    /// STARTED, or FAIL). Empty, with a warning, when `prev_run_id` is 0,
    /// the prior run does not exist, or the prior run never started.
    async fn get_pending_partitions(
        &self,
        table: &str,
        prev_run_id: i64,
    ) -> Result<Vec<PartitionDescriptor>, CheckpointError>;

    /// Registers a new run and all its partitions in one transaction: the
    /// run_info row (NOT_STARTED), every detail row (NOT_STARTED), then the
    /// run_info flip to STARTED. Fails with DuplicateRun on a reused
    /// `(table, run_id)`. Nothing may touch a partition before this commits.
    async fn init_run(
        &self,
        table: &str,
        run_id: i64,
        prev_run_id: i64,
        partitions: &[PartitionDescriptor],
        run_type: &str,
    ) -> Result<(), CheckpointError>;

    /// Point-updates one detail row. Transitioning to STARTED also refreshes
    /// `start_time`, and only rows in a legal predecessor state of `status`
    /// are matched, so an illegal transition (such as rewriting PASS) leaves
    /// the row untouched. Never returns an error: checkpoint staleness is
    /// preferable to masking the real migration outcome, so failures are
    /// retried briefly and then logged.
    async fn update_run(
        &self,
        table: &str,
        run_id: i64,
        token_min: i64,
        partition_id: i32,
        status: PartitionStatus,
        run_info: Option<&str>,
    );

    /// Seals the run: end_time, summary text, status ENDED.
    async fn end_run(&self, table: &str, run_id: i64, summary: &str)
    -> Result<(), CheckpointError>;

    async fn load_run_info(
        &self,
        table: &str,
        run_id: i64,
    ) -> Result<Option<RunInfo>, CheckpointError>;

    /// All detail rows of a run, ordered by partition id.
    async fn run_details(&self, table: &str, run_id: i64)
    -> Result<Vec<RunDetail>, CheckpointError>;
}
