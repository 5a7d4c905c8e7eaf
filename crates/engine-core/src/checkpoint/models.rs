use chrono::{DateTime, Utc};
use model::migration::{
    partition::PartitionDescriptor,
    status::{PartitionStatus, RunStatus},
};

/// One row of `run_info`: metadata for one migration attempt of one logical
/// table. `run_id` is monotonic and never reused for the same table.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub table_name: String,
    pub run_id: i64,
    pub run_type: String,
    pub prev_run_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub run_info: Option<String>,
    pub status: RunStatus,
}

/// One row of `run_details`: the per-partition checkpoint. A PASS row means
/// "the target transaction carrying this partition's data committed
/// durably"; resume never reprocesses it.
#[derive(Debug, Clone)]
pub struct RunDetail {
    pub table_name: String,
    pub run_id: i64,
    pub start_time: DateTime<Utc>,
    pub token_min: i64,
    pub token_max: i64,
    pub partition_id: i32,
    pub status: PartitionStatus,
    pub run_info: Option<String>,
}

impl RunDetail {
    pub fn descriptor(&self) -> PartitionDescriptor {
        PartitionDescriptor {
            partition_id: self.partition_id,
            token_min: self.token_min,
            token_max: self.token_max,
        }
    }
}
