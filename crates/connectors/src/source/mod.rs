use crate::error::ReadError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use model::{core::row::Row, migration::partition::PartitionDescriptor};

pub mod cassandra;
pub mod mongo;

/// Default driver page size: the reader never buffers more than one page
/// ahead of the sink.
pub const DEFAULT_FETCH_SIZE: i32 = 10_000;

/// Partition count used when the source cannot report its size.
const FALLBACK_PARTITIONS: usize = 64;

/// Upper bound on partitions per run; keeps checkpoint init and resume
/// queries cheap even for very large tables.
const MAX_PARTITIONS: usize = 32_768;

/// What the source can tell us about the table before the run, feeding the
/// split-size planner. Every field is best-effort.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceEstimate {
    pub table_size_bytes: Option<u64>,
    /// Max-to-mean partition size across the source's own ranges.
    pub skew_ratio: Option<f64>,
}

/// Planner output consumed by `enumerate_partitions`.
#[derive(Debug, Clone, Copy)]
pub struct SplitHint {
    pub split_mb: u32,
}

pub type RowStream<'a> = BoxStream<'a, Result<Row, ReadError>>;

/// A source table that can be partitioned and drained partition-by-partition.
///
/// `read` yields a finite, lazy sequence that is not restartable
/// mid-iteration: the caller either consumes it or abandons the whole
/// partition and retries it in a later run.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Mapped source columns in source-declared order; frozen per run.
    async fn columns(&self) -> Result<Vec<String>, ReadError>;

    /// Best-effort size statistics; `None` fields mean "unknown".
    async fn estimate(&self) -> SourceEstimate;

    async fn enumerate_partitions(
        &self,
        split: SplitHint,
    ) -> Result<Vec<PartitionDescriptor>, ReadError>;

    async fn read(&self, descriptor: &PartitionDescriptor) -> Result<RowStream<'_>, ReadError>;
}

/// Number of partitions implied by a size estimate and a split size.
pub fn partition_count_for(size_bytes: Option<u64>, split_mb: u32) -> usize {
    match size_bytes {
        Some(bytes) if bytes > 0 => {
            let split_bytes = u64::from(split_mb.max(1)) * 1024 * 1024;
            (bytes.div_ceil(split_bytes) as usize).clamp(1, MAX_PARTITIONS)
        }
        _ => FALLBACK_PARTITIONS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_count_follows_split_size() {
        let gib = 1024 * 1024 * 1024;
        assert_eq!(partition_count_for(Some(10 * gib), 256), 40);
        assert_eq!(partition_count_for(Some(10 * gib), 1024), 10);
        // Partial split still gets its own partition.
        assert_eq!(partition_count_for(Some(gib + 1), 1024), 2);
    }

    #[test]
    fn unknown_size_uses_bounded_fallback() {
        assert_eq!(partition_count_for(None, 256), FALLBACK_PARTITIONS);
        assert_eq!(partition_count_for(Some(0), 256), FALLBACK_PARTITIONS);
    }

    #[test]
    fn partition_count_is_clamped() {
        assert_eq!(partition_count_for(Some(1), 256), 1);
        assert_eq!(partition_count_for(Some(u64::MAX), 128), MAX_PARTITIONS);
    }
}
