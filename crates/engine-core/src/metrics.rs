use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Default)]
struct InnerCounters {
    rows_read: AtomicU64,
    rows_written: AtomicU64,
    rows_skipped: AtomicU64,
    rows_skipped_duplicates: AtomicU64,
    rows_lost: AtomicU64,
    partitions_completed: AtomicU64,
    partitions_failed: AtomicU64,
}

/// Run-wide counters shared by reference across partition workers. These are
/// the only cross-partition mutable state besides the checkpoint store, and
/// the only input to end-of-run validation (no `COUNT(*)` against the
/// target).
#[derive(Debug, Clone, Default)]
pub struct Counters {
    inner: Arc<InnerCounters>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub rows_read: u64,
    pub rows_written: u64,
    pub rows_skipped: u64,
    pub rows_skipped_duplicates: u64,
    /// Rows read in partitions whose transaction rolled back.
    pub rows_lost: u64,
    pub partitions_completed: u64,
    pub partitions_failed: u64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rows_read(&self, count: u64) {
        self.inner.rows_read.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_rows_written(&self, count: u64) {
        self.inner.rows_written.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_rows_skipped(&self, count: u64) {
        self.inner.rows_skipped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_rows_skipped_duplicates(&self, count: u64) {
        self.inner
            .rows_skipped_duplicates
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_rows_lost(&self, count: u64) {
        self.inner.rows_lost.fetch_add(count, Ordering::Relaxed);
    }

    pub fn partition_completed(&self) {
        self.inner
            .partitions_completed
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn partition_failed(&self) {
        self.inner.partitions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            rows_read: self.inner.rows_read.load(Ordering::Relaxed),
            rows_written: self.inner.rows_written.load(Ordering::Relaxed),
            rows_skipped: self.inner.rows_skipped.load(Ordering::Relaxed),
            rows_skipped_duplicates: self.inner.rows_skipped_duplicates.load(Ordering::Relaxed),
            rows_lost: self.inner.rows_lost.load(Ordering::Relaxed),
            partitions_completed: self.inner.partitions_completed.load(Ordering::Relaxed),
            partitions_failed: self.inner.partitions_failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_aggregate_across_clones() {
        let counters = Counters::new();
        let worker = counters.clone();
        worker.add_rows_read(10);
        worker.add_rows_written(8);
        worker.add_rows_skipped(2);
        counters.partition_completed();

        let snap = counters.snapshot();
        assert_eq!(snap.rows_read, 10);
        assert_eq!(snap.rows_written, 8);
        assert_eq!(snap.rows_skipped, 2);
        assert_eq!(snap.partitions_completed, 1);
        assert_eq!(snap.partitions_failed, 0);
    }
}
