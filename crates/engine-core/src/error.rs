use thiserror::Error;
use tokio_postgres::error::SqlState;

/// Per-row conversion failure. Counted in `rows_skipped`; never fails the
/// partition.
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Row carries {got} values but the run maps {expected} source columns")]
    Arity { expected: usize, got: usize },
}

/// Sink protocol or write failure; fails the partition and rolls back its
/// transaction.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("Sink protocol error: {0}")]
    Protocol(String),

    #[error("Sink is closed")]
    Closed,
}

impl SinkError {
    /// Duplicate primary key on a sink that does not handle duplicates
    /// (COPY without REPLACE). Remediation is resuming with `copy.replace`
    /// or INSERT mode.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            SinkError::Postgres(err) => err.code() == Some(&SqlState::UNIQUE_VIOLATION),
            _ => false,
        }
    }
}

/// Checkpoint-store failure. `update_run` swallows these after logging;
/// everything else propagates.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("Checkpoint store connection failed: {0}")]
    Connect(#[from] connectors::error::ConnectError),

    #[error("Run {run_id} for table {table} already exists; refusing to reuse a run id")]
    DuplicateRun { table: String, run_id: i64 },

    #[error("Checkpoint row is corrupt: {0}")]
    Corrupt(String),
}
