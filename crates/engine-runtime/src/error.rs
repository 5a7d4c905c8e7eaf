use connectors::error::{ConnectError, ReadError};
use engine_core::error::{CheckpointError, SinkError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Configuration error: {0}")]
    Config(#[from] engine_config::error::ConfigError),

    #[error("Connection failed: {0}")]
    Connect(#[from] ConnectError),

    #[error("Source read failed: {0}")]
    Read(#[from] ReadError),

    #[error("Sink write failed: {0}")]
    Write(#[from] SinkError),

    #[error("Checkpoint store failed: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Cancelled by supervisor")]
    Cancelled,
}

impl MigrationError {
    /// Duplicate primary key on a sink that cannot absorb it; the documented
    /// remediation is `copy.replace=true` or `insert.mode=INSERT`.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, MigrationError::Write(e) if e.is_unique_violation())
    }
}
