use engine_config::error::ConfigError;
use engine_core::error::CheckpointError;
use engine_runtime::error::MigrationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Migration failed: {0}")]
    Migration(#[from] MigrationError),

    #[error("Checkpoint store error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Shutdown requested")]
    ShutdownRequested,
}
