use thiserror::Error;

/// Malformed or missing configuration. Surfaced before any network I/O;
/// terminal for the run.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read the configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed properties file: {0}")]
    Malformed(String),

    #[error("Missing required config key: {0}")]
    MissingKey(String),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

impl ConfigError {
    pub fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}
